use std::collections::HashMap;
use std::sync::Arc;

use ctf_core::algebraic::{AlgebraicStructure, Ring};
use ctf_core::communicator::{Communicator, LocalCommunicator};
use ctf_core::kernel::LocalKernel;
use ctf_core::planner::{LinearCostModel, Planner};
use ctf_core::tensor::{DistTensor, SymTag};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn dense_matrix(n: usize, fill: f64) -> DistTensor<f64> {
    let mut t = DistTensor::<f64>::zeros(2, vec![n, n], vec![SymTag::NS, SymTag::NS], None).unwrap();
    t.data.iter_mut().for_each(|x| *x = fill);
    t
}

/// Raw `LocalKernel::contract` on already-local, unvirtualized buffers — the
/// innermost loop nest every reducer layer eventually bottoms out in.
fn bench_local_kernel_gemm(c: &mut Criterion) {
    let alg = Ring::<f64>::new();
    let kernel = LocalKernel::new(alg);
    let mut group = c.benchmark_group("local_kernel_gemm");
    for &n in &[8usize, 32, 64] {
        let a = vec![1.0f64; n * n];
        let b = vec![1.0f64; n * n];
        let mut extents = HashMap::new();
        extents.insert('i', n);
        extents.insert('j', n);
        extents.insert('k', n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                let mut out = vec![0.0f64; n * n];
                kernel
                    .contract(
                        black_box(&a),
                        &['i', 'k'],
                        black_box(&b),
                        &['k', 'j'],
                        1.0,
                        0.0,
                        &mut out,
                        &['i', 'j'],
                        &extents,
                    )
                    .unwrap();
                out
            })
        });
    }
    group.finish();
}

/// The full plan/layout/execute pipeline on a single rank, dominated by the
/// reducer tree walk and the planner's per-call `dim_of` bookkeeping rather
/// than the kernel itself — the pair of benchmarks brackets how much of
/// `ctf_core::contract`'s cost is the kernel versus everything around it.
fn bench_contract_single_rank(c: &mut Criterion) {
    let alg = Ring::<f64>::new();
    let comm: Arc<dyn Communicator> = Arc::new(LocalCommunicator::new_world(1)[0].clone());
    let planner = Planner::new(alg, LinearCostModel::default());
    let mut group = c.benchmark_group("contract_single_rank");
    for &n in &[8usize, 32, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                let mut a = dense_matrix(n, 1.0);
                let mut b = dense_matrix(n, 1.0);
                let mut out = dense_matrix(n, 0.0);
                ctf_core::contract(
                    black_box(&planner),
                    &comm,
                    1.0,
                    &mut a,
                    &['i', 'k'],
                    &mut b,
                    &['k', 'j'],
                    0.0,
                    &mut out,
                    &['i', 'j'],
                )
                .unwrap();
                out
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_local_kernel_gemm, bench_contract_single_rank);
criterion_main!(benches);
