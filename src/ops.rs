//! §6 operation surface: `contract`, `sum`, `scale`, `slice`, `permute`,
//! `read`/`write`, `reduce`. Plain functions over `DistTensor`/`World`
//! taking already-tokenized `&[char]` index maps, not string-parsing or
//! operator-overloading sugar (out of scope per §1). Each validates input
//! up front, checks the tensor isn't poisoned, and (when `profile` is set)
//! opens a `tracing::debug_span` tagged with the tensor's name.

use crate::algebraic::AlgebraicStructure;
use crate::communicator::Communicator;
use crate::error::{CtfError, Result};
use crate::kernel::LocalKernel;
use crate::planner::{CostModel, PlanState, Planner};
use crate::reducer::{Operand, RunArgs};
use crate::tensor::{self, DistTensor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug_span;

fn check_profiled_span(name: &Option<String>, profile: bool, op: &str) -> tracing::span::EnteredSpan {
    if profile {
        debug_span!("ctf_op", op, tensor = ?name).entered()
    } else {
        tracing::Span::none().entered()
    }
}

/// `C[idx_c] <- alpha*C[idx_c]` — in-place rescale.
pub fn scale<S: AlgebraicStructure>(
    alg: &S,
    alpha: S::Elem,
    c: &mut DistTensor<S::Elem>,
) -> Result<()> {
    c.check_live()?;
    let _span = check_profiled_span(&c.name, c.profile, "scale");
    for v in c.data.iter_mut() {
        *v = alg.mul(alpha, *v);
    }
    Ok(())
}

fn extents_from(idx: &[char], edge_len: &[usize], mapping: &tensor::Mapping) -> HashMap<char, usize> {
    idx.iter()
        .enumerate()
        .map(|(pos, ch)| {
            let dm = &mapping.dims[pos];
            (*ch, dm.local_extent(edge_len[pos]) * dm.virt)
        })
        .collect()
}

/// `C[idx_c] <- beta*C[idx_c] (+) alpha*A[idx_a]`. Requires `A` and `C`
/// already share a mapping (layout match is the caller's job via
/// `redistribute`, same as `contract`'s step 5) — unlike `contract`, this
/// crate doesn't route `sum` through the planner's virtualization/symmetry
/// wrapping, since a single-operand reshape/rescale has no replication or
/// symmetric-group redundancy to resolve.
pub fn sum<S: AlgebraicStructure>(
    alg: &S,
    alpha: S::Elem,
    a: &DistTensor<S::Elem>,
    idx_a: &[char],
    beta: S::Elem,
    c: &mut DistTensor<S::Elem>,
    idx_c: &[char],
) -> Result<()> {
    a.check_live()?;
    c.check_live()?;
    let _span = check_profiled_span(&c.name, c.profile, "sum");
    if idx_a.len() != a.order || idx_c.len() != c.order {
        return Err(CtfError::ShapeMismatch(
            "sum index map length must match operand order".to_string(),
        ));
    }
    if a.mapping != c.mapping {
        return Err(CtfError::Planning(
            "sum requires A and C to already share a mapping; redistribute first".to_string(),
        ));
    }
    let extents = extents_from(idx_a, &a.edge_len, &a.mapping);
    let kernel = LocalKernel::new(alg.clone());
    kernel.sum(&a.data, idx_a, alpha, beta, &mut c.data, idx_c, &extents)
}

/// `C[idx_c] <- beta*C[idx_c] (+) alpha*A[idx_a]`, with `idx_c` a
/// reordering of `idx_a`'s characters. The kernel's per-character stride
/// table already encodes the transpose this implies — `permute` is exactly
/// `sum` called with the output's characters in a different order, not a
/// separate algorithm.
pub fn permute<S: AlgebraicStructure>(
    alg: &S,
    alpha: S::Elem,
    a: &DistTensor<S::Elem>,
    idx_a: &[char],
    beta: S::Elem,
    c: &mut DistTensor<S::Elem>,
    idx_c: &[char],
) -> Result<()> {
    sum(alg, alpha, a, idx_a, beta, c, idx_c)
}

/// `C <- alpha*sum(A*B) + beta*C`, routed through the planner (§4.7): plans
/// the reducer tree, redistributes any operand whose mapping doesn't match
/// the plan's target (`FRESH -> PLANNED -> LAID_OUT`), then runs the tree
/// (`LAID_OUT -> EXECUTING -> DONE`). A planner-detected error (before any
/// data movement) is returned without touching any tensor's state, per §7's
/// "the tensor is never left half-redistributed"; a failure once data has
/// started moving or the kernel has started running poisons every operand.
#[allow(clippy::too_many_arguments)]
pub fn contract<S, M>(
    planner: &Planner<S, M>,
    comm: &Arc<dyn Communicator>,
    alpha: S::Elem,
    a: &mut DistTensor<S::Elem>,
    idx_a: &[char],
    b: &mut DistTensor<S::Elem>,
    idx_b: &[char],
    beta: S::Elem,
    c: &mut DistTensor<S::Elem>,
    idx_c: &[char],
) -> Result<()>
where
    S: AlgebraicStructure,
    M: CostModel,
{
    a.check_live()?;
    b.check_live()?;
    c.check_live()?;
    if !planner.alg.is_semiring() {
        return Err(CtfError::Planning(
            "contract requires a semiring; this algebraic structure is monoid-only".to_string(),
        ));
    }
    let _span = check_profiled_span(&c.name, c.profile, "contract");

    let mut plan = planner.plan_contract(comm, a, idx_a, b, idx_b, c, idx_c)?;

    let layout_result: Result<()> = (|| {
        if a.mapping != plan.target_mapping_a {
            *a = crate::redistribute::redistribute(a, plan.target_mapping_a.clone(), comm.as_ref())?;
        }
        if b.mapping != plan.target_mapping_b {
            *b = crate::redistribute::redistribute(b, plan.target_mapping_b.clone(), comm.as_ref())?;
        }
        if c.mapping != plan.target_mapping_c {
            *c = crate::redistribute::redistribute(c, plan.target_mapping_c.clone(), comm.as_ref())?;
        }
        Ok(())
    })();
    if let Err(e) = layout_result {
        a.poisoned = true;
        b.poisoned = true;
        c.poisoned = true;
        plan.state = PlanState::Failed;
        return Err(e);
    }
    plan.state = PlanState::LaidOut;
    plan.state = PlanState::Executing;

    let a_strides = LocalKernel::<S>::strides(idx_a, &plan.extents);
    let b_strides = LocalKernel::<S>::strides(idx_b, &plan.extents);
    let c_strides = LocalKernel::<S>::strides(idx_c, &plan.extents);
    let run_result = plan.tree.run(RunArgs {
        a: Operand {
            data: &a.data,
            idx: idx_a,
            strides: &a_strides,
            base: 0,
        },
        b: Some(Operand {
            data: &b.data,
            idx: idx_b,
            strides: &b_strides,
            base: 0,
        }),
        alpha,
        beta,
        c: &mut c.data,
        c_idx: idx_c,
        c_strides: &c_strides,
        c_base: 0,
        extents: &plan.extents,
    });

    match run_result {
        Ok(()) => {
            plan.state = PlanState::Done;
            Ok(())
        }
        Err(e) => {
            c.poisoned = true;
            plan.state = PlanState::Failed;
            Err(e)
        }
    }
}

fn trivial_mapping(mapping: &tensor::Mapping) -> bool {
    mapping.dims.iter().all(|dm| dm.phys == 1 && dm.virt == 1)
}

/// `dst[offsets..ends] <- beta*dst[offsets..ends] (+) alpha*src[offsets_src..ends_src]`.
/// Requires both tensors to carry a trivial (single-process) mapping: a
/// general distributed slice needs to route each destination cell to
/// whichever rank owns the corresponding source cell, which is a
/// redistribution-shaped problem this crate does not generalize `slice`
/// into — documented here rather than silently mishandled.
#[allow(clippy::too_many_arguments)]
pub fn slice<S: AlgebraicStructure>(
    alg: &S,
    offsets: &[usize],
    ends: &[usize],
    beta: S::Elem,
    dst: &mut DistTensor<S::Elem>,
    src: &DistTensor<S::Elem>,
    offsets_src: &[usize],
    ends_src: &[usize],
    alpha: S::Elem,
) -> Result<()> {
    dst.check_live()?;
    src.check_live()?;
    if !trivial_mapping(&dst.mapping) || !trivial_mapping(&src.mapping) {
        return Err(CtfError::Planning(
            "slice is only implemented for single-process mappings in this crate".to_string(),
        ));
    }
    if offsets.len() != ends.len()
        || offsets_src.len() != ends_src.len()
        || offsets.len() != offsets_src.len()
    {
        return Err(CtfError::ShapeMismatch(
            "slice box dimensionality must match on both sides".to_string(),
        ));
    }
    let shape: Vec<usize> = ends
        .iter()
        .zip(offsets.iter())
        .map(|(e, o)| e - o)
        .collect();
    let shape_src: Vec<usize> = ends_src
        .iter()
        .zip(offsets_src.iter())
        .map(|(e, o)| e - o)
        .collect();
    if shape != shape_src {
        return Err(CtfError::ShapeMismatch(
            "slice box shape must match between source and destination".to_string(),
        ));
    }

    let ranges: Vec<std::ops::Range<usize>> = shape.iter().map(|&l| 0..l).collect();
    for rel in crate::kernel::cartesian_or_unit(ranges) {
        let dst_coords: Vec<usize> = rel.iter().zip(offsets.iter()).map(|(r, o)| r + o).collect();
        let src_coords: Vec<usize> = rel
            .iter()
            .zip(offsets_src.iter())
            .map(|(r, o)| r + o)
            .collect();
        let dst_idx = tensor::global_index(&dst_coords, &dst.edge_len) as usize;
        let src_idx = tensor::global_index(&src_coords, &src.edge_len) as usize;
        dst.data[dst_idx] = alg.add(
            alg.mul(beta, dst.data[dst_idx]),
            alg.mul(alpha, src.data[src_idx]),
        );
    }
    Ok(())
}

/// Collective: `T[g] <- alpha*T[g] (+) beta*v` for every `(key, value)` pair,
/// routed to the owning rank via the same cyclic-mapping arithmetic
/// `redistribute` uses.
pub fn write<S: AlgebraicStructure>(
    alg: &S,
    comm: &dyn Communicator,
    t: &mut DistTensor<S::Elem>,
    keys: &[u64],
    values: &[S::Elem],
    alpha: S::Elem,
    beta: S::Elem,
) -> Result<()> {
    t.check_live()?;
    if keys.len() != values.len() {
        return Err(CtfError::InvalidInput(
            "write requires keys.len() == values.len()".to_string(),
        ));
    }
    let size = comm.size();
    let mut buckets: Vec<Vec<(u64, S::Elem)>> = (0..size).map(|_| Vec::new()).collect();
    for (&g, &v) in keys.iter().zip(values.iter()) {
        let coords = tensor::coords_from_global(g, &t.edge_len);
        let owner = crate::redistribute::target_rank(&coords, &t.mapping);
        buckets[owner].push((g, v));
    }
    let send: std::result::Result<Vec<Vec<u8>>, CtfError> = buckets
        .into_iter()
        .map(|b| {
            bincode::serialize(&b).map_err(|e| CtfError::CollectiveFailure {
                rank: comm.rank(),
                message: format!("write bucket encode failed: {}", e),
            })
        })
        .collect();
    let received = comm.all_to_all_bytes(send?)?;
    for raw in received {
        let entries: Vec<(u64, S::Elem)> =
            bincode::deserialize(&raw).map_err(|e| CtfError::CollectiveFailure {
                rank: comm.rank(),
                message: format!("write bucket decode failed: {}", e),
            })?;
        for (g, v) in entries {
            let coords = tensor::coords_from_global(g, &t.edge_len);
            let idx = crate::redistribute::local_index(&coords, &t.edge_len, &t.mapping);
            t.data[idx] = alg.add(alg.mul(alpha, t.data[idx]), alg.mul(beta, v));
        }
    }
    Ok(())
}

/// Collective: returns `alpha*T[g] (+) beta*vin` for every key, identical on
/// every rank. `keys`/`vin` must be the same on every calling rank (a
/// collective read, per §6).
pub fn read<S: AlgebraicStructure>(
    alg: &S,
    comm: &dyn Communicator,
    t: &DistTensor<S::Elem>,
    keys: &[u64],
    vin: &[S::Elem],
    alpha: S::Elem,
    beta: S::Elem,
) -> Result<Vec<S::Elem>> {
    t.check_live()?;
    if keys.len() != vin.len() {
        return Err(CtfError::InvalidInput(
            "read requires keys.len() == vin.len()".to_string(),
        ));
    }
    let mut local_contrib: Vec<Option<S::Elem>> = vec![None; keys.len()];
    for (i, &g) in keys.iter().enumerate() {
        let coords = tensor::coords_from_global(g, &t.edge_len);
        let owner = crate::redistribute::target_rank(&coords, &t.mapping);
        if owner == comm.rank() {
            let idx = crate::redistribute::local_index(&coords, &t.edge_len, &t.mapping);
            local_contrib[i] = Some(alg.add(alg.mul(alpha, t.data[idx]), alg.mul(beta, vin[i])));
        }
    }
    let payload = bincode::serialize(&local_contrib).map_err(|e| CtfError::CollectiveFailure {
        rank: comm.rank(),
        message: format!("read payload encode failed: {}", e),
    })?;
    let gathered = comm.allgather_bytes(payload)?;
    let mut result = vec![alg.identity(); keys.len()];
    for raw in gathered {
        let v: Vec<Option<S::Elem>> =
            bincode::deserialize(&raw).map_err(|e| CtfError::CollectiveFailure {
                rank: comm.rank(),
                message: format!("read payload decode failed: {}", e),
            })?;
        for (i, maybe) in v.into_iter().enumerate() {
            if let Some(val) = maybe {
                result[i] = val;
            }
        }
    }
    Ok(result)
}

/// Collective reduction ops (§6); `Norm2` is the only one that needs a
/// post-reduce finishing step (`sqrt` of the summed squares).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
    Norm1,
    Norm2,
    MaxAbs,
}

pub fn reduce<T>(comm: &dyn Communicator, t: &DistTensor<T>, op: ReduceOp) -> Result<T>
where
    T: num_traits::Float + serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
{
    t.check_live()?;
    let local = match op {
        ReduceOp::Sum => t.data.iter().copied().fold(T::zero(), |a, b| a + b),
        ReduceOp::Min => t.data.iter().copied().fold(T::infinity(), |a, b| a.min(b)),
        ReduceOp::Max => t.data.iter().copied().fold(T::neg_infinity(), |a, b| a.max(b)),
        ReduceOp::Norm1 => t.data.iter().copied().fold(T::zero(), |a, b| a + b.abs()),
        ReduceOp::Norm2 => t.data.iter().copied().fold(T::zero(), |a, b| a + b * b),
        ReduceOp::MaxAbs => t.data.iter().copied().fold(T::zero(), |a, b| a.max(b.abs())),
    };
    let mut buf = [local];
    match op {
        ReduceOp::Sum | ReduceOp::Norm1 | ReduceOp::Norm2 => {
            crate::communicator::all_reduce_with(comm, &mut buf, 1, |a, b| a + b)?;
        }
        ReduceOp::Min => {
            crate::communicator::all_reduce_with(comm, &mut buf, 1, |a, b| a.min(b))?;
        }
        ReduceOp::Max | ReduceOp::MaxAbs => {
            crate::communicator::all_reduce_with(comm, &mut buf, 1, |a, b| a.max(b))?;
        }
    }
    Ok(if op == ReduceOp::Norm2 { buf[0].sqrt() } else { buf[0] })
}
