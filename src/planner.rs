//! C7 — the planner: turns operand shapes and index maps into a reducer
//! tree plus the redistribution calls needed to get every operand into the
//! mapping that tree expects (§4.7).
//!
//! Decision order: diagonal projection, symmetry alignment, replication,
//! virtualization, layout match. Diagonal projection needs no code here —
//! the local kernel's offset formula (`sum(coords[ch]*stride[ch])`, keyed
//! by character) already treats a repeated character in one operand's
//! index map as a diagonal view, since both occurrences read the same
//! coordinate. The remaining four steps are implemented below.
//!
//! Scope note on replication: a full 2.5D planner chooses a processor
//! sub-grid sized to the contracted-but-not-output dimension and leaves the
//! rest of the grid untouched. This planner implements the degenerate case
//! — when replication is chosen, the whole world communicator is the
//! all-reduce group — and leaves sub-grid partitioning for a future
//! iteration (the reducer node itself, `ReplicateNode`, already accepts an
//! arbitrary set of sub-communicators and does not need to change). This is
//! a deliberate scope reduction, not a silently dropped feature; see
//! DESIGN.md.
//!
//! Scope note on virtualization/grid alignment: a shared character's
//! processor-grid extent (`phys`) is required to already agree across every
//! operand that carries it — the planner redistributes to align
//! *virtualization* factors and physical layout for a fixed grid, but does
//! not re-derive a new processor grid itself. Disagreement is reported as a
//! `CtfError::Planning` error rather than silently picked for the caller.

use crate::algebraic::AlgebraicStructure;
use crate::communicator::Communicator;
use crate::error::{CtfError, Result};
use crate::kernel::LocalKernel;
use crate::reducer::symmetrize::SymmetrizeNode;
use crate::reducer::virtualize::VirtualizeNode;
use crate::reducer::{replicate::ReplicateNode, Reducer};
use crate::tensor::{DimMapping, DistTensor, Mapping, SymTag};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-operation state machine (§4.7). Only `LaidOut -> Executing` performs
/// arithmetic; only `Planned -> LaidOut` moves data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanState {
    Fresh,
    Planned,
    LaidOut,
    Executing,
    Done,
    Failed,
}

/// Estimated cost inputs for the replication decision (§4.7 step 3).
pub trait CostModel {
    fn replication_cost(&self, broadcast_bytes: usize, allreduce_bytes: usize, local_flops: usize) -> f64;
    fn no_replication_cost(&self, local_flops: usize) -> f64;
}

/// `cost = latency_per_collective * num_collectives + bytes * bandwidth_per_byte
/// + flops * flop_cost`, a simple closed form that's deterministic and cheap
/// enough to call from a test without wall-clock timing (SPEC_FULL §4.7).
pub struct LinearCostModel {
    pub bandwidth_per_byte: f64,
    pub collective_latency: f64,
    pub flop_cost: f64,
}

impl Default for LinearCostModel {
    fn default() -> Self {
        LinearCostModel {
            bandwidth_per_byte: 1e-9,
            collective_latency: 1e-5,
            flop_cost: 1e-10,
        }
    }
}

impl CostModel for LinearCostModel {
    fn replication_cost(&self, broadcast_bytes: usize, allreduce_bytes: usize, local_flops: usize) -> f64 {
        2.0 * self.collective_latency
            + (broadcast_bytes + allreduce_bytes) as f64 * self.bandwidth_per_byte
            + local_flops as f64 * self.flop_cost
    }

    fn no_replication_cost(&self, local_flops: usize) -> f64 {
        local_flops as f64 * self.flop_cost
    }
}

/// The planner's decisions for one `contract` call: a ready-to-run reducer
/// tree plus the per-operand redistribution (layout match) the caller must
/// apply before running it.
pub struct ContractionPlan<S: AlgebraicStructure> {
    pub tree: Reducer<S>,
    pub target_mapping_a: Mapping,
    pub target_mapping_b: Mapping,
    pub target_mapping_c: Mapping,
    pub extents: HashMap<char, usize>,
    pub state: PlanState,
}

fn elem_size<T>() -> usize {
    std::mem::size_of::<T>()
}

/// Does `sym`'s grouping at `pos` (if any) match the same two characters
/// adjacent, with the same tag, somewhere in `other_idx`/`other_sym`?
fn group_matches(
    idx: &[char],
    sym: &[SymTag],
    pos: usize,
    other_idx: &[char],
    other_sym: &[SymTag],
) -> bool {
    let (c0, c1) = (idx[pos], idx[pos + 1]);
    for (j, tag) in other_sym.iter().enumerate() {
        if *tag == sym[pos] && other_idx[j] == c0 && other_idx[j + 1] == c1 {
            return true;
        }
    }
    false
}

/// True when every symmetric group of `idx_c`/`c.sym` is already produced
/// directly by a matching group on one of the operands, so a single
/// identity term suffices; false (the conservative, always-correct default)
/// otherwise.
fn symmetry_aligned(
    idx_c: &[char],
    c_sym: &[SymTag],
    idx_a: &[char],
    a_sym: &[SymTag],
    idx_b: &[char],
    b_sym: &[SymTag],
) -> bool {
    for i in 0..c_sym.len() {
        if !c_sym[i].is_grouped() {
            continue;
        }
        let on_a = group_matches(idx_c, c_sym, i, idx_a, a_sym);
        let on_b = group_matches(idx_c, c_sym, i, idx_b, b_sym);
        if !on_a && !on_b {
            return false;
        }
    }
    true
}

/// Record one character's global length and current `DimMapping`,
/// discovered by scanning an operand's own index map against its mapping.
fn collect_dim(
    edge_len_of: &mut HashMap<char, usize>,
    dim_of: &mut HashMap<char, DimMapping>,
    idx: &[char],
    edge_len: &[usize],
    mapping: &Mapping,
) -> Result<()> {
    for (pos, ch) in idx.iter().enumerate() {
        let len = edge_len[pos];
        let dm = mapping.dims[pos].clone();
        if let Some(prev_len) = edge_len_of.get(ch) {
            if *prev_len != len {
                return Err(CtfError::ShapeMismatch(format!(
                    "index '{}' has length {} on one operand and {} on another",
                    ch, prev_len, len
                )));
            }
        } else {
            edge_len_of.insert(*ch, len);
        }
        match dim_of.get(ch) {
            Some(prev) if prev.phys != dm.phys => {
                return Err(CtfError::Planning(format!(
                    "index '{}' is mapped to processor-grid extent {} on one operand and {} \
                     on another; this planner aligns virtualization and layout but does not \
                     re-derive a processor grid",
                    ch, prev.phys, dm.phys
                )));
            }
            Some(prev) if prev.virt < dm.virt => {
                dim_of.insert(*ch, dm);
            }
            Some(_) => {}
            None => {
                dim_of.insert(*ch, dm);
            }
        }
    }
    Ok(())
}

/// Build the operand-local target `Mapping` (dims positioned per `idx`) from
/// the per-character `dim_of` table the planner converged on.
fn target_mapping_for(idx: &[char], dim_of: &HashMap<char, DimMapping>) -> Mapping {
    Mapping {
        dims: idx.iter().map(|ch| dim_of[ch].clone()).collect(),
    }
}

pub struct Planner<S: AlgebraicStructure, M: CostModel> {
    pub alg: S,
    pub cost_model: M,
}

impl<S, M> Planner<S, M>
where
    S: AlgebraicStructure,
    M: CostModel,
{
    pub fn new(alg: S, cost_model: M) -> Self {
        Planner { alg, cost_model }
    }

    /// Build a `ContractionPlan` for `C[idx_c] <- alpha*sum(A[idx_a]*B[idx_b]) + beta*C[idx_c]`.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_contract(
        &self,
        comm: &Arc<dyn Communicator>,
        a: &DistTensor<S::Elem>,
        idx_a: &[char],
        b: &DistTensor<S::Elem>,
        idx_b: &[char],
        c: &DistTensor<S::Elem>,
        idx_c: &[char],
    ) -> Result<ContractionPlan<S>> {
        if idx_a.len() != a.order || idx_b.len() != b.order || idx_c.len() != c.order {
            return Err(CtfError::ShapeMismatch(
                "index map length must match operand order".to_string(),
            ));
        }

        // Step 2 input: does each operand's own index map repeat a
        // character at all (diagonal), handled transparently by the kernel.
        let mut edge_len_of: HashMap<char, usize> = HashMap::new();
        let mut dim_of: HashMap<char, DimMapping> = HashMap::new();
        collect_dim(&mut edge_len_of, &mut dim_of, idx_a, &a.edge_len, &a.mapping)?;
        collect_dim(&mut edge_len_of, &mut dim_of, idx_b, &b.edge_len, &b.mapping)?;
        collect_dim(&mut edge_len_of, &mut dim_of, idx_c, &c.edge_len, &c.mapping)?;

        let target_mapping_a = target_mapping_for(idx_a, &dim_of);
        let target_mapping_b = target_mapping_for(idx_b, &dim_of);
        let target_mapping_c = target_mapping_for(idx_c, &dim_of);

        let extents: HashMap<char, usize> = dim_of
            .iter()
            .map(|(ch, dm)| (*ch, dm.local_extent(edge_len_of[ch]) * dm.virt))
            .collect();
        let block_extents: HashMap<char, usize> = dim_of
            .iter()
            .map(|(ch, dm)| (*ch, dm.local_extent(edge_len_of[ch])))
            .collect();
        let virt: HashMap<char, usize> = dim_of.iter().map(|(ch, dm)| (*ch, dm.virt)).collect();

        // Step 3: replication. Candidate letters are those shared by A and B
        // but absent from C (output replicated, all-reduced after) — the
        // only case this planner's degenerate whole-world strategy handles.
        let replicate_candidates: Vec<char> = idx_a
            .iter()
            .filter(|ch| idx_b.contains(ch) && !idx_c.contains(ch))
            .copied()
            .collect();

        let local_flops: usize = block_extents.values().product::<usize>().max(1);
        let c_bytes = c.data.len() * elem_size::<S::Elem>();
        let should_replicate = !replicate_candidates.is_empty()
            && comm.size() > 1
            && self
                .cost_model
                .replication_cost(c_bytes, c_bytes, local_flops)
                < self.cost_model.no_replication_cost(local_flops);

        // Step 2: symmetry alignment.
        let aligned = symmetry_aligned(idx_c, &c.sym, idx_a, &a.sym, idx_b, &b.sym);

        let kernel = Reducer::LocalKernel(LocalKernel::new(self.alg.clone()));
        let symmetrized = if c.sym.iter().any(|t| t.is_grouped()) {
            Reducer::Symmetrize(SymmetrizeNode::new(self.alg.clone(), kernel, &c.sym, aligned))
        } else {
            kernel
        };
        let virtualized = if virt.values().any(|&v| v > 1) {
            Reducer::Virtualize(VirtualizeNode::new(
                self.alg.clone(),
                symmetrized,
                virt,
                block_extents,
                idx_a,
                Some(idx_b),
            ))
        } else {
            symmetrized
        };
        let tree = if should_replicate {
            let cdt_b: Vec<Arc<dyn Communicator>> = vec![comm.clone()];
            Reducer::Replicate(ReplicateNode::new(self.alg.clone(), virtualized, vec![], cdt_b))
        } else {
            virtualized
        };

        Ok(ContractionPlan {
            tree,
            target_mapping_a,
            target_mapping_b,
            target_mapping_c,
            extents,
            state: PlanState::Planned,
        })
    }
}
