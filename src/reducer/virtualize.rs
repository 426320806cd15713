//! C4 — virtualization reducer.
//!
//! Grounded on `original_source/src/ctr_comm/sum_tsr.cxx`'s `tsum_virt::run`:
//! a virtual block grid is walked in row-major order of the union of A's and
//! B's virtualized letters, and per-letter strides (here, the `SET_LDA_X`
//! macro's job) are precomputed once by the caller rather than re-derived
//! per block, so a block's sub-buffer never needs to be a tightly packed
//! copy — summing `block_index * block_extent * stride` against the full
//! buffer's existing strides addresses it directly.

use super::{Operand, Reducer, RunArgs};
use crate::algebraic::AlgebraicStructure;
use crate::error::Result;
use crate::kernel::cartesian_or_unit;
use std::collections::{HashMap, HashSet};

pub struct VirtualizeNode<S: AlgebraicStructure> {
    alg: S,
    sub: Box<Reducer<S>>,
    /// Virtualization factor per letter (only letters with factor > 1 need
    /// to appear here; absent letters are treated as 1).
    virt: HashMap<char, usize>,
    /// Per-letter extent of a single block, used to shrink `extents` and to
    /// scale each letter's block index into an element offset.
    block_extents: HashMap<char, usize>,
    /// Fixed row-major visiting order over the union of virtualized letters
    /// appearing in A or B — fixed once at construction so visiting order is
    /// deterministic run to run, required for `is_ordered` structures.
    letters: Vec<char>,
}

impl<S: AlgebraicStructure> VirtualizeNode<S> {
    pub fn new(
        alg: S,
        sub: Reducer<S>,
        virt: HashMap<char, usize>,
        block_extents: HashMap<char, usize>,
        idx_a: &[char],
        idx_b: Option<&[char]>,
    ) -> Self {
        let mut letters: Vec<char> = idx_a
            .iter()
            .chain(idx_b.into_iter().flatten())
            .filter(|ch| virt.get(ch).copied().unwrap_or(1) > 1)
            .copied()
            .collect::<HashSet<char>>()
            .into_iter()
            .collect();
        letters.sort_unstable();
        VirtualizeNode {
            alg,
            sub: Box::new(sub),
            virt,
            block_extents,
            letters,
        }
    }

    fn block_offset(
        &self,
        block_idx: &HashMap<char, usize>,
        idx: &[char],
        strides: &[usize],
    ) -> usize {
        idx.iter()
            .zip(strides.iter())
            .map(|(ch, s)| {
                block_idx
                    .get(ch)
                    .map(|b| b * self.block_extents[ch] * s)
                    .unwrap_or(0)
            })
            .sum()
    }

    pub fn run(&self, mut args: RunArgs<S>) -> Result<()> {
        if self.letters.is_empty() {
            return self.sub.run(args);
        }

        let ranges: Vec<std::ops::Range<usize>> =
            self.letters.iter().map(|ch| 0..self.virt[ch]).collect();

        let mut touched: HashSet<Vec<usize>> = HashSet::new();
        let mut block_extents_view = args.extents.clone();

        for block_vals in cartesian_or_unit(ranges) {
            let mut block_idx: HashMap<char, usize> = HashMap::new();
            for (ch, v) in self.letters.iter().zip(block_vals.iter()) {
                block_idx.insert(*ch, *v);
            }

            let a_off = self.block_offset(&block_idx, args.a.idx, args.a.strides);
            let b_operand = args
                .b
                .as_ref()
                .map(|b| b.with_base(b.base + self.block_offset(&block_idx, b.idx, b.strides)));
            let c_off = self.block_offset(&block_idx, args.c_idx, args.c_strides);

            let c_key: Vec<usize> = args
                .c_idx
                .iter()
                .map(|ch| block_idx.get(ch).copied().unwrap_or(0))
                .collect();
            let beta_for_call = if touched.insert(c_key) {
                args.beta
            } else {
                self.alg.one()
            };

            for ch in &self.letters {
                block_extents_view.insert(*ch, self.block_extents[*ch]);
            }

            self.sub.run(RunArgs {
                a: args.a.with_base(args.a.base + a_off),
                b: b_operand,
                alpha: args.alpha,
                beta: beta_for_call,
                c: &mut *args.c,
                c_idx: args.c_idx,
                c_strides: args.c_strides,
                c_base: args.c_base + c_off,
                extents: &block_extents_view,
            })?;
        }
        Ok(())
    }
}
