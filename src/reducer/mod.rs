//! The reducer tree: `Replication( Virtualization( Symmetry( LocalKernel ) ) )`.
//!
//! The source this crate's design is grounded on uses a base reducer class
//! with virtual `run()`/`clone()`; per design note §9 this is re-architected
//! as a tagged variant over owned sub-trees. The planner (C7) builds one of
//! these top-down; execution is a plain recursive walk, no dynamic dispatch.
//!
//! Strides for every operand are computed exactly once, over that operand's
//! full padded local extents (block counts included), at the tree root.
//! Every level below only adjusts a base offset and narrows the loop bounds
//! in `extents` — it never re-derives strides from a "repacked" sub-buffer,
//! which would be wrong whenever a non-outermost letter is virtualized.

pub mod replicate;
pub mod symmetrize;
pub mod virtualize;

use crate::algebraic::AlgebraicStructure;
use crate::error::Result;
use std::collections::HashMap;

/// One operand as seen by a reducer node: the full local buffer, its index
/// map, the strides belonging to that index map (computed once, against the
/// operand's full extents), and a running base offset into `data`.
pub struct Operand<'a, T> {
    pub data: &'a [T],
    pub idx: &'a [char],
    pub strides: &'a [usize],
    pub base: usize,
}

impl<'a, T> Operand<'a, T> {
    pub fn reborrow(&self) -> Operand<'a, T> {
        Operand {
            data: self.data,
            idx: self.idx,
            strides: self.strides,
            base: self.base,
        }
    }

    pub fn with_base(&self, base: usize) -> Operand<'a, T> {
        Operand {
            data: self.data,
            idx: self.idx,
            strides: self.strides,
            base,
        }
    }
}

/// One invocation's worth of arguments threaded down the tree.
pub struct RunArgs<'a, S: AlgebraicStructure> {
    pub a: Operand<'a, S::Elem>,
    pub b: Option<Operand<'a, S::Elem>>,
    pub alpha: S::Elem,
    pub beta: S::Elem,
    pub c: &'a mut [S::Elem],
    pub c_idx: &'a [char],
    pub c_strides: &'a [usize],
    pub c_base: usize,
    /// Block-local loop extent for every letter currently in play. Shrinks
    /// as virtualization levels are peeled off; never used to derive
    /// strides, only loop bounds.
    pub extents: &'a HashMap<char, usize>,
}

/// A node of the reducer tree, generic over the algebraic structure every
/// level of the tree shares.
pub enum Reducer<S: AlgebraicStructure> {
    Replicate(replicate::ReplicateNode<S>),
    Virtualize(virtualize::VirtualizeNode<S>),
    Symmetrize(symmetrize::SymmetrizeNode<S>),
    LocalKernel(crate::kernel::LocalKernel<S>),
}

impl<S: AlgebraicStructure> Reducer<S> {
    pub fn run(&self, args: RunArgs<S>) -> Result<()> {
        match self {
            Reducer::Replicate(node) => node.run(args),
            Reducer::Virtualize(node) => node.run(args),
            Reducer::Symmetrize(node) => node.run(args),
            Reducer::LocalKernel(kernel) => match args.b {
                Some(b) => kernel.contract_at(
                    args.a.data,
                    args.a.idx,
                    args.a.strides,
                    args.a.base,
                    b.data,
                    b.idx,
                    b.strides,
                    b.base,
                    args.alpha,
                    args.beta,
                    args.c,
                    args.c_idx,
                    args.c_strides,
                    args.c_base,
                    args.extents,
                ),
                None => kernel.sum_at(
                    args.a.data,
                    args.a.idx,
                    args.a.strides,
                    args.a.base,
                    args.alpha,
                    args.beta,
                    args.c,
                    args.c_idx,
                    args.c_strides,
                    args.c_base,
                    args.extents,
                ),
            },
        }
    }
}
