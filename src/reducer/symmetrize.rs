//! C3 as a reducer-tree node: wraps a sub-reducer so it sees a logical
//! rectangular output while redundant-computation terms (§4.3) scatter
//! their contribution across the symmetric group's physical cells.
//!
//! Scope note: beta's touched-flag bookkeeping here only tracks the first
//! vs. a later *term* writing to the exact same physical C cell, which is
//! exact for the single-symmetric-group case this crate's scenarios use
//! (§8's symmetric-hollow weight scenario). Two independently misaligned
//! groups on the same output are accepted by [`crate::symmetry::expand_terms`]
//! but are not a target of this crate's test scenarios; see DESIGN.md.

use super::{Reducer, RunArgs};
use crate::algebraic::AlgebraicStructure;
use crate::error::Result;
use crate::symmetry::{self, SymmetryTerm};
use crate::tensor::SymTag;

pub struct SymmetrizeNode<S: AlgebraicStructure> {
    alg: S,
    sub: Box<Reducer<S>>,
    terms: Vec<SymmetryTerm>,
}

impl<S: AlgebraicStructure> SymmetrizeNode<S> {
    pub fn new(alg: S, sub: Reducer<S>, out_sym: &[SymTag], aligned: bool) -> Self {
        SymmetrizeNode {
            alg,
            sub: Box::new(sub),
            terms: symmetry::expand_terms(out_sym, aligned),
        }
    }

    fn term_alpha(&self, alpha: S::Elem, term: &SymmetryTerm) -> Result<S::Elem> {
        let denom = (1.0 / term.weight).round() as u32;
        let mut scaled = if denom > 1 {
            self.alg.scale_reciprocal(alpha, denom)?
        } else {
            alpha
        };
        if term.sign < 0 {
            scaled = self.alg.negate(scaled)?;
        }
        Ok(scaled)
    }

    /// Permute `c_strides` by `term.out_perm` (axis `k` of the permuted
    /// output uses the stride `c_strides[out_perm[k]]` did), leaving
    /// `c_idx` unchanged. Since an offset is `sum(coords[ch] * stride[ch])`
    /// keyed by character rather than position, swapping only the strides
    /// (and not the character labels) makes a coordinate tuple land at the
    /// term's transposed physical cell instead of its natural one.
    fn permute_strides(strides: &[usize], perm: &[usize]) -> Vec<usize> {
        perm.iter().map(|&p| strides[p]).collect()
    }

    pub fn run(&self, mut args: RunArgs<S>) -> Result<()> {
        if self.terms.len() == 1 {
            let term = &self.terms[0];
            let alpha = self.term_alpha(args.alpha, term)?;
            let c_strides = Self::permute_strides(args.c_strides, &term.out_perm);
            return self.sub.run(RunArgs {
                a: args.a.reborrow(),
                b: args.b.as_ref().map(|b| b.reborrow()),
                alpha,
                beta: args.beta,
                c: args.c,
                c_idx: args.c_idx,
                c_strides: &c_strides,
                c_base: args.c_base,
                extents: args.extents,
            });
        }

        // `expand_terms` always emits the identity permutation (mask 0)
        // first, and it alone already covers every cell of the free-index
        // rectangle; every later term only needs to accumulate (`beta =
        // one()`) onto what that first pass established, which is what
        // makes a diagonal cell's `+w` and `-w` contributions cancel to
        // exactly zero for an AS/SH group instead of the second term
        // clobbering the first.
        for (term_idx, term) in self.terms.iter().enumerate() {
            let alpha = self.term_alpha(args.alpha, term)?;
            let c_strides = Self::permute_strides(args.c_strides, &term.out_perm);
            let beta = if term_idx == 0 { args.beta } else { self.alg.one() };
            self.sub.run(RunArgs {
                a: args.a.reborrow(),
                b: args.b.as_ref().map(|b| b.reborrow()),
                alpha,
                beta,
                c: &mut *args.c,
                c_idx: args.c_idx,
                c_strides: &c_strides,
                c_base: args.c_base,
                extents: args.extents,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebraic::Ring;
    use crate::kernel::LocalKernel;
    use crate::reducer::Operand;
    use std::collections::HashMap;

    /// `C_[ij] <- (A_ik B_kj - A_jk B_ki) / 2`, the antisymmetric worked
    /// example of §4.3, with A and B the same non-symmetric 2x2 matrices.
    #[test]
    fn antisymmetric_output_gets_signed_half_weighted_terms() {
        let alg = Ring::<f64>::new();
        let kernel = Reducer::LocalKernel(LocalKernel::new(alg));
        let sym = vec![SymTag::AS, SymTag::NS];
        let node = SymmetrizeNode::new(alg, kernel, &sym, false);

        let idx_a = ['i', 'k'];
        let idx_b = ['k', 'j'];
        let idx_c = ['i', 'j'];
        let extents: HashMap<char, usize> = [('i', 2), ('j', 2), ('k', 2)].into_iter().collect();
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        let mut c = vec![0.0; 4];

        let a_strides = LocalKernel::<Ring<f64>>::strides(&idx_a, &extents);
        let b_strides = LocalKernel::<Ring<f64>>::strides(&idx_b, &extents);
        let c_strides = LocalKernel::<Ring<f64>>::strides(&idx_c, &extents);

        node.run(RunArgs {
            a: Operand {
                data: &a,
                idx: &idx_a,
                strides: &a_strides,
                base: 0,
            },
            b: Some(Operand {
                data: &b,
                idx: &idx_b,
                strides: &b_strides,
                base: 0,
            }),
            alpha: 1.0,
            beta: 0.0,
            c: &mut c,
            c_idx: &idx_c,
            c_strides: &c_strides,
            c_base: 0,
            extents: &extents,
        })
        .unwrap();

        // Full dense product P = A*B = [[19,22],[43,50]].
        // C_01 = (P_01 - P_10)/2 = (22-43)/2 = -10.5 ; C_10 = +10.5 ; diag 0.
        assert_eq!(c[0], 0.0);
        assert_eq!(c[1], -10.5);
        assert_eq!(c[2], 10.5);
        assert_eq!(c[3], 0.0);
    }
}
