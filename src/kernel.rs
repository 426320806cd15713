//! C2 — the local kernel.
//!
//! Computes `c[i] <- beta*c[i] (+) alpha*reduce_over_contracted(a[...] (x) b[...])`
//! on already-local buffers. The "contracted" set is every index map
//! character present in both operands but absent from `idx_c`; repeated
//! characters within one operand (diagonals) are assumed already projected
//! away by the planner (§4.7 step 1) before this kernel ever runs.
//!
//! Two entry points are provided, matching §4.2's "may dispatch to GEMM,
//! otherwise nested-index loop": [`LocalKernel::contract`] is the universal
//! nested-index fallback, generic over any [`AlgebraicStructure`];
//! [`gemm_fastpath`] is the optimized path for a `Ring<T>` over a
//! `LinalgScalar`, used directly by callers (the planner, or a reducer built
//! for a known concrete type) once they've confirmed the operation reduces
//! to an ordinary matrix product.

use crate::algebraic::{AlgebraicStructure, Ring};
use crate::error::{CtfError, Result};
use itertools::Itertools;
use ndarray::{ArrayView2, ArrayViewMut2};
use std::collections::HashMap;

/// Wraps an algebraic structure with the dense/packed-block kernel.
#[derive(Clone)]
pub struct LocalKernel<S: AlgebraicStructure> {
    pub alg: S,
}

impl<S: AlgebraicStructure> LocalKernel<S> {
    pub fn new(alg: S) -> Self {
        LocalKernel { alg }
    }

    /// Row-major stride table: the last character in the index map is
    /// fastest-varying. Exposed at crate visibility so the virtualization
    /// reducer (§4.4) can compute strides once, over an operand's *full*
    /// padded extents (block count included), and reuse them unchanged
    /// while walking blocks — recomputing strides per block would silently
    /// assume the block is a tightly packed sub-buffer, which it is not
    /// whenever a non-outermost letter is virtualized.
    pub(crate) fn strides(idx: &[char], extents: &HashMap<char, usize>) -> Vec<usize> {
        let mut strides = vec![1usize; idx.len()];
        let mut running = 1usize;
        for i in (0..idx.len()).rev() {
            strides[i] = running;
            running *= extents[&idx[i]];
        }
        strides
    }

    pub(crate) fn offset(coords: &HashMap<char, usize>, idx: &[char], strides: &[usize]) -> usize {
        idx.iter()
            .zip(strides.iter())
            .map(|(ch, s)| coords[ch] * s)
            .sum()
    }

    /// `c[idx_c] <- beta*c[idx_c] (+) alpha * sum_contracted(a[idx_a] (x) b[idx_b])`.
    ///
    /// `extents` gives the block-local extent of every index character that
    /// appears in `idx_a`, `idx_b`, or `idx_c`. A zero extent anywhere
    /// naturally empties the corresponding loop — no special-case branch is
    /// needed for the "zero-edge-len guard": the free-index loop still runs
    /// (applying beta) while the contracted-index loop, if empty, leaves the
    /// accumulator at the algebraic identity.
    pub fn contract(
        &self,
        a: &[S::Elem],
        idx_a: &[char],
        b: &[S::Elem],
        idx_b: &[char],
        alpha: S::Elem,
        beta: S::Elem,
        c: &mut [S::Elem],
        idx_c: &[char],
        extents: &HashMap<char, usize>,
    ) -> Result<()> {
        let a_strides = Self::strides(idx_a, extents);
        let b_strides = Self::strides(idx_b, extents);
        let c_strides = Self::strides(idx_c, extents);
        self.contract_at(
            a, idx_a, &a_strides, 0, b, idx_b, &b_strides, 0, alpha, beta, c, idx_c, &c_strides,
            0, extents,
        )
    }

    /// Generalized contraction: strides and base offsets are supplied by the
    /// caller instead of derived from `extents`, so a single block within a
    /// virtualized operand can be addressed without repacking it into a
    /// tightly-packed sub-buffer first (§4.4's "sum per-letter inner
    /// strides" offset computation). `extents` here gives the *block-local*
    /// loop bound for every free/contracted letter; it need not match the
    /// extents the strides were derived from.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn contract_at(
        &self,
        a: &[S::Elem],
        idx_a: &[char],
        a_strides: &[usize],
        a_base: usize,
        b: &[S::Elem],
        idx_b: &[char],
        b_strides: &[usize],
        b_base: usize,
        alpha: S::Elem,
        beta: S::Elem,
        c: &mut [S::Elem],
        idx_c: &[char],
        c_strides: &[usize],
        c_base: usize,
        extents: &HashMap<char, usize>,
    ) -> Result<()> {
        let free: Vec<char> = idx_c.to_vec();
        let contracted: Vec<char> = idx_a
            .iter()
            .chain(idx_b.iter())
            .filter(|ch| idx_a.contains(ch) && idx_b.contains(ch) && !free.contains(ch))
            .unique()
            .copied()
            .collect();

        let free_ranges: Vec<std::ops::Range<usize>> =
            free.iter().map(|ch| 0..extents[ch]).collect();
        let contracted_ranges: Vec<std::ops::Range<usize>> =
            contracted.iter().map(|ch| 0..extents[ch]).collect();

        for free_vals in cartesian_or_unit(free_ranges) {
            let mut coords: HashMap<char, usize> = HashMap::new();
            for (ch, v) in free.iter().zip(free_vals.iter()) {
                coords.insert(*ch, *v);
            }
            let c_off = c_base + Self::offset(&coords, idx_c, c_strides);

            let mut acc = self.alg.identity();
            for contracted_vals in cartesian_or_unit(contracted_ranges.clone()) {
                for (ch, v) in contracted.iter().zip(contracted_vals.iter()) {
                    coords.insert(*ch, *v);
                }
                let a_off = a_base + Self::offset(&coords, idx_a, a_strides);
                let b_off = b_base + Self::offset(&coords, idx_b, b_strides);
                let term = self.alg.mul(a[a_off], b[b_off]);
                acc = self.alg.add(acc, term);
            }

            let scaled_acc = self.alg.mul(alpha, acc);
            c[c_off] = self.alg.add(self.alg.mul(beta, c[c_off]), scaled_acc);
        }
        Ok(())
    }

    /// Unary form for `sum`/`scale`: `c[idx_c] <- beta*c[idx_c] (+) alpha*a[idx_a]`.
    pub fn sum(
        &self,
        a: &[S::Elem],
        idx_a: &[char],
        alpha: S::Elem,
        beta: S::Elem,
        c: &mut [S::Elem],
        idx_c: &[char],
        extents: &HashMap<char, usize>,
    ) -> Result<()> {
        if idx_a.len() != idx_c.len() {
            return Err(CtfError::ShapeMismatch(
                "sum kernel requires matching index map lengths".to_string(),
            ));
        }
        let a_strides = Self::strides(idx_a, extents);
        let c_strides = Self::strides(idx_c, extents);
        self.sum_at(a, idx_a, &a_strides, 0, alpha, beta, c, idx_c, &c_strides, 0, extents)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn sum_at(
        &self,
        a: &[S::Elem],
        idx_a: &[char],
        a_strides: &[usize],
        a_base: usize,
        alpha: S::Elem,
        beta: S::Elem,
        c: &mut [S::Elem],
        idx_c: &[char],
        c_strides: &[usize],
        c_base: usize,
        extents: &HashMap<char, usize>,
    ) -> Result<()> {
        if idx_a.len() != idx_c.len() {
            return Err(CtfError::ShapeMismatch(
                "sum kernel requires matching index map lengths".to_string(),
            ));
        }
        let ranges: Vec<std::ops::Range<usize>> = idx_c.iter().map(|ch| 0..extents[ch]).collect();

        for vals in cartesian_or_unit(ranges) {
            let mut coords: HashMap<char, usize> = HashMap::new();
            for (ch, v) in idx_c.iter().zip(vals.iter()) {
                coords.insert(*ch, *v);
            }
            let a_off = a_base + Self::offset(&coords, idx_a, a_strides);
            let c_off = c_base + Self::offset(&coords, idx_c, c_strides);
            let scaled = self.alg.mul(alpha, a[a_off]);
            c[c_off] = self.alg.add(self.alg.mul(beta, c[c_off]), scaled);
        }
        Ok(())
    }
}

/// `itertools::multi_cartesian_product` yields nothing for an empty list of
/// ranges (the "no free/contracted indices" case, e.g. a pure scalar); this
/// yields exactly one empty tuple in that case instead, matching the
/// "single no-op iteration, not zero iterations" semantics a 0-dimensional
/// contraction needs.
pub(crate) fn cartesian_or_unit(
    ranges: Vec<std::ops::Range<usize>>,
) -> Box<dyn Iterator<Item = Vec<usize>>> {
    if ranges.is_empty() {
        Box::new(std::iter::once(Vec::new()))
    } else {
        Box::new(ranges.into_iter().multi_cartesian_product())
    }
}

/// GEMM fast path: `C <- alpha*A*B + beta*C` for an `m x k` times `k x n`
/// dense product, over a `Ring<T>` where `T` is BLAS-dispatchable through
/// `ndarray`. `k == 0` hits the zero-edge-len guard (beta-scale only);
/// `m == 0 || n == 0` is a true no-op (nothing to scale).
pub fn gemm_fastpath<T>(
    _ring: &Ring<T>,
    alpha: T,
    a: &[T],
    m: usize,
    k: usize,
    b: &[T],
    n: usize,
    beta: T,
    c: &mut [T],
) -> Result<()>
where
    T: ndarray::LinalgScalar,
{
    if m == 0 || n == 0 {
        return Ok(());
    }
    if k == 0 {
        for v in c.iter_mut() {
            *v = *v * beta;
        }
        return Ok(());
    }
    let a_mat = ArrayView2::from_shape((m, k), a)
        .map_err(|e| CtfError::ShapeMismatch(format!("gemm A shape: {}", e)))?;
    let b_mat = ArrayView2::from_shape((k, n), b)
        .map_err(|e| CtfError::ShapeMismatch(format!("gemm B shape: {}", e)))?;
    let product = a_mat.dot(&b_mat);
    let mut c_mat = ArrayViewMut2::from_shape((m, n), c)
        .map_err(|e| CtfError::ShapeMismatch(format!("gemm C shape: {}", e)))?;
    c_mat.zip_mut_with(&product, |cv, pv| *cv = *cv * beta + *pv * alpha);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebraic::Ring;

    fn extents(pairs: &[(char, usize)]) -> HashMap<char, usize> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn contract_matches_hand_computed_gemm() {
        // A: 2x2, B: 2x2, C: 2x2, contracted index 'k'.
        let alg = Ring::<f64>::new();
        let kern = LocalKernel::new(alg);
        let a = vec![1.0, 2.0, 3.0, 4.0]; // rows i, cols k
        let b = vec![5.0, 6.0, 7.0, 8.0]; // rows k, cols j
        let mut c = vec![0.0; 4];
        let ext = extents(&[('i', 2), ('k', 2), ('j', 2)]);
        kern.contract(
            &a,
            &['i', 'k'],
            &b,
            &['k', 'j'],
            1.0,
            0.0,
            &mut c,
            &['i', 'j'],
            &ext,
        )
        .unwrap();
        // Expected: [[1,2],[3,4]] x [[5,6],[7,8]] = [[19,22],[43,50]]
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn zero_contracted_extent_only_scales_by_beta() {
        let alg = Ring::<f64>::new();
        let kern = LocalKernel::new(alg);
        let a: Vec<f64> = vec![];
        let b: Vec<f64> = vec![];
        let mut c = vec![2.0, 3.0];
        let ext = extents(&[('i', 2), ('k', 0)]);
        kern.contract(
            &a,
            &['i', 'k'],
            &b,
            &['k'],
            1.0,
            2.0,
            &mut c,
            &['i'],
            &ext,
        )
        .unwrap();
        assert_eq!(c, vec![4.0, 6.0]);
    }

    #[test]
    fn sum_kernel_scales_and_adds() {
        let alg = Ring::<f64>::new();
        let kern = LocalKernel::new(alg);
        let a = vec![1.0, 2.0, 3.0];
        let mut c = vec![10.0, 10.0, 10.0];
        let ext = extents(&[('i', 3)]);
        kern.sum(&a, &['i'], 2.0, 1.0, &mut c, &['i'], &ext).unwrap();
        assert_eq!(c, vec![12.0, 14.0, 16.0]);
    }

    #[test]
    fn gemm_fastpath_matches_generic_contract() {
        let ring = Ring::<f64>::new();
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        let mut c = vec![1.0, 1.0, 1.0, 1.0];
        gemm_fastpath(&ring, 1.0, &a, 2, 2, &b, 2, 1.0, &mut c).unwrap();
        assert_eq!(c, vec![20.0, 23.0, 44.0, 51.0]);
    }
}
