//! C3 — symmetry iterator.
//!
//! Wraps a dense kernel so it sees a logical rectangular block while the
//! underlying storage is a packed simplex for symmetric groups. Grounded on
//! the sym-tag semantics of `original_source/src/interface/tensor.h` and the
//! "symmetry preservation by redundant computation" design called out in
//! §4.3: when the operands' symmetric groups don't fully align with C's,
//! the iterator emits multiple calls to the inner kernel with different
//! sign/weight pairs rather than trying to special-case every alignment.

use crate::tensor::{canonical_sign, is_canonical, SymTag};
use itertools::Itertools;

/// One call the symmetry iterator schedules against the inner kernel: a
/// permutation of the output's logical axes plus the sign and weight to
/// apply to that permutation's contribution.
#[derive(Clone, Debug, PartialEq)]
pub struct SymmetryTerm {
    /// Permutation of output axis indices this term writes through.
    pub out_perm: Vec<usize>,
    /// `+1` or `-1`.
    pub sign: i32,
    /// Multiplies the contribution; `1/group_size` style weights for
    /// redundant-computation terms (e.g. the `/2` in
    /// `C_{[ij]} ⊕= (A_{ik}B_{kj} − A_{jk}B_{ki}) / 2`).
    pub weight: f64,
}

/// Expand the set of `SymmetryTerm`s needed to compute a contraction into an
/// output with symmetry group `out_sym` when the operands are not already
/// aligned with it. `aligned` is true when both inputs and the output share
/// exactly the same grouping over the output's free indices, in which case
/// a single identity term (weight 1, no extra sign) suffices.
pub fn expand_terms(out_sym: &[SymTag], aligned: bool) -> Vec<SymmetryTerm> {
    let order = out_sym.len();
    if aligned || order < 2 {
        return vec![SymmetryTerm {
            out_perm: (0..order).collect(),
            sign: 1,
            weight: 1.0,
        }];
    }

    // Misaligned: emit one term per transposition of each symmetric group,
    // signed according to the group's tag, weighted so redundant terms sum
    // to the correct normalization (divide by the number of terms).
    let mut group_starts = Vec::new();
    let mut i = 0;
    while i < order {
        if out_sym[i].is_grouped() {
            group_starts.push(i);
            i += 2;
        } else {
            i += 1;
        }
    }
    if group_starts.is_empty() {
        return vec![SymmetryTerm {
            out_perm: (0..order).collect(),
            sign: 1,
            weight: 1.0,
        }];
    }

    let mut terms = Vec::new();
    // For each subset of groups, swap that subset's pair and accumulate the
    // corresponding sign; this is the minimal redundant-computation set that
    // symmetrizes/antisymmetrizes over all named groups simultaneously.
    for mask in 0..(1usize << group_starts.len()) {
        let mut perm: Vec<usize> = (0..order).collect();
        let mut sign = 1;
        for (bit, &start) in group_starts.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                perm.swap(start, start + 1);
                if out_sym[start] == SymTag::AS || out_sym[start] == SymTag::SH {
                    sign = -sign;
                }
            }
        }
        terms.push(SymmetryTerm {
            out_perm: perm,
            sign,
            weight: 1.0 / (1usize << group_starts.len()) as f64,
        });
    }
    terms
}

/// Enumerate representative (canonical) coordinate tuples over `edge_len`
/// under `sym`, in row-major order of the canonical index, together with
/// each representative's sign (always `+1`; antisymmetric storage never
/// keeps a non-canonical cell, so a stored representative's sign is
/// trivial — the sign only matters when *writing through* a permutation,
/// via [`SymmetryTerm`]).
pub fn canonical_representatives(edge_len: &[usize], sym: &[SymTag]) -> Vec<Vec<usize>> {
    edge_len
        .iter()
        .map(|&l| 0..l)
        .multi_cartesian_product()
        .filter(|coords| is_canonical(coords, sym))
        .collect()
}

/// Precompute, for a contracted index nested inside a symmetric group of
/// size `group_len` (SY/AS/SH always group exactly 2 adjacent dimensions in
/// this data model, so `group_len` is the number of *values* the packed
/// representative stands in for off the diagonal), the repetition-count
/// scale factor used to compensate packed storage (§4.3 "tie-breaks").
pub fn contracted_repetition_scale(tag: SymTag) -> f64 {
    match tag {
        SymTag::NS => 1.0,
        SymTag::SY => 2.0,
        SymTag::AS | SymTag::SH => 2.0,
    }
}

/// Apply a term's sign/weight and write `value` into `out` at the position
/// given by applying `term.out_perm` to `coords`, returning the permuted
/// coordinates and the value to accumulate (`sign * weight * value`).
pub fn apply_term(term: &SymmetryTerm, coords: &[usize], value: f64) -> (Vec<usize>, f64) {
    let mut permuted = vec![0usize; coords.len()];
    for (axis, &src) in term.out_perm.iter().enumerate() {
        permuted[axis] = coords[src];
    }
    (permuted, term.sign as f64 * term.weight * value)
}

/// Sign for reading back a cell of an AS/SH tensor that may have been asked
/// for in non-canonical order: SH's diagonal is identity (never stored,
/// always reads as the algebraic zero handled by the caller), and an AS/SH
/// swap of a stored representative's two grouped coordinates flips sign.
pub fn read_sign(coords: &[usize], sym: &[SymTag]) -> i32 {
    canonical_sign(coords, sym)
}
