//! §3 data model: symmetry tags, mappings, and the distributed tensor type
//! reducers and the redistribution engine operate on.

use crate::error::{CtfError, Result};
use std::fmt;

/// Relation between dimension `i` and dimension `i+1`, per §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymTag {
    /// Unrelated.
    NS,
    /// Symmetric: `i <= i+1`, swap leaves the value unchanged.
    SY,
    /// Antisymmetric: `i < i+1`, swap flips the sign; diagonal is zero.
    AS,
    /// Symmetric-hollow: `i < i+1`, diagonal is the additive identity.
    SH,
}

impl SymTag {
    /// AS and SH both exclude the diagonal from storage.
    pub fn excludes_diagonal(self) -> bool {
        matches!(self, SymTag::AS | SymTag::SH)
    }

    /// Whether this tag groups dimension `i` with `i+1` at all.
    pub fn is_grouped(self) -> bool {
        !matches!(self, SymTag::NS)
    }
}

/// Per-dimension assignment to the logical processor grid plus a
/// virtualization factor. `phys` is this dimension's extent on the
/// communicator's process grid; `virt` subdivides each process's share into
/// `virt` equal blocks so operands can share a common virtual block grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimMapping {
    pub phys: usize,
    pub virt: usize,
}

impl DimMapping {
    pub fn trivial() -> DimMapping {
        DimMapping { phys: 1, virt: 1 }
    }

    /// Local (padded) extent of a dimension of global length `len` under
    /// this mapping: `ceil(len / (phys * virt))`.
    pub fn local_extent(&self, len: usize) -> usize {
        let denom = self.phys * self.virt;
        (len + denom - 1) / denom
    }
}

/// Full mapping of a tensor's dimensions onto the logical processor grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub dims: Vec<DimMapping>,
}

impl Mapping {
    pub fn trivial(order: usize) -> Mapping {
        Mapping {
            dims: vec![DimMapping::trivial(); order],
        }
    }

    pub fn order(&self) -> usize {
        self.dims.len()
    }
}

/// A distributed tensor. `data` holds this process's padded local block
/// dense, every cell addressable by the same row-major stride table the
/// local kernel derives from `mapping`'s full per-dimension extents;
/// symmetry is enforced by convention (only canonical cells, per
/// [`is_canonical`], are ever written or read) rather than by a smaller
/// packed physical layout. `home` mirrors the tensor's canonical mapping so
/// idempotent multi-contraction plans can restore it without a fresh
/// redistribution.
pub struct DistTensor<T> {
    pub name: Option<String>,
    pub profile: bool,
    pub order: usize,
    pub edge_len: Vec<usize>,
    pub sym: Vec<SymTag>,
    pub mapping: Mapping,
    pub data: Vec<T>,
    pub home: Option<Vec<T>>,
    pub poisoned: bool,
}

impl<T: Copy + Default> DistTensor<T> {
    /// Construct a zero-filled tensor with a trivial (single-process,
    /// unvirtualized) mapping. Validates symmetry-tag/edge-length agreement
    /// per §3's invariant (a).
    pub fn zeros(
        order: usize,
        edge_len: Vec<usize>,
        sym: Vec<SymTag>,
        name: Option<String>,
    ) -> Result<DistTensor<T>> {
        if edge_len.len() != order || sym.len() != order {
            return Err(CtfError::ShapeMismatch(format!(
                "order {} but edge_len len {} / sym len {}",
                order,
                edge_len.len(),
                sym.len()
            )));
        }
        for i in 0..order {
            if sym[i].is_grouped() {
                if i + 1 >= order {
                    return Err(CtfError::SymmetryMismatch(format!(
                        "symmetry tag at trailing dimension {}",
                        i
                    )));
                }
                if edge_len[i] != edge_len[i + 1] {
                    return Err(CtfError::SymmetryMismatch(format!(
                        "symmetric group at dims {}..{} requires equal edge lengths, got {} and {}",
                        i, i + 1, edge_len[i], edge_len[i + 1]
                    )));
                }
            }
        }
        let mapping = Mapping::trivial(order);
        let local_size = local_padded_size(&edge_len, &mapping);
        Ok(DistTensor {
            name,
            profile: false,
            order,
            edge_len,
            sym,
            mapping,
            data: vec![T::default(); local_size],
            home: None,
            poisoned: false,
        })
    }

    pub fn check_live(&self) -> Result<()> {
        if self.poisoned {
            return Err(CtfError::Poisoned {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl<T> fmt::Debug for DistTensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistTensor")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("edge_len", &self.edge_len)
            .field("sym", &self.sym)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

/// Local padded extent along each dimension under `mapping`.
pub fn local_extents(edge_len: &[usize], mapping: &Mapping) -> Vec<usize> {
    edge_len
        .iter()
        .zip(mapping.dims.iter())
        .map(|(len, dm)| dm.local_extent(*len))
        .collect()
}

/// Total padded local element count under `mapping` (product of per-dim
/// local extents, including virtualization blocks).
pub fn local_padded_size(edge_len: &[usize], mapping: &Mapping) -> usize {
    local_extents(edge_len, mapping)
        .iter()
        .zip(mapping.dims.iter())
        .map(|(extent, dm)| extent * dm.virt)
        .product()
}

/// Column-major global index linearization of §6:
/// `g = i0 + i1*L0 + i2*L0*L1 + ...`. Shared by the local kernel's stride
/// tables and the redistribution engine's compact step.
pub fn global_index(coords: &[usize], edge_len: &[usize]) -> u64 {
    let mut g: u64 = 0;
    let mut stride: u64 = 1;
    for (c, l) in coords.iter().zip(edge_len.iter()) {
        g += *c as u64 * stride;
        stride *= *l as u64;
    }
    g
}

/// Inverse of [`global_index`]: decompose a global index back into
/// per-dimension coordinates given the edge lengths.
pub fn coords_from_global(mut g: u64, edge_len: &[usize]) -> Vec<usize> {
    let mut coords = Vec::with_capacity(edge_len.len());
    for l in edge_len {
        let l = *l as u64;
        coords.push((g % l) as usize);
        g /= l;
    }
    coords
}

/// Whether a coordinate tuple respects the canonical ordering predicate of
/// every symmetric group named by `sym` (invariant (a) of §3): `SY` groups
/// require `i <= i+1`; `AS`/`SH` groups require `i < i+1` (diagonal
/// excluded).
pub fn is_canonical(coords: &[usize], sym: &[SymTag]) -> bool {
    for (i, tag) in sym.iter().enumerate() {
        match tag {
            SymTag::NS => {}
            SymTag::SY => {
                if coords[i] > coords[i + 1] {
                    return false;
                }
            }
            SymTag::AS | SymTag::SH => {
                if coords[i] >= coords[i + 1] {
                    return false;
                }
            }
        }
    }
    true
}

/// Sign contribution of a coordinate permutation for antisymmetric groups;
/// `1` unless an `AS` group's order was inverted to reach canonical form and
/// an odd number of such inversions occurred across all groups.
pub fn canonical_sign(coords: &[usize], sym: &[SymTag]) -> i32 {
    let mut sign = 1;
    for (i, tag) in sym.iter().enumerate() {
        if *tag == SymTag::AS && coords[i] > coords[i + 1] {
            sign = -sign;
        }
    }
    sign
}


/// A dense `ndarray` view of a local block without virtualization — used by
/// the local kernel's GEMM fast path, which only applies to single-block
/// (unvirtualized) operands.
pub fn as_dense_view<'a, T>(data: &'a [T], extents: &[usize]) -> Result<ndarray::ArrayViewD<'a, T>> {
    ndarray::ArrayViewD::from_shape(extents, data)
        .map_err(|e| CtfError::ShapeMismatch(format!("dense view shape mismatch: {}", e)))
}
