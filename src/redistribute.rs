//! C6 — redistribution engine.
//!
//! Moves a tensor's local buffer from a source mapping to a target mapping
//! via exactly one variable-length all-to-all (§4.6). The cyclic mapping
//! convention used throughout: for a dimension with `(phys, virt)`, a global
//! coordinate `c` decomposes as `c = phys_idx + phys*(virt_idx +
//! virt*local_offset)` — innermost cyclic over physical ranks, then cyclic
//! over virtual blocks, then the per-block local offset. The local buffer
//! stores `virt_idx` outer to `local_offset` within each dimension (matching
//! the reducer tree's convention that virtualized letters vary outermost),
//! combined row-major (last dimension fastest) across dimensions, the same
//! layout the local kernel's stride tables assume.
//!
//! Fast paths (b) (virtualization-only change) and (c) (processor-grid
//! permutation only) are not given separate code paths here: the general
//! bucketize/compact/exchange/install algorithm below is correct for them
//! too (and for the case covered by CTF's own optimized paths), just
//! without the reshuffle-without-communication optimization. Only fast path
//! (a), exact mapping equality, is special-cased, since it is a true no-op.

use crate::communicator::Communicator;
use crate::error::{CtfError, Result};
use crate::tensor::{self, DistTensor, Mapping, SymTag};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// This rank's physical grid coordinate along every dimension of `mapping`,
/// decoded from `rank` the same way [`target_rank`] encodes it.
fn phys_coords(rank: usize, mapping: &Mapping) -> Vec<usize> {
    let mut rank = rank;
    mapping
        .dims
        .iter()
        .map(|dm| {
            let p = rank % dm.phys;
            rank /= dm.phys;
            p
        })
        .collect()
}

/// Column-major linearization of a physical grid coordinate into a rank
/// number, consistent with [`phys_coords`].
fn rank_of_phys(phys: &[usize], mapping: &Mapping) -> usize {
    let mut rank = 0usize;
    let mut stride = 1usize;
    for (p, dm) in phys.iter().zip(mapping.dims.iter()) {
        rank += p * stride;
        stride *= dm.phys;
    }
    rank
}

/// Target rank owning global coordinate `coords` under `mapping`. Exposed
/// at crate visibility so the key-value I/O operations in `ops.rs` can
/// route a `write`/`read` key to its owning rank without duplicating this
/// cyclic-mapping arithmetic.
pub(crate) fn target_rank(coords: &[usize], mapping: &Mapping) -> usize {
    let phys: Vec<usize> = coords
        .iter()
        .zip(mapping.dims.iter())
        .map(|(c, dm)| c % dm.phys)
        .collect();
    rank_of_phys(&phys, mapping)
}

/// Decompose a global coordinate into `(virt_idx, local_offset)` given this
/// rank already owns it physically.
fn virt_and_local(c: usize, dm: &tensor::DimMapping) -> (usize, usize) {
    let rem = c / dm.phys;
    (rem % dm.virt, rem / dm.virt)
}

/// Row-major strides (last dimension fastest) over the full local padded
/// extents of `mapping`.
fn local_strides(edge_len: &[usize], mapping: &Mapping) -> Vec<usize> {
    let extents = tensor::local_extents(edge_len, mapping);
    let mut strides = vec![1usize; extents.len()];
    let mut running = 1usize;
    for i in (0..extents.len()).rev() {
        strides[i] = running;
        running *= extents[i] * mapping.dims[i].virt;
    }
    strides
}

/// This rank's local linear index for global coordinate `coords`, given it
/// is locally owned under `mapping` on rank `rank`. Exposed at crate
/// visibility for the same reason as [`target_rank`].
pub(crate) fn local_index(coords: &[usize], edge_len: &[usize], mapping: &Mapping) -> usize {
    let extents = tensor::local_extents(edge_len, mapping);
    let strides = local_strides(edge_len, mapping);
    let mut idx = 0usize;
    for (i, (c, dm)) in coords.iter().zip(mapping.dims.iter()).enumerate() {
        let (virt_idx, local_offset) = virt_and_local(*c, dm);
        idx += (virt_idx * extents[i] + local_offset) * strides[i];
    }
    idx
}

/// Every global coordinate this rank locally owns, in this rank's storage
/// order, under `mapping`.
fn owned_coords(rank: usize, edge_len: &[usize], sym: &[SymTag], mapping: &Mapping) -> Vec<Vec<usize>> {
    let phys = phys_coords(rank, mapping);
    let ranges: Vec<std::ops::Range<usize>> = edge_len.iter().map(|&l| 0..l).collect();
    itertools::Itertools::multi_cartesian_product(ranges.into_iter())
        .filter(|coords| tensor::is_canonical(coords, sym))
        .filter(|coords| {
            coords
                .iter()
                .zip(mapping.dims.iter())
                .zip(phys.iter())
                .all(|((c, dm), p)| c % dm.phys == *p)
        })
        .collect()
}

/// One (coordinate, value) pair crossing the all-to-all boundary.
#[derive(serde::Serialize, serde::Deserialize)]
struct Entry<T> {
    coords: Vec<usize>,
    value: T,
}

/// Move `tensor`'s local buffer from its current mapping to `dst`, returning
/// a fresh `DistTensor` laid out under `dst` with the same logical entries.
/// Implements bucketize/compact/exchange/install (§4.6 steps 1-4): every
/// rank walks its own owned coordinates once (bucketize+compact combined,
/// since coordinates are visited in destination canonical order already via
/// `owned_coords`' deterministic iteration), ships one variable-length
/// all-to-all, then installs received entries into the new buffer.
pub fn redistribute<T>(
    tensor: &DistTensor<T>,
    dst: Mapping,
    comm: &dyn Communicator,
) -> Result<DistTensor<T>>
where
    T: Copy + Default + Serialize + DeserializeOwned,
{
    if tensor.mapping == dst {
        return Ok(DistTensor {
            name: tensor.name.clone(),
            profile: tensor.profile,
            order: tensor.order,
            edge_len: tensor.edge_len.clone(),
            sym: tensor.sym.clone(),
            mapping: dst,
            data: tensor.data.clone(),
            home: tensor.home.clone(),
            poisoned: tensor.poisoned,
        });
    }

    let rank = comm.rank();
    let size = comm.size();
    let mut buckets: Vec<Vec<Entry<T>>> = (0..size).map(|_| Vec::new()).collect();

    // `owned_coords` only ever yields canonical representatives (§3
    // invariant (a)), so the value read here is always the group's
    // sign-+1 member already; nothing to flip before shipping it.
    for coords in owned_coords(rank, &tensor.edge_len, &tensor.sym, &tensor.mapping) {
        let src_idx = local_index(&coords, &tensor.edge_len, &tensor.mapping);
        let value = tensor.data[src_idx];
        let dst_owner = target_rank(&coords, &dst);
        buckets[dst_owner].push(Entry { coords, value });
    }

    let send: Result<Vec<Vec<u8>>> = buckets
        .into_iter()
        .map(|bucket| {
            bincode::serialize(&bucket).map_err(|e| CtfError::CollectiveFailure {
                rank,
                message: format!("redistribute bucket encode failed: {}", e),
            })
        })
        .collect();
    let send = send?;
    let received = comm.all_to_all_bytes(send)?;

    let local_size = tensor::local_padded_size(&tensor.edge_len, &dst);
    let mut data = vec![T::default(); local_size];
    for raw in received {
        let entries: Vec<Entry<T>> =
            bincode::deserialize(&raw).map_err(|e| CtfError::CollectiveFailure {
                rank,
                message: format!("redistribute bucket decode failed: {}", e),
            })?;
        for entry in entries {
            let dst_idx = local_index(&entry.coords, &tensor.edge_len, &dst);
            data[dst_idx] = entry.value;
        }
    }

    Ok(DistTensor {
        name: tensor.name.clone(),
        profile: tensor.profile,
        order: tensor.order,
        edge_len: tensor.edge_len.clone(),
        sym: tensor.sym.clone(),
        mapping: dst,
        data,
        home: None,
        poisoned: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::LocalCommunicator;
    use crate::tensor::{DimMapping, Mapping};
    use std::thread;

    /// Two ranks, a 4-length vector split cyclically, redistributed to a
    /// mapping with a different virtualization factor; every rank's
    /// reconstructed global vector must match the original.
    #[test]
    fn redistribute_round_trips_through_a_different_mapping() {
        let comms = LocalCommunicator::new_world(2);
        let src_mapping = Mapping {
            dims: vec![DimMapping { phys: 2, virt: 1 }],
        };
        let dst_mapping = Mapping {
            dims: vec![DimMapping { phys: 2, virt: 2 }],
        };
        let edge_len = vec![8usize];

        thread::scope(|scope| {
            let mut handles = Vec::new();
            for comm in &comms {
                let src_mapping = src_mapping.clone();
                let dst_mapping = dst_mapping.clone();
                let edge_len = edge_len.clone();
                handles.push(scope.spawn(move || {
                    // Seed this rank's local buffer so global value == global coordinate.
                    let rank = comm.rank();
                    let local_size = tensor::local_padded_size(&edge_len, &src_mapping);
                    let mut data = vec![0i64; local_size];
                    for c in 0..edge_len[0] {
                        if c % src_mapping.dims[0].phys == rank {
                            let idx = local_index(&[c], &edge_len, &src_mapping);
                            data[idx] = c as i64;
                        }
                    }
                    let tensor = DistTensor {
                        name: None,
                        profile: false,
                        order: 1,
                        edge_len: edge_len.clone(),
                        sym: vec![SymTag::NS],
                        mapping: src_mapping,
                        data,
                        home: None,
                        poisoned: false,
                    };
                    let moved = redistribute(&tensor, dst_mapping.clone(), comm).unwrap();
                    for c in 0..edge_len[0] {
                        if c % dst_mapping.dims[0].phys == rank {
                            let idx = local_index(&[c], &edge_len, &dst_mapping);
                            assert_eq!(moved.data[idx], c as i64);
                        }
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
        });
    }

    #[test]
    fn identity_mapping_is_a_no_op_clone() {
        let comms = LocalCommunicator::new_world(1);
        let mapping = Mapping {
            dims: vec![DimMapping { phys: 1, virt: 1 }],
        };
        let tensor = DistTensor {
            name: None,
            profile: false,
            order: 1,
            edge_len: vec![4],
            sym: vec![SymTag::NS],
            mapping: mapping.clone(),
            data: vec![1i64, 2, 3, 4],
            home: None,
            poisoned: false,
        };
        let moved = redistribute(&tensor, mapping, &comms[0]).unwrap();
        assert_eq!(moved.data, vec![1, 2, 3, 4]);
    }
}
