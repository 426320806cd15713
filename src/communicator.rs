//! The message-passing seam.
//!
//! Real distributed transport (MPI, gRPC, ...) is an external collaborator
//! and out of scope for this crate, exactly as bindings to the
//! message-passing library are declared out of scope for the core. What the
//! core needs is a small, object-safe collective interface it can call
//! against; [`Communicator`] is that seam, mirroring how the teacher keeps
//! its `NetworkingStrategy` separate from the execution engine so the
//! engine never hard-codes a transport.
//!
//! [`LocalCommunicator`] is the one concrete implementation shipped here: an
//! in-process simulation of `n` ranks synchronized with a reusable
//! [`std::sync::Barrier`], sufficient to exercise every property in the
//! testable-properties section against 1, 2, or 4 simulated ranks.

use crate::error::{CtfError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

/// Object-safe collective interface. All payloads cross this boundary as
/// opaque bytes; typed collectives (`all_reduce_sum`, `all_reduce_custom`)
/// are free functions below built on top of [`Communicator::allgather_bytes`].
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Broadcast `payload` from `root` to every rank, in place.
    fn broadcast_bytes(&self, root: usize, payload: &mut Vec<u8>) -> Result<()>;

    /// Gather one payload per rank, in rank order, onto every rank.
    fn allgather_bytes(&self, local: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// Variable-length all-to-all: `send[dst]` is what this rank sends to
    /// `dst`; the return value's `i`-th entry is what this rank received
    /// from rank `i`. `send.len()` must equal `size()`.
    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    /// Split this communicator: ranks supplying the same `color` end up in
    /// the same sub-communicator, ordered by `key` (ties broken by original
    /// rank). Sub-communicators are cached per resulting member set so that
    /// repeated splits along the same grouping reuse the same object.
    fn split(&self, color: usize, key: i64) -> Result<Arc<dyn Communicator>>;
}

/// Reduce `buffer[..count]` with `combine` across every rank in `comm`,
/// leaving the result on every rank (an all-reduce).
pub fn all_reduce_with<T, F>(
    comm: &dyn Communicator,
    buffer: &mut [T],
    count: usize,
    mut combine: F,
) -> Result<()>
where
    T: Serialize + DeserializeOwned + Copy,
    F: FnMut(T, T) -> T,
{
    let payload = bincode::serialize(&buffer[..count])
        .map_err(|e| CtfError::CollectiveFailure {
            rank: comm.rank(),
            message: format!("serialize failed: {}", e),
        })?;
    let gathered = comm.allgather_bytes(payload)?;
    let mut acc: Vec<T> = bincode::deserialize(&gathered[0]).map_err(|e| {
        CtfError::CollectiveFailure {
            rank: comm.rank(),
            message: format!("deserialize failed: {}", e),
        }
    })?;
    for raw in &gathered[1..] {
        let vals: Vec<T> = bincode::deserialize(raw).map_err(|e| CtfError::CollectiveFailure {
            rank: comm.rank(),
            message: format!("deserialize failed: {}", e),
        })?;
        for i in 0..count {
            acc[i] = combine(acc[i], vals[i]);
        }
    }
    buffer[..count].copy_from_slice(&acc);
    Ok(())
}

/// One in-process "world" of simulated ranks. Mailboxes are reused round to
/// round; a [`Barrier`] brackets every phase so that no rank overwrites a
/// slot another rank hasn't finished reading yet.
struct LocalWorld {
    size: usize,
    barrier: Barrier,
    mailbox: Vec<Mutex<Option<Vec<u8>>>>,
    alltoall: Vec<Mutex<Option<Vec<u8>>>>,
    split_cache: Mutex<HashMap<Vec<usize>, Arc<LocalWorld>>>,
}

impl LocalWorld {
    fn new(size: usize) -> Arc<LocalWorld> {
        Arc::new(LocalWorld {
            size,
            barrier: Barrier::new(size),
            mailbox: (0..size).map(|_| Mutex::new(None)).collect(),
            alltoall: (0..size * size).map(|_| Mutex::new(None)).collect(),
            split_cache: Mutex::new(HashMap::new()),
        })
    }
}

/// A handle to one simulated rank within a [`LocalWorld`].
#[derive(Clone)]
pub struct LocalCommunicator {
    world: Arc<LocalWorld>,
    rank: usize,
}

impl LocalCommunicator {
    /// Build `size` communicator handles sharing one in-process world, one
    /// per simulated rank, for use by `size` cooperating threads.
    pub fn new_world(size: usize) -> Vec<LocalCommunicator> {
        let world = LocalWorld::new(size);
        (0..size)
            .map(|rank| LocalCommunicator {
                world: world.clone(),
                rank,
            })
            .collect()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn broadcast_bytes(&self, root: usize, payload: &mut Vec<u8>) -> Result<()> {
        if self.rank == root {
            *self.world.mailbox[root].lock().unwrap() = Some(payload.clone());
        }
        self.world.barrier.wait();
        let value = self.world.mailbox[root]
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CtfError::CollectiveFailure {
                rank: self.rank,
                message: "broadcast root never posted a payload".to_string(),
            })?;
        *payload = value;
        self.world.barrier.wait();
        Ok(())
    }

    fn allgather_bytes(&self, local: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        *self.world.mailbox[self.rank].lock().unwrap() = Some(local);
        self.world.barrier.wait();
        let mut out = Vec::with_capacity(self.world.size);
        for i in 0..self.world.size {
            let v = self.world.mailbox[i].lock().unwrap().clone().ok_or_else(|| {
                CtfError::CollectiveFailure {
                    rank: self.rank,
                    message: format!("rank {} never posted to allgather", i),
                }
            })?;
            out.push(v);
        }
        self.world.barrier.wait();
        Ok(out)
    }

    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if send.len() != self.world.size {
            return Err(CtfError::InvalidInput(format!(
                "all_to_all send buckets ({}) must equal communicator size ({})",
                send.len(),
                self.world.size
            )));
        }
        let n = self.world.size;
        for (dst, payload) in send.into_iter().enumerate() {
            *self.world.alltoall[self.rank * n + dst].lock().unwrap() = Some(payload);
        }
        self.world.barrier.wait();
        let mut recv = Vec::with_capacity(n);
        for src in 0..n {
            let v = self.world.alltoall[src * n + self.rank]
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| CtfError::CollectiveFailure {
                    rank: self.rank,
                    message: format!("rank {} never posted to all-to-all", src),
                })?;
            recv.push(v);
        }
        self.world.barrier.wait();
        Ok(recv)
    }

    fn split(&self, color: usize, key: i64) -> Result<Arc<dyn Communicator>> {
        let payload = bincode::serialize(&(color as i64, key, self.rank as i64)).map_err(|e| {
            CtfError::CollectiveFailure {
                rank: self.rank,
                message: format!("split encode failed: {}", e),
            }
        })?;
        let gathered = self.allgather_bytes(payload)?;
        let mut entries: Vec<(i64, i64, usize)> = Vec::with_capacity(gathered.len());
        for raw in &gathered {
            let (c, k, r): (i64, i64, i64) =
                bincode::deserialize(raw).map_err(|e| CtfError::CollectiveFailure {
                    rank: self.rank,
                    message: format!("split decode failed: {}", e),
                })?;
            entries.push((c, k, r as usize));
        }
        let mut group: Vec<(i64, usize)> = entries
            .iter()
            .filter(|(c, _, _)| *c == color as i64)
            .map(|(_, k, r)| (*k, *r))
            .collect();
        group.sort_unstable();
        let members: Vec<usize> = group.into_iter().map(|(_, r)| r).collect();

        let mut cache = self.world.split_cache.lock().unwrap();
        let sub_world = cache
            .entry(members.clone())
            .or_insert_with(|| LocalWorld::new(members.len()))
            .clone();
        drop(cache);

        let new_rank = members
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| CtfError::InvalidInput("rank not a member of its own split".into()))?;
        Ok(Arc::new(LocalCommunicator {
            world: sub_world,
            rank: new_rank,
        }))
    }
}
