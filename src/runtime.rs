//! Process-wide runtime: one per [`crate::world::World`], owning the memory
//! arena and the process-wide counters the core needs (design note §9:
//! "collapse the global `mem_used`/`mst_buffer`/`instance_counter` statics
//! into one object passed down explicitly, instead of file-scope globals").

use crate::arena::Arena;
use parking_lot::Mutex;

/// Default per-sub-arena capacity; generous enough for the block sizes this
/// crate's scenarios exercise without forcing every allocation through the
/// general allocator.
const SUB_ARENA_CAPACITY: usize = 1 << 20;

/// One sub-arena per worker thread of the optional kernel thread pool, plus
/// one reserved slot for the calling thread itself, so concurrent access is
/// serialized by construction rather than by a shared lock on one arena
/// (§5: "serialized by the caller or by internal per-thread sub-arenas").
pub struct Runtime {
    sub_arenas: Vec<Mutex<Arena>>,
    tensors_created: Mutex<u64>,
    tensors_destroyed: Mutex<u64>,
}

impl Runtime {
    pub fn new(worker_threads: usize) -> Runtime {
        Runtime {
            sub_arenas: (0..=worker_threads)
                .map(|_| Mutex::new(Arena::new(SUB_ARENA_CAPACITY)))
                .collect(),
            tensors_created: Mutex::new(0),
            tensors_destroyed: Mutex::new(0),
        }
    }

    /// The sub-arena slot for the calling thread: `rayon::current_thread_index()`
    /// when called from inside the pool, the last reserved slot otherwise.
    fn local_index(&self) -> usize {
        #[cfg(feature = "rayon-kernel")]
        {
            if let Some(i) = rayon::current_thread_index() {
                return i.min(self.sub_arenas.len() - 1);
            }
        }
        self.sub_arenas.len() - 1
    }

    /// Run `f` against the calling thread's sub-arena.
    pub fn with_local_arena<R>(&self, f: impl FnOnce(&mut Arena) -> R) -> R {
        let idx = self.local_index();
        let mut arena = self.sub_arenas[idx].lock();
        f(&mut arena)
    }

    pub fn record_tensor_created(&self) {
        *self.tensors_created.lock() += 1;
    }

    pub fn record_tensor_destroyed(&self) {
        *self.tensors_destroyed.lock() += 1;
    }

    pub fn live_tensor_count(&self) -> u64 {
        *self.tensors_created.lock() - *self.tensors_destroyed.lock()
    }
}
