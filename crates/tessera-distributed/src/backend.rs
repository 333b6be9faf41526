//! Backend - Collective Communication Seam
//!
//! The `CollectiveBackend` trait is the contract with the external
//! communication layer (NCCL, Gloo, MPI). This crate only needs three
//! collectives: broadcasting an index order from one rank, gathering
//! per-rank tensors rank-major, and a barrier. All three block until
//! every rank in the world reaches the same call; no timeout is applied
//! at this layer.
//!
//! `MockBackend` is an in-process implementation for tests: ranks run
//! on threads and synchronize through a shared generation-counted
//! state, so the blocking semantics match a real backend.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::sync::{Arc, Condvar, Mutex};

// =============================================================================
// CollectiveBackend Trait
// =============================================================================

/// Trait for distributed communication backends.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &str;

    /// Returns the rank of this process.
    fn rank(&self) -> usize;

    /// Returns the total world size.
    fn world_size(&self) -> usize;

    /// Broadcasts an index sequence from `src` to all ranks. Every rank
    /// receives `src`'s sequence, regardless of what it passed in.
    fn broadcast_indices(&self, data: Vec<u64>, src: usize) -> Vec<u64>;

    /// Gathers each rank's buffer and returns the rank-major
    /// concatenation on every rank.
    fn all_gather(&self, data: &[f32]) -> Vec<f32>;

    /// Blocks until all ranks reach the barrier.
    fn barrier(&self);
}

// =============================================================================
// Shared State for Mock Backend
// =============================================================================

/// Synchronization state shared by all ranks of a mock world.
///
/// Each collective is generation-counted: a rank entering operation
/// generation `g` cannot observe state from generation `g + 1`, and the
/// last rank to leave an operation clears its slots and advances the
/// generation, releasing everyone else.
struct SharedState {
    bcast_slot: Option<Vec<u64>>,
    bcast_taken: usize,
    bcast_gen: u64,
    gather_slots: Vec<Option<Vec<f32>>>,
    gather_taken: usize,
    gather_gen: u64,
    barrier_count: usize,
    barrier_gen: u64,
}

impl SharedState {
    fn new(world_size: usize) -> Self {
        Self {
            bcast_slot: None,
            bcast_taken: 0,
            bcast_gen: 0,
            gather_slots: vec![None; world_size],
            gather_taken: 0,
            gather_gen: 0,
            barrier_count: 0,
            barrier_gen: 0,
        }
    }
}

// =============================================================================
// Mock Backend
// =============================================================================

/// An in-process backend for testing distributed operations.
///
/// `create_world(n)` returns one handle per rank, all sharing the same
/// state; move each handle onto its own thread to simulate a world.
pub struct MockBackend {
    rank: usize,
    world_size: usize,
    shared: Arc<(Mutex<SharedState>, Condvar)>,
}

impl MockBackend {
    /// Creates a collection of mock backends sharing one world.
    #[must_use]
    pub fn create_world(world_size: usize) -> Vec<Self> {
        let world_size = world_size.max(1);
        let shared = Arc::new((Mutex::new(SharedState::new(world_size)), Condvar::new()));
        (0..world_size)
            .map(|rank| MockBackend {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Creates a single mock backend (rank 0, world size 1).
    #[must_use]
    pub fn single() -> Self {
        MockBackend::create_world(1)
            .pop()
            .unwrap_or_else(|| unreachable!("create_world(1) yields one backend"))
    }
}

impl CollectiveBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn broadcast_indices(&self, data: Vec<u64>, src: usize) -> Vec<u64> {
        if self.world_size <= 1 {
            return data;
        }
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let gen = state.bcast_gen;

        if self.rank == src {
            state.bcast_slot = Some(data);
            cv.notify_all();
        }
        while !(state.bcast_gen == gen && state.bcast_slot.is_some()) {
            state = cv
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        let out = state
            .bcast_slot
            .clone()
            .unwrap_or_default();

        state.bcast_taken += 1;
        if state.bcast_taken == self.world_size {
            state.bcast_slot = None;
            state.bcast_taken = 0;
            state.bcast_gen += 1;
            cv.notify_all();
        } else {
            while state.bcast_gen == gen {
                state = cv
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
        out
    }

    fn all_gather(&self, data: &[f32]) -> Vec<f32> {
        if self.world_size <= 1 {
            return data.to_vec();
        }
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let gen = state.gather_gen;

        state.gather_slots[self.rank] = Some(data.to_vec());
        if state.gather_slots.iter().all(Option::is_some) {
            cv.notify_all();
        }
        while !(state.gather_gen == gen && state.gather_slots.iter().all(Option::is_some)) {
            state = cv
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        // Rank-major concatenation: rank 0's buffer first.
        let out: Vec<f32> = state
            .gather_slots
            .iter()
            .flat_map(|slot| slot.as_deref().unwrap_or_default().iter().copied())
            .collect();

        state.gather_taken += 1;
        if state.gather_taken == self.world_size {
            let world = self.world_size;
            state.gather_slots = vec![None; world];
            state.gather_taken = 0;
            state.gather_gen += 1;
            cv.notify_all();
        } else {
            while state.gather_gen == gen {
                state = cv
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
        out
    }

    fn barrier(&self) {
        if self.world_size <= 1 {
            return;
        }
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let gen = state.barrier_gen;

        state.barrier_count += 1;
        if state.barrier_count == self.world_size {
            state.barrier_count = 0;
            state.barrier_gen += 1;
            cv.notify_all();
        } else {
            while state.barrier_gen == gen {
                state = cv
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
