//! Process Group - Rank Context and Collective Handles
//!
//! `ProcessGroup` is a cloneable handle over a collective backend with
//! the typed operations the sharder needs. A process-wide default group
//! mirrors how launchers drive training scripts: one process per rank,
//! each initializing its own group at startup and tearing it down at
//! exit. `num_distrib`/`rank_distrib` fall back to the `WORLD_SIZE` and
//! `RANK` environment variables when no group is active, so code can
//! detect a configured-but-uninitialized world and fail fast.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::sync::Arc;

use parking_lot::RwLock;

use tessera_core::{Device, Error, Result, Tensor};

use crate::backend::CollectiveBackend;

// =============================================================================
// ProcessGroup
// =============================================================================

/// A group of ranks that can communicate with each other.
pub struct ProcessGroup {
    backend: Arc<dyn CollectiveBackend>,
}

impl ProcessGroup {
    /// Creates a process group over a backend.
    pub fn new(backend: Arc<dyn CollectiveBackend>) -> Self {
        Self { backend }
    }

    /// Creates a single-rank mock group for testing.
    #[must_use]
    pub fn mock() -> Self {
        Self::new(Arc::new(crate::backend::MockBackend::single()))
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    /// Checks if this is the main process (rank 0).
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.rank() == 0
    }

    /// Blocks until all ranks reach the barrier.
    pub fn barrier(&self) {
        self.backend.barrier();
    }

    /// Broadcasts an index order from `src`; every rank receives `src`'s
    /// order.
    #[must_use]
    pub fn broadcast_indices(&self, idxs: Vec<usize>, src: usize) -> Vec<usize> {
        let raw: Vec<u64> = idxs.into_iter().map(|i| i as u64).collect();
        self.backend
            .broadcast_indices(raw, src)
            .into_iter()
            .map(|i| i as usize)
            .collect()
    }

    /// Gathers a tensor from every rank and concatenates along the
    /// leading dimension, rank-major: rank 0's rows come first, then
    /// rank 1's, and so on. The unpad arithmetic in the sharder depends
    /// on exactly this order.
    pub fn all_gather_concat(&self, tensor: &Tensor) -> Result<Tensor> {
        let flat = self.backend.all_gather(&tensor.to_vec());
        let shape: Vec<usize> = if tensor.ndim() == 0 {
            vec![self.world_size()]
        } else {
            let mut s = tensor.shape().to_vec();
            s[0] *= self.world_size();
            s
        };
        Tensor::from_vec(flat, &shape)
    }
}

impl Clone for ProcessGroup {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

// =============================================================================
// Default Group Registry
// =============================================================================

static DEFAULT_GROUP: RwLock<Option<ProcessGroup>> = RwLock::new(None);

/// Initializes the process-wide default group.
///
/// Fails fast if a group is already active; tear the old one down
/// first.
pub fn init_process_group(backend: Arc<dyn CollectiveBackend>) -> Result<ProcessGroup> {
    let mut slot = DEFAULT_GROUP.write();
    if slot.is_some() {
        return Err(Error::process_group("a process group is already initialized"));
    }
    let group = ProcessGroup::new(backend);
    tracing::info!(
        backend = group.backend.name(),
        rank = group.rank(),
        world_size = group.world_size(),
        "process group initialized"
    );
    *slot = Some(group.clone());
    Ok(group)
}

/// Returns true if a default group is active.
#[must_use]
pub fn is_initialized() -> bool {
    DEFAULT_GROUP.read().is_some()
}

/// Destroys the default group; no-op if none is active.
pub fn destroy_process_group() {
    if DEFAULT_GROUP.write().take().is_some() {
        tracing::info!("process group destroyed");
    }
}

/// Returns a handle to the default group, if one is active.
#[must_use]
pub fn default_group() -> Option<ProcessGroup> {
    DEFAULT_GROUP.read().as_ref().cloned()
}

fn env_usize(key: &str) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Returns the number of distributed participants: the active group's
/// world size, or the `WORLD_SIZE` environment variable when no group
/// is active. 0 or 1 means non-distributed.
#[must_use]
pub fn num_distrib() -> usize {
    default_group().map_or_else(|| env_usize("WORLD_SIZE"), |g| g.world_size())
}

/// Returns this process's rank: the active group's rank, or the `RANK`
/// environment variable when no group is active.
#[must_use]
pub fn rank_distrib() -> usize {
    default_group().map_or_else(|| env_usize("RANK"), |g| g.rank())
}

/// Blocks until all ranks reach the barrier; no-op when not
/// distributed.
pub fn distrib_barrier() {
    if let Some(group) = default_group() {
        if group.world_size() > 1 {
            group.barrier();
        }
    }
}

// =============================================================================
// Setup / Teardown
// =============================================================================

/// Binds this process to a device and joins the distributed world.
///
/// Returns the bound device. With `None` the process stays unbound and
/// non-distributed. The group is only initialized when the backend's
/// world is larger than one and no group is active yet.
pub fn setup_distrib(
    device: Option<Device>,
    backend: Arc<dyn CollectiveBackend>,
) -> Result<Option<Device>> {
    let Some(device) = device else {
        return Ok(None);
    };
    tracing::debug!(%device, "binding process to device");
    if backend.world_size() > 1 && !is_initialized() {
        init_process_group(backend)?;
    }
    Ok(Some(device))
}

/// Frees distributed resources; no-op if no group is active.
pub fn teardown_distrib() {
    if is_initialized() {
        destroy_process_group();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) fn registry_test_guard() -> std::sync::MutexGuard<'static, ()> {
    // The default-group registry is process-wide; tests that mutate it
    // must not interleave.
    static REGISTRY_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    REGISTRY_TEST_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
