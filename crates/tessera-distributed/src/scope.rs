//! Scope - Attach/Detach Helpers and Rank-Ordered Execution
//!
//! Extension methods on `Learner` for attaching the replicator
//! callbacks, RAII scopes that guarantee detachment on every exit path,
//! and `rank0_first` for side-effecting work (downloads, cache
//! population) that must complete on rank 0 before any other rank
//! starts it.
//!
//! # Example
//!
//! ```ignore
//! use tessera_distributed::prelude::*;
//!
//! {
//!     let mut scope = learn.distrib_scope(AcceleratorConfig::default())?;
//!     scope.fit(4)?;
//! } // replication detached here, even if fit failed
//! ```
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::ops::{Deref, DerefMut};

use tessera_core::{Device, Result};
use tessera_train::{Learner, ProgressCallback};

use crate::ddp::{AcceleratorConfig, DistributedTrainer};
use crate::group::{default_group, num_distrib, rank_distrib, ProcessGroup};
use crate::replica::ParallelTrainer;

// =============================================================================
// Distributable Extension Trait
// =============================================================================

/// Replication helpers attached to `Learner`.
pub trait Distributable {
    /// Attaches single-process multi-device replication.
    fn to_parallel(&mut self, device_ids: Vec<Device>) -> &mut Self;

    /// Detaches single-process replication.
    fn detach_parallel(&mut self) -> &mut Self;

    /// Attaches multi-process replication. On non-zero ranks the
    /// progress callback is removed so rank 0 is the sole reporter.
    fn to_distributed(&mut self, config: AcceleratorConfig) -> Result<&mut Self>;

    /// Detaches multi-process replication, restoring progress
    /// reporting on non-zero ranks.
    fn detach_distributed(&mut self) -> &mut Self;

    /// Scoped form of `to_parallel`: detaches on drop.
    fn parallel_scope(&mut self, device_ids: Vec<Device>) -> ParallelScope<'_>;

    /// Scoped form of `to_distributed`: detaches on drop. A no-op scope
    /// when the world is not distributed.
    fn distrib_scope(&mut self, config: AcceleratorConfig) -> Result<DistribScope<'_>>;
}

impl Distributable for Learner {
    fn to_parallel(&mut self, device_ids: Vec<Device>) -> &mut Self {
        self.add_cb(Box::new(ParallelTrainer::new(device_ids)));
        self
    }

    fn detach_parallel(&mut self) -> &mut Self {
        self.remove_cb("parallel_trainer");
        self
    }

    fn to_distributed(&mut self, config: AcceleratorConfig) -> Result<&mut Self> {
        let trainer = DistributedTrainer::new(config)?;
        self.add_cb(Box::new(trainer));
        if rank_distrib() != 0 {
            self.remove_cb("progress");
        }
        Ok(self)
    }

    fn detach_distributed(&mut self) -> &mut Self {
        if num_distrib() <= 1 {
            return self;
        }
        self.remove_cb("distributed_trainer");
        if rank_distrib() != 0 && !self.has_cb("progress") {
            self.add_cb(Box::new(ProgressCallback));
        }
        self
    }

    fn parallel_scope(&mut self, device_ids: Vec<Device>) -> ParallelScope<'_> {
        self.to_parallel(device_ids);
        ParallelScope { learn: self }
    }

    fn distrib_scope(&mut self, config: AcceleratorConfig) -> Result<DistribScope<'_>> {
        let attached = if num_distrib() > 1 {
            if rank_distrib() == 0 {
                tracing::info!(world_size = num_distrib(), "training distributed");
            }
            self.to_distributed(config)?;
            true
        } else {
            false
        };
        Ok(DistribScope {
            learn: self,
            attached,
        })
    }
}

// =============================================================================
// Scopes
// =============================================================================

/// RAII guard for single-process replication; detaches on drop.
pub struct ParallelScope<'a> {
    learn: &'a mut Learner,
}

impl Deref for ParallelScope<'_> {
    type Target = Learner;

    fn deref(&self) -> &Learner {
        self.learn
    }
}

impl DerefMut for ParallelScope<'_> {
    fn deref_mut(&mut self) -> &mut Learner {
        self.learn
    }
}

impl Drop for ParallelScope<'_> {
    fn drop(&mut self) {
        self.learn.detach_parallel();
    }
}

/// RAII guard for multi-process replication; detaches on drop.
pub struct DistribScope<'a> {
    learn: &'a mut Learner,
    attached: bool,
}

impl Deref for DistribScope<'_> {
    type Target = Learner;

    fn deref(&self) -> &Learner {
        self.learn
    }
}

impl DerefMut for DistribScope<'_> {
    fn deref_mut(&mut self) -> &mut Learner {
        self.learn
    }
}

impl Drop for DistribScope<'_> {
    fn drop(&mut self) {
        if self.attached {
            self.learn.detach_distributed();
        }
    }
}

// =============================================================================
// Rank-Ordered Execution
// =============================================================================

/// Runs `f` on rank 0 first, then on all other ranks.
///
/// The barrier between the two phases guarantees rank 0's side effects
/// complete before any other rank starts. Every rank runs `f` exactly
/// once and returns its own result. Without a multi-rank group there is
/// nothing to order and `f` runs directly.
pub fn rank0_first_in<T>(group: Option<&ProcessGroup>, f: impl FnOnce() -> T) -> T {
    match group {
        Some(group) if group.world_size() > 1 => {
            if group.rank() == 0 {
                let out = f();
                group.barrier();
                out
            } else {
                group.barrier();
                f()
            }
        }
        _ => f(),
    }
}

/// `rank0_first_in` over the process-wide default group.
pub fn rank0_first<T>(f: impl FnOnce() -> T) -> T {
    rank0_first_in(default_group().as_ref(), f)
}

// =============================================================================
// Tests
// =============================================================================
