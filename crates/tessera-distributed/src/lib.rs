//! Tessera Distributed - Multi-Process and Multi-Device Training
//!
//! Orchestrates replicated training for the Tessera training loop:
//!
//! ## Index Sharding
//! - `ShardedLoader` - partitions every epoch's index order into equal,
//!   disjoint per-rank slices, padded wrap-around so all ranks run the
//!   same number of batches, and trims the padding back out of gathered
//!   results
//!
//! ## Replication
//! - `ParallelTrainer` - single-process multi-device replication for
//!   the duration of one fit
//! - `DistributedTrainer` - multi-process replication: prepares the
//!   model through an `Accelerator`, shards every loader, and silences
//!   reporting on non-zero ranks
//!
//! ## Coordination
//! - `ProcessGroup` and the process-wide default group
//!   (`init_process_group`, `setup_distrib`, `teardown_distrib`)
//! - `rank0_first` - rank 0 runs a side-effecting function before any
//!   other rank
//! - `MockBackend` - in-process blocking backend for tests
//!
//! # Example
//!
//! ```ignore
//! use tessera_distributed::prelude::*;
//!
//! setup_distrib(Some(Device::Cuda(local_rank)), backend)?;
//! let mut scope = learn.distrib_scope(AcceleratorConfig::default())?;
//! scope.fit(10)?;
//! drop(scope);
//! teardown_distrib();
//! ```
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]

pub mod backend;
pub mod ddp;
pub mod group;
pub mod replica;
pub mod scope;
pub mod shard;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{CollectiveBackend, MockBackend};
pub use ddp::{
    Accelerator, AcceleratorConfig, DistributedReplica, DistributedTrainer, LocalAccelerator,
};
pub use group::{
    default_group, destroy_process_group, distrib_barrier, init_process_group, is_initialized,
    num_distrib, rank_distrib, setup_distrib, teardown_distrib, ProcessGroup,
};
pub use replica::{DataParallel, ParallelTrainer};
pub use scope::{rank0_first, rank0_first_in, DistribScope, Distributable, ParallelScope};
pub use shard::ShardedLoader;

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for distributed training.
pub mod prelude {
    pub use crate::{
        default_group, destroy_process_group, distrib_barrier, init_process_group, is_initialized,
        num_distrib, rank0_first, rank0_first_in, rank_distrib, setup_distrib, teardown_distrib,
        Accelerator, AcceleratorConfig, CollectiveBackend, DataParallel, DistribScope,
        Distributable, DistributedReplica, DistributedTrainer, LocalAccelerator, MockBackend,
        ParallelScope, ParallelTrainer, ProcessGroup, ShardedLoader,
    };
    pub use tessera_core::Device;
    pub use tessera_train::{Learner, Module};
}

// =============================================================================
// Tests
// =============================================================================
