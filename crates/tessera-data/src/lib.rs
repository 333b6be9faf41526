//! Tessera Data - Data Loading Utilities
//!
//! Data loading infrastructure for the Tessera training loop:
//! - `Dataset` trait for defining data sources
//! - `EpochLoader` contract with per-epoch lifecycle hooks
//! - `InMemoryLoader` for batched iteration with parallel loading
//! - Samplers for epoch index order
//! - Nested `Batch` structures transformed element-wise
//!
//! # Example
//!
//! ```
//! use tessera_core::Tensor;
//! use tessera_data::prelude::*;
//!
//! let ds = TensorDataset::new(Tensor::zeros(&[8, 4]), Tensor::zeros(&[8]));
//! let mut loader = InMemoryLoader::new(ds, 2).shuffle(true);
//!
//! let idxs = loader.get_idxs().unwrap();
//! for batch in loader.create_batches(&idxs) {
//!     assert_eq!(find_batch_size(&batch), 2);
//! }
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
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]

pub mod batch;
pub mod dataset;
pub mod loader;
pub mod sampler;

// =============================================================================
// Re-exports
// =============================================================================

pub use batch::{find_batch_size, stack_tensors, Batch};
pub use dataset::{Dataset, TensorDataset};
pub use loader::{EpochLoader, InMemoryLoader};
pub use sampler::{RandomSampler, Sampler, SequentialSampler};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for data loading.
pub mod prelude {
    pub use crate::{
        find_batch_size, stack_tensors, Batch, Dataset, EpochLoader, InMemoryLoader, RandomSampler,
        Sampler, SequentialSampler, TensorDataset,
    };
    pub use tessera_core::Tensor;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_loader_epoch_lifecycle() {
        let ds = TensorDataset::new(Tensor::zeros(&[6, 2]), Tensor::zeros(&[6]));
        let mut loader = InMemoryLoader::new(ds, 2);

        let idxs = loader.get_idxs().unwrap();
        loader.before_iter();
        let batches = loader.create_batches(&idxs);
        let mut seen = 0;
        for batch in batches {
            let batch = loader.after_batch(batch);
            seen += find_batch_size(&batch);
        }
        loader.after_iter();
        assert_eq!(seen, 6);
    }
}
