//! Epoch Loaders - Batched Iteration Contract
//!
//! `EpochLoader` is the contract between a data loader and the training
//! loop: it produces one epoch's index order, materializes batches for
//! a set of indices, and exposes the per-epoch lifecycle hooks
//! (`before_iter`, `after_batch`, `after_iter`, `to_detach`) that
//! wrappers interpose on. `InMemoryLoader` is the concrete loader over
//! a tensor dataset, with optional shuffling and worker-parallel sample
//! collection.
//!
//! # Example
//!
//! ```
//! use tessera_core::Tensor;
//! use tessera_data::{EpochLoader, InMemoryLoader, TensorDataset};
//!
//! let ds = TensorDataset::new(Tensor::zeros(&[10, 2]), Tensor::zeros(&[10]));
//! let mut loader = InMemoryLoader::new(ds, 4);
//! let idxs = loader.get_idxs().unwrap();
//! let batches = loader.create_batches(&idxs);
//! assert_eq!(batches.len(), 3);
//! ```
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use rayon::prelude::*;

use tessera_core::{Result, Tensor};

use crate::batch::{stack_tensors, Batch};
use crate::dataset::Dataset;
use crate::sampler::{RandomSampler, Sampler, SequentialSampler};

// =============================================================================
// EpochLoader Trait
// =============================================================================

/// Contract between a data loader and the training loop.
///
/// Implementations own the epoch index order and the batch transforms;
/// wrappers (such as the distributed sharder) interpose on the hooks
/// and delegate the rest.
pub trait EpochLoader: Send {
    /// Returns the number of batches in one epoch.
    fn num_batches(&self) -> usize;

    /// Returns the batch size.
    fn batch_size(&self) -> usize;

    /// Returns the number of samples in the underlying dataset.
    fn dataset_len(&self) -> usize;

    /// Computes one full epoch's index order.
    fn get_idxs(&mut self) -> Result<Vec<usize>>;

    /// Called once before iterating an epoch.
    fn before_iter(&mut self) {}

    /// Re-seeds any per-epoch randomness.
    fn randomize(&mut self) {}

    /// Materializes batches for the given sample indices.
    fn create_batches(&self, idxs: &[usize]) -> Vec<Batch>;

    /// Transforms a batch as it is produced.
    fn after_batch(&mut self, batch: Batch) -> Batch {
        batch
    }

    /// Called once after iterating an epoch.
    fn after_iter(&mut self) {}

    /// Detaches a batch for metrics/logging, optionally gathering it
    /// across ranks. The base implementation is a pass-through; the
    /// distributed sharder overrides it.
    fn to_detach(&self, batch: Batch, _cpu: bool, _gather: bool) -> Result<Batch> {
        Ok(batch)
    }

    /// Returns true if this loader already shards indices across ranks.
    fn is_sharded(&self) -> bool {
        false
    }

    /// Removes one level of shard wrapping, returning the wrapped
    /// loader; plain loaders return themselves.
    fn unshard(self: Box<Self>) -> Box<dyn EpochLoader>;
}

// =============================================================================
// InMemoryLoader
// =============================================================================

/// Loader over an in-memory dataset with configurable batching.
pub struct InMemoryLoader<D>
where
    D: Dataset<Item = (Tensor, Tensor)>,
{
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    num_workers: usize,
}

impl<D> InMemoryLoader<D>
where
    D: Dataset<Item = (Tensor, Tensor)>,
{
    /// Creates a new loader with the specified batch size.
    pub fn new(dataset: D, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            num_workers: 0,
        }
    }

    /// Enables or disables shuffling.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Sets whether to drop the last incomplete batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Sets the number of worker threads for parallel sample collection.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    fn collect_samples(&self, idxs: &[usize]) -> Vec<(Tensor, Tensor)> {
        if self.num_workers > 0 {
            idxs.par_iter()
                .filter_map(|&idx| self.dataset.get(idx))
                .collect()
        } else {
            idxs.iter()
                .filter_map(|&idx| self.dataset.get(idx))
                .collect()
        }
    }
}

impl<D> EpochLoader for InMemoryLoader<D>
where
    D: Dataset<Item = (Tensor, Tensor)> + 'static,
{
    fn num_batches(&self) -> usize {
        let total = self.dataset.len();
        if self.drop_last {
            total / self.batch_size
        } else {
            total.div_ceil(self.batch_size)
        }
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    fn get_idxs(&mut self) -> Result<Vec<usize>> {
        let idxs = if self.shuffle {
            RandomSampler::new(self.dataset.len()).iter().collect()
        } else {
            SequentialSampler::new(self.dataset.len()).iter().collect()
        };
        Ok(idxs)
    }

    fn create_batches(&self, idxs: &[usize]) -> Vec<Batch> {
        let mut batches = Vec::new();
        for chunk in idxs.chunks(self.batch_size) {
            if chunk.len() < self.batch_size && self.drop_last {
                break;
            }
            let samples = self.collect_samples(chunk);
            if samples.is_empty() {
                continue;
            }
            let inputs: Vec<Tensor> = samples.iter().map(|(x, _)| x.clone()).collect();
            let targets: Vec<Tensor> = samples.iter().map(|(_, y)| y.clone()).collect();
            match (stack_tensors(&inputs), stack_tensors(&targets)) {
                (Ok(x), Ok(y)) => batches.push(Batch::pair(x, y)),
                _ => continue,
            }
        }
        batches
    }

    fn unshard(self: Box<Self>) -> Box<dyn EpochLoader> {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::find_batch_size;
    use crate::dataset::TensorDataset;

    fn dataset(size: usize) -> TensorDataset {
        let data: Vec<f32> = (0..size * 2).map(|i| i as f32).collect();
        let targets: Vec<f32> = (0..size).map(|i| (i % 2) as f32).collect();
        TensorDataset::new(
            Tensor::from_vec(data, &[size, 2]).unwrap(),
            Tensor::from_vec(targets, &[size]).unwrap(),
        )
    }

    #[test]
    fn test_num_batches() {
        let loader = InMemoryLoader::new(dataset(10), 3);
        assert_eq!(loader.num_batches(), 4);

        let loader = InMemoryLoader::new(dataset(10), 3).drop_last(true);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_create_batches_sizes() {
        let mut loader = InMemoryLoader::new(dataset(10), 3);
        let idxs = loader.get_idxs().unwrap();
        let batches = loader.create_batches(&idxs);
        assert_eq!(batches.len(), 4);
        assert_eq!(find_batch_size(&batches[0]), 3);
        assert_eq!(find_batch_size(&batches[3]), 1);
    }

    #[test]
    fn test_drop_last_batches() {
        let mut loader = InMemoryLoader::new(dataset(10), 3).drop_last(true);
        let idxs = loader.get_idxs().unwrap();
        let batches = loader.create_batches(&idxs);
        assert_eq!(batches.len(), 3);
        for b in &batches {
            assert_eq!(find_batch_size(b), 3);
        }
    }

    #[test]
    fn test_sequential_order() {
        let mut loader = InMemoryLoader::new(dataset(6), 2);
        let idxs = loader.get_idxs().unwrap();
        assert_eq!(idxs, vec![0, 1, 2, 3, 4, 5]);

        let batches = loader.create_batches(&idxs);
        let Batch::Tuple(parts) = &batches[0] else {
            panic!("expected pair batch");
        };
        let Batch::Leaf(x) = &parts[0] else {
            panic!("expected leaf input");
        };
        assert_eq!(x.to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut loader = InMemoryLoader::new(dataset(50), 5).shuffle(true);
        let mut idxs = loader.get_idxs().unwrap();
        idxs.sort_unstable();
        assert_eq!(idxs, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut seq = InMemoryLoader::new(dataset(20), 4);
        let mut par = InMemoryLoader::new(dataset(20), 4).num_workers(4);

        let idxs = seq.get_idxs().unwrap();
        let a = seq.create_batches(&idxs);
        let idxs = par.get_idxs().unwrap();
        let b = par.create_batches(&idxs);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let mut loader = InMemoryLoader::new(dataset(0), 4);
        assert_eq!(loader.num_batches(), 0);
        let idxs = loader.get_idxs().unwrap();
        assert!(idxs.is_empty());
        assert!(loader.create_batches(&idxs).is_empty());
    }

    #[test]
    fn test_plain_loader_is_not_sharded() {
        let loader: Box<dyn EpochLoader> = Box::new(InMemoryLoader::new(dataset(4), 2));
        assert!(!loader.is_sharded());
        let unwrapped = loader.unshard();
        assert!(!unwrapped.is_sharded());
    }
}
