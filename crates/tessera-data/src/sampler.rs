//! Samplers - Epoch Index Order
//!
//! Strategies for producing one epoch's index order over a dataset.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use rand::seq::SliceRandom;

// =============================================================================
// Sampler Trait
// =============================================================================

/// Trait for all samplers.
///
/// A sampler generates indices that define the order of data access.
pub trait Sampler: Send + Sync {
    /// Returns the number of samples.
    fn len(&self) -> usize;

    /// Returns true if empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an iterator over indices.
    fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_>;
}

// =============================================================================
// SequentialSampler
// =============================================================================

/// Samples elements sequentially.
pub struct SequentialSampler {
    len: usize,
}

impl SequentialSampler {
    /// Creates a new `SequentialSampler`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new(0..self.len)
    }
}

// =============================================================================
// RandomSampler
// =============================================================================

/// Samples all elements once, in a fresh random order per iteration.
pub struct RandomSampler {
    len: usize,
}

impl RandomSampler {
    /// Creates a new `RandomSampler` without replacement.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        let mut indices: Vec<usize> = (0..self.len).collect();
        indices.shuffle(&mut rand::thread_rng());
        Box::new(indices.into_iter())
    }
}

// =============================================================================
// Tests
// =============================================================================
