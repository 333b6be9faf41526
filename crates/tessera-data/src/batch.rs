//! Batch - Nested Batch Structures
//!
//! A batch is a tree of tensors: a bare tensor, or a tuple of further
//! batches (inputs and targets, multi-input models, and so on). The
//! distributed layer transforms batches element-wise, so the tree shape
//! is preserved through gather and unpad.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use tessera_core::{Error, Result, Tensor};

// =============================================================================
// Batch
// =============================================================================

/// A possibly nested batch of tensors.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// A single tensor.
    Leaf(Tensor),
    /// A tuple of sub-batches.
    Tuple(Vec<Batch>),
}

impl Batch {
    /// Creates the common `(input, target)` pair batch.
    #[must_use]
    pub fn pair(input: Tensor, target: Tensor) -> Self {
        Self::Tuple(vec![Self::Leaf(input), Self::Leaf(target)])
    }

    /// Applies `f` to every leaf tensor, preserving the tree shape.
    #[must_use]
    pub fn map<F>(self, f: &F) -> Self
    where
        F: Fn(Tensor) -> Tensor,
    {
        match self {
            Self::Leaf(t) => Self::Leaf(f(t)),
            Self::Tuple(parts) => Self::Tuple(parts.into_iter().map(|b| b.map(f)).collect()),
        }
    }

    /// Applies a fallible `f` to every leaf tensor.
    pub fn try_map<F>(self, f: &F) -> Result<Self>
    where
        F: Fn(Tensor) -> Result<Tensor>,
    {
        match self {
            Self::Leaf(t) => Ok(Self::Leaf(f(t)?)),
            Self::Tuple(parts) => Ok(Self::Tuple(
                parts
                    .into_iter()
                    .map(|b| b.try_map(f))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    /// Returns references to the leaf tensors in depth-first order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Tensor> {
        match self {
            Self::Leaf(t) => vec![t],
            Self::Tuple(parts) => parts.iter().flat_map(Batch::leaves).collect(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Returns the sample count of a batch: the leading-dimension length of
/// its first leaf tensor, or 0 for an empty batch.
#[must_use]
pub fn find_batch_size(batch: &Batch) -> usize {
    batch.leaves().first().map_or(0, |t| t.len0())
}

/// Stacks per-sample tensors into one batch tensor with a new leading
/// dimension.
pub fn stack_tensors(samples: &[Tensor]) -> Result<Tensor> {
    let Some(first) = samples.first() else {
        return Tensor::from_vec(Vec::new(), &[0]);
    };
    let item_shape = first.shape().to_vec();
    let mut data = Vec::with_capacity(first.numel() * samples.len());
    for sample in samples {
        if sample.shape() != item_shape.as_slice() {
            return Err(Error::shape_mismatch(&item_shape, sample.shape()));
        }
        data.extend(sample.to_vec());
    }
    let mut shape = vec![samples.len()];
    shape.extend_from_slice(&item_shape);
    Tensor::from_vec(data, &shape)
}

// =============================================================================
// Tests
// =============================================================================
