//! Dataset Trait - Core Data Abstraction
//!
//! Defines the Dataset trait that data sources implement, plus a
//! tensor-backed in-memory dataset.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use tessera_core::Tensor;

// =============================================================================
// Dataset Trait
// =============================================================================

/// Core trait for all datasets.
///
/// A dataset provides indexed access to data items.
pub trait Dataset: Send + Sync {
    /// The type of items in the dataset.
    type Item: Send;

    /// Returns the number of items in the dataset.
    fn len(&self) -> usize;

    /// Returns true if the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets an item by index.
    fn get(&self, index: usize) -> Option<Self::Item>;
}

// =============================================================================
// TensorDataset
// =============================================================================

/// A dataset wrapping `(input, target)` tensors, one sample per row.
pub struct TensorDataset {
    data: Tensor,
    targets: Tensor,
    len: usize,
}

impl TensorDataset {
    /// Creates a new `TensorDataset` from input and target tensors.
    ///
    /// The first dimension of both tensors must match.
    #[must_use]
    pub fn new(data: Tensor, targets: Tensor) -> Self {
        let len = data.len0();
        assert_eq!(
            len,
            targets.len0(),
            "data and targets must have the same first dimension"
        );
        Self { data, targets, len }
    }

    fn row(tensor: &Tensor, index: usize) -> Tensor {
        let row = tensor.row_size();
        let values = tensor.to_vec()[index * row..(index + 1) * row].to_vec();
        let shape: Vec<usize> = if tensor.ndim() > 1 {
            tensor.shape()[1..].to_vec()
        } else {
            vec![1]
        };
        Tensor::from_vec(values, &shape).unwrap_or_else(|_| Tensor::zeros(&shape))
    }
}

impl Dataset for TensorDataset {
    type Item = (Tensor, Tensor);

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Option<Self::Item> {
        if index >= self.len {
            return None;
        }
        Some((Self::row(&self.data, index), Self::row(&self.targets, index)))
    }
}

// =============================================================================
// Tests
// =============================================================================
