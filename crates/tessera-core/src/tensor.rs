//! Tensor - Batch Interchange Tensor
//!
//! A minimal row-major `f32` tensor used to carry batches between the
//! data loaders, the model seam, and the distributed gather/unpad path.
//! Supports exactly the operations that path needs: construction,
//! shape queries, leading-dimension slicing, and leading-dimension
//! concatenation. Everything heavier lives in the external engine.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use crate::error::{Error, Result};

// =============================================================================
// Tensor
// =============================================================================

/// A row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Creates a tensor from a flat vector and a shape.
    ///
    /// The number of elements must match the product of the shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::invalid_operation(format!(
                "cannot shape {} elements as {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    /// Creates a zero-dimensional (scalar) tensor.
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
        }
    }

    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: vec![0.0; numel],
            shape: shape.to_vec(),
        }
    }

    /// Returns the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the length of the leading dimension, or 0 for a scalar.
    #[must_use]
    pub fn len0(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Returns the number of elements in one leading-dimension row.
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Returns the elements as a flat vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Returns the rows `[start, end)` along the leading dimension.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if self.ndim() == 0 {
            return Err(Error::invalid_operation("cannot slice a scalar tensor"));
        }
        if start > end || end > self.len0() {
            return Err(Error::invalid_operation(format!(
                "row range {start}..{end} out of bounds for leading dimension {}",
                self.len0()
            )));
        }
        let row = self.row_size();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Ok(Self {
            data: self.data[start * row..end * row].to_vec(),
            shape,
        })
    }

    /// Concatenates tensors along the leading dimension.
    ///
    /// All parts must share the same trailing shape.
    pub fn cat_rows(parts: &[Self]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(Error::invalid_operation("cat_rows of no tensors"));
        };
        if first.ndim() == 0 {
            return Err(Error::invalid_operation("cannot concatenate scalars"));
        }
        let tail = &first.shape[1..];
        let mut rows = 0;
        let mut data = Vec::new();
        for part in parts {
            if part.ndim() == 0 || &part.shape[1..] != tail {
                return Err(Error::shape_mismatch(&first.shape, &part.shape));
            }
            rows += part.len0();
            data.extend_from_slice(&part.data);
        }
        let mut shape = vec![rows];
        shape.extend_from_slice(tail);
        Ok(Self { data, shape })
    }
}

// =============================================================================
// Tests
// =============================================================================
