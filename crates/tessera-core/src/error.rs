//! Error Types - Tessera Core Error Handling
//!
//! Unified error type for the Tessera workspace. Covers collective
//! backend availability, process-group lifecycle failures, the
//! cross-rank epoch consistency check, and tensor shape errors.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Tessera operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Process-group lifecycle failure (setup, double-init, teardown).
    #[error("Process group error: {message}")]
    ProcessGroup {
        /// Description of the lifecycle failure.
        message: String,
    },

    /// A required collective-communication backend is not available.
    #[error("Collective backend unavailable: {name}")]
    BackendUnavailable {
        /// Name of the missing backend or capability.
        name: String,
    },

    /// Ranks disagree on the epoch length after the canonical-order
    /// broadcast. Left unchecked this would surface much later as a
    /// shape mismatch inside the communication backend.
    #[error("Epoch out of sync on rank {rank}: local length {local}, canonical length {canonical}")]
    EpochOutOfSync {
        /// Rank reporting the divergence.
        rank: usize,
        /// Locally computed epoch length.
        local: usize,
        /// Canonical epoch length received from rank 0.
        canonical: usize,
    },

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Invalid operation for the given input.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Tessera operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new process-group error.
    #[must_use]
    pub fn process_group(message: impl Into<String>) -> Self {
        Self::ProcessGroup {
            message: message.into(),
        }
    }

    /// Creates a new backend-unavailable error.
    #[must_use]
    pub fn backend_unavailable(name: impl Into<String>) -> Self {
        Self::BackendUnavailable { name: name.into() }
    }

    /// Creates a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a new invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::shape_mismatch(&[2, 3], &[2, 4]);
        assert!(err.to_string().contains("Shape mismatch"));
    }

    #[test]
    fn test_epoch_out_of_sync_display() {
        let err = Error::EpochOutOfSync {
            rank: 1,
            local: 9,
            canonical: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("rank 1"));
        assert!(msg.contains('9'));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = Error::backend_unavailable("nccl");
        let err2 = Error::backend_unavailable("nccl");
        assert_eq!(err1, err2);
    }
}
