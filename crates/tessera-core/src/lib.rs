//! Tessera Core - Foundation Types
//!
//! Shared foundation for the Tessera workspace: compute-device identity,
//! the unified error type, and the minimal row-major tensor used as the
//! batch interchange format between loaders, models, and the distributed
//! layer. The full tensor/autograd engine is an external collaborator;
//! the `Tensor` here carries batches across process boundaries and
//! nothing more.
//!
//! # Example
//!
//! ```
//! use tessera_core::{Device, Tensor};
//!
//! let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! assert_eq!(t.len0(), 2);
//! assert_eq!(Device::default(), Device::Cpu);
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

pub mod device;
pub mod error;
pub mod tensor;

// =============================================================================
// Re-exports
// =============================================================================

pub use device::Device;
pub use error::{Error, Result};
pub use tensor::Tensor;

// =============================================================================
// Tests
// =============================================================================
