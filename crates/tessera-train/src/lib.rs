//! Tessera Train - Training Loop Seam
//!
//! The contract between models, data loaders, and the callbacks that
//! orchestrate a fit:
//! - `Module` - object-safe model seam (forward, reset, sync-norm)
//! - `Learner` - owns the model slot and loader list, drives the fit
//!   lifecycle, and guarantees teardown hooks run on every exit path
//! - `Callback` - ordered lifecycle hooks
//! - `Logger` - swappable reporting destination (silenced on non-zero
//!   ranks by the distributed layer)
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]

pub mod callback;
pub mod learner;
pub mod logger;

// =============================================================================
// Re-exports
// =============================================================================

pub use callback::{Callback, ProgressCallback, Recorder};
pub use learner::{Learner, LearnerCore, Module};
pub use logger::{Logger, MemoryLogger, NoopLogger, TracingLogger};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for driving a fit.
pub mod prelude {
    pub use crate::{
        Callback, Learner, LearnerCore, Logger, MemoryLogger, Module, NoopLogger,
        ProgressCallback, Recorder, TracingLogger,
    };
}

// =============================================================================
// Tests
// =============================================================================
