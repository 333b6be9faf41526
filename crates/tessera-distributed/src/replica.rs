//! Replica - Single-Process Multi-Device Replication
//!
//! `DataParallel` is the replica adapter for one process driving several
//! devices: it forwards `Module` calls to the wrapped model, including
//! `reset`, so stateful models behave identically through the wrapper.
//! `ParallelTrainer` installs the adapter for the duration of one fit.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::sync::Arc;

use tessera_core::{Device, Result};
use tessera_data::Batch;
use tessera_train::{Callback, LearnerCore, Module};

// =============================================================================
// DataParallel
// =============================================================================

/// Replica wrapper for single-process multi-device training.
///
/// Device scatter/gather of the forward pass belongs to the external
/// engine; this adapter carries the device list and keeps the wrapped
/// model's full `Module` behavior reachable, `reset` included.
pub struct DataParallel {
    module: Arc<dyn Module>,
    device_ids: Vec<Device>,
}

impl DataParallel {
    /// Wraps a model for replication across the given devices.
    pub fn new(module: Arc<dyn Module>, device_ids: Vec<Device>) -> Self {
        Self { module, device_ids }
    }

    /// Returns the wrapped model.
    #[must_use]
    pub fn module(&self) -> Arc<dyn Module> {
        Arc::clone(&self.module)
    }

    /// Returns the replica device list.
    #[must_use]
    pub fn device_ids(&self) -> &[Device] {
        &self.device_ids
    }
}

impl Module for DataParallel {
    fn forward(&self, input: &Batch) -> Batch {
        self.module.forward(input)
    }

    fn reset(&self) {
        self.module.reset();
    }
}

// =============================================================================
// ParallelTrainer
// =============================================================================

/// Callback that replicates the model across devices for one fit.
///
/// `before_fit` swaps the learner's model for a `DataParallel` replica;
/// `after_fit` restores the saved original reference.
pub struct ParallelTrainer {
    device_ids: Vec<Device>,
    saved_model: Option<Arc<dyn Module>>,
}

impl ParallelTrainer {
    /// Dispatch order: after train/eval setup, before the recorder.
    pub const ORDER: i32 = 10;

    /// Creates the callback for the given devices.
    #[must_use]
    pub fn new(device_ids: Vec<Device>) -> Self {
        Self {
            device_ids,
            saved_model: None,
        }
    }
}

impl Callback for ParallelTrainer {
    fn name(&self) -> &'static str {
        "parallel_trainer"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn before_fit(&mut self, learn: &mut LearnerCore) -> Result<()> {
        tracing::debug!(devices = self.device_ids.len(), "replicating model");
        self.saved_model = Some(Arc::clone(&learn.model));
        learn.model = Arc::new(DataParallel::new(
            Arc::clone(&learn.model),
            self.device_ids.clone(),
        ));
        Ok(())
    }

    fn after_fit(&mut self, learn: &mut LearnerCore) -> Result<()> {
        if let Some(original) = self.saved_model.take() {
            learn.model = original;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
