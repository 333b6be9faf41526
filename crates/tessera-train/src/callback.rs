//! Callbacks - Fit Lifecycle Hooks
//!
//! Callbacks observe and mutate the learner at fixed points of the fit
//! lifecycle. Dispatch order is controlled by an integer `order`: the
//! train/eval setup phase runs first, replicators run at order 10-11,
//! and the metrics recorder at order 50, so replicas and sharded
//! loaders are in place before anything records results.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use tessera_core::Result;
use tessera_data::{find_batch_size, Batch, EpochLoader};

use crate::learner::LearnerCore;

// =============================================================================
// Callback Trait
// =============================================================================

/// Hooks invoked by `Learner::fit` at each lifecycle phase.
pub trait Callback: Send {
    /// Stable name used to attach and detach the callback.
    fn name(&self) -> &'static str;

    /// Dispatch order; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Called once at the start of a fit.
    fn before_fit(&mut self, _learn: &mut LearnerCore) -> Result<()> {
        Ok(())
    }

    /// Called before each training epoch.
    fn before_train(&mut self, _learn: &mut LearnerCore) -> Result<()> {
        Ok(())
    }

    /// Called before each validation epoch.
    fn before_validate(&mut self, _learn: &mut LearnerCore) -> Result<()> {
        Ok(())
    }

    /// Called after each batch.
    fn after_batch(&mut self, _learn: &mut LearnerCore, _batch: &Batch) -> Result<()> {
        Ok(())
    }

    /// Called once at the end of a fit, on every exit path.
    fn after_fit(&mut self, _learn: &mut LearnerCore) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// Records how many batches and samples a fit processed.
///
/// Sample counts go through the current loader's `to_detach` with
/// gathering enabled, so under distributed training every rank records
/// the true, unpadded totals.
pub struct Recorder {
    batches: usize,
    samples: usize,
}

impl Recorder {
    /// Dispatch order: after the replicators, before progress output.
    pub const ORDER: i32 = 50;

    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: 0,
            samples: 0,
        }
    }

    /// Returns the number of batches seen.
    #[must_use]
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Returns the number of samples seen after gather/unpad.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Callback for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn before_fit(&mut self, _learn: &mut LearnerCore) -> Result<()> {
        self.batches = 0;
        self.samples = 0;
        Ok(())
    }

    fn after_batch(&mut self, learn: &mut LearnerCore, batch: &Batch) -> Result<()> {
        self.batches += 1;
        let gathered = learn.loaders[learn.current].to_detach(batch.clone(), true, true)?;
        self.samples += find_batch_size(&gathered);
        Ok(())
    }
}

// =============================================================================
// ProgressCallback
// =============================================================================

/// Reports epoch progress through the learner's logger, so swapping in
/// a no-op logger silences it on non-zero ranks.
#[derive(Debug, Default)]
pub struct ProgressCallback;

impl ProgressCallback {
    /// Dispatch order: last, after metrics are recorded.
    pub const ORDER: i32 = 60;
}

impl Callback for ProgressCallback {
    fn name(&self) -> &'static str {
        "progress"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn before_train(&mut self, learn: &mut LearnerCore) -> Result<()> {
        let line = format!("epoch {}: train", learn.epoch);
        learn.logger.log(&line);
        Ok(())
    }

    fn before_validate(&mut self, learn: &mut LearnerCore) -> Result<()> {
        let line = format!("epoch {}: validate", learn.epoch);
        learn.logger.log(&line);
        Ok(())
    }

    fn after_fit(&mut self, learn: &mut LearnerCore) -> Result<()> {
        learn.logger.log("fit complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
