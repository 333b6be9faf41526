//! DDP - Multi-Process Replication
//!
//! `DistributedTrainer` attaches to a learner for the duration of one
//! fit: it prepares the model through an `Accelerator`, wraps every
//! data loader in a `ShardedLoader`, and silences reporting on non-zero
//! ranks. `after_fit` undoes all three substitutions.
//!
//! Gradient synchronization during the backward pass belongs entirely
//! to the external engine behind `Accelerator::prepare`; this layer
//! never touches gradients.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::sync::Arc;

use tessera_core::{Device, Error, Result};
use tessera_data::{Batch, EpochLoader};
use tessera_train::{Callback, LearnerCore, Logger, Module, NoopLogger};

use crate::group::{default_group, num_distrib, ProcessGroup};
use crate::shard::ShardedLoader;

// =============================================================================
// Accelerator Configuration
// =============================================================================

/// Options accepted when configuring an accelerator.
///
/// Only the placement and normalization behavior this layer owns is
/// configurable here. Mixed-precision, gradient scaling, and
/// experiment-logging settings belong to the accelerator implementation
/// and are deliberately not surfaced.
#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    /// Convert normalization layers to a cross-rank synchronized
    /// variant before preparing the model.
    pub sync_batch_norm: bool,
    /// Let the accelerator place model and batches on devices.
    pub device_placement: bool,
    /// Split already-batched data across ranks instead of sharding
    /// indices per rank.
    pub split_batches: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            sync_batch_norm: true,
            device_placement: true,
            split_batches: false,
        }
    }
}

impl AcceleratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set sync batch norm conversion.
    pub fn sync_batch_norm(mut self, enabled: bool) -> Self {
        self.sync_batch_norm = enabled;
        self
    }

    /// Builder: set device placement.
    pub fn device_placement(mut self, enabled: bool) -> Self {
        self.device_placement = enabled;
        self
    }

    /// Builder: set batch splitting.
    pub fn split_batches(mut self, enabled: bool) -> Self {
        self.split_batches = enabled;
        self
    }
}

// =============================================================================
// Accelerator Trait
// =============================================================================

/// Seam to the external device-placement and replication engine.
pub trait Accelerator: Send {
    /// Wraps a model for distributed execution.
    fn prepare(&self, model: Arc<dyn Module>) -> Result<Arc<dyn Module>>;

    /// Returns this process's rank.
    fn rank(&self) -> usize {
        0
    }

    /// Returns the process group replicas communicate over, if any.
    fn group(&self) -> Option<ProcessGroup> {
        None
    }

    /// Returns the device this process is placed on.
    fn device(&self) -> Device {
        Device::Cpu
    }
}

// =============================================================================
// DistributedReplica
// =============================================================================

/// Replica adapter produced by `LocalAccelerator::prepare`.
///
/// Forwards `Module` calls, `reset` included, to the wrapped model;
/// gradient all-reduce happens in the engine.
pub struct DistributedReplica {
    module: Arc<dyn Module>,
    group: ProcessGroup,
}

impl DistributedReplica {
    /// Wraps a model over a process group.
    pub fn new(module: Arc<dyn Module>, group: ProcessGroup) -> Self {
        Self { module, group }
    }

    /// Returns the wrapped model.
    #[must_use]
    pub fn module(&self) -> Arc<dyn Module> {
        Arc::clone(&self.module)
    }

    /// Returns the replica's process group.
    #[must_use]
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }
}

impl Module for DistributedReplica {
    fn forward(&self, input: &Batch) -> Batch {
        self.module.forward(input)
    }

    fn reset(&self) {
        self.module.reset();
    }
}

// =============================================================================
// LocalAccelerator
// =============================================================================

/// Accelerator over the process-wide default group.
///
/// Construction fails fast when the environment declares a
/// multi-process world but no collective backend has been initialized,
/// so a missing backend surfaces before any training step runs.
pub struct LocalAccelerator {
    group: Option<ProcessGroup>,
    config: AcceleratorConfig,
}

impl LocalAccelerator {
    /// Creates an accelerator over the default group.
    pub fn new(config: AcceleratorConfig) -> Result<Self> {
        let group = default_group();
        if group.is_none() && num_distrib() > 1 {
            return Err(Error::backend_unavailable(
                "multi-process world configured but no collective backend is initialized",
            ));
        }
        Ok(Self { group, config })
    }

    /// Creates an accelerator over an explicit group.
    #[must_use]
    pub fn with_group(group: ProcessGroup, config: AcceleratorConfig) -> Self {
        Self {
            group: Some(group),
            config,
        }
    }

    /// Returns the accelerator's configuration.
    #[must_use]
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }
}

impl Accelerator for LocalAccelerator {
    fn prepare(&self, model: Arc<dyn Module>) -> Result<Arc<dyn Module>> {
        match &self.group {
            Some(group) => Ok(Arc::new(DistributedReplica::new(model, group.clone()))),
            None => Ok(model),
        }
    }

    fn rank(&self) -> usize {
        self.group.as_ref().map_or(0, ProcessGroup::rank)
    }

    fn group(&self) -> Option<ProcessGroup> {
        self.group.clone()
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

// =============================================================================
// DistributedTrainer
// =============================================================================

/// Callback that attaches multi-process replication to one fit.
pub struct DistributedTrainer {
    accelerator: Box<dyn Accelerator>,
    config: AcceleratorConfig,
    saved_model: Option<Arc<dyn Module>>,
    saved_logger: Option<Box<dyn Logger>>,
}

impl DistributedTrainer {
    /// Dispatch order: after train/eval setup, before the recorder.
    pub const ORDER: i32 = 11;

    /// Creates the callback over a `LocalAccelerator`.
    pub fn new(config: AcceleratorConfig) -> Result<Self> {
        let accelerator = LocalAccelerator::new(config.clone())?;
        Ok(Self::with_accelerator(Box::new(accelerator), config))
    }

    /// Creates the callback over an explicit accelerator.
    #[must_use]
    pub fn with_accelerator(accelerator: Box<dyn Accelerator>, config: AcceleratorConfig) -> Self {
        Self {
            accelerator,
            config,
            saved_model: None,
            saved_logger: None,
        }
    }

    fn wrap_loader(&self, learn: &mut LearnerCore, idx: usize) {
        let group = self.accelerator.group();
        learn.map_loader(idx, |loader| ShardedLoader::wrap_in(loader, group));
    }
}

impl Callback for DistributedTrainer {
    fn name(&self) -> &'static str {
        "distributed_trainer"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn before_fit(&mut self, learn: &mut LearnerCore) -> Result<()> {
        let rank = self.accelerator.rank();
        tracing::debug!(rank, "attaching distributed replica");

        let model = Arc::clone(&learn.model);
        let model = if self.config.sync_batch_norm {
            model.convert_sync_norm().unwrap_or(model)
        } else {
            model
        };
        self.saved_model = Some(Arc::clone(&learn.model));
        learn.model = self.accelerator.prepare(model)?;

        for idx in 0..learn.loaders.len() {
            self.wrap_loader(learn, idx);
        }

        // Rank 0 is the sole reporter.
        if rank != 0 {
            let noop: Box<dyn Logger> = Box::new(NoopLogger);
            self.saved_logger = Some(std::mem::replace(&mut learn.logger, noop));
        }
        Ok(())
    }

    fn before_train(&mut self, learn: &mut LearnerCore) -> Result<()> {
        // A different, unwrapped loader may have been substituted since
        // before_fit; make sure the one in use is sharded.
        let current = learn.current;
        self.wrap_loader(learn, current);
        Ok(())
    }

    fn before_validate(&mut self, learn: &mut LearnerCore) -> Result<()> {
        let current = learn.current;
        self.wrap_loader(learn, current);
        Ok(())
    }

    fn after_fit(&mut self, learn: &mut LearnerCore) -> Result<()> {
        if let Some(original) = self.saved_model.take() {
            learn.model = original;
        }
        for idx in 0..learn.loaders.len() {
            learn.map_loader(idx, |loader| {
                if loader.is_sharded() {
                    loader.unshard()
                } else {
                    loader
                }
            });
        }
        if let Some(logger) = self.saved_logger.take() {
            learn.logger = logger;
        }
        tracing::debug!("detached distributed replica");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_core::Tensor;
    use tessera_data::{InMemoryLoader, TensorDataset};
    use tessera_train::Learner;

    struct Identity;

    impl Module for Identity {
        fn forward(&self, input: &Batch) -> Batch {
            input.clone()
        }
    }

    struct SyncAware;

    impl Module for SyncAware {
        fn forward(&self, input: &Batch) -> Batch {
            input.clone()
        }

        fn convert_sync_norm(&self) -> Option<Arc<dyn Module>> {
            Some(Arc::new(Identity))
        }
    }

    fn loader(n: usize, bs: usize) -> Box<dyn EpochLoader> {
        let ds = TensorDataset::new(Tensor::zeros(&[n, 2]), Tensor::zeros(&[n]));
        Box::new(InMemoryLoader::new(ds, bs))
    }

    #[test]
    fn test_accelerator_config_builder() {
        let config = AcceleratorConfig::new()
            .sync_batch_norm(false)
            .device_placement(false)
            .split_batches(true);
        assert!(!config.sync_batch_norm);
        assert!(!config.device_placement);
        assert!(config.split_batches);
    }

    #[test]
    fn test_local_accelerator_prepare_wraps_over_group() {
        let accel =
            LocalAccelerator::with_group(ProcessGroup::mock(), AcceleratorConfig::default());
        let model: Arc<dyn Module> = Arc::new(Identity);
        let prepared = accel.prepare(model).unwrap();
        // The replica forwards the forward pass.
        let input = Batch::Leaf(Tensor::zeros(&[2, 2]));
        assert_eq!(prepared.forward(&input), input);
        assert_eq!(accel.rank(), 0);
        assert!(accel.group().is_some());
    }

    #[test]
    fn test_fit_round_trip_restores_model_and_loaders() {
        let accel =
            LocalAccelerator::with_group(ProcessGroup::mock(), AcceleratorConfig::default());
        let trainer =
            DistributedTrainer::with_accelerator(Box::new(accel), AcceleratorConfig::default());

        let original: Arc<dyn Module> = Arc::new(Identity);
        let mut learn = Learner::new(Arc::clone(&original), vec![loader(10, 4), loader(6, 4)]);
        learn.add_cb(Box::new(trainer));

        learn.fit(1).unwrap();

        assert!(Arc::ptr_eq(&learn.core.model, &original));
        for l in &learn.core.loaders {
            assert!(!l.is_sharded());
        }
        assert_eq!(learn.core.loaders[0].dataset_len(), 10);
        assert_eq!(learn.core.loaders[1].dataset_len(), 6);
    }

    #[test]
    fn test_restoration_happens_on_error_path() {
        struct FailingCallback;

        impl Callback for FailingCallback {
            fn name(&self) -> &'static str {
                "failing"
            }

            fn order(&self) -> i32 {
                20
            }

            fn before_train(&mut self, _learn: &mut LearnerCore) -> Result<()> {
                Err(Error::invalid_operation("injected failure"))
            }
        }

        let accel =
            LocalAccelerator::with_group(ProcessGroup::mock(), AcceleratorConfig::default());
        let trainer =
            DistributedTrainer::with_accelerator(Box::new(accel), AcceleratorConfig::default());

        let original: Arc<dyn Module> = Arc::new(Identity);
        let mut learn = Learner::new(Arc::clone(&original), vec![loader(8, 4)]);
        learn.add_cb(Box::new(trainer));
        learn.add_cb(Box::new(FailingCallback));

        assert!(learn.fit(1).is_err());
        assert!(Arc::ptr_eq(&learn.core.model, &original));
        assert!(!learn.core.loaders[0].is_sharded());
    }

    #[test]
    fn test_sync_norm_conversion_is_requested() {
        let accel =
            LocalAccelerator::with_group(ProcessGroup::mock(), AcceleratorConfig::default());
        let trainer =
            DistributedTrainer::with_accelerator(Box::new(accel), AcceleratorConfig::default());

        let original: Arc<dyn Module> = Arc::new(SyncAware);
        let mut learn = Learner::new(Arc::clone(&original), vec![loader(4, 2)]);
        learn.add_cb(Box::new(trainer));
        learn.fit(1).unwrap();
        // Original restored even though a converted variant was trained.
        assert!(Arc::ptr_eq(&learn.core.model, &original));
    }

    #[test]
    fn test_wrapping_is_idempotent_across_phases() {
        let accel =
            LocalAccelerator::with_group(ProcessGroup::mock(), AcceleratorConfig::default());
        let mut trainer =
            DistributedTrainer::with_accelerator(Box::new(accel), AcceleratorConfig::default());

        let mut learn = Learner::new(Arc::new(Identity) as Arc<dyn Module>, vec![loader(8, 4)]);
        trainer.before_fit(&mut learn.core).unwrap();
        assert!(learn.core.loaders[0].is_sharded());

        // before_train on an already-sharded loader must not stack a
        // second wrapper.
        trainer.before_train(&mut learn.core).unwrap();
        trainer.after_fit(&mut learn.core).unwrap();
        assert!(!learn.core.loaders[0].is_sharded());
    }
}
