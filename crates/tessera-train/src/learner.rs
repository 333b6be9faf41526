//! Learner - Model, Loaders, and Fit Lifecycle
//!
//! `Learner` ties a model to its data loaders and drives the fit
//! lifecycle, dispatching callbacks in order at each phase. The
//! replicator callbacks substitute the model and loaders for the
//! duration of one fit; `fit` guarantees the `after_fit` phase runs on
//! every exit path so those substitutions are always undone.
//!
//! # Example
//!
//! ```ignore
//! use tessera_train::{Learner, Module};
//!
//! let mut learn = Learner::new(model, vec![train_loader, valid_loader]);
//! learn.add_cb(Box::new(Recorder::new()));
//! learn.fit(2)?;
//! ```
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use std::sync::Arc;

use tessera_core::Result;
use tessera_data::{Batch, EpochLoader};

use crate::callback::Callback;
use crate::logger::{Logger, TracingLogger};

// =============================================================================
// Module Trait
// =============================================================================

/// Object-safe seam for the model being trained.
///
/// The real network, its parameters, and its autograd state live in the
/// external engine; this layer only needs to run it, reset any
/// recurrent state, and optionally obtain a sync-norm variant.
pub trait Module: Send + Sync {
    /// Runs the model on a batch.
    fn forward(&self, input: &Batch) -> Batch;

    /// Clears any persistent state (for stateful models such as RNNs).
    fn reset(&self) {}

    /// Returns a variant of this model with normalization layers
    /// synchronized across ranks, or `None` if the model has no such
    /// layers to convert.
    fn convert_sync_norm(&self) -> Option<Arc<dyn Module>> {
        None
    }
}

// =============================================================================
// LearnerCore
// =============================================================================

/// The mutable state callbacks operate on: the model slot, the loader
/// list, the logger, and the position in the fit lifecycle.
pub struct LearnerCore {
    /// The model being trained. Replicators swap this for a replica.
    pub model: Arc<dyn Module>,
    /// The data loaders; index 0 trains, index 1 (if present) validates.
    pub loaders: Vec<Box<dyn EpochLoader>>,
    /// Destination for user-facing output.
    pub logger: Box<dyn Logger>,
    /// Index of the loader currently in use.
    pub current: usize,
    /// Zero-based epoch currently running.
    pub epoch: usize,
}

impl LearnerCore {
    /// Returns the loader currently in use.
    pub fn current_loader(&mut self) -> &mut Box<dyn EpochLoader> {
        &mut self.loaders[self.current]
    }

    /// Replaces the loader at `idx` with the result of `f` applied to
    /// it, allowing wrappers to be installed or removed in place.
    pub fn map_loader<F>(&mut self, idx: usize, f: F)
    where
        F: FnOnce(Box<dyn EpochLoader>) -> Box<dyn EpochLoader>,
    {
        let slot = &mut self.loaders[idx];
        let taken = std::mem::replace(slot, Box::new(DetachedSlot));
        *slot = f(taken);
    }
}

/// Placeholder occupying a loader slot while `map_loader` runs.
struct DetachedSlot;

impl EpochLoader for DetachedSlot {
    fn num_batches(&self) -> usize {
        0
    }

    fn batch_size(&self) -> usize {
        0
    }

    fn dataset_len(&self) -> usize {
        0
    }

    fn get_idxs(&mut self) -> Result<Vec<usize>> {
        Ok(Vec::new())
    }

    fn create_batches(&self, _idxs: &[usize]) -> Vec<Batch> {
        Vec::new()
    }

    fn unshard(self: Box<Self>) -> Box<dyn EpochLoader> {
        self
    }
}

// =============================================================================
// Learner
// =============================================================================

/// Drives the fit lifecycle over a model and its loaders.
pub struct Learner {
    /// State shared with callbacks.
    pub core: LearnerCore,
    callbacks: Vec<Box<dyn Callback>>,
}

impl Learner {
    /// Creates a learner over a model and its loaders.
    pub fn new(model: Arc<dyn Module>, loaders: Vec<Box<dyn EpochLoader>>) -> Self {
        Self {
            core: LearnerCore {
                model,
                loaders,
                logger: Box::new(TracingLogger),
                current: 0,
                epoch: 0,
            },
            callbacks: Vec::new(),
        }
    }

    /// Attaches a callback.
    pub fn add_cb(&mut self, cb: Box<dyn Callback>) -> &mut Self {
        self.callbacks.push(cb);
        self
    }

    /// Detaches the callback with the given name, returning it.
    pub fn remove_cb(&mut self, name: &str) -> Option<Box<dyn Callback>> {
        let idx = self.callbacks.iter().position(|cb| cb.name() == name)?;
        Some(self.callbacks.remove(idx))
    }

    /// Returns true if a callback with the given name is attached.
    #[must_use]
    pub fn has_cb(&self, name: &str) -> bool {
        self.callbacks.iter().any(|cb| cb.name() == name)
    }

    /// Runs the fit lifecycle for `epochs` epochs.
    ///
    /// The `after_fit` phase runs on every exit path, including when an
    /// earlier phase fails, so callbacks that substituted state can
    /// always restore it. The first error encountered is returned.
    pub fn fit(&mut self, epochs: usize) -> Result<()> {
        self.callbacks.sort_by_key(|cb| cb.order());
        tracing::debug!(epochs, callbacks = self.callbacks.len(), "starting fit");

        let run = self.run_phases(epochs);

        let mut teardown: Result<()> = Ok(());
        for cb in &mut self.callbacks {
            let res = cb.after_fit(&mut self.core);
            if teardown.is_ok() {
                teardown = res;
            }
        }
        run.and(teardown)
    }

    fn run_phases(&mut self, epochs: usize) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.before_fit(&mut self.core)?;
        }
        for epoch in 0..epochs {
            self.core.epoch = epoch;

            self.core.current = 0;
            for cb in &mut self.callbacks {
                cb.before_train(&mut self.core)?;
            }
            self.run_epoch()?;

            if self.core.loaders.len() > 1 {
                self.core.current = 1;
                for cb in &mut self.callbacks {
                    cb.before_validate(&mut self.core)?;
                }
                self.run_epoch()?;
            }
        }
        Ok(())
    }

    fn run_epoch(&mut self) -> Result<()> {
        let cur = self.core.current;
        let idxs = self.core.loaders[cur].get_idxs()?;
        self.core.loaders[cur].before_iter();
        let batches = self.core.loaders[cur].create_batches(&idxs);
        for batch in batches {
            let batch = self.core.loaders[cur].after_batch(batch);
            let _output = self.core.model.forward(&batch);
            for cb in &mut self.callbacks {
                cb.after_batch(&mut self.core, &batch)?;
            }
        }
        self.core.loaders[cur].after_iter();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tessera_core::{Error, Tensor};
    use tessera_data::{InMemoryLoader, TensorDataset};

    struct Identity;

    impl Module for Identity {
        fn forward(&self, input: &Batch) -> Batch {
            input.clone()
        }
    }

    fn loader(n: usize, bs: usize) -> Box<dyn EpochLoader> {
        let ds = TensorDataset::new(Tensor::zeros(&[n, 2]), Tensor::zeros(&[n]));
        Box::new(InMemoryLoader::new(ds, bs))
    }

    struct Probe {
        events: Arc<Mutex<Vec<&'static str>>>,
        fail_on_train: bool,
    }

    impl Probe {
        fn new(events: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                events,
                fail_on_train: false,
            }
        }

        fn record(&self, event: &'static str) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Callback for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn before_fit(&mut self, _learn: &mut LearnerCore) -> Result<()> {
            self.record("before_fit");
            Ok(())
        }

        fn before_train(&mut self, _learn: &mut LearnerCore) -> Result<()> {
            self.record("before_train");
            if self.fail_on_train {
                return Err(Error::invalid_operation("train failure"));
            }
            Ok(())
        }

        fn before_validate(&mut self, _learn: &mut LearnerCore) -> Result<()> {
            self.record("before_validate");
            Ok(())
        }

        fn after_batch(&mut self, _learn: &mut LearnerCore, _b: &Batch) -> Result<()> {
            self.record("after_batch");
            Ok(())
        }

        fn after_fit(&mut self, _learn: &mut LearnerCore) -> Result<()> {
            self.record("after_fit");
            Ok(())
        }
    }

    #[test]
    fn test_fit_dispatches_lifecycle_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut learn = Learner::new(Arc::new(Identity), vec![loader(4, 2), loader(2, 2)]);
        learn.add_cb(Box::new(Probe::new(Arc::clone(&events))));
        learn.fit(1).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "before_fit",
                "before_train",
                "after_batch",
                "after_batch",
                "before_validate",
                "after_batch",
                "after_fit",
            ]
        );
    }

    #[test]
    fn test_after_fit_runs_on_error() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut probe = Probe::new(Arc::clone(&events));
        probe.fail_on_train = true;

        let mut learn = Learner::new(Arc::new(Identity), vec![loader(4, 2)]);
        learn.add_cb(Box::new(probe));

        assert!(learn.fit(1).is_err());
        assert_eq!(
            *events.lock().unwrap(),
            vec!["before_fit", "before_train", "after_fit"]
        );
    }

    #[test]
    fn test_remove_cb_detaches() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut learn = Learner::new(Arc::new(Identity), vec![loader(4, 2)]);
        learn.add_cb(Box::new(Probe::new(events)));
        assert!(learn.has_cb("probe"));
        assert!(learn.remove_cb("probe").is_some());
        assert!(!learn.has_cb("probe"));
        assert!(learn.remove_cb("probe").is_none());
    }

    #[test]
    fn test_map_loader_swaps_in_place() {
        let mut learn = Learner::new(Arc::new(Identity), vec![loader(4, 2)]);
        learn.core.map_loader(0, |l| l);
        assert_eq!(learn.core.loaders[0].dataset_len(), 4);
    }

    #[test]
    fn test_validate_phase_uses_second_loader() {
        let mut learn = Learner::new(Arc::new(Identity), vec![loader(4, 2), loader(6, 2)]);
        learn.fit(1).unwrap();
        assert_eq!(learn.core.current, 1);
    }
}
