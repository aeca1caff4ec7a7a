//! Scoped tracking runs
//!
//! A [`Run`] opens exactly one run in an [`ExperimentStorage`] backend and
//! guarantees that it is closed: [`Run::finish`] records the final status, and
//! dropping an unfinished run marks it `Failed`.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use clasificar::storage::{ExperimentStorage, InMemoryStorage, RunStatus};
//! use clasificar::run::Run;
//!
//! let mut storage = InMemoryStorage::new();
//! let exp_id = storage.create_experiment("mnist-cnn", None).unwrap();
//! let storage = Arc::new(Mutex::new(storage));
//!
//! let mut run = Run::start(&exp_id, storage.clone()).unwrap();
//! run.log_param("seed", 42).unwrap();
//!
//! // Auto-incrementing step per metric key
//! run.log_metric("loss", 0.5).unwrap();
//! run.log_metric("loss", 0.4).unwrap();
//!
//! run.finish(RunStatus::Success).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::{ExperimentStorage, Result, RunStatus, StorageError};

fn lock<S: ExperimentStorage>(storage: &Mutex<S>) -> Result<MutexGuard<'_, S>> {
    storage
        .lock()
        .map_err(|_| StorageError::Backend("tracking store lock poisoned".to_string()))
}

/// An open tracking run
///
/// Generic over the storage backend: [`crate::storage::FileStorage`] for real
/// runs and [`crate::storage::InMemoryStorage`] for tests or disabled tracking.
pub struct Run<S: ExperimentStorage> {
    /// Run ID
    pub id: String,
    /// Parent experiment ID
    pub experiment_id: String,
    storage: Arc<Mutex<S>>,
    step_counters: HashMap<String, u64>,
    finished: bool,
    span: tracing::Span,
}

impl<S: ExperimentStorage> Run<S> {
    /// Create and start a run under `experiment_id`.
    ///
    /// Runs never nest: any run the backend still reports as running is a
    /// leftover of an interrupted process and is closed as `Cancelled` first.
    pub fn start(experiment_id: &str, storage: Arc<Mutex<S>>) -> Result<Self> {
        let run_id = {
            let mut store = lock(&storage)?;
            for stale in store.active_runs()? {
                tracing::warn!(run_id = %stale, "closing stale run as cancelled");
                store.complete_run(&stale, RunStatus::Cancelled)?;
            }

            let run_id = store.create_run(experiment_id)?;
            store.start_run(&run_id)?;
            run_id
        };

        let span = tracing::info_span!("run", run_id = %run_id);
        tracing::info!(parent: &span, experiment_id, "tracking run started");

        Ok(Self {
            id: run_id,
            experiment_id: experiment_id.to_string(),
            storage,
            step_counters: HashMap::new(),
            finished: false,
            span,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(StorageError::InvalidState(format!(
                "Run {} is already finished",
                self.id
            )));
        }
        Ok(())
    }

    /// Record a hyperparameter. Parameters are write-once.
    pub fn log_param(&mut self, key: &str, value: impl Display) -> Result<()> {
        self.ensure_open()?;
        let value = value.to_string();
        lock(&self.storage)?.log_param(&self.id, key, &value)?;
        tracing::debug!(parent: &self.span, key, value = %value, "param");
        Ok(())
    }

    /// Log a metric value, auto-incrementing the step
    ///
    /// Each metric key has its own step counter that starts at 0.
    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        let step = self.current_step(key);
        self.log_metric_at(key, step, value)?;
        self.step_counters.insert(key.to_string(), step + 1);
        Ok(())
    }

    /// Log a metric value at a specific step
    pub fn log_metric_at(&mut self, key: &str, step: u64, value: f64) -> Result<()> {
        self.ensure_open()?;
        lock(&self.storage)?.log_metric(&self.id, key, step, value)
    }

    /// Store bytes under `key`; returns the content hash
    pub fn log_artifact(&mut self, key: &str, data: &[u8]) -> Result<String> {
        self.ensure_open()?;
        let hash = lock(&self.storage)?.log_artifact(&self.id, key, data)?;
        tracing::debug!(parent: &self.span, key, hash = %hash, "artifact");
        Ok(hash)
    }

    /// Handle for logging metrics from a training callback
    pub fn metric_logger(&self) -> MetricLogger<S> {
        MetricLogger {
            storage: Arc::clone(&self.storage),
            run_id: self.id.clone(),
        }
    }

    /// Close the run with a final status
    pub fn finish(mut self, status: RunStatus) -> Result<()> {
        self.finished = true;
        lock(&self.storage)?.complete_run(&self.id, status)?;
        tracing::info!(parent: &self.span, ?status, "tracking run closed");
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next auto-increment step for a metric key
    pub fn current_step(&self, key: &str) -> u64 {
        self.step_counters.get(key).copied().unwrap_or(0)
    }
}

impl<S: ExperimentStorage> Drop for Run<S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let closed = lock(&self.storage).and_then(|mut s| s.complete_run(&self.id, RunStatus::Failed));
        match closed {
            Ok(()) => tracing::warn!(parent: &self.span, "run dropped while open, marked failed"),
            Err(e) => tracing::error!(parent: &self.span, error = %e, "could not close dropped run"),
        }
    }
}

impl<S: ExperimentStorage> std::fmt::Debug for Run<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("experiment_id", &self.experiment_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Shared metric writer bound to one run
pub struct MetricLogger<S: ExperimentStorage> {
    storage: Arc<Mutex<S>>,
    run_id: String,
}

impl<S: ExperimentStorage> MetricLogger<S> {
    pub fn log_metric_at(&self, key: &str, step: u64, value: f64) -> Result<()> {
        lock(&self.storage)?.log_metric(&self.run_id, key, step, value)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl<S: ExperimentStorage> Clone for MetricLogger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            run_id: self.run_id.clone(),
        }
    }
}
