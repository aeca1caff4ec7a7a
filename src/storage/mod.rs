//! Experiment tracking storage
//!
//! Provides the `ExperimentStorage` trait and backends for persisting
//! runs, parameters, metrics and artifacts.
//!
//! # Backends
//!
//! - `FileStorage`: JSON document under the tracking directory
//! - `InMemoryStorage`: in-process backend for tests and embedding
//!
//! # Example
//!
//! ```
//! use clasificar::storage::{ExperimentStorage, InMemoryStorage, RunStatus};
//!
//! let mut storage = InMemoryStorage::new();
//! let exp_id = storage.create_experiment("mnist-cnn", None).unwrap();
//! let run_id = storage.create_run(&exp_id).unwrap();
//! storage.start_run(&run_id).unwrap();
//! storage.log_param(&run_id, "learning_rate", "0.001").unwrap();
//! storage.log_metric(&run_id, "loss", 0, 0.5).unwrap();
//! storage.complete_run(&run_id, RunStatus::Success).unwrap();
//! ```

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created but not yet started
    Pending,
    /// Run is currently executing
    Running,
    /// Run completed successfully
    Success,
    /// Run failed with an error
    Failed,
    /// Run was closed before it finished
    Cancelled,
}

impl RunStatus {
    /// Whether the run has reached a final status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// A single metric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Training step or epoch
    pub step: u64,
    /// Metric value
    pub value: f64,
    /// Timestamp when recorded
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a new metric point with current timestamp
    pub fn new(step: u64, value: f64) -> Self {
        Self {
            step,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// A stored run artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub key: String,
    /// Content hash, `sha256-<hex>`
    pub hash: String,
    pub size: usize,
}

/// Content-addressable hash of artifact bytes
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("sha256-{}", hex::encode(&result[..16])) // Use first 16 bytes
}

/// Trait for experiment storage backends
///
/// Runs move `Pending → Running → {Success, Failed, Cancelled}`. Parameters
/// are write-once per key; metrics are append-only series.
pub trait ExperimentStorage: Send + Sync {
    /// Create a new experiment and return its ID
    fn create_experiment(&mut self, name: &str, config: Option<serde_json::Value>)
        -> Result<String>;

    /// Look up an experiment ID by name
    fn find_experiment(&self, name: &str) -> Result<Option<String>>;

    /// Create a new run within an experiment, in `Pending` status
    fn create_run(&mut self, experiment_id: &str) -> Result<String>;

    /// Start a run, transitioning from Pending to Running
    fn start_run(&mut self, run_id: &str) -> Result<()>;

    /// Complete a running run with the given terminal status
    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Record a hyperparameter.
    ///
    /// Re-logging a key with the same value is a no-op; a different value is
    /// an `InvalidState` error.
    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()>;

    /// Log a metric value for a run
    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()>;

    /// Store artifact bytes and return their content hash
    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String>;

    /// Metric series for a run, ordered by step
    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>>;

    /// All parameters of a run
    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>>;

    /// Artifacts recorded for a run, in logging order
    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>>;

    /// Get the current status of a run
    fn get_run_status(&self, run_id: &str) -> Result<RunStatus>;

    /// Runs currently in `Running` status
    fn active_runs(&self) -> Result<Vec<String>>;

    /// Return the experiment named `name`, creating it if needed
    fn get_or_create_experiment(&mut self, name: &str) -> Result<String> {
        match self.find_experiment(name)? {
            Some(id) => Ok(id),
            None => self.create_experiment(name, None),
        }
    }
}
