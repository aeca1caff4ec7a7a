//! In-Memory Storage Backend
//!
//! Provides an in-memory implementation of `ExperimentStorage` for testing
//! and embedding. Its serializable state is also the document that
//! [`super::FileStorage`] persists.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    content_hash, ArtifactRecord, ExperimentStorage, MetricPoint, Result, RunStatus, StorageError,
};

/// In-memory experiment storage backend
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InMemoryStorage {
    experiments: BTreeMap<String, ExperimentData>,
    runs: BTreeMap<String, RunData>,
    metrics: BTreeMap<String, Vec<MetricPoint>>, // run_id:key -> metrics
    #[serde(skip)]
    blobs: HashMap<String, Vec<u8>>, // CAS hash -> data
    next_exp_id: u64,
    next_run_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentData {
    name: String,
    config: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunData {
    experiment_id: String,
    status: RunStatus,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of experiments
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Runs that belong to an experiment
    pub fn runs_for_experiment(&self, experiment_id: &str) -> Vec<String> {
        self.runs
            .iter()
            .filter(|(_, run)| run.experiment_id == experiment_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Stored bytes for a content hash, if held in memory
    pub fn artifact_bytes(&self, hash: &str) -> Option<&[u8]> {
        self.blobs.get(hash).map(Vec::as_slice)
    }

    /// Record an artifact under a run without keeping its bytes
    pub(crate) fn record_artifact(
        &mut self,
        run_id: &str,
        key: &str,
        data: &[u8],
    ) -> Result<String> {
        let hash = content_hash(data);
        self.run_mut(run_id)?.artifacts.push(ArtifactRecord {
            key: key.to_string(),
            hash: hash.clone(),
            size: data.len(),
        });
        Ok(hash)
    }

    fn run(&self, run_id: &str) -> Result<&RunData> {
        self.runs
            .get(run_id)
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    fn run_mut(&mut self, run_id: &str) -> Result<&mut RunData> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }
}

impl ExperimentStorage for InMemoryStorage {
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<String> {
        let exp_id = format!("exp-{}", self.next_exp_id);
        self.next_exp_id += 1;

        self.experiments.insert(
            exp_id.clone(),
            ExperimentData {
                name: name.to_string(),
                config,
                created_at: Utc::now(),
            },
        );

        Ok(exp_id)
    }

    fn find_experiment(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .experiments
            .iter()
            .find(|(_, exp)| exp.name == name)
            .map(|(id, _)| id.clone()))
    }

    fn create_run(&mut self, experiment_id: &str) -> Result<String> {
        if !self.experiments.contains_key(experiment_id) {
            return Err(StorageError::ExperimentNotFound(experiment_id.to_string()));
        }

        let run_id = format!("run-{}", self.next_run_id);
        self.next_run_id += 1;

        self.runs.insert(
            run_id.clone(),
            RunData {
                experiment_id: experiment_id.to_string(),
                status: RunStatus::Pending,
                params: BTreeMap::new(),
                artifacts: Vec::new(),
                started_at: None,
                ended_at: None,
            },
        );

        Ok(run_id)
    }

    fn start_run(&mut self, run_id: &str) -> Result<()> {
        let run = self.run_mut(run_id)?;

        if run.status != RunStatus::Pending {
            return Err(StorageError::InvalidState(format!(
                "Run {run_id} is not in Pending state"
            )));
        }

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(())
    }

    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidState(format!(
                "{status:?} is not a final run status"
            )));
        }

        let run = self.run_mut(run_id)?;
        if run.status != RunStatus::Running {
            return Err(StorageError::InvalidState(format!(
                "Run {run_id} is not in Running state"
            )));
        }

        run.status = status;
        run.ended_at = Some(Utc::now());
        Ok(())
    }

    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let run = self.run_mut(run_id)?;
        match run.params.get(key) {
            Some(existing) if existing != value => Err(StorageError::InvalidState(format!(
                "Param {key} of run {run_id} is already {existing}, cannot change to {value}"
            ))),
            Some(_) => Ok(()),
            None => {
                run.params.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()> {
        self.run(run_id)?;

        let metric_key = format!("{run_id}:{key}");
        self.metrics
            .entry(metric_key)
            .or_default()
            .push(MetricPoint::new(step, value));

        Ok(())
    }

    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String> {
        let hash = self.record_artifact(run_id, key, data)?;
        self.blobs.insert(hash.clone(), data.to_vec());

        Ok(hash)
    }

    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>> {
        self.run(run_id)?;

        let metric_key = format!("{run_id}:{key}");
        let mut points = self.metrics.get(&metric_key).cloned().unwrap_or_default();

        // Sort by step
        points.sort_by_key(|p| p.step);

        Ok(points)
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.run(run_id)?.params.clone())
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        Ok(self.run(run_id)?.artifacts.clone())
    }

    fn get_run_status(&self, run_id: &str) -> Result<RunStatus> {
        self.run(run_id).map(|r| r.status)
    }

    fn active_runs(&self) -> Result<Vec<String>> {
        Ok(self
            .runs
            .iter()
            .filter(|(_, run)| run.status == RunStatus::Running)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
