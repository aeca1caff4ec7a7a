//! File Storage Backend
//!
//! Persists the tracking store as one JSON document, `store.json`, under the
//! tracking directory. Artifact bytes are written content-addressed to
//! `artifacts/<hash>` next to it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    ArtifactRecord, ExperimentStorage, InMemoryStorage, MetricPoint, Result, RunStatus,
    StorageError,
};

/// Name of the store document inside the tracking directory
pub const STORE_FILE: &str = "store.json";

/// JSON-file experiment storage
///
/// Every mutation rewrites the store document, so another process reading the
/// directory sees each logged value once the call returns.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    state: InMemoryStorage,
}

impl FileStorage {
    /// Open (or create) the store under `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let path = dir.join(STORE_FILE);
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                StorageError::Backend(format!("corrupt store {}: {e}", path.display()))
            })?
        } else {
            InMemoryStorage::new()
        };

        tracing::debug!(dir = %dir.display(), runs = state.run_count(), "tracking store opened");
        Ok(Self { dir, state })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of stored artifact bytes
    pub fn artifact_path(&self, hash: &str) -> PathBuf {
        self.dir.join("artifacts").join(hash)
    }

    /// Write the store document through a temporary file
    fn flush(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| StorageError::Backend(format!("store serialization failed: {e}")))?;
        let tmp = self.dir.join(format!("{STORE_FILE}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(STORE_FILE))?;
        Ok(())
    }
}

impl ExperimentStorage for FileStorage {
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<String> {
        let id = self.state.create_experiment(name, config)?;
        self.flush()?;
        Ok(id)
    }

    fn find_experiment(&self, name: &str) -> Result<Option<String>> {
        self.state.find_experiment(name)
    }

    fn create_run(&mut self, experiment_id: &str) -> Result<String> {
        let id = self.state.create_run(experiment_id)?;
        self.flush()?;
        Ok(id)
    }

    fn start_run(&mut self, run_id: &str) -> Result<()> {
        self.state.start_run(run_id)?;
        self.flush()
    }

    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        self.state.complete_run(run_id, status)?;
        self.flush()
    }

    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.state.log_param(run_id, key, value)?;
        self.flush()
    }

    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()> {
        self.state.log_metric(run_id, key, step, value)?;
        self.flush()
    }

    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String> {
        // Bytes live on disk only; the store keeps the record
        let hash = self.state.record_artifact(run_id, key, data)?;
        let path = self.artifact_path(&hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        self.flush()?;
        Ok(hash)
    }

    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>> {
        self.state.get_metrics(run_id, key)
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        self.state.get_params(run_id)
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.state.list_artifacts(run_id)
    }

    fn get_run_status(&self, run_id: &str) -> Result<RunStatus> {
        self.state.get_run_status(run_id)
    }

    fn active_runs(&self) -> Result<Vec<String>> {
        self.state.active_runs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("mlruns");
        let storage = FileStorage::open(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(storage.dir(), dir.as_path());
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let run_id = {
            let mut storage = FileStorage::open(tmp.path()).unwrap();
            let exp_id = storage.get_or_create_experiment("mnist-cnn").unwrap();
            let run_id = storage.create_run(&exp_id).unwrap();
            storage.start_run(&run_id).unwrap();
            storage.log_param(&run_id, "seed", "42").unwrap();
            storage.log_metric(&run_id, "loss", 0, 0.9).unwrap();
            storage.complete_run(&run_id, RunStatus::Success).unwrap();
            run_id
        };

        let mut reopened = FileStorage::open(tmp.path()).unwrap();
        assert_eq!(reopened.get_run_status(&run_id).unwrap(), RunStatus::Success);
        assert_eq!(
            reopened.get_params(&run_id).unwrap().get("seed").map(String::as_str),
            Some("42")
        );
        assert_eq!(reopened.get_metrics(&run_id, "loss").unwrap().len(), 1);

        // Experiment lookup and id counters continue from the stored state
        let exp_id = reopened.get_or_create_experiment("mnist-cnn").unwrap();
        let next = reopened.create_run(&exp_id).unwrap();
        assert_ne!(next, run_id);
    }

    #[test]
    fn test_artifact_bytes_are_written() {
        let tmp = TempDir::new().unwrap();
        let mut storage = FileStorage::open(tmp.path()).unwrap();
        let exp_id = storage.create_experiment("e", None).unwrap();
        let run_id = storage.create_run(&exp_id).unwrap();

        let hash = storage.log_artifact(&run_id, "config.yaml", b"seed: 1").unwrap();
        assert_eq!(fs::read(storage.artifact_path(&hash)).unwrap(), b"seed: 1");
        assert_eq!(storage.list_artifacts(&run_id).unwrap()[0].hash, hash);
    }

    #[test]
    fn test_artifact_bytes_are_not_held_in_memory() {
        let tmp = TempDir::new().unwrap();
        let mut storage = FileStorage::open(tmp.path()).unwrap();
        let exp_id = storage.create_experiment("e", None).unwrap();
        let run_id = storage.create_run(&exp_id).unwrap();

        let payload = vec![7u8; 4096];
        let hash = storage.log_artifact(&run_id, "model.safetensors", &payload).unwrap();
        assert!(storage.state.artifact_bytes(&hash).is_none());
        assert_eq!(fs::read(storage.artifact_path(&hash)).unwrap(), payload);

        let reopened = FileStorage::open(tmp.path()).unwrap();
        let records = reopened.list_artifacts(&run_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, hash);
        assert_eq!(records[0].size, 4096);
    }

    #[test]
    fn test_corrupt_store_is_backend_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(STORE_FILE), "{not json").unwrap();
        assert!(matches!(
            FileStorage::open(tmp.path()),
            Err(StorageError::Backend(_))
        ));
    }
}
