use super::*;
use crate::config::PipelineConfig;
use crate::data::{DatasetName, InMemorySource, RawDataset};
use crate::io::load_model;
use crate::storage::{
    ArtifactRecord, ExperimentStorage, InMemoryStorage, MetricPoint, RunStatus, StorageError,
};
use crate::Error;
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Digits drawn as a class-dependent bright row on a dark background
fn raw_digits(n_train: usize, n_test: usize, side: usize) -> RawDataset {
    let images = |n: usize| {
        ArrayD::from_shape_fn(IxDyn(&[n, side, side]), |ix| {
            let class = ix[0] % 10;
            if ix[1] == (class * side) / 10 {
                255
            } else {
                (ix[2] * 3 % 40) as u8
            }
        })
    };
    RawDataset {
        train_images: images(n_train),
        train_labels: (0..n_train).map(|i| (i % 10) as u8).collect(),
        test_images: images(n_test),
        test_labels: (0..n_test).map(|i| (i % 10) as u8).collect(),
    }
}

fn source() -> InMemorySource {
    InMemorySource::new().with(DatasetName::Mnist, raw_digits(40, 12, 28))
}

fn config(out: &Path, epochs: usize) -> PipelineConfig {
    PipelineConfig::from_yaml_str(&format!(
        "data: {{normalize: true}}\n\
         model: {{}}\n\
         training: {{epochs: {epochs}, batch_size: 32, learning_rate: 0.001, seed: 42}}\n\
         tracking: {{enabled: false}}\n\
         output: {{dir: '{}'}}\n",
        out.display()
    ))
    .unwrap()
}

fn pipeline(source: &InMemorySource) -> TrainingPipeline<'_, InMemoryStorage> {
    TrainingPipeline::new(source, Arc::new(Mutex::new(InMemoryStorage::new())))
}

#[test]
fn test_reference_scenario_trains_and_evaluates() {
    let out = TempDir::new().unwrap();
    let config = config(out.path(), 1);
    let source = source();

    let outcome = pipeline(&source).run(&config).unwrap();
    assert_eq!(outcome.history.loss.len(), 1);
    assert_eq!(outcome.history.accuracy.len(), 1);
    assert_eq!(outcome.history.val_loss.len(), 1);
    assert_eq!(outcome.artifact_path, out.path().join("mnist_model.safetensors"));
    assert!(outcome.history_path.exists());

    let evaluation = evaluate(&outcome.artifact_path, &config, &source).unwrap();
    assert!(evaluation.loss >= 0.0);
    assert!((0.0..=1.0).contains(&evaluation.accuracy));
    assert_eq!(evaluation.samples, 12);
    assert_eq!(evaluation.preview.len(), PREVIEW_COUNT);
    for (i, p) in evaluation.preview.iter().enumerate() {
        assert_eq!(p.index, i);
        assert_eq!(p.actual, i % 10);
        assert!(p.predicted < 10);
        assert!((0.0..=1.0).contains(&p.confidence));
    }
}

#[test]
fn test_run_is_tracked() {
    let out = TempDir::new().unwrap();
    let source = source();
    let pipeline = pipeline(&source);
    let outcome = pipeline.run(&config(out.path(), 2)).unwrap();

    let store = pipeline.storage().lock().unwrap();
    assert_eq!(store.get_run_status(&outcome.run_id).unwrap(), RunStatus::Success);
    assert_eq!(store.experiment_count(), 1);
    assert!(store.find_experiment("mnist-cnn").unwrap().is_some());

    let params = store.get_params(&outcome.run_id).unwrap();
    assert_eq!(params["dataset"], "mnist");
    assert_eq!(params["learning_rate"], "0.001");
    assert_eq!(params["seed"], "42");
    assert_eq!(params["epochs"], "2");
    assert_eq!(params["batch_size"], "32");

    for key in ["loss", "accuracy", "val_loss", "val_accuracy"] {
        assert_eq!(store.get_metrics(&outcome.run_id, key).unwrap().len(), 2, "{key}");
    }
    let artifacts = store.list_artifacts(&outcome.run_id).unwrap();
    assert_eq!(artifacts[0].key, "config.yaml");
    assert!(store.artifact_bytes(&artifacts[0].hash).is_some());
}

#[test]
fn test_same_seed_same_first_epoch_loss() {
    let source = source();
    let (a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let first = pipeline(&source).run(&config(a.path(), 1)).unwrap();
    let second = pipeline(&source).run(&config(b.path(), 1)).unwrap();
    assert_eq!(first.history.loss[0], second.history.loss[0]);
    assert_eq!(first.history, second.history);
}

#[test]
fn test_validation_split_holds_out_training_data() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path(), 1);
    config.data.validation_split = Some(0.25);

    let outcome = pipeline(&source()).run(&config).unwrap();
    assert_eq!(outcome.history.val_accuracy.len(), 1);
}

#[test]
fn test_legacy_batch_size_is_used() {
    let out = TempDir::new().unwrap();
    let config = PipelineConfig::from_yaml_str(&format!(
        "data: {{batch_size: 16}}\nmodel: {{}}\ntraining: {{epochs: 1, learning_rate: 0.001}}\noutput: {{dir: '{}'}}\n",
        out.path().display()
    ))
    .unwrap();

    let source = source();
    let pipeline = pipeline(&source);
    let outcome = pipeline.run(&config).unwrap();
    let params = pipeline.storage().lock().unwrap().get_params(&outcome.run_id).unwrap();
    assert_eq!(params["batch_size"], "16");
}

#[test]
fn test_missing_dataset_opens_no_run() {
    let out = TempDir::new().unwrap();
    let empty = InMemorySource::new();
    let pipeline = pipeline(&empty);

    let err = pipeline.run(&config(out.path(), 1)).unwrap_err();
    assert!(matches!(err, Error::DataUnavailable(_)));
    assert_eq!(pipeline.storage().lock().unwrap().run_count(), 0);
}

/// Store that accepts everything except metrics
#[derive(Default)]
struct RejectMetrics(InMemoryStorage);

impl ExperimentStorage for RejectMetrics {
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> crate::storage::Result<String> {
        self.0.create_experiment(name, config)
    }
    fn find_experiment(&self, name: &str) -> crate::storage::Result<Option<String>> {
        self.0.find_experiment(name)
    }
    fn create_run(&mut self, experiment_id: &str) -> crate::storage::Result<String> {
        self.0.create_run(experiment_id)
    }
    fn start_run(&mut self, run_id: &str) -> crate::storage::Result<()> {
        self.0.start_run(run_id)
    }
    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> crate::storage::Result<()> {
        self.0.complete_run(run_id, status)
    }
    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> crate::storage::Result<()> {
        self.0.log_param(run_id, key, value)
    }
    fn log_metric(&mut self, _: &str, _: &str, _: u64, _: f64) -> crate::storage::Result<()> {
        Err(StorageError::Backend("metrics offline".to_string()))
    }
    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> crate::storage::Result<String> {
        self.0.log_artifact(run_id, key, data)
    }
    fn get_metrics(&self, run_id: &str, key: &str) -> crate::storage::Result<Vec<MetricPoint>> {
        self.0.get_metrics(run_id, key)
    }
    fn get_params(&self, run_id: &str) -> crate::storage::Result<BTreeMap<String, String>> {
        self.0.get_params(run_id)
    }
    fn list_artifacts(&self, run_id: &str) -> crate::storage::Result<Vec<ArtifactRecord>> {
        self.0.list_artifacts(run_id)
    }
    fn get_run_status(&self, run_id: &str) -> crate::storage::Result<RunStatus> {
        self.0.get_run_status(run_id)
    }
    fn active_runs(&self) -> crate::storage::Result<Vec<String>> {
        self.0.active_runs()
    }
}

#[test]
fn test_tracking_failure_marks_run_failed_and_saves_nothing() {
    let out = TempDir::new().unwrap();
    let source = source();
    let storage = Arc::new(Mutex::new(RejectMetrics::default()));
    let pipeline = TrainingPipeline::new(&source, storage.clone());

    let err = pipeline.run(&config(out.path(), 3)).unwrap_err();
    assert!(matches!(err, Error::Tracking(StorageError::Backend(_))));

    let store = storage.lock().unwrap();
    assert_eq!(store.0.run_count(), 1);
    assert!(store.active_runs().unwrap().is_empty());
    let run_id = store.0.runs_for_experiment(&store.find_experiment("mnist-cnn").unwrap().unwrap());
    assert_eq!(store.get_run_status(&run_id[0]).unwrap(), RunStatus::Failed);
    assert!(!out.path().join("mnist_model.safetensors").exists());
}

/// Validation on an empty test split fails inside the training loop
#[test]
fn test_training_error_marks_run_failed_and_saves_nothing() {
    let out = TempDir::new().unwrap();
    let source = InMemorySource::new().with(DatasetName::Mnist, raw_digits(40, 0, 28));
    let pipeline = pipeline(&source);

    let err = pipeline.run(&config(out.path(), 2)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "{err}");

    let store = pipeline.storage().lock().unwrap();
    assert_eq!(store.run_count(), 1);
    assert!(store.active_runs().unwrap().is_empty());
    let exp_id = store.find_experiment("mnist-cnn").unwrap().unwrap();
    let runs = store.runs_for_experiment(&exp_id);
    assert_eq!(store.get_run_status(&runs[0]).unwrap(), RunStatus::Failed);
    assert!(!out.path().join("mnist_model.safetensors").exists());
    assert!(!out.path().join("mnist_history.json").exists());
}

#[test]
fn test_evaluate_rejects_other_image_shape() {
    let out = TempDir::new().unwrap();
    let config = config(out.path(), 1);
    let outcome = pipeline(&source()).run(&config).unwrap();

    let small = InMemorySource::new().with(DatasetName::Mnist, raw_digits(10, 10, 16));
    let err = evaluate(&outcome.artifact_path, &config, &small).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_evaluate_missing_artifact() {
    let out = TempDir::new().unwrap();
    let config = config(out.path(), 1);
    let err = evaluate(out.path().join("mnist_model.safetensors"), &config, &source()).unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound { .. }));
}

#[test]
fn test_artifact_records_topology() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path(), 1);
    config.model.num_filters = Some(vec![8]);
    config.model.dropout_rate = Some(0.25);
    config.output.format = crate::io::ModelFormat::Json;

    let outcome = pipeline(&source()).run(&config).unwrap();
    assert_eq!(outcome.artifact_path.extension().unwrap(), "json");

    let artifact = load_model(&outcome.artifact_path).unwrap();
    assert_eq!(artifact.metadata.dataset, "mnist");
    assert_eq!(artifact.metadata.spec.num_filters, vec![8]);
    assert_eq!(artifact.metadata.spec.dropout_rate, 0.25);
    assert_eq!(artifact.metadata.spec.input_shape, [28, 28, 1]);
}
