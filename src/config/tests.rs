//! Integration tests for config module

use super::*;
use crate::data::DatasetName;
use crate::Error;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(yaml.as_bytes()).unwrap();
    temp_file
}

#[test]
fn test_end_to_end_config_loading() {
    let yaml = r#"
data:
  dataset: mnist
  normalize: true

model:
  dropout_rate: 0.5
  num_filters: [32, 64]

training:
  seed: 42
  learning_rate: 0.001
  epochs: 10
  batch_size: 64

tracking:
  dir: mlruns
  experiment: mnist-baseline

output:
  dir: models
  format: yaml
"#;

    let temp_file = write_config(yaml);
    let config = load_config(temp_file.path()).unwrap();

    assert_eq!(config.data.dataset, DatasetName::Mnist);
    assert_eq!(config.model.num_filters, Some(vec![32, 64]));
    assert_eq!(config.batch_size(), Ok(64));
    assert_eq!(config.training.epochs, 10);
    assert_eq!(config.tracking.experiment.as_deref(), Some("mnist-baseline"));
    assert_eq!(config.output.format, crate::io::ModelFormat::Yaml);
}

#[test]
fn test_legacy_batch_size_is_accepted() {
    let yaml = r#"
data:
  batch_size: 16
model: {}
training:
  learning_rate: 0.001
  epochs: 1
"#;

    let temp_file = write_config(yaml);
    let config = load_config(temp_file.path()).unwrap();
    assert!(config.uses_legacy_batch_size());
    assert_eq!(config.batch_size(), Ok(16));
}

#[test]
fn test_conflicting_batch_sizes_are_rejected() {
    let yaml = r#"
data:
  batch_size: 16
model: {}
training:
  learning_rate: 0.001
  epochs: 1
  batch_size: 32
"#;

    let temp_file = write_config(yaml);
    let err = load_config(temp_file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(ref msg) if msg.contains("Conflicting")));
}

#[test]
fn test_missing_file_is_config_error() {
    let err = load_config("/nonexistent/config.yaml").unwrap_err();
    assert!(matches!(err, Error::Config(ref msg) if msg.contains("Failed to read")));
}

#[test]
fn test_malformed_yaml_is_config_error() {
    let temp_file = write_config("data: [unclosed");
    let err = load_config(temp_file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_yaml_roundtrip_preserves_config() {
    let yaml = r#"
data: {}
model:
  dropout_rate: 0.25
training:
  learning_rate: 0.01
  epochs: 2
  batch_size: 8
"#;

    let config = PipelineConfig::from_yaml_str(yaml).unwrap();
    let reparsed = PipelineConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
    assert_eq!(config, reparsed);
}
