//! YAML schema for the training pipeline configuration

use crate::data::DatasetName;
use crate::io::ModelFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete pipeline configuration.
///
/// `data`, `model` and `training` must be present (an empty mapping is
/// fine for `model`); `tracking` and `output` are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,

    pub model: ModelConfig,

    pub training: TrainingParams,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Dataset selection and preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Which dataset to train on
    #[serde(default)]
    pub dataset: DatasetName,

    /// Rescale pixels to [0, 1]
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Legacy batch size location, read only when `training.batch_size` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Root directory holding the raw dataset files
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,

    /// Hold out this fraction of the training partition for validation
    /// instead of validating on the test partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_split: Option<f32>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetName::default(),
            normalize: true,
            batch_size: None,
            dir: default_data_dir(),
            validation_split: None,
        }
    }
}

/// Architecture hyperparameters. Missing keys are defaulted by
/// [`crate::model::ModelSpec::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout_rate: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_filters: Option<Vec<usize>>,
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Seed for weight init, shuffling and dropout
    #[serde(default = "default_seed")]
    pub seed: u64,

    pub learning_rate: f32,

    pub epochs: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Reshuffle the training partition every epoch
    #[serde(default = "default_true")]
    pub shuffle: bool,

    /// Global gradient-norm clipping threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_clip: Option<f32>,
}

/// Experiment tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the tracking store
    #[serde(default = "default_tracking_dir")]
    pub dir: PathBuf,

    /// Experiment name; defaults to `<family>-cnn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_tracking_dir(),
            experiment: None,
        }
    }
}

/// Where and how the trained artifact is written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_format")]
    pub format: ModelFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: default_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tracking_dir() -> PathBuf {
    PathBuf::from("mlruns")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_format() -> ModelFormat {
    ModelFormat::SafeTensors
}
