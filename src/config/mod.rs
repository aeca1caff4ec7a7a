//! Declarative YAML configuration
//!
//! Every run of the pipeline is described by one YAML document with three
//! required namespaces and two optional ones.
//!
//! # Example
//!
//! ```yaml
//! data:
//!   dataset: mnist
//!   normalize: true
//!
//! model:
//!   dropout_rate: 0.5
//!   num_filters: [32, 64]
//!
//! training:
//!   seed: 42
//!   learning_rate: 0.001
//!   epochs: 10
//!   batch_size: 64
//!
//! tracking:
//!   dir: mlruns
//!
//! output:
//!   dir: models
//!   format: safetensors
//! ```

mod cli;
mod load;
mod schema;
mod validate;

#[cfg(test)]
mod tests;

pub use cli::{
    apply_overrides, parse_args, Cli, Command, EvaluateArgs, InfoArgs, OutputFormat, TrainArgs,
    ValidateArgs,
};
pub use load::{load_config, load_default_config, DEFAULT_CONFIG_PATH};
pub use schema::{
    DataConfig, ModelConfig, OutputConfig, PipelineConfig, TrackingConfig, TrainingParams,
};
pub use validate::{validate_config, ValidationError};
