//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! clasificar train config.yaml
//! clasificar train config.yaml --epochs 5 --lr 0.0005
//! clasificar evaluate config.yaml --artifact models/mnist_model.safetensors
//! clasificar validate config.yaml
//! clasificar info config.yaml --format json
//! ```

use super::schema::PipelineConfig;
use super::validate::validate_config;
use crate::error::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Clasificar: configuration-driven CNN image classification
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "clasificar")]
#[command(version)]
#[command(about = "Train and evaluate CNN image classifiers from a YAML configuration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train a classifier and persist the artifact
    Train(TrainArgs),

    /// Evaluate a persisted artifact on the test partition
    Evaluate(EvaluateArgs),

    /// Validate a configuration file without training
    Validate(ValidateArgs),

    /// Display the resolved configuration and model summary
    Info(InfoArgs),
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file (defaults to config.yaml)
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Override number of epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Override learning rate
    #[arg(short, long)]
    pub lr: Option<f32>,

    /// Override random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override artifact output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Validate config and build the model without training
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct EvaluateArgs {
    /// Path to YAML configuration file (defaults to config.yaml)
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifact to evaluate (defaults to the canonical path for the dataset)
    #[arg(short, long)]
    pub artifact: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Show the resolved configuration
    #[arg(short, long)]
    pub detailed: bool,
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Unknown output format: {s}. Valid formats: text, json, yaml"
            )),
        }
    }
}

/// Parse CLI arguments from an explicit list
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides and re-validate.
///
/// A batch size override writes the canonical `training.batch_size` and
/// clears the legacy `data.batch_size` so the two cannot conflict.
pub fn apply_overrides(config: &mut PipelineConfig, args: &TrainArgs) -> Result<()> {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = Some(batch_size);
        config.data.batch_size = None;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    validate_config(config).map_err(|e| Error::Config(format!("Invalid override: {e}")))
}
