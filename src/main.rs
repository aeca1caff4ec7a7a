//! Clasificar CLI
//!
//! # Usage
//!
//! ```bash
//! # Train from config
//! clasificar train config.yaml
//!
//! # Train with overrides
//! clasificar train config.yaml --epochs 10 --lr 0.001
//!
//! # Evaluate the saved artifact on the test partition
//! clasificar evaluate config.yaml
//!
//! # Validate config
//! clasificar validate config.yaml
//!
//! # Show config info
//! clasificar info config.yaml
//! ```

use clap::Parser;
use clasificar::config::{
    apply_overrides, load_config, validate_config, Cli, Command, EvaluateArgs, InfoArgs,
    OutputFormat, PipelineConfig, TrainArgs, ValidateArgs, DEFAULT_CONFIG_PATH,
};
use clasificar::data::{FileSource, NUM_CLASSES};
use clasificar::model::{build_model, ModelSpec};
use clasificar::pipeline;
use clasificar::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Evaluate(args) => run_evaluate(args),
        Command::Validate(args) => run_validate(args),
        Command::Info(args) => run_info(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags when set
fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load(path: &Path) -> Result<PipelineConfig> {
    tracing::info!(config = %path.display(), "loading configuration");
    load_config(path)
}

fn run_train(args: TrainArgs) -> Result<()> {
    let path = config_path(args.config.clone());
    let mut config = load(&path)?;
    apply_overrides(&mut config, &args)?;

    if args.dry_run {
        let spec = ModelSpec::resolve(
            Some(&config.model),
            config.data.dataset.input_shape(),
            NUM_CLASSES,
        )?;
        let model = build_model(&spec, &mut StdRng::seed_from_u64(config.training.seed));
        println!("Dry run - config validated successfully");
        println!();
        println!("{}", model.summary()?);
        return Ok(());
    }

    let source = FileSource::new(&config.data.dir);
    let outcome = pipeline::train(&config, &source)?;

    println!("Training complete!");
    if let Some(last) = outcome.history.last() {
        println!("  Final loss: {:.4}", last.loss);
        println!("  Final accuracy: {:.4}", last.accuracy);
        if let (Some(loss), Some(acc)) = (last.val_loss, last.val_accuracy) {
            println!("  Validation loss: {loss:.4}");
            println!("  Validation accuracy: {acc:.4}");
        }
    }
    println!("  Run: {}", outcome.run_id);
    println!("  Model: {}", outcome.artifact_path.display());
    println!("  History: {}", outcome.history_path.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let path = config_path(args.config);
    let evaluation = pipeline::evaluate_from_path(&path, args.artifact.as_deref())?;

    println!("Test loss: {:.4}", evaluation.loss);
    println!("Test accuracy: {:.4}", evaluation.accuracy);
    println!("Samples: {}", evaluation.samples);
    if !evaluation.preview.is_empty() {
        println!();
        println!("Predictions:");
        for p in &evaluation.preview {
            println!(
                "  #{}: predicted {} (p={:.3}), actual {}",
                p.index, p.predicted, p.confidence, p.actual
            );
        }
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let path = config_path(args.config);
    let config = load(&path)?;
    validate_config(&config).map_err(|e| Error::Config(format!("Validation failed: {e}")))?;
    if config.uses_legacy_batch_size() {
        println!("Warning: data.batch_size is deprecated, use training.batch_size");
    }

    println!("Configuration is valid");

    if args.detailed {
        println!();
        print!("{}", config.to_yaml()?);
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let path = config_path(args.config);
    let config = load(&path)?;

    match args.format {
        OutputFormat::Text => {
            let spec = ModelSpec::resolve(
                Some(&config.model),
                config.data.dataset.input_shape(),
                NUM_CLASSES,
            )?;
            let batch_size = config
                .batch_size()
                .map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
            println!("Dataset: {}", config.data.dataset);
            println!("Input shape: {:?}", spec.input_shape);
            println!("Filters: {:?}", spec.num_filters);
            println!("Dropout: {}", spec.dropout_rate);
            println!("Optimizer: adam (lr={})", config.training.learning_rate);
            println!("Epochs: {}", config.training.epochs);
            println!("Batch size: {batch_size}");
            println!("Seed: {}", config.training.seed);
            if config.tracking.enabled {
                println!("Tracking: {}", config.tracking.dir.display());
            }
            println!("Output: {}", config.output.dir.display());
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| Error::Serialization(format!("JSON serialization error: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            println!("{}", config.to_yaml()?);
        }
    }
    Ok(())
}
