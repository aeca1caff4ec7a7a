//! Config-driven training run

use crate::autograd::Context;
use crate::config::{load_config, PipelineConfig};
use crate::data::{load_dataset, Dataset, DatasetSource, FileSource, Partition};
use crate::io::{artifact_path, history_path, save_model, Artifact, SaveConfig};
use crate::model::{build_model, ModelSpec};
use crate::optim::Adam;
use crate::run::Run;
use crate::storage::{ExperimentStorage, FileStorage, InMemoryStorage, RunStatus, StorageError};
use crate::train::{
    CategoricalAccuracy, CategoricalCrossEntropy, History, ProgressCallback, TrackingCallback,
    TrainConfig, Trainer,
};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What a finished training run produced
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub history: History,
    /// Persisted model, `<output.dir>/<family>_model.<ext>`
    pub artifact_path: PathBuf,
    /// Per-epoch metrics, `<output.dir>/<family>_history.json`
    pub history_path: PathBuf,
    /// Tracking run that recorded this training
    pub run_id: String,
}

/// Wires dataset, model, optimizer, tracking and persistence for one run.
///
/// The pipeline is the only component that writes external state: the
/// tracking store behind `storage` and the artifact files under
/// `output.dir`.
pub struct TrainingPipeline<'a, S: ExperimentStorage> {
    source: &'a dyn DatasetSource,
    storage: Arc<Mutex<S>>,
}

impl<'a, S: ExperimentStorage + 'static> TrainingPipeline<'a, S> {
    pub fn new(source: &'a dyn DatasetSource, storage: Arc<Mutex<S>>) -> Self {
        Self { source, storage }
    }

    /// Shared handle to the tracking backend
    pub fn storage(&self) -> &Arc<Mutex<S>> {
        &self.storage
    }

    /// Train, track and persist a classifier as described by `config`
    pub fn run(&self, config: &PipelineConfig) -> Result<TrainOutcome> {
        let batch_size = config
            .batch_size()
            .map_err(|e| Error::Config(format!("Invalid config: {e}")))?;

        // One stream drives weight init, shuffling and dropout
        let mut rng = StdRng::seed_from_u64(config.training.seed);

        let name = config.data.dataset;
        let Dataset {
            train: mut train_part,
            test,
            ..
        } = load_dataset(name, &config.data, self.source)?;
        let validation = match config.data.validation_split {
            Some(fraction) => train_part.split_off(fraction)?,
            None => test,
        };

        let spec = ModelSpec::resolve(
            Some(&config.model),
            train_part.sample_shape(),
            train_part.num_classes(),
        )?;
        let model = build_model(&spec, &mut rng);
        tracing::info!(
            dataset = %name,
            params = model.parameter_count(),
            filters = ?spec.num_filters,
            dropout = spec.dropout_rate,
            "model built"
        );
        tracing::debug!("\n{}", model.summary()?);

        let experiment = config
            .tracking
            .experiment
            .clone()
            .unwrap_or_else(|| format!("{}-cnn", name.family()));
        let experiment_id = {
            let mut store = self
                .storage
                .lock()
                .map_err(|_| StorageError::Backend("tracking store lock poisoned".to_string()))?;
            store.get_or_create_experiment(&experiment)?
        };

        let mut run = Run::start(&experiment_id, Arc::clone(&self.storage))?;
        let run_id = run.id.clone();

        let fitted = Self::fit(config, &mut run, model, rng, &train_part, &validation, batch_size);
        let (trainer, history) = match fitted {
            Ok(done) => {
                run.finish(RunStatus::Success)?;
                done
            }
            Err(e) => {
                if let Err(close) = run.finish(RunStatus::Failed) {
                    tracing::warn!(error = %close, "could not close failed run");
                }
                return Err(e);
            }
        };

        let family = name.family();
        let artifact_path = artifact_path(&config.output.dir, family, config.output.format);
        let artifact = Artifact::from_model(trainer.model(), family);
        save_model(&artifact, &artifact_path, &SaveConfig::new(config.output.format))?;

        let history_path = history_path(&config.output.dir, family);
        let json = history
            .to_json()
            .map_err(|e| Error::Serialization(format!("history serialization failed: {e}")))?;
        fs::write(&history_path, json)?;

        tracing::info!(
            run_id = %run_id,
            artifact = %artifact_path.display(),
            "training complete"
        );

        Ok(TrainOutcome {
            history,
            artifact_path,
            history_path,
            run_id,
        })
    }

    /// Everything that happens while the run is open
    fn fit(
        config: &PipelineConfig,
        run: &mut Run<S>,
        model: crate::model::Sequential,
        rng: StdRng,
        train: &Partition,
        validation: &Partition,
        batch_size: usize,
    ) -> Result<(Trainer, History)> {
        let training = &config.training;
        run.log_param("dataset", config.data.dataset)?;
        run.log_param("learning_rate", training.learning_rate)?;
        run.log_param("seed", training.seed)?;
        run.log_param("epochs", training.epochs)?;
        run.log_param("batch_size", batch_size)?;
        run.log_artifact("config.yaml", config.to_yaml()?.as_bytes())?;

        let train_config = TrainConfig::from_pipeline(config);
        let mut trainer = Trainer::new(
            model,
            Box::new(Adam::default_params(training.learning_rate)),
            Box::new(CategoricalCrossEntropy),
            Box::new(CategoricalAccuracy),
            train_config.clone(),
            Context::new(rng),
        );

        let tracking = TrackingCallback::new(run.metric_logger());
        let failure = tracking.failure();
        trainer.add_callback(ProgressCallback::new(train_config.log_interval));
        trainer.add_callback(tracking);

        let history = trainer.fit(train, Some(validation), training.epochs, batch_size)?;
        if let Some(e) = failure.take() {
            return Err(e.into());
        }
        Ok((trainer, history))
    }
}

/// Train from a configuration already in memory.
///
/// Tracking goes to a [`FileStorage`] under `tracking.dir`, or to a throwaway
/// in-memory store when tracking is disabled.
pub fn train(config: &PipelineConfig, source: &dyn DatasetSource) -> Result<TrainOutcome> {
    if config.tracking.enabled {
        let storage = FileStorage::open(&config.tracking.dir)?;
        TrainingPipeline::new(source, Arc::new(Mutex::new(storage))).run(config)
    } else {
        tracing::debug!("tracking disabled, using in-memory store");
        TrainingPipeline::new(source, Arc::new(Mutex::new(InMemoryStorage::new()))).run(config)
    }
}

/// Load the configuration at `config_path` and train on files under `data.dir`
///
/// # Example
///
/// ```no_run
/// let outcome = clasificar::pipeline::train_from_path("config.yaml")?;
/// println!("saved to {}", outcome.artifact_path.display());
/// # Ok::<(), clasificar::Error>(())
/// ```
pub fn train_from_path(config_path: impl AsRef<Path>) -> Result<TrainOutcome> {
    let config = load_config(config_path)?;
    let source = FileSource::new(&config.data.dir);
    train(&config, &source)
}
