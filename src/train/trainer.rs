//! Trainer: the fit loop around a [`Sequential`] classifier

use super::callback::{CallbackAction, CallbackContext, CallbackManager, TrainerCallback};
use super::{Batch, EpochMetrics, History, LossFn, Metric, TrainConfig};
use crate::autograd::{backward, Context};
use crate::data::Partition;
use crate::model::Sequential;
use crate::optim::{clip_grad_norm, Optimizer};
use crate::{Error, Result};
use std::time::Instant;

/// Loss and metric of one step or one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub loss: f32,
    pub accuracy: f32,
}

/// Loss and metric of `model` over a whole partition, in inference mode.
///
/// Batches are visited in order and averaged weighted by their size, so the
/// result does not depend on `batch_size`.
pub fn evaluate(
    model: &Sequential,
    partition: &Partition,
    batch_size: usize,
    loss_fn: &dyn LossFn,
    metric: &dyn Metric,
) -> Result<Scores> {
    if partition.is_empty() {
        return Err(Error::InvalidParameter(
            "cannot evaluate an empty partition".to_string(),
        ));
    }

    let k = model.spec().num_classes;
    let (mut loss_sum, mut metric_sum) = (0.0f64, 0.0f64);
    for batch in partition.batches(batch_size, None)? {
        let n = batch.size();
        let probs = model.predict_batch(batch.inputs.data(), n)?;
        loss_sum += f64::from(loss_fn.value(&probs, batch.targets.data(), k)?) * n as f64;
        metric_sum += f64::from(metric.compute(&probs, batch.targets.data(), k)?) * n as f64;
    }

    let n = partition.len() as f64;
    Ok(Scores {
        loss: (loss_sum / n) as f32,
        accuracy: (metric_sum / n) as f32,
    })
}

/// High-level trainer that orchestrates the training loop
///
/// Construction is the compile step: it binds the model to an optimizer, a
/// loss and a metric. The [`Context`] supplies the random stream for
/// shuffling and dropout, so a seeded context makes `fit` deterministic.
///
/// # Example
///
/// ```no_run
/// use clasificar::autograd::Context;
/// use clasificar::model::{build_model, ModelSpec};
/// use clasificar::optim::Adam;
/// use clasificar::train::{CategoricalAccuracy, CategoricalCrossEntropy, ProgressCallback, TrainConfig, Trainer};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// # let train: clasificar::data::Partition = todo!();
/// let spec = ModelSpec::resolve(None, [28, 28, 1], 10).unwrap();
/// let mut rng = StdRng::seed_from_u64(42);
/// let model = build_model(&spec, &mut rng);
///
/// let mut trainer = Trainer::new(
///     model,
///     Box::new(Adam::default_params(0.001)),
///     Box::new(CategoricalCrossEntropy),
///     Box::new(CategoricalAccuracy),
///     TrainConfig::default(),
///     Context::new(rng),
/// );
/// trainer.add_callback(ProgressCallback::default());
///
/// let history = trainer.fit(&train, None, 5, 32).unwrap();
/// println!("final loss: {:?}", history.loss.last());
/// ```
pub struct Trainer {
    model: Sequential,
    optimizer: Box<dyn Optimizer>,
    loss_fn: Box<dyn LossFn>,
    metric: Box<dyn Metric>,
    config: TrainConfig,
    ctx: Context,
    callbacks: CallbackManager,
    global_step: usize,
    start_time: Option<Instant>,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(
        model: Sequential,
        optimizer: Box<dyn Optimizer>,
        loss_fn: Box<dyn LossFn>,
        metric: Box<dyn Metric>,
        config: TrainConfig,
        ctx: Context,
    ) -> Self {
        Self {
            model,
            optimizer,
            loss_fn,
            metric,
            config,
            ctx,
            callbacks: CallbackManager::new(),
            global_step: 0,
            start_time: None,
        }
    }

    /// Add a callback to the trainer
    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    /// Get current learning rate
    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    /// Release the trained model
    pub fn into_model(self) -> Sequential {
        self.model
    }

    /// Optimizer updates applied so far
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Build callback context from current state
    fn build_context(
        &self,
        epoch: usize,
        max_epochs: usize,
        step: usize,
        steps_per_epoch: usize,
        scores: Scores,
        val: Option<Scores>,
    ) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs,
            step,
            steps_per_epoch,
            global_step: self.global_step,
            loss: scores.loss,
            accuracy: scores.accuracy,
            lr: self.lr(),
            val_loss: val.map(|v| v.loss),
            val_accuracy: val.map(|v| v.accuracy),
            elapsed_secs: self
                .start_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    /// Perform a single training step
    ///
    /// zero_grad → forward (training mode) → loss → backward → clip → update.
    /// Returns the batch loss and the metric over the training-mode outputs.
    pub fn train_step(&mut self, batch: &Batch) -> Result<Scores> {
        let k = self.model.spec().num_classes;
        self.ctx.train();
        self.optimizer.zero_grad(self.model.parameters_mut());

        let predictions = self.model.forward(&batch.inputs, batch.size(), &mut self.ctx)?;
        let mut loss = self.loss_fn.forward(&predictions, &batch.targets, k)?;
        let loss_val = loss.data()[0];
        let accuracy = self
            .metric
            .compute(predictions.data(), batch.targets.data(), k)?;

        backward(&mut loss, None);

        if let Some(max_norm) = self.config.max_grad_norm {
            clip_grad_norm(self.model.parameters_mut(), max_norm);
        }

        self.optimizer.step(self.model.parameters_mut());
        self.global_step += 1;

        Ok(Scores {
            loss: loss_val,
            accuracy,
        })
    }

    /// Loss and metric over `partition` in inference mode
    pub fn evaluate(&self, partition: &Partition, batch_size: usize) -> Result<Scores> {
        evaluate(
            &self.model,
            partition,
            batch_size,
            self.loss_fn.as_ref(),
            self.metric.as_ref(),
        )
    }

    /// Train one epoch; returns sample-weighted mean loss and metric
    fn train_epoch(
        &mut self,
        train: &Partition,
        epoch: usize,
        max_epochs: usize,
        batch_size: usize,
    ) -> Result<(Scores, bool)> {
        let steps = train.num_batches(batch_size);
        let rng = self.config.shuffle.then(|| self.ctx.rng());
        let batches = train.batches(batch_size, rng)?;

        let (mut loss_sum, mut metric_sum, mut seen) = (0.0f64, 0.0f64, 0usize);
        let mut running = Scores {
            loss: 0.0,
            accuracy: 0.0,
        };
        for (i, batch) in batches.enumerate() {
            let step = self.train_step(&batch)?;
            let n = batch.size();
            loss_sum += f64::from(step.loss) * n as f64;
            metric_sum += f64::from(step.accuracy) * n as f64;
            seen += n;
            running = Scores {
                loss: (loss_sum / seen as f64) as f32,
                accuracy: (metric_sum / seen as f64) as f32,
            };

            let ctx = self.build_context(epoch, max_epochs, i + 1, steps, running, None);
            if self.callbacks.on_step_end(&ctx) == CallbackAction::Stop {
                return Ok((running, true));
            }
        }
        Ok((running, false))
    }

    /// Train for `epochs` epochs with full callback support
    ///
    /// Validation, when given, runs after every epoch in inference mode. The
    /// returned history has one entry per completed epoch; a callback may
    /// end training early.
    pub fn fit(
        &mut self,
        train: &Partition,
        validation: Option<&Partition>,
        epochs: usize,
        batch_size: usize,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot train on an empty partition".to_string(),
            ));
        }

        self.start_time = Some(Instant::now());
        let mut history = History::new();
        let steps = train.num_batches(batch_size);
        let zero = Scores {
            loss: 0.0,
            accuracy: 0.0,
        };

        tracing::info!(
            samples = train.len(),
            validation = validation.map_or(0, Partition::len),
            epochs,
            batch_size,
            steps_per_epoch = steps,
            loss = self.loss_fn.name(),
            optimizer = self.optimizer.name(),
            "training started"
        );

        let ctx = self.build_context(0, epochs, 0, steps, zero, None);
        if self.callbacks.on_train_begin(&ctx) == CallbackAction::Stop {
            return Ok(history);
        }

        for epoch in 0..epochs {
            let ctx = self.build_context(epoch, epochs, 0, steps, zero, None);
            if self.callbacks.on_epoch_begin(&ctx) == CallbackAction::Stop {
                break;
            }

            let (scores, stopped) = self.train_epoch(train, epoch, epochs, batch_size)?;
            if stopped {
                break;
            }
            if !scores.loss.is_finite() {
                tracing::warn!(epoch, loss = scores.loss, "training loss is not finite");
            }

            let val = validation
                .map(|partition| self.evaluate(partition, batch_size))
                .transpose()?;
            history.record(EpochMetrics {
                loss: scores.loss,
                accuracy: scores.accuracy,
                val_loss: val.map(|v| v.loss),
                val_accuracy: val.map(|v| v.accuracy),
            });

            let ctx = self.build_context(epoch, epochs, steps, steps, scores, val);
            if self.callbacks.on_epoch_end(&ctx) == CallbackAction::Stop {
                tracing::info!(epoch, "training stopped by callback");
                break;
            }
        }

        let final_scores = history.last().map_or(zero, |m| Scores {
            loss: m.loss,
            accuracy: m.accuracy,
        });
        let ctx = self.build_context(history.epochs(), epochs, 0, steps, final_scores, None);
        self.callbacks.on_train_end(&ctx);

        Ok(history)
    }
}
