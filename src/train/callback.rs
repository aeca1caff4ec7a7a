//! Callback system for training events
//!
//! Provides extensible hooks for training loop events:
//! - `on_train_begin` / `on_train_end`
//! - `on_epoch_begin` / `on_epoch_end`
//! - `on_step_end`
//!
//! # Example
//!
//! ```rust
//! use clasificar::train::callback::{TrainerCallback, CallbackContext, CallbackAction};
//!
//! struct StopAfterFirstEpoch;
//!
//! impl TrainerCallback for StopAfterFirstEpoch {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
//!         if ctx.epoch == 0 {
//!             CallbackAction::Stop
//!         } else {
//!             CallbackAction::Continue
//!         }
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex};

use crate::run::MetricLogger;
use crate::storage::{ExperimentStorage, StorageError};

/// Context passed to callbacks with current training state
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Total epochs planned
    pub max_epochs: usize,
    /// Steps completed within the epoch
    pub step: usize,
    /// Total steps in epoch
    pub steps_per_epoch: usize,
    /// Global step count
    pub global_step: usize,
    /// Running mean training loss of the epoch
    pub loss: f32,
    /// Running training accuracy of the epoch
    pub accuracy: f32,
    /// Current learning rate
    pub lr: f32,
    /// Validation loss (set at epoch end when validation data is present)
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
    /// Training duration in seconds
    pub elapsed_secs: f64,
}

/// Action to take after a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Continue training normally
    Continue,
    /// Stop training after the current step or epoch
    Stop,
}

/// Trait for training callbacks
///
/// All methods have default no-op implementations.
pub trait TrainerCallback: Send {
    /// Called before training starts
    fn on_train_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after training ends
    fn on_train_end(&mut self, _ctx: &CallbackContext) {}

    /// Called before each epoch
    fn on_epoch_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each epoch, after validation
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each training step
    fn on_step_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Get callback name for logging
    fn name(&self) -> &str {
        "TrainerCallback"
    }
}

// =============================================================================
// Progress Callback
// =============================================================================

/// Logs training progress through `tracing`
#[derive(Clone, Debug)]
pub struct ProgressCallback {
    /// Log every N steps
    log_interval: usize,
}

impl ProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self { log_interval: 100 }
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        tracing::info!(
            "Epoch {}/{} starting (lr: {:.2e})",
            ctx.epoch + 1,
            ctx.max_epochs,
            ctx.lr
        );
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        let val_str = match (ctx.val_loss, ctx.val_accuracy) {
            (Some(loss), Some(acc)) => format!(" - val_loss: {loss:.4} - val_accuracy: {acc:.4}"),
            _ => String::new(),
        };

        tracing::info!(
            "Epoch {}/{}: loss: {:.4} - accuracy: {:.4}{} ({:.1}s)",
            ctx.epoch + 1,
            ctx.max_epochs,
            ctx.loss,
            ctx.accuracy,
            val_str,
            ctx.elapsed_secs
        );
        CallbackAction::Continue
    }

    fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if ctx.step > 0 && ctx.step % self.log_interval == 0 {
            tracing::debug!(
                "  Step {}/{}: loss: {:.4} - accuracy: {:.4}",
                ctx.step,
                ctx.steps_per_epoch,
                ctx.loss,
                ctx.accuracy
            );
        }
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

// =============================================================================
// Tracking Callback
// =============================================================================

/// Shared slot for the first storage error a [`TrackingCallback`] hit
#[derive(Clone, Debug, Default)]
pub struct TrackingFailure(Arc<Mutex<Option<StorageError>>>);

impl TrackingFailure {
    fn set(&self, error: StorageError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(error);
        }
    }

    /// Take the recorded error, if any
    pub fn take(&self) -> Option<StorageError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Records `loss`, `accuracy`, `val_loss` and `val_accuracy` in the tracking
/// run at the end of every epoch, with the epoch index as the step.
///
/// Callbacks cannot return errors, so a failed write stops training and is
/// kept in the [`TrackingFailure`] handle for the caller to surface.
pub struct TrackingCallback<S: ExperimentStorage> {
    logger: MetricLogger<S>,
    failure: TrackingFailure,
}

impl<S: ExperimentStorage> TrackingCallback<S> {
    pub fn new(logger: MetricLogger<S>) -> Self {
        Self {
            logger,
            failure: TrackingFailure::default(),
        }
    }

    /// Handle to check for write errors after training
    pub fn failure(&self) -> TrackingFailure {
        self.failure.clone()
    }

    fn log_epoch(&self, ctx: &CallbackContext) -> Result<(), StorageError> {
        let step = ctx.epoch as u64;
        self.logger.log_metric_at("loss", step, f64::from(ctx.loss))?;
        self.logger.log_metric_at("accuracy", step, f64::from(ctx.accuracy))?;
        if let Some(v) = ctx.val_loss {
            self.logger.log_metric_at("val_loss", step, f64::from(v))?;
        }
        if let Some(v) = ctx.val_accuracy {
            self.logger.log_metric_at("val_accuracy", step, f64::from(v))?;
        }
        Ok(())
    }
}

impl<S: ExperimentStorage> TrainerCallback for TrackingCallback<S> {
    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        match self.log_epoch(ctx) {
            Ok(()) => CallbackAction::Continue,
            Err(e) => {
                tracing::error!(run_id = self.logger.run_id(), error = %e, "metric logging failed");
                self.failure.set(e);
                CallbackAction::Stop
            }
        }
    }

    fn name(&self) -> &str {
        "TrackingCallback"
    }
}

// =============================================================================
// Callback Manager
// =============================================================================

/// Manages multiple callbacks and dispatches events
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Fire an event on every callback; stop wins, but every callback sees it
    fn dispatch(
        &mut self,
        mut event: impl FnMut(&mut dyn TrainerCallback) -> CallbackAction,
    ) -> CallbackAction {
        let mut action = CallbackAction::Continue;
        for cb in &mut self.callbacks {
            if event(cb.as_mut()) == CallbackAction::Stop {
                tracing::debug!(callback = cb.name(), "callback requested stop");
                action = CallbackAction::Stop;
            }
        }
        action
    }

    pub fn on_train_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_train_begin(ctx))
    }

    pub fn on_train_end(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_train_end(ctx);
        }
    }

    pub fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_epoch_begin(ctx))
    }

    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_epoch_end(ctx))
    }

    pub fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_step_end(ctx))
    }
}

// =============================================================================
// Tests
// =============================================================================
