//! Training loop
//!
//! This module provides:
//! - Categorical cross-entropy loss and accuracy metric
//! - The [`Trainer`] fit loop with gradient clipping and validation
//! - Per-epoch [`History`]
//! - Callbacks for progress logging and run tracking
//!
//! # Example
//!
//! ```no_run
//! use clasificar::train::{Trainer, TrainConfig, CategoricalCrossEntropy, CategoricalAccuracy};
//! use clasificar::optim::Adam;
//! # use clasificar::{autograd::Context, model::Sequential, data::Partition};
//! # let model: Sequential = todo!();
//! # let (train, test): (Partition, Partition) = todo!();
//!
//! let mut trainer = Trainer::new(
//!     model,
//!     Box::new(Adam::default_params(0.001)),
//!     Box::new(CategoricalCrossEntropy),
//!     Box::new(CategoricalAccuracy),
//!     TrainConfig::default(),
//!     Context::seeded(42),
//! );
//! let history = trainer.fit(&train, Some(&test), 10, 32).unwrap();
//! ```

pub mod callback;
mod config;
mod history;
mod loss;
mod metrics;
mod trainer;

#[cfg(test)]
mod tests;

pub use crate::data::Batch;
pub use callback::{
    CallbackAction, CallbackContext, CallbackManager, ProgressCallback, TrackingCallback,
    TrackingFailure, TrainerCallback,
};
pub use config::TrainConfig;
pub use history::{EpochMetrics, History};
pub use loss::{CategoricalCrossEntropy, LossFn, EPSILON};
pub use metrics::{CategoricalAccuracy, Metric};
pub use trainer::{evaluate, Scores, Trainer};
