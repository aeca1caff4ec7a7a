//! End-to-end training and evaluation
//!
//! Configuration is read once per invocation and handed to each stage
//! explicitly. Training writes the tracking store and the model artifact;
//! evaluation shares nothing with it but the artifact format and the
//! configuration file.

mod evaluate;
mod train;

#[cfg(test)]
mod tests;

pub use evaluate::{evaluate, evaluate_from_path, Evaluation, Prediction, PREVIEW_COUNT};
pub use train::{train, train_from_path, TrainOutcome, TrainingPipeline};
