//! # Clasificar: Configuration-Driven Image Classification
//!
//! Clasificar trains small convolutional classifiers on MNIST and CIFAR-10
//! from a single YAML document, tracks every run, and persists the trained
//! model so it can be scored later on the test partition.
//!
//! ## Architecture
//!
//! - **autograd**: Tape-based automatic differentiation over NHWC tensors
//! - **optim**: Adam and gradient clipping
//! - **config**: Declarative YAML configuration and CLI
//! - **data**: Dataset loading, normalization and batching
//! - **model**: The conv/BN/pool/dropout classifier
//! - **train**: Loss, metric, callbacks and the fit loop
//! - **storage** / **run**: Experiment tracking
//! - **io**: Model artifact saving and loading
//! - **pipeline**: End-to-end train and evaluate entry points

pub mod autograd;
pub mod config;
pub mod data;
pub mod io;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod run;
pub mod storage;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Context, Tensor};
pub use error::{Error, Result};
pub use pipeline::{evaluate_from_path, train_from_path};
