//! Artifact I/O: saving and loading trained classifiers
//!
//! An artifact holds the resolved [`crate::model::ModelSpec`] and every named
//! tensor, including batch-normalization running statistics, so it can be
//! rebuilt without the configuration that produced it.

mod format;
mod load;
mod model;
mod save;


pub use format::{artifact_path, history_path, ModelFormat, SaveConfig};
pub use load::load_model;
pub use model::{Artifact, ModelMetadata, ModelState, ParameterInfo};
pub use save::save_model;
