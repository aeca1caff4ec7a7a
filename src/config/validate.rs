//! Configuration validation

use super::schema::PipelineConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Missing batch size: set training.batch_size")]
    MissingBatchSize,

    #[error("Conflicting batch sizes: training.batch_size = {training}, data.batch_size = {data}")]
    ConflictingBatchSize { training: usize, data: usize },

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid dropout rate: {0} (must be in [0, 1))")]
    InvalidDropout(f32),

    #[error("Invalid filter widths: {0:?} (need at least one block, each width > 0)")]
    InvalidFilters(Vec<usize>),

    #[error("Invalid validation split: {0} (must be in (0, 1))")]
    InvalidValidationSplit(f32),

    #[error("Invalid gradient clip value: {0} (must be > 0.0)")]
    InvalidGradClip(f32),
}

impl PipelineConfig {
    /// Effective batch size.
    ///
    /// `training.batch_size` is canonical. `data.batch_size` is accepted as a
    /// legacy alias only when the training key is absent; if both are set they
    /// must agree.
    pub fn batch_size(&self) -> Result<usize, ValidationError> {
        let size = match (self.training.batch_size, self.data.batch_size) {
            (Some(training), Some(data)) if training != data => {
                return Err(ValidationError::ConflictingBatchSize { training, data })
            }
            (Some(size), _) | (None, Some(size)) => size,
            (None, None) => return Err(ValidationError::MissingBatchSize),
        };
        if size == 0 {
            return Err(ValidationError::InvalidBatchSize(size));
        }
        Ok(size)
    }

    /// True when the batch size only comes from the legacy `data` key
    pub fn uses_legacy_batch_size(&self) -> bool {
        self.training.batch_size.is_none() && self.data.batch_size.is_some()
    }
}

/// Validate a pipeline configuration.
///
/// Checks numeric ranges and the batch size contract; dataset availability
/// is checked later when the data is actually fetched.
pub fn validate_config(config: &PipelineConfig) -> Result<(), ValidationError> {
    if !(config.training.learning_rate > 0.0) {
        return Err(ValidationError::InvalidLearningRate(
            config.training.learning_rate,
        ));
    }

    if config.training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(config.training.epochs));
    }

    config.batch_size()?;
    if config.uses_legacy_batch_size() {
        tracing::warn!("data.batch_size is deprecated; move it to training.batch_size");
    }

    if let Some(rate) = config.model.dropout_rate {
        if !(0.0..1.0).contains(&rate) {
            return Err(ValidationError::InvalidDropout(rate));
        }
    }

    if let Some(filters) = &config.model.num_filters {
        if filters.is_empty() || filters.contains(&0) {
            return Err(ValidationError::InvalidFilters(filters.clone()));
        }
    }

    if let Some(split) = config.data.validation_split {
        if !(split > 0.0 && split < 1.0) {
            return Err(ValidationError::InvalidValidationSplit(split));
        }
    }

    if let Some(clip) = config.training.grad_clip {
        if !(clip > 0.0) {
            return Err(ValidationError::InvalidGradClip(clip));
        }
    }

    Ok(())
}
