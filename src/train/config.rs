//! Training loop configuration

use crate::config::PipelineConfig;

/// Training loop configuration
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// Maximum gradient norm for clipping (None = no clipping)
    pub max_grad_norm: Option<f32>,

    /// Log training progress every N steps
    pub log_interval: usize,

    /// Reshuffle the training partition at the start of every epoch
    pub shuffle: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_grad_norm: None,
            log_interval: 100,
            shuffle: true,
        }
    }
}

impl TrainConfig {
    /// Create a new training configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Loop settings carried by the `training` namespace
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            max_grad_norm: config.training.grad_clip,
            shuffle: config.training.shuffle,
            ..Self::default()
        }
    }

    /// Set gradient clipping norm
    pub fn with_grad_clip(mut self, max_norm: f32) -> Self {
        self.max_grad_norm = Some(max_norm);
        self
    }

    /// Set logging interval
    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}
