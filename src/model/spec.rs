//! Model specification and defaults

use crate::config::ModelConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Dropout rate used when the configuration omits one
pub const DEFAULT_DROPOUT_RATE: f32 = 0.5;

/// Convolution block widths used when the configuration omits them
pub const DEFAULT_NUM_FILTERS: [usize; 2] = [32, 64];

/// Width of the hidden dense layer
pub const DENSE_UNITS: usize = 64;

/// Convolution kernel side
pub const KERNEL_SIZE: usize = 3;

/// Max-pool window and stride
pub const POOL_SIZE: usize = 2;

/// Fully resolved architecture: everything needed to rebuild the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Per-sample input `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub num_classes: usize,
    /// One convolution block per entry
    pub num_filters: Vec<usize>,
    pub dropout_rate: f32,
}

impl ModelSpec {
    /// Resolve a spec from the `model` namespace, filling in defaults.
    ///
    /// `None` and an empty namespace both resolve to
    /// [`DEFAULT_DROPOUT_RATE`] and [`DEFAULT_NUM_FILTERS`].
    pub fn resolve(
        config: Option<&ModelConfig>,
        input_shape: [usize; 3],
        num_classes: usize,
    ) -> Result<Self> {
        let dropout_rate = config
            .and_then(|c| c.dropout_rate)
            .unwrap_or(DEFAULT_DROPOUT_RATE);
        let num_filters = config
            .and_then(|c| c.num_filters.clone())
            .unwrap_or_else(|| DEFAULT_NUM_FILTERS.to_vec());

        let spec = Self {
            input_shape,
            num_classes,
            num_filters,
            dropout_rate,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check ranges and that pooling leaves a non-empty feature map
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::InvalidParameter(format!(
                "dropout_rate {} must be in [0, 1)",
                self.dropout_rate
            )));
        }
        if self.num_filters.is_empty() || self.num_filters.contains(&0) {
            return Err(Error::InvalidParameter(format!(
                "num_filters {:?} needs at least one block, each width > 0",
                self.num_filters
            )));
        }
        if self.num_classes == 0 {
            return Err(Error::InvalidParameter(
                "num_classes must be > 0".to_string(),
            ));
        }
        let [h, w, c] = self.feature_shape();
        if h == 0 || w == 0 || c == 0 {
            return Err(Error::InvalidParameter(format!(
                "input {:?} collapses to {h}x{w} after {} pooling stages",
                self.input_shape,
                self.num_filters.len()
            )));
        }
        Ok(())
    }

    /// Shape entering `Flatten`, after every convolution block
    pub fn feature_shape(&self) -> [usize; 3] {
        let [mut h, mut w, _] = self.input_shape;
        for _ in &self.num_filters {
            h /= POOL_SIZE;
            w /= POOL_SIZE;
        }
        let channels = self.num_filters.last().copied().unwrap_or(self.input_shape[2]);
        [h, w, channels]
    }

    /// Number of features per sample
    pub fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let spec = ModelSpec::resolve(None, [28, 28, 1], 10).unwrap();
        assert_eq!(spec.dropout_rate, 0.5);
        assert_eq!(spec.num_filters, vec![32, 64]);
        assert_eq!(spec.feature_shape(), [7, 7, 64]);
    }

    #[test]
    fn test_empty_namespace_matches_defaults() {
        let from_empty = ModelSpec::resolve(Some(&ModelConfig::default()), [28, 28, 1], 10).unwrap();
        let from_none = ModelSpec::resolve(None, [28, 28, 1], 10).unwrap();
        assert_eq!(from_empty, from_none);
    }

    #[test]
    fn test_resolve_overrides() {
        let config = ModelConfig {
            dropout_rate: Some(0.25),
            num_filters: Some(vec![8, 16, 32]),
        };
        let spec = ModelSpec::resolve(Some(&config), [32, 32, 3], 10).unwrap();
        assert_eq!(spec.dropout_rate, 0.25);
        assert_eq!(spec.feature_shape(), [4, 4, 32]);
        assert_eq!(spec.input_len(), 32 * 32 * 3);
    }

    #[test]
    fn test_spatial_collapse_is_rejected() {
        let config = ModelConfig {
            dropout_rate: None,
            num_filters: Some(vec![4; 6]),
        };
        let err = ModelSpec::resolve(Some(&config), [28, 28, 1], 10).unwrap_err();
        assert!(err.to_string().contains("collapses"));
    }

    #[test]
    fn test_invalid_dropout_is_rejected() {
        let config = ModelConfig {
            dropout_rate: Some(1.0),
            num_filters: None,
        };
        assert!(ModelSpec::resolve(Some(&config), [28, 28, 1], 10).is_err());
    }
}
