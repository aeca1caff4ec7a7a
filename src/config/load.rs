//! Loading configuration from YAML

use super::schema::PipelineConfig;
use super::validate::validate_config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Path read when no configuration file is given
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Load, parse and validate a configuration file.
///
/// Every failure (unreadable file, malformed YAML, missing namespace or
/// required key, out-of-range value) surfaces as [`Error::Config`].
///
/// # Example
///
/// ```no_run
/// use clasificar::config::load_config;
///
/// let config = load_config("config.yaml")?;
/// println!("training for {} epochs", config.training.epochs);
/// # Ok::<(), clasificar::Error>(())
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let yaml_content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    let config = PipelineConfig::from_yaml_str(&yaml_content)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load the configuration at [`DEFAULT_CONFIG_PATH`]
pub fn load_default_config() -> Result<PipelineConfig> {
    load_config(DEFAULT_CONFIG_PATH)
}

impl PipelineConfig {
    /// Parse and validate a configuration held in memory
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {e}")))?;

        validate_config(&config).map_err(|e| Error::Config(format!("Invalid config: {e}")))?;

        Ok(config)
    }

    /// Serialize back to YAML (used to attach the resolved config to a run)
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Serialization(format!("YAML serialization failed: {e}")))
    }
}
