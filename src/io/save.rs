//! Artifact saving

use super::format::{ModelFormat, SaveConfig};
use super::model::Artifact;
use crate::{Error, Result};
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Metadata key holding the JSON-encoded [`super::ModelMetadata`] in SafeTensors files
pub(crate) const METADATA_KEY: &str = "clasificar.metadata";

/// Save an artifact, creating the parent directory if needed.
///
/// # Example
///
/// ```no_run
/// use clasificar::io::{save_model, Artifact, ModelFormat, SaveConfig};
/// use clasificar::model::{build_model, ModelSpec};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let spec = ModelSpec::resolve(None, [28, 28, 1], 10)?;
/// let model = build_model(&spec, &mut StdRng::seed_from_u64(42));
/// let artifact = Artifact::from_model(&model, "mnist");
///
/// save_model(&artifact, "models/mnist_model.safetensors", &SaveConfig::default())?;
/// # Ok::<(), clasificar::Error>(())
/// ```
pub fn save_model(artifact: &Artifact, path: impl AsRef<Path>, config: &SaveConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match config.format {
        ModelFormat::SafeTensors => save_safetensors(artifact, path)?,
        ModelFormat::Json => {
            let state = artifact.to_state();
            let data = if config.pretty {
                serde_json::to_string_pretty(&state)
            } else {
                serde_json::to_string(&state)
            }
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
            fs::write(path, data)?;
        }
        ModelFormat::Yaml => {
            let data = serde_yaml::to_string(&artifact.to_state())
                .map_err(|e| Error::Serialization(format!("YAML serialization failed: {e}")))?;
            fs::write(path, data)?;
        }
    }

    tracing::info!(
        path = %path.display(),
        format = config.format.extension(),
        tensors = artifact.tensors.len(),
        "artifact saved"
    );
    Ok(())
}

fn save_safetensors(artifact: &Artifact, path: &Path) -> Result<()> {
    let tensor_data: Vec<(&str, Vec<u8>, Vec<usize>)> = artifact
        .tensors
        .iter()
        .map(|(name, tensor)| {
            // SafeTensors stores little-endian regardless of the host
            let bytes: Vec<u8> = tensor.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.as_str(), bytes, vec![tensor.len()])
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata_json = serde_json::to_string(&artifact.metadata)
        .map_err(|e| Error::Serialization(format!("metadata serialization failed: {e}")))?;
    let mut metadata = HashMap::new();
    metadata.insert(METADATA_KEY.to_string(), metadata_json);
    metadata.insert("name".to_string(), artifact.metadata.name.clone());
    metadata.insert("version".to_string(), artifact.metadata.version.clone());

    let bytes = safetensors::serialize(views, Some(metadata))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    fs::write(path, bytes)?;
    Ok(())
}
