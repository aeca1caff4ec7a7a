//! Artifact loading

use super::format::ModelFormat;
use super::model::{Artifact, ModelMetadata, ModelState};
use super::save::METADATA_KEY;
use crate::{Error, Result};
use ndarray::Array1;
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use std::path::Path;

/// Load an artifact; the format is detected from the file extension.
///
/// A file that is missing, cannot be decoded, or lacks a tensor its
/// topology needs is reported as [`Error::ArtifactNotFound`].
///
/// # Example
///
/// ```no_run
/// use clasificar::io::load_model;
///
/// let artifact = load_model("models/mnist_model.safetensors")?;
/// println!("Loaded {} trained on {}", artifact.metadata.name, artifact.metadata.dataset);
/// # Ok::<(), clasificar::Error>(())
/// ```
pub fn load_model(path: impl AsRef<Path>) -> Result<Artifact> {
    let path = path.as_ref();
    let not_found = |reason: String| Error::ArtifactNotFound {
        path: path.display().to_string(),
        reason,
    };

    let format = ModelFormat::from_path(path)
        .ok_or_else(|| not_found("unsupported or missing file extension".to_string()))?;
    let bytes = std::fs::read(path).map_err(|e| not_found(e.to_string()))?;

    let artifact = match format {
        ModelFormat::SafeTensors => decode_safetensors(&bytes),
        ModelFormat::Json => serde_json::from_slice::<ModelState>(&bytes)
            .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))
            .and_then(Artifact::from_state),
        ModelFormat::Yaml => serde_yaml::from_slice::<ModelState>(&bytes)
            .map_err(|e| Error::Serialization(format!("YAML deserialization failed: {e}")))
            .and_then(Artifact::from_state),
    }
    .and_then(|artifact| artifact.verify().map(|()| artifact))
    .map_err(|e| not_found(e.to_string()))?;

    tracing::debug!(path = %path.display(), name = %artifact.metadata.name, "artifact loaded");
    Ok(artifact)
}

fn decode_safetensors(bytes: &[u8]) -> Result<Artifact> {
    let (_, header) = SafeTensors::read_metadata(bytes)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;
    let metadata_json = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| Error::Serialization(format!("missing '{METADATA_KEY}' header")))?;
    let metadata: ModelMetadata = serde_json::from_str(metadata_json)
        .map_err(|e| Error::Serialization(format!("metadata deserialization failed: {e}")))?;

    let safetensors = SafeTensors::deserialize(bytes)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

    let tensors = safetensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            if view.dtype() != Dtype::F32 {
                return Err(Error::Serialization(format!(
                    "tensor '{name}' has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }
            let values: Array1<f32> = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Ok((name, values))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Artifact { metadata, tensors })
}
