//! Artifact structure for serialization

use crate::model::{build_model, ModelSpec, Sequential};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Artifact metadata: provenance plus the full topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Artifact name, `<family>-cnn`
    pub name: String,

    /// Dataset family the model was trained on
    pub dataset: String,

    /// Version of the crate that wrote the artifact
    pub version: String,

    pub created_at: DateTime<Utc>,

    /// Everything needed to rebuild the layer stack
    pub spec: ModelSpec,
}

impl ModelMetadata {
    pub fn new(dataset: impl Into<String>, spec: ModelSpec) -> Self {
        let dataset = dataset.into();
        Self {
            name: format!("{dataset}-cnn"),
            dataset,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            spec,
        }
    }
}

/// Information about a stored tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Tensor name (e.g. `conv2d_0.kernel`, `batch_normalization_0.moving_mean`)
    pub name: String,

    /// Tensor shape
    pub shape: Vec<usize>,

    /// Data type
    pub dtype: String,
}

/// Serializable artifact state for the text formats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub metadata: ModelMetadata,

    pub parameters: Vec<ParameterInfo>,

    /// Flattened tensor data, in `parameters` order
    pub data: Vec<f32>,
}

/// A persisted model: topology plus every named parameter and buffer
#[derive(Debug, Clone)]
pub struct Artifact {
    pub metadata: ModelMetadata,

    pub tensors: Vec<(String, Array1<f32>)>,
}

impl Artifact {
    /// Snapshot a model's weights and running statistics
    pub fn from_model(model: &Sequential, dataset: &str) -> Self {
        Self {
            metadata: ModelMetadata::new(dataset, model.spec().clone()),
            tensors: model.state_dict(),
        }
    }

    /// Get tensor by name
    pub fn get_tensor(&self, name: &str) -> Option<&Array1<f32>> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Check that every tensor the topology needs is present with the right
    /// length
    pub fn verify(&self) -> Result<()> {
        self.metadata.spec.validate()?;
        let reference = build_model(&self.metadata.spec, &mut StdRng::seed_from_u64(0));
        for (name, expected) in reference.state_dict() {
            match self.get_tensor(&name) {
                None => {
                    return Err(Error::Serialization(format!(
                        "missing tensor '{name}' in model state"
                    )))
                }
                Some(found) if found.len() != expected.len() => {
                    return Err(Error::Serialization(format!(
                        "tensor '{name}' has {} values, topology needs {}",
                        found.len(),
                        expected.len()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Rebuild the classifier described by this artifact
    pub fn into_model(self) -> Result<Sequential> {
        self.metadata.spec.validate()?;
        // Initial weights are overwritten, so the seed is irrelevant
        let mut model = build_model(&self.metadata.spec, &mut StdRng::seed_from_u64(0));
        model.load_state_dict(self.tensors.into_iter().collect::<HashMap<_, _>>())?;
        Ok(model)
    }

    /// Convert to serializable state
    pub fn to_state(&self) -> ModelState {
        let mut data = Vec::new();
        let parameters = self
            .tensors
            .iter()
            .map(|(name, tensor)| {
                data.extend(tensor.iter().copied());
                ParameterInfo {
                    name: name.clone(),
                    shape: vec![tensor.len()],
                    dtype: "f32".to_string(),
                }
            })
            .collect();

        ModelState {
            metadata: self.metadata.clone(),
            parameters,
            data,
        }
    }

    /// Create artifact from serializable state
    pub fn from_state(state: ModelState) -> Result<Self> {
        let mut offset: usize = 0;
        let mut tensors = Vec::with_capacity(state.parameters.len());
        for info in state.parameters {
            let end = info
                .shape
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .and_then(|size| offset.checked_add(size));
            let values = end
                .and_then(|end| state.data.get(offset..end))
                .ok_or_else(|| {
                    Error::Serialization(format!(
                        "tensor '{}' with shape {:?} runs past the end of the data ({} values)",
                        info.name,
                        info.shape,
                        state.data.len()
                    ))
                })?;
            offset += values.len();
            tensors.push((info.name, Array1::from(values.to_vec())));
        }

        if offset != state.data.len() {
            return Err(Error::Serialization(format!(
                "{} trailing values after the last tensor",
                state.data.len() - offset
            )));
        }

        Ok(Self {
            metadata: state.metadata,
            tensors,
        })
    }
}
