//! Sequential layer container

use super::layer::{Extent, Layer};
use super::spec::ModelSpec;
use crate::autograd::Context;
use crate::{Error, Result, Tensor};
use ndarray::{Array1, Array2, Array4, Axis};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;

/// One row of [`Sequential::architecture`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub layer_type: String,
    /// Output shape without the batch axis
    pub output_shape: Vec<usize>,
    pub params: usize,
}

/// A linear stack of layers with its parameters.
///
/// Parameters live in one list so an optimizer can update all of them in
/// place; layers refer to them by index.
#[derive(Debug, Clone)]
pub struct Sequential {
    spec: ModelSpec,
    layers: Vec<Layer>,
    params: Vec<Tensor>,
    param_names: Vec<String>,
}

impl Sequential {
    pub(crate) fn new(
        spec: ModelSpec,
        layers: Vec<Layer>,
        params: Vec<Tensor>,
        param_names: Vec<String>,
    ) -> Self {
        Self {
            spec,
            layers,
            params,
            param_names,
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn parameters(&self) -> &[Tensor] {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut [Tensor] {
        &mut self.params
    }

    /// Total trainable scalars
    pub fn parameter_count(&self) -> usize {
        self.params.iter().map(Tensor::len).sum()
    }

    fn check_input(&self, len: usize, batch: usize) -> Result<()> {
        if batch == 0 || len != batch * self.spec.input_len() {
            let [h, w, c] = self.spec.input_shape;
            return Err(Error::ShapeMismatch {
                expected: vec![batch, h, w, c],
                got: vec![len],
            });
        }
        Ok(())
    }

    /// Recorded forward pass over `batch` samples of flattened NHWC input.
    ///
    /// Returns the `(batch, num_classes)` probability rows. The context decides
    /// between training and inference behaviour of normalization and dropout.
    pub fn forward(&mut self, x: &Tensor, batch: usize, ctx: &mut Context) -> Result<Tensor> {
        self.check_input(x.len(), batch)?;

        let Sequential { layers, params, spec, .. } = self;
        let mut extent = Extent::spatial(spec.input_shape);
        let mut out = x.clone();
        for layer in layers.iter_mut() {
            out = layer.forward(&out, batch, extent, params, ctx)?;
            extent = layer.output_extent(extent)?;
        }
        Ok(out)
    }

    /// Inference over one flattened batch without gradient tracking
    pub fn predict_batch(&self, x: &Array1<f32>, batch: usize) -> Result<Array1<f32>> {
        self.check_input(x.len(), batch)?;

        let mut extent = Extent::spatial(self.spec.input_shape);
        let mut out = x.clone();
        for layer in &self.layers {
            out = layer.infer(&out, batch, extent, &self.params)?;
            extent = layer.output_extent(extent)?;
        }
        Ok(out)
    }

    /// Class probabilities `(N, num_classes)` for a whole feature array
    pub fn predict(&self, features: &Array4<f32>, batch_size: usize) -> Result<Array2<f32>> {
        let (n, h, w, c) = features.dim();
        if [h, w, c] != self.spec.input_shape {
            return Err(Error::ShapeMismatch {
                expected: self.spec.input_shape.to_vec(),
                got: vec![h, w, c],
            });
        }

        let k = self.spec.num_classes;
        let mut probs = Array2::zeros((n, k));
        for (chunk, mut rows) in features
            .axis_chunks_iter(Axis(0), batch_size.max(1))
            .zip(probs.axis_chunks_iter_mut(Axis(0), batch_size.max(1)))
        {
            let batch = chunk.len_of(Axis(0));
            let flat: Array1<f32> = chunk.iter().copied().collect();
            let out = self.predict_batch(&flat, batch)?;
            let out = out
                .into_shape_with_order((batch, k))
                .map_err(|e| Error::Serialization(format!("prediction rows: {e}")))?;
            rows.assign(&out);
        }
        Ok(probs)
    }

    /// Layer names, types, output shapes and parameter counts
    pub fn architecture(&self) -> Result<Vec<LayerSummary>> {
        let mut extent = Extent::spatial(self.spec.input_shape);
        let mut rows = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            extent = layer.output_extent(extent)?;
            rows.push(LayerSummary {
                name: layer.name.clone(),
                layer_type: layer.type_name().to_string(),
                output_shape: extent.dims(),
                params: layer
                    .param_ids()
                    .iter()
                    .map(|&id| self.params.get(id).map_or(0, Tensor::len))
                    .sum(),
            });
        }
        Ok(rows)
    }

    /// Human-readable layer table
    pub fn summary(&self) -> Result<String> {
        let mut out = String::new();
        let rule = "-".repeat(72);
        let _ = writeln!(out, "{:<36}{:<24}{:>12}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{rule}");
        for row in self.architecture()? {
            let shape = row
                .output_shape
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "{:<36}{:<24}{:>12}",
                format!("{} ({})", row.name, row.layer_type),
                format!("(None, {shape})"),
                row.params
            );
        }
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total params: {}", self.parameter_count());
        Ok(out)
    }

    /// Every parameter and buffer by name, in layer order
    pub fn state_dict(&self) -> Vec<(String, Array1<f32>)> {
        let mut state: Vec<(String, Array1<f32>)> = self
            .param_names
            .iter()
            .cloned()
            .zip(self.params.iter().map(|p| p.data().clone()))
            .collect();
        for layer in &self.layers {
            for (suffix, buffer) in layer.buffers() {
                state.push((format!("{}.{suffix}", layer.name), buffer.clone()));
            }
        }
        state
    }

    /// Overwrite parameters and buffers from a named state.
    ///
    /// Every entry the model expects must be present with the right length.
    pub fn load_state_dict(&mut self, mut state: HashMap<String, Array1<f32>>) -> Result<()> {
        let mut take = |name: &str, expected: usize| -> Result<Array1<f32>> {
            let values = state.remove(name).ok_or_else(|| {
                Error::Serialization(format!("missing tensor '{name}' in model state"))
            })?;
            if values.len() != expected {
                return Err(Error::ShapeMismatch {
                    expected: vec![expected],
                    got: vec![values.len()],
                });
            }
            Ok(values)
        };

        for (name, param) in self.param_names.iter().zip(self.params.iter_mut()) {
            let values = take(name, param.len())?;
            param.data_mut().assign(&values);
        }
        for layer in &mut self.layers {
            let layer_name = layer.name.clone();
            for (suffix, buffer) in layer.buffers_mut() {
                let values = take(&format!("{layer_name}.{suffix}"), buffer.len())?;
                buffer.assign(&values);
            }
        }

        if !state.is_empty() {
            let mut unknown: Vec<_> = state.into_keys().collect();
            unknown.sort();
            tracing::warn!(?unknown, "ignoring tensors the model does not use");
        }
        Ok(())
    }
}
