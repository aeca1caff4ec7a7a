//! Layers of the sequential classifier

use crate::autograd::{
    batch_norm, batch_norm_infer, conv2d, conv2d_infer, dropout, linear, linear_infer,
    max_pool2d, max_pool2d_infer, relu, relu_infer, softmax_rows, softmax_rows_infer,
    BatchStats, Context, Conv2dShape, PoolShape,
};
use crate::{Error, Result, Tensor};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Running-average momentum for batch normalization
pub const BN_MOMENTUM: f32 = 0.99;

/// Variance epsilon for batch normalization
pub const BN_EPSILON: f32 = 1e-3;

/// Index into the model's parameter list
pub type ParamId = usize;

/// Per-sample activation extent between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extent {
    Spatial {
        height: usize,
        width: usize,
        channels: usize,
    },
    Flat(usize),
}

impl Extent {
    pub fn spatial([height, width, channels]: [usize; 3]) -> Self {
        Extent::Spatial {
            height,
            width,
            channels,
        }
    }

    /// Elements per sample
    pub fn len(&self) -> usize {
        match *self {
            Extent::Spatial {
                height,
                width,
                channels,
            } => height * width * channels,
            Extent::Flat(n) => n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the trailing axis
    pub fn channels(&self) -> usize {
        match *self {
            Extent::Spatial { channels, .. } => channels,
            Extent::Flat(n) => n,
        }
    }

    /// Dimensions without the batch axis
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Extent::Spatial {
                height,
                width,
                channels,
            } => vec![height, width, channels],
            Extent::Flat(n) => vec![n],
        }
    }

    fn require_spatial(&self, layer: &str) -> Result<(usize, usize, usize)> {
        match *self {
            Extent::Spatial {
                height,
                width,
                channels,
            } => Ok((height, width, channels)),
            Extent::Flat(n) => Err(Error::InvalidParameter(format!(
                "{layer} needs a spatial input, got {n} flat features"
            ))),
        }
    }

    fn require_flat(&self, layer: &str) -> Result<usize> {
        match *self {
            Extent::Flat(n) => Ok(n),
            Extent::Spatial { .. } => Err(Error::InvalidParameter(format!(
                "{layer} needs a flattened input, got {:?}",
                self.dims()
            ))),
        }
    }
}

/// What a layer computes
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Same-padded, stride-1 convolution with bias
    Conv2d {
        kernel: ParamId,
        bias: ParamId,
        filters: usize,
        kernel_size: usize,
    },
    /// Normalization over the trailing axis with running statistics
    BatchNorm {
        gamma: ParamId,
        beta: ParamId,
        running: BatchStats,
    },
    Relu,
    MaxPool {
        size: usize,
    },
    Dropout {
        rate: f32,
    },
    Flatten,
    Dense {
        weight: ParamId,
        bias: ParamId,
        units: usize,
    },
    Softmax,
}

/// A named layer
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Display name of the layer type
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            LayerKind::Conv2d { .. } => "Conv2D",
            LayerKind::BatchNorm { .. } => "BatchNormalization",
            LayerKind::Relu => "ReLU",
            LayerKind::MaxPool { .. } => "MaxPooling2D",
            LayerKind::Dropout { .. } => "Dropout",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense { .. } => "Dense",
            LayerKind::Softmax => "Softmax",
        }
    }

    /// Extent produced for a given input extent
    pub fn output_extent(&self, input: Extent) -> Result<Extent> {
        match &self.kind {
            LayerKind::Conv2d { filters, .. } => {
                let (height, width, _) = input.require_spatial(&self.name)?;
                Ok(Extent::Spatial {
                    height,
                    width,
                    channels: *filters,
                })
            }
            LayerKind::MaxPool { size } => {
                let (height, width, channels) = input.require_spatial(&self.name)?;
                Ok(Extent::Spatial {
                    height: height / size,
                    width: width / size,
                    channels,
                })
            }
            LayerKind::Flatten => Ok(Extent::Flat(input.len())),
            LayerKind::Dense { units, .. } => {
                input.require_flat(&self.name)?;
                Ok(Extent::Flat(*units))
            }
            LayerKind::BatchNorm { .. }
            | LayerKind::Relu
            | LayerKind::Dropout { .. }
            | LayerKind::Softmax => Ok(input),
        }
    }

    /// Recorded forward pass.
    ///
    /// In training mode batch normalization uses batch statistics and folds
    /// them into its running averages, and dropout samples a mask from the
    /// context's random stream.
    pub fn forward(
        &mut self,
        x: &Tensor,
        batch: usize,
        input: Extent,
        params: &[Tensor],
        ctx: &mut Context,
    ) -> Result<Tensor> {
        let training = ctx.is_training();
        match &mut self.kind {
            LayerKind::Conv2d {
                kernel,
                bias,
                filters,
                kernel_size,
            } => {
                let shape = conv_shape(input, batch, *filters, *kernel_size, &self.name)?;
                conv2d(x, param(params, *kernel)?, param(params, *bias)?, shape)
            }
            LayerKind::BatchNorm {
                gamma,
                beta,
                running,
            } => {
                let (gamma, beta) = (param(params, *gamma)?, param(params, *beta)?);
                if !training {
                    let out = batch_norm_infer(x.data(), gamma.data(), beta.data(), running, BN_EPSILON)?;
                    return Ok(Tensor::new(out, false));
                }
                let (out, stats) = batch_norm(x, gamma, beta, input.channels(), BN_EPSILON)?;
                running
                    .mean
                    .zip_mut_with(&stats.mean, |m, &b| *m = BN_MOMENTUM * *m + (1.0 - BN_MOMENTUM) * b);
                running
                    .var
                    .zip_mut_with(&stats.var, |v, &b| *v = BN_MOMENTUM * *v + (1.0 - BN_MOMENTUM) * b);
                Ok(out)
            }
            LayerKind::Relu => Ok(relu(x)),
            LayerKind::MaxPool { size } => {
                max_pool2d(x, pool_shape(input, batch, *size, &self.name)?)
            }
            LayerKind::Dropout { rate } => {
                if training {
                    Ok(dropout(x, *rate, ctx.rng()))
                } else {
                    Ok(x.clone())
                }
            }
            LayerKind::Flatten => Ok(x.clone()),
            LayerKind::Dense {
                weight,
                bias,
                units,
            } => {
                let in_features = input.require_flat(&self.name)?;
                linear(
                    x,
                    param(params, *weight)?,
                    param(params, *bias)?,
                    batch,
                    in_features,
                    *units,
                )
            }
            LayerKind::Softmax => softmax_rows(x, input.channels()),
        }
    }

    /// Inference-mode forward pass without gradient tracking
    pub fn infer(
        &self,
        x: &Array1<f32>,
        batch: usize,
        input: Extent,
        params: &[Tensor],
    ) -> Result<Array1<f32>> {
        match &self.kind {
            LayerKind::Conv2d {
                kernel,
                bias,
                filters,
                kernel_size,
            } => {
                let shape = conv_shape(input, batch, *filters, *kernel_size, &self.name)?;
                conv2d_infer(x, param(params, *kernel)?.data(), param(params, *bias)?.data(), shape)
            }
            LayerKind::BatchNorm {
                gamma,
                beta,
                running,
            } => batch_norm_infer(
                x,
                param(params, *gamma)?.data(),
                param(params, *beta)?.data(),
                running,
                BN_EPSILON,
            ),
            LayerKind::Relu => Ok(relu_infer(x)),
            LayerKind::MaxPool { size } => {
                max_pool2d_infer(x, pool_shape(input, batch, *size, &self.name)?)
            }
            LayerKind::Dropout { .. } | LayerKind::Flatten => Ok(x.clone()),
            LayerKind::Dense {
                weight,
                bias,
                units,
            } => {
                let in_features = input.require_flat(&self.name)?;
                linear_infer(
                    x,
                    param(params, *weight)?.data(),
                    param(params, *bias)?.data(),
                    batch,
                    in_features,
                    *units,
                )
            }
            LayerKind::Softmax => softmax_rows_infer(x, batch, input.channels()),
        }
    }

    /// Non-trainable state, by suffix
    pub fn buffers(&self) -> Vec<(&'static str, &Array1<f32>)> {
        match &self.kind {
            LayerKind::BatchNorm { running, .. } => vec![
                ("moving_mean", &running.mean),
                ("moving_variance", &running.var),
            ],
            _ => Vec::new(),
        }
    }

    pub(crate) fn buffers_mut(&mut self) -> Vec<(&'static str, &mut Array1<f32>)> {
        match &mut self.kind {
            LayerKind::BatchNorm { running, .. } => vec![
                ("moving_mean", &mut running.mean),
                ("moving_variance", &mut running.var),
            ],
            _ => Vec::new(),
        }
    }

    /// Trainable parameter ids owned by this layer
    pub fn param_ids(&self) -> Vec<ParamId> {
        match self.kind {
            LayerKind::Conv2d { kernel, bias, .. } => vec![kernel, bias],
            LayerKind::BatchNorm { gamma, beta, .. } => vec![gamma, beta],
            LayerKind::Dense { weight, bias, .. } => vec![weight, bias],
            _ => Vec::new(),
        }
    }
}

fn param(params: &[Tensor], id: ParamId) -> Result<&Tensor> {
    params
        .get(id)
        .ok_or_else(|| Error::InvalidParameter(format!("parameter #{id} is not registered")))
}

fn conv_shape(
    input: Extent,
    batch: usize,
    out_channels: usize,
    kernel: usize,
    name: &str,
) -> Result<Conv2dShape> {
    let (height, width, in_channels) = input.require_spatial(name)?;
    Ok(Conv2dShape {
        batch,
        height,
        width,
        in_channels,
        out_channels,
        kernel,
    })
}

fn pool_shape(input: Extent, batch: usize, size: usize, name: &str) -> Result<PoolShape> {
    let (height, width, channels) = input.require_spatial(name)?;
    Ok(PoolShape {
        batch,
        height,
        width,
        channels,
        size,
    })
}
