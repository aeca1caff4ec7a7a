//! Batch normalization and dropout

use super::tensor::GradCell;
use super::{as_matrix, flatten, BackwardOp, Tensor};
use crate::{Error, Result};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use std::rc::Rc;

/// Per-channel statistics of the batch a normalization was computed over
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub mean: Array1<f32>,
    pub var: Array1<f32>,
}

fn check_channels(x: &Array1<f32>, channels: usize, params: &[&Array1<f32>]) -> Result<usize> {
    if channels == 0 || x.len() % channels != 0 || x.is_empty() {
        return Err(Error::ShapeMismatch {
            expected: vec![channels],
            got: vec![x.len()],
        });
    }
    for p in params {
        if p.len() != channels {
            return Err(Error::ShapeMismatch {
                expected: vec![channels],
                got: vec![p.len()],
            });
        }
    }
    Ok(x.len() / channels)
}

/// Training-mode batch normalization over the trailing channel axis.
///
/// Every leading position (batch and spatial) counts as one sample, so a
/// `(N, H, W, C)` buffer normalizes over `N·H·W` rows per channel. Returns the
/// normalized output and the biased batch statistics for updating running
/// averages.
pub fn batch_norm(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    channels: usize,
    epsilon: f32,
) -> Result<(Tensor, BatchStats)> {
    let rows = check_channels(x.data(), channels, &[gamma.data(), beta.data()])?;
    let xm = as_matrix(x.data(), rows, channels)?;

    let m = rows as f32;
    let mean = xm.sum_axis(Axis(0)) / m;
    let centered = &xm - &mean;
    let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / m;
    let inv_std = var.mapv(|v| 1.0 / (v + epsilon).sqrt());
    let normalized = &centered * &inv_std;

    let out = &normalized * gamma.data() + beta.data();
    let requires_grad = x.requires_grad() || gamma.requires_grad() || beta.requires_grad();
    let mut result = Tensor::new(flatten(out), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(BatchNormBackward {
            x: x.clone(),
            gamma: gamma.clone(),
            beta: beta.clone(),
            normalized,
            inv_std,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok((result, BatchStats { mean, var }))
}

/// Inference-mode batch normalization using stored running statistics
pub fn batch_norm_infer(
    x: &Array1<f32>,
    gamma: &Array1<f32>,
    beta: &Array1<f32>,
    stats: &BatchStats,
    epsilon: f32,
) -> Result<Array1<f32>> {
    let channels = gamma.len();
    let rows = check_channels(x, channels, &[beta, &stats.mean, &stats.var])?;
    let xm = as_matrix(x, rows, channels)?;
    let scale = stats.var.mapv(|v| 1.0 / (v + epsilon).sqrt()) * gamma;
    let out = (&xm - &stats.mean) * &scale + beta;
    Ok(flatten(out))
}

struct BatchNormBackward {
    x: Tensor,
    gamma: Tensor,
    beta: Tensor,
    normalized: Array2<f32>,
    inv_std: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for BatchNormBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            let (rows, channels) = self.normalized.dim();
            let Ok(g) = as_matrix(grad_output, rows, channels) else {
                return;
            };

            if self.beta.requires_grad() {
                self.beta.accumulate_grad(g.sum_axis(Axis(0)));
            }
            if self.gamma.requires_grad() {
                self.gamma
                    .accumulate_grad((&g * &self.normalized).sum_axis(Axis(0)));
            }
            if self.x.requires_grad() {
                // ∂L/∂x = inv_std/m · (m·ĝ - Σĝ - x̂·Σ(ĝ·x̂)), ĝ = g·γ
                let m = rows as f32;
                let g_hat = &g * self.gamma.data();
                let sum_g = g_hat.sum_axis(Axis(0));
                let sum_gx = (&g_hat * &self.normalized).sum_axis(Axis(0));
                let grad_x = (&g_hat * m - &sum_g - &self.normalized * &sum_gx)
                    * &(&self.inv_std / m);
                self.x.accumulate_grad(flatten(grad_x));
            }

            self.x.propagate();
            self.gamma.propagate();
            self.beta.propagate();
        }
    }
}

/// Inverted dropout: zero each element with probability `rate` and scale the
/// survivors by `1 / (1 - rate)` so the expected activation is unchanged.
pub fn dropout(x: &Tensor, rate: f32, rng: &mut StdRng) -> Tensor {
    if rate <= 0.0 {
        return x.clone();
    }
    let keep = 1.0 - rate;
    let mask: Array1<f32> = (0..x.len())
        .map(|_| {
            if rng.random::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        })
        .collect();

    let data = x.data() * &mask;
    let requires_grad = x.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(DropoutBackward {
            x: x.clone(),
            mask,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct DropoutBackward {
    x: Tensor,
    mask: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for DropoutBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                self.x.accumulate_grad(grad * &self.mask);
            }
            self.x.propagate();
        }
    }
}
