//! Loss functions for training

use crate::autograd::{as_matrix, BackwardOp, GradCell};
use crate::{Error, Result, Tensor};
use ndarray::Array1;
use std::rc::Rc;

/// Trait for loss functions
///
/// Predictions and targets are row-major `(batch, num_classes)` buffers.
pub trait LossFn {
    /// Compute the mean loss over the batch and record its backward op
    fn forward(&self, predictions: &Tensor, targets: &Tensor, num_classes: usize)
        -> Result<Tensor>;

    /// Mean loss without gradient tracking
    fn value(
        &self,
        predictions: &Array1<f32>,
        targets: &Array1<f32>,
        num_classes: usize,
    ) -> Result<f32>;

    /// Name of the loss function
    fn name(&self) -> &str;
}

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log
pub const EPSILON: f32 = 1e-7;

/// Categorical cross-entropy over probability rows
///
/// L = -1/N · Σₙ Σₖ yₙₖ · ln(clip(pₙₖ))
///
/// The model already ends in a softmax, so predictions are probabilities and
/// the gradient is taken with respect to them: ∂L/∂p = -y / (p · N), zero
/// where the probability was clipped.
///
/// # Example
///
/// ```
/// use clasificar::train::{CategoricalCrossEntropy, LossFn};
/// use clasificar::Tensor;
///
/// let probs = Tensor::from_vec(vec![0.7, 0.2, 0.1], true);
/// let targets = Tensor::from_vec(vec![1.0, 0.0, 0.0], false);
///
/// let loss = CategoricalCrossEntropy.forward(&probs, &targets, 3).unwrap();
/// assert!((loss.data()[0] + 0.7f32.ln()).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalCrossEntropy;

impl CategoricalCrossEntropy {
    fn check(predictions: &Array1<f32>, targets: &Array1<f32>, num_classes: usize) -> Result<usize> {
        if predictions.len() != targets.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![targets.len()],
                got: vec![predictions.len()],
            });
        }
        let rows = predictions.len() / num_classes.max(1);
        as_matrix(predictions, rows, num_classes)?;
        if rows == 0 {
            return Err(Error::InvalidParameter(
                "cross-entropy over an empty batch".to_string(),
            ));
        }
        Ok(rows)
    }
}

impl LossFn for CategoricalCrossEntropy {
    fn forward(
        &self,
        predictions: &Tensor,
        targets: &Tensor,
        num_classes: usize,
    ) -> Result<Tensor> {
        let loss = self.value(predictions.data(), targets.data(), num_classes)?;
        let rows = Self::check(predictions.data(), targets.data(), num_classes)? as f32;

        let requires_grad = predictions.requires_grad();
        let mut result = Tensor::from_vec(vec![loss], requires_grad);

        if requires_grad {
            let mut grad = Array1::zeros(predictions.len());
            ndarray::Zip::from(&mut grad)
                .and(predictions.data())
                .and(targets.data())
                .for_each(|g, &p, &y| {
                    if (EPSILON..=1.0 - EPSILON).contains(&p) {
                        *g = -y / (p * rows);
                    }
                });

            result.set_backward_op(Rc::new(CrossEntropyBackward {
                predictions: predictions.clone(),
                grad,
                result_grad: result.grad_cell(),
            }));
        }

        Ok(result)
    }

    fn value(
        &self,
        predictions: &Array1<f32>,
        targets: &Array1<f32>,
        num_classes: usize,
    ) -> Result<f32> {
        let rows = Self::check(predictions, targets, num_classes)?;
        let total: f32 = predictions
            .iter()
            .zip(targets.iter())
            .filter(|(_, &y)| y != 0.0)
            .map(|(&p, &y)| -y * p.clamp(EPSILON, 1.0 - EPSILON).ln())
            .sum();
        Ok(total / rows as f32)
    }

    fn name(&self) -> &str {
        "categorical_crossentropy"
    }
}

struct CrossEntropyBackward {
    predictions: Tensor,
    grad: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for CrossEntropyBackward {
    fn backward(&self) {
        if let Some(upstream) = self.result_grad.borrow().as_ref() {
            self.predictions.accumulate_grad(&self.grad * upstream[0]);
            self.predictions.propagate();
        }
    }
}
