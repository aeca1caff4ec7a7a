//! Evaluation metrics for training and validation

use crate::data::argmax;
use crate::{Error, Result};
use ndarray::Array1;

/// Trait for evaluation metrics over row-major `(batch, num_classes)` buffers
pub trait Metric {
    /// Compute the metric given predictions and targets
    fn compute(
        &self,
        predictions: &Array1<f32>,
        targets: &Array1<f32>,
        num_classes: usize,
    ) -> Result<f32>;

    /// Name of the metric
    fn name(&self) -> &str;

    /// Whether higher values are better (true) or lower (false)
    fn higher_is_better(&self) -> bool {
        true
    }
}

/// Fraction of rows where argmax(prediction) == argmax(target)
///
/// # Example
///
/// ```
/// use clasificar::train::{CategoricalAccuracy, Metric};
/// use ndarray::arr1;
///
/// let pred = arr1(&[0.9, 0.1, 0.3, 0.7]);
/// let target = arr1(&[1.0, 0.0, 1.0, 0.0]);
///
/// let acc = CategoricalAccuracy.compute(&pred, &target, 2).unwrap();
/// assert_eq!(acc, 0.5);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalAccuracy;

impl CategoricalAccuracy {
    /// Number of correctly classified rows
    pub fn correct(
        predictions: &Array1<f32>,
        targets: &Array1<f32>,
        num_classes: usize,
    ) -> Result<usize> {
        if num_classes == 0
            || predictions.len() != targets.len()
            || predictions.len() % num_classes != 0
        {
            return Err(Error::ShapeMismatch {
                expected: vec![targets.len()],
                got: vec![predictions.len()],
            });
        }

        Ok(predictions
            .exact_chunks(num_classes)
            .into_iter()
            .zip(targets.exact_chunks(num_classes))
            .filter(|(p, t)| argmax(p.iter()) == argmax(t.iter()))
            .count())
    }
}

impl Metric for CategoricalAccuracy {
    fn compute(
        &self,
        predictions: &Array1<f32>,
        targets: &Array1<f32>,
        num_classes: usize,
    ) -> Result<f32> {
        let rows = predictions.len() / num_classes.max(1);
        let correct = Self::correct(predictions, targets, num_classes)?;
        if rows == 0 {
            return Ok(0.0);
        }
        Ok(correct as f32 / rows as f32)
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}
