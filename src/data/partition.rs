//! Dataset partitions and mini-batches

use crate::{Error, Result, Tensor};
use ndarray::{Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// A training batch: flattened NHWC inputs and one-hot targets
#[derive(Clone, Debug)]
pub struct Batch {
    /// Input features, `size × H × W × C` row-major
    pub inputs: Tensor,
    /// One-hot targets, `size × K` row-major
    pub targets: Tensor,
    size: usize,
}

impl Batch {
    pub fn new(inputs: Tensor, targets: Tensor, size: usize) -> Self {
        Self {
            inputs,
            targets,
            size,
        }
    }

    /// Number of samples in the batch
    pub fn size(&self) -> usize {
        self.size
    }
}

/// One split of a dataset: features `(N, H, W, C)` and labels `(N, K)`
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub features: Array4<f32>,
    pub labels: Array2<f32>,
}

impl Partition {
    /// Pair features with labels; sample counts must agree
    pub fn new(features: Array4<f32>, labels: Array2<f32>) -> Result<Self> {
        let n = features.len_of(Axis(0));
        if labels.nrows() != n {
            return Err(Error::ShapeMismatch {
                expected: vec![n],
                got: vec![labels.nrows()],
            });
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-sample shape `[height, width, channels]`
    pub fn sample_shape(&self) -> [usize; 3] {
        let (_, h, w, c) = self.features.dim();
        [h, w, c]
    }

    pub fn num_classes(&self) -> usize {
        self.labels.ncols()
    }

    /// Class id of every sample (argmax of its one-hot row)
    pub fn class_ids(&self) -> Vec<usize> {
        self.labels.rows().into_iter().map(|row| argmax(row.iter())).collect()
    }

    /// Move the trailing `fraction` of samples into a new partition.
    ///
    /// Both sides must keep at least one sample.
    pub fn split_off(&mut self, fraction: f32) -> Result<Partition> {
        let n = self.len();
        let held = (n as f32 * fraction).round() as usize;
        if held == 0 || held >= n {
            return Err(Error::InvalidParameter(format!(
                "validation split {fraction} of {n} samples leaves an empty partition"
            )));
        }

        let keep = n - held;
        let held_out = Partition {
            features: self.features.slice_axis(Axis(0), (keep..).into()).to_owned(),
            labels: self.labels.slice_axis(Axis(0), (keep..).into()).to_owned(),
        };
        self.features = self.features.slice_axis(Axis(0), (..keep).into()).to_owned();
        self.labels = self.labels.slice_axis(Axis(0), (..keep).into()).to_owned();
        Ok(held_out)
    }

    /// Sample order for one pass: shuffled with `rng`, sequential without
    pub fn order(&self, rng: Option<&mut StdRng>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order
    }

    /// Copy the samples at `indices` into a batch
    pub fn gather(&self, indices: &[usize]) -> Batch {
        let features = self.features.select(Axis(0), indices);
        let labels = self.labels.select(Axis(0), indices);
        Batch::new(
            Tensor::from_vec(features.iter().copied().collect(), false),
            Tensor::from_vec(labels.iter().copied().collect(), false),
            indices.len(),
        )
    }

    /// Mini-batches covering every sample once; the last batch may be short
    pub fn batches(
        &self,
        batch_size: usize,
        rng: Option<&mut StdRng>,
    ) -> Result<impl Iterator<Item = Batch> + '_> {
        if batch_size == 0 {
            return Err(Error::InvalidParameter(
                "batch size must be > 0".to_string(),
            ));
        }
        let order = self.order(rng);
        let n = order.len();
        Ok((0..n)
            .step_by(batch_size)
            .map(move |start| self.gather(&order[start..(start + batch_size).min(n)])))
    }

    /// Number of batches [`Partition::batches`] yields
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size.max(1))
    }
}

/// Index of the largest value (first on ties)
pub(crate) fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}
