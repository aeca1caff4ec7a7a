//! Dataset loading and batching
//!
//! Raw datasets come from a [`DatasetSource`] as `u8` pixels and `u8` class
//! ids. [`load_dataset`] turns them into float NHWC features and one-hot
//! labels split into train and test [`Partition`]s.

mod partition;
mod source;


pub use partition::{Batch, Partition};
pub(crate) use partition::argmax;
pub use source::{DatasetSource, FileSource, InMemorySource, RawDataset};

use crate::config::DataConfig;
use crate::{Error, Result};
use ndarray::{Array2, Array4, ArrayD, Axis, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of classes in every supported dataset
pub const NUM_CLASSES: usize = 10;

/// Supported datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetName {
    /// 28×28 grayscale handwritten digits
    #[default]
    Mnist,
    /// 32×32 RGB natural images
    Cifar10,
}

impl DatasetName {
    /// Family name used in artifact file names
    pub fn family(&self) -> &'static str {
        match self {
            DatasetName::Mnist => "mnist",
            DatasetName::Cifar10 => "cifar10",
        }
    }

    /// Per-sample shape `[height, width, channels]`
    pub fn input_shape(&self) -> [usize; 3] {
        match self {
            DatasetName::Mnist => [28, 28, 1],
            DatasetName::Cifar10 => [32, 32, 3],
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.family())
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mnist" => Ok(DatasetName::Mnist),
            "cifar10" | "cifar-10" => Ok(DatasetName::Cifar10),
            _ => Err(Error::Config(format!(
                "Unknown dataset: {s}. Valid datasets: mnist, cifar10"
            ))),
        }
    }
}

/// A loaded dataset ready for training
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: DatasetName,
    pub train: Partition,
    pub test: Partition,
}

impl Dataset {
    /// Per-sample shape `[height, width, channels]` shared by both partitions
    pub fn input_shape(&self) -> [usize; 3] {
        self.train.sample_shape()
    }

    pub fn num_classes(&self) -> usize {
        self.train.num_classes()
    }
}

/// Fetch `name` from `source` and preprocess it.
///
/// Pixels are rescaled to `[0, 1]` when `config.normalize` is set. Rank-3
/// image arrays (grayscale) gain a trailing channel axis of size 1. Labels are
/// one-hot encoded with [`NUM_CLASSES`] columns.
pub fn load_dataset(
    name: DatasetName,
    config: &DataConfig,
    source: &dyn DatasetSource,
) -> Result<Dataset> {
    let raw = source.fetch(name)?;

    let train = prepare(raw.train_images, &raw.train_labels, config.normalize)?;
    let test = prepare(raw.test_images, &raw.test_labels, config.normalize)?;

    if train.sample_shape() != test.sample_shape() {
        return Err(Error::ShapeMismatch {
            expected: train.sample_shape().to_vec(),
            got: test.sample_shape().to_vec(),
        });
    }

    tracing::info!(
        dataset = %name,
        train = train.len(),
        test = test.len(),
        shape = ?train.sample_shape(),
        "dataset loaded"
    );

    Ok(Dataset { name, train, test })
}

fn prepare(images: ArrayD<u8>, labels: &[u8], normalize: bool) -> Result<Partition> {
    let features = to_features(images, normalize)?;
    if features.len_of(Axis(0)) != labels.len() {
        return Err(Error::DataUnavailable(format!(
            "{} images but {} labels",
            features.len_of(Axis(0)),
            labels.len()
        )));
    }
    Partition::new(features, one_hot(labels)?)
}

fn to_features(images: ArrayD<u8>, normalize: bool) -> Result<Array4<f32>> {
    let images = match images.ndim() {
        3 => images.insert_axis(Axis(3)),
        4 => images,
        // Compared by rank: NHW or NHWC
        rank => {
            return Err(Error::ShapeMismatch {
                expected: vec![4],
                got: vec![rank],
            })
        }
    };
    let images = images
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::DataUnavailable(format!("Image array: {e}")))?;

    let scale = if normalize { 1.0 / 255.0 } else { 1.0 };
    Ok(images.mapv(|p| f32::from(p) * scale))
}

/// One-hot encode class ids into `(N, NUM_CLASSES)`
pub fn one_hot(labels: &[u8]) -> Result<Array2<f32>> {
    let mut encoded = Array2::zeros((labels.len(), NUM_CLASSES));
    for (i, &label) in labels.iter().enumerate() {
        let class = usize::from(label);
        if class >= NUM_CLASSES {
            return Err(Error::DataUnavailable(format!(
                "Label {label} at index {i} is outside 0..{NUM_CLASSES}"
            )));
        }
        encoded[[i, class]] = 1.0;
    }
    Ok(encoded)
}
