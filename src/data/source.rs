//! Raw dataset sources

use super::DatasetName;
use crate::{Error, Result};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Undecoded dataset: `u8` pixels (NHW or NHWC) and `u8` class ids
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub train_images: ArrayD<u8>,
    pub train_labels: Vec<u8>,
    pub test_images: ArrayD<u8>,
    pub test_labels: Vec<u8>,
}

/// Name-indexed access to raw datasets
pub trait DatasetSource {
    /// Fetch the raw train and test splits for `name`
    fn fetch(&self, name: DatasetName) -> Result<RawDataset>;
}

const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;

const CIFAR_SIDE: usize = 32;
const CIFAR_CHANNELS: usize = 3;
const CIFAR_PLANE: usize = CIFAR_SIDE * CIFAR_SIDE;
const CIFAR_RECORD: usize = 1 + CIFAR_PLANE * CIFAR_CHANNELS;
const CIFAR_TRAIN_BATCHES: usize = 5;

/// Reads datasets already present on local disk.
///
/// Layout under `root`:
///
/// ```text
/// mnist/train-images-idx3-ubyte
/// mnist/train-labels-idx1-ubyte
/// mnist/t10k-images-idx3-ubyte
/// mnist/t10k-labels-idx1-ubyte
/// cifar-10-batches-bin/data_batch_{1..5}.bin
/// cifar-10-batches-bin/test_batch.bin
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fetch_mnist(&self) -> Result<RawDataset> {
        let dir = self.root.join("mnist");
        let (train_images, train_labels) = read_idx_pair(&dir, "train")?;
        let (test_images, test_labels) = read_idx_pair(&dir, "t10k")?;
        Ok(RawDataset {
            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }

    fn fetch_cifar10(&self) -> Result<RawDataset> {
        let dir = self.root.join("cifar-10-batches-bin");

        let mut train_pixels = Vec::new();
        let mut train_labels = Vec::new();
        for i in 1..=CIFAR_TRAIN_BATCHES {
            let path = dir.join(format!("data_batch_{i}.bin"));
            read_cifar_batch(&path, &mut train_pixels, &mut train_labels)?;
        }

        let mut test_pixels = Vec::new();
        let mut test_labels = Vec::new();
        read_cifar_batch(&dir.join("test_batch.bin"), &mut test_pixels, &mut test_labels)?;

        Ok(RawDataset {
            train_images: cifar_array(train_pixels, train_labels.len())?,
            train_labels,
            test_images: cifar_array(test_pixels, test_labels.len())?,
            test_labels,
        })
    }
}

impl DatasetSource for FileSource {
    fn fetch(&self, name: DatasetName) -> Result<RawDataset> {
        tracing::debug!(dataset = %name, root = %self.root.display(), "reading dataset files");
        match name {
            DatasetName::Mnist => self.fetch_mnist(),
            DatasetName::Cifar10 => self.fetch_cifar10(),
        }
    }
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::DataUnavailable(format!("{}: {reason}", path.display()))
}

fn read_idx_pair(dir: &Path, split: &str) -> Result<(ArrayD<u8>, Vec<u8>)> {
    let images_path = dir.join(format!("{split}-images-idx3-ubyte"));
    let labels_path = dir.join(format!("{split}-labels-idx1-ubyte"));

    let (dims, pixels) = read_idx(&images_path, IDX_IMAGES_MAGIC)?;
    let images = ArrayD::from_shape_vec(IxDyn(&dims), pixels)
        .map_err(|e| unavailable(&images_path, e))?;
    let (_, labels) = read_idx(&labels_path, IDX_LABELS_MAGIC)?;

    Ok((images, labels))
}

/// Read an IDX file of unsigned bytes, returning its dimensions and payload
fn read_idx(path: &Path, magic: u32) -> Result<(Vec<usize>, Vec<u8>)> {
    let bytes = fs::read(path).map_err(|e| unavailable(path, e))?;
    let read_u32 = |offset: usize| -> Result<u32> {
        bytes
            .get(offset..offset + 4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_be_bytes)
            .ok_or_else(|| unavailable(path, "truncated IDX header"))
    };

    let found = read_u32(0)?;
    if found != magic {
        return Err(unavailable(
            path,
            format!("bad IDX magic {found:#010x}, expected {magic:#010x}"),
        ));
    }

    let ndim = (magic & 0xff) as usize;
    let dims = (0..ndim)
        .map(|i| read_u32(4 + 4 * i).map(|d| d as usize))
        .collect::<Result<Vec<_>>>()?;

    let header = 4 + 4 * ndim;
    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| unavailable(path, format!("IDX dimensions {dims:?} overflow")))?;
    if header.checked_add(expected) != Some(bytes.len()) {
        return Err(unavailable(
            path,
            format!(
                "payload is {} bytes, header declares {expected}",
                bytes.len() - header
            ),
        ));
    }

    Ok((dims, bytes[header..].to_vec()))
}

/// Append one CIFAR-10 binary batch, converting planar CHW records to HWC
fn read_cifar_batch(path: &Path, pixels: &mut Vec<u8>, labels: &mut Vec<u8>) -> Result<()> {
    let bytes = fs::read(path).map_err(|e| unavailable(path, e))?;
    if bytes.is_empty() || bytes.len() % CIFAR_RECORD != 0 {
        return Err(unavailable(
            path,
            format!("{} bytes is not a whole number of records", bytes.len()),
        ));
    }

    for record in bytes.chunks_exact(CIFAR_RECORD) {
        labels.push(record[0]);
        let planes = &record[1..];
        for p in 0..CIFAR_PLANE {
            for c in 0..CIFAR_CHANNELS {
                pixels.push(planes[c * CIFAR_PLANE + p]);
            }
        }
    }
    Ok(())
}

fn cifar_array(pixels: Vec<u8>, n: usize) -> Result<ArrayD<u8>> {
    ArrayD::from_shape_vec(IxDyn(&[n, CIFAR_SIDE, CIFAR_SIDE, CIFAR_CHANNELS]), pixels)
        .map_err(|e| Error::DataUnavailable(format!("CIFAR-10 records: {e}")))
}

/// Serves raw datasets held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    datasets: HashMap<DatasetName, RawDataset>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: DatasetName, raw: RawDataset) -> Self {
        self.insert(name, raw);
        self
    }

    pub fn insert(&mut self, name: DatasetName, raw: RawDataset) {
        self.datasets.insert(name, raw);
    }
}

impl DatasetSource for InMemorySource {
    fn fetch(&self, name: DatasetName) -> Result<RawDataset> {
        self.datasets
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::DataUnavailable(format!("{name} is not registered")))
    }
}
