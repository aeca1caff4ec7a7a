//! Evaluation of a persisted classifier on the test partition

use crate::config::{load_config, PipelineConfig};
use crate::data::{argmax, load_dataset, DatasetSource, FileSource};
use crate::io::{artifact_path, load_model};
use crate::train::{evaluate as score, CategoricalAccuracy, CategoricalCrossEntropy};
use crate::{Error, Result};
use ndarray::{s, Axis};
use serde::Serialize;
use std::path::Path;

/// Number of test samples shown in the qualitative preview
pub const PREVIEW_COUNT: usize = 5;

/// One previewed test sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Position in the test partition
    pub index: usize,
    pub predicted: usize,
    pub actual: usize,
    /// Probability assigned to the predicted class
    pub confidence: f32,
}

/// Test-set scores of a persisted model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
    pub preview: Vec<Prediction>,
}

/// Load the artifact at `artifact_path` and score it on the test partition of
/// the configured dataset, in inference mode.
///
/// Fails with [`Error::ArtifactNotFound`] when the artifact cannot be read
/// and with [`Error::ShapeMismatch`] when the test images do not have the
/// shape the model was built for.
pub fn evaluate(
    artifact_path: impl AsRef<Path>,
    config: &PipelineConfig,
    source: &dyn DatasetSource,
) -> Result<Evaluation> {
    let artifact = load_model(artifact_path.as_ref())?;
    if artifact.metadata.dataset != config.data.dataset.family() {
        tracing::warn!(
            trained_on = %artifact.metadata.dataset,
            evaluating_on = %config.data.dataset,
            "artifact was trained on a different dataset"
        );
    }
    let model = artifact.into_model()?;

    let test = load_dataset(config.data.dataset, &config.data, source)?.test;
    let spec = model.spec();
    if test.sample_shape() != spec.input_shape || test.num_classes() != spec.num_classes {
        let [h, w, c] = test.sample_shape();
        let [eh, ew, ec] = spec.input_shape;
        return Err(Error::ShapeMismatch {
            expected: vec![eh, ew, ec, spec.num_classes],
            got: vec![h, w, c, test.num_classes()],
        });
    }

    let batch_size = config
        .batch_size()
        .map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
    let scores = score(
        &model,
        &test,
        batch_size,
        &CategoricalCrossEntropy,
        &CategoricalAccuracy,
    )?;

    let n = test.len().min(PREVIEW_COUNT);
    let probs = model.predict(&test.features.slice(s![..n, .., .., ..]).to_owned(), n)?;
    let actual = test.class_ids();
    let preview = probs
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(index, row)| {
            let predicted = argmax(row.iter());
            Prediction {
                index,
                predicted,
                actual: actual[index],
                confidence: row[predicted],
            }
        })
        .collect();

    tracing::info!(
        loss = scores.loss,
        accuracy = scores.accuracy,
        samples = test.len(),
        "evaluation complete"
    );

    Ok(Evaluation {
        loss: scores.loss,
        accuracy: scores.accuracy,
        samples: test.len(),
        preview,
    })
}

/// Load the configuration at `config_path` and evaluate the artifact the
/// training run wrote (or `artifact`, when given) on files under `data.dir`
pub fn evaluate_from_path(
    config_path: impl AsRef<Path>,
    artifact: Option<&Path>,
) -> Result<Evaluation> {
    let config = load_config(config_path)?;
    let path = match artifact {
        Some(path) => path.to_path_buf(),
        None => artifact_path(
            &config.output.dir,
            config.data.dataset.family(),
            config.output.format,
        ),
    };
    let source = FileSource::new(&config.data.dir);
    evaluate(&path, &config, &source)
}
