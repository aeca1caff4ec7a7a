//! Per-epoch training history

use serde::{Deserialize, Serialize};

/// Metrics of one completed epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Sample-weighted mean training loss
    pub loss: f32,
    /// Training accuracy as a fraction in [0, 1]
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Per-epoch metrics in epoch order, as returned by [`super::Trainer::fit`].
///
/// Validation sequences are empty when training ran without validation data;
/// otherwise every sequence has one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
    #[serde(default)]
    pub val_loss: Vec<f32>,
    #[serde(default)]
    pub val_accuracy: Vec<f32>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, epoch: EpochMetrics) {
        self.loss.push(epoch.loss);
        self.accuracy.push(epoch.accuracy);
        if let Some(v) = epoch.val_loss {
            self.val_loss.push(v);
        }
        if let Some(v) = epoch.val_accuracy {
            self.val_accuracy.push(v);
        }
    }

    /// Number of completed epochs
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    /// Metrics of the last completed epoch
    pub fn last(&self) -> Option<EpochMetrics> {
        let i = self.epochs().checked_sub(1)?;
        Some(EpochMetrics {
            loss: self.loss[i],
            accuracy: self.accuracy[i],
            val_loss: self.val_loss.get(i).copied(),
            val_accuracy: self.val_accuracy.get(i).copied(),
        })
    }

    /// Lowest validation loss, if validation ran
    pub fn best_val_loss(&self) -> Option<f32> {
        self.val_loss.iter().copied().reduce(f32::min)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
