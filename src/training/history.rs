//! Per-epoch training record persisted next to the model

use serde::{Deserialize, Serialize};

/// Metrics of a single epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_precision: f64,
    pub val_recall: f64,
    /// Learning rate used during the epoch
    pub learning_rate: f64,
}

/// Ordered-by-epoch metric sequences for one training run
///
/// Every sequence has one entry per executed epoch. The first four keys match
/// the classic `{loss, accuracy, val_loss, val_accuracy}` history layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,

    #[serde(default)]
    pub precision: Vec<f64>,
    #[serde(default)]
    pub recall: Vec<f64>,
    #[serde(default)]
    pub val_precision: Vec<f64>,
    #[serde(default)]
    pub val_recall: Vec<f64>,
    #[serde(default)]
    pub learning_rate: Vec<f64>,

    /// Epoch (0-based) with the lowest validation loss
    #[serde(default)]
    pub best_epoch: Option<usize>,
    /// Whether early stopping ended the run
    #[serde(default)]
    pub stopped_early: bool,
    /// Epoch limit the run was started with
    #[serde(default)]
    pub epochs_requested: usize,
    /// RFC 3339 timestamp of when the run finished
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one epoch to every sequence
    pub fn record(&mut self, epoch: &EpochRecord) {
        self.loss.push(epoch.loss);
        self.accuracy.push(epoch.accuracy);
        self.val_loss.push(epoch.val_loss);
        self.val_accuracy.push(epoch.val_accuracy);
        self.precision.push(epoch.precision);
        self.recall.push(epoch.recall);
        self.val_precision.push(epoch.val_precision);
        self.val_recall.push(epoch.val_recall);
        self.learning_rate.push(epoch.learning_rate);
    }

    /// Number of epochs actually executed
    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    /// Lowest validation loss seen, with its epoch
    pub fn best_val_loss(&self) -> Option<(usize, f64)> {
        self.val_loss
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Metrics of the last executed epoch
    pub fn last(&self) -> Option<EpochRecord> {
        let i = self.epochs_run().checked_sub(1)?;
        let at = |v: &[f64]| v.get(i).copied().unwrap_or(f64::NAN);
        Some(EpochRecord {
            loss: self.loss[i],
            accuracy: at(&self.accuracy),
            precision: at(&self.precision),
            recall: at(&self.recall),
            val_loss: at(&self.val_loss),
            val_accuracy: at(&self.val_accuracy),
            val_precision: at(&self.val_precision),
            val_recall: at(&self.val_recall),
            learning_rate: at(&self.learning_rate),
        })
    }

    /// Check that the required sequences are equally long and that optional
    /// ones are either absent or match them
    pub fn validate(&self) -> Result<(), String> {
        let n = self.loss.len();
        for (name, seq) in [
            ("accuracy", &self.accuracy),
            ("val_loss", &self.val_loss),
            ("val_accuracy", &self.val_accuracy),
        ] {
            if seq.len() != n {
                return Err(format!("history '{}' has {} entries, expected {}", name, seq.len(), n));
            }
        }
        for (name, seq) in [
            ("precision", &self.precision),
            ("recall", &self.recall),
            ("val_precision", &self.val_precision),
            ("val_recall", &self.val_recall),
            ("learning_rate", &self.learning_rate),
        ] {
            if !seq.is_empty() && seq.len() != n {
                return Err(format!("history '{}' has {} entries, expected {}", name, seq.len(), n));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(loss: f64, val_loss: f64) -> EpochRecord {
        EpochRecord {
            loss,
            accuracy: 0.5,
            precision: 0.5,
            recall: 0.5,
            val_loss,
            val_accuracy: 0.5,
            val_precision: 0.5,
            val_recall: 0.5,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_record_keeps_sequences_aligned() {
        let mut history = TrainingHistory::new();
        history.record(&epoch(0.7, 0.8));
        history.record(&epoch(0.6, 0.5));
        history.record(&epoch(0.5, 0.6));

        assert_eq!(history.epochs_run(), 3);
        assert_eq!(history.accuracy.len(), 3);
        assert_eq!(history.val_accuracy.len(), 3);
        assert_eq!(history.learning_rate.len(), 3);
        assert!(history.validate().is_ok());
        assert_eq!(history.best_val_loss(), Some((1, 0.5)));
        assert_eq!(history.last().unwrap().val_loss, 0.6);
    }

    #[test]
    fn test_validate_detects_mismatch() {
        let mut history = TrainingHistory::new();
        history.record(&epoch(0.7, 0.8));
        history.val_loss.push(0.1);
        assert!(history.validate().unwrap_err().contains("val_loss"));
    }

    #[test]
    fn test_accepts_four_key_json() {
        let json = r#"{"loss":[0.5],"accuracy":[0.8],"val_loss":[0.6],"val_accuracy":[0.7]}"#;
        let history: TrainingHistory = serde_json::from_str(json).unwrap();

        assert_eq!(history.epochs_run(), 1);
        assert!(history.precision.is_empty());
        assert!(history.validate().is_ok());
    }

    #[test]
    fn test_empty_history() {
        let history = TrainingHistory::new();
        assert!(history.is_empty());
        assert!(history.last().is_none());
        assert!(history.best_val_loss().is_none());
    }
}
