//! Metrics Module for Binary Classification
//!
//! Confusion counts for the authorized (positive) vs. unauthorized (negative)
//! decision, plus a running average used for per-epoch loss.

use serde::{Deserialize, Serialize};

/// Confusion counts and derived scores for a binary classifier
///
/// The positive class is "authorized" (label 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl BinaryMetrics {
    /// Create an empty set of counts
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel prediction/label slices
    pub fn from_predictions(predictions: &[u8], labels: &[u8]) -> Self {
        let mut metrics = Self::new();
        metrics.add_batch(predictions, labels);
        metrics
    }

    /// Record a single decision
    pub fn add(&mut self, predicted: u8, actual: u8) {
        match (predicted != 0, actual != 0) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    /// Record a batch of decisions; extra elements of the longer slice are ignored
    pub fn add_batch(&mut self, predictions: &[u8], labels: &[u8]) {
        for (&pred, &actual) in predictions.iter().zip(labels.iter()) {
            self.add(pred, actual);
        }
    }

    /// Merge counts from another accumulator
    pub fn merge(&mut self, other: &BinaryMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.true_negatives += other.true_negatives;
        self.false_negatives += other.false_negatives;
    }

    /// Total number of recorded decisions
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// tp / (tp + fp), or 0 when nothing was predicted positive
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// tp / (tp + fn), or 0 when there are no positive labels
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for BinaryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc={:.4} precision={:.4} recall={:.4} (tp={} fp={} tn={} fn={})",
            self.accuracy(),
            self.precision(),
            self.recall(),
            self.true_positives,
            self.false_positives,
            self.true_negatives,
            self.false_negatives
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Sample-weighted running average, used for per-epoch loss
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    weight: f64,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value with unit weight
    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1.0);
    }

    /// Add a batch mean weighted by its number of samples
    pub fn add_weighted(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    pub fn average(&self) -> f64 {
        if self.weight > 0.0 {
            self.sum / self.weight
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.weight = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_metrics_counts() {
        // pred:   1 1 0 0 1 0
        // actual: 1 0 0 1 1 0
        let metrics = BinaryMetrics::from_predictions(&[1, 1, 0, 0, 1, 0], &[1, 0, 0, 1, 1, 0]);

        assert_eq!(metrics.true_positives, 2);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.true_negatives, 2);
        assert_eq!(metrics.false_negatives, 1);
        assert_eq!(metrics.total(), 6);
        assert!((metrics.accuracy() - 4.0 / 6.0).abs() < 1e-9);
        assert!((metrics.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.recall() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.f1() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_denominators_are_zero() {
        let metrics = BinaryMetrics::from_predictions(&[0, 0], &[0, 0]);
        assert_eq!(metrics.precision(), 0.0);
        assert_eq!(metrics.recall(), 0.0);
        assert_eq!(metrics.f1(), 0.0);
        assert_eq!(metrics.accuracy(), 1.0);
        assert_eq!(BinaryMetrics::new().accuracy(), 0.0);
    }

    #[test]
    fn test_merge() {
        let mut a = BinaryMetrics::from_predictions(&[1], &[1]);
        let b = BinaryMetrics::from_predictions(&[0, 1], &[1, 0]);
        a.merge(&b);
        assert_eq!(a.total(), 3);
        assert_eq!(a.false_negatives, 1);
        assert_eq!(a.false_positives, 1);
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();
        avg.add_weighted(1.0, 3.0);
        avg.add_weighted(3.0, 1.0);
        assert!((avg.average() - 1.5).abs() < 1e-9);

        avg.reset();
        assert_eq!(avg.average(), 0.0);
        avg.add(2.0);
        assert!((avg.average() - 2.0).abs() < 1e-9);
    }
}
