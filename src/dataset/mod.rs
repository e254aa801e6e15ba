//! Dataset module: labels, data sources and Burn integration
//!
//! Training data comes from a [`DataSource`]. The only implementation shipped
//! today is [`SyntheticGenerator`], which paints class-specific markers onto
//! random noise; a loader for real photographs can implement the same trait.

pub mod augmentation;
pub mod burn_dataset;
pub mod synthetic;

use serde::{Deserialize, Serialize};

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{
    AugmentingBatcher, SignageBatch, SignageBatcher, SignageDataset, SignageItem,
};
pub use synthetic::SyntheticGenerator;

use crate::utils::error::Result;

/// The two output classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignageLabel {
    Unauthorized = 0,
    Authorized = 1,
}

impl SignageLabel {
    /// Integer label used for training targets
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map 0/1 to a label; any non-zero value is authorized
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Unauthorized
        } else {
            Self::Authorized
        }
    }

    /// Label a raw probability of the authorized class
    pub fn from_probability(p: f32) -> Self {
        if p > crate::DECISION_THRESHOLD {
            Self::Authorized
        } else {
            Self::Unauthorized
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Authorized => "authorized",
        }
    }
}

impl std::fmt::Display for SignageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can produce a labeled training set on demand
pub trait DataSource: Send + Sync {
    /// Produce `num_samples` index-aligned images and labels
    fn generate(&self, num_samples: usize) -> Result<SignageDataset>;

    /// Short name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_values() {
        assert_eq!(SignageLabel::Authorized.as_u8(), 1);
        assert_eq!(SignageLabel::Unauthorized.as_u8(), 0);
        assert_eq!(SignageLabel::from_u8(1), SignageLabel::Authorized);
        assert_eq!(SignageLabel::from_u8(0), SignageLabel::Unauthorized);
    }

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(SignageLabel::from_probability(0.5), SignageLabel::Unauthorized);
        assert_eq!(SignageLabel::from_probability(0.5001), SignageLabel::Authorized);
        assert_eq!(SignageLabel::from_probability(0.0), SignageLabel::Unauthorized);
    }

    #[test]
    fn test_label_serializes_lowercase() {
        let json = serde_json::to_string(&SignageLabel::Authorized).unwrap();
        assert_eq!(json, "\"authorized\"");
        assert_eq!(SignageLabel::Unauthorized.to_string(), "unauthorized");
    }
}
