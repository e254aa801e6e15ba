//! Urban Guard: street signage compliance classification
//!
//! This crate decides from a photograph whether a piece of street or urban
//! signage looks "authorized" or "unauthorized", using a convolutional network
//! built with the Burn framework.
//!
//! ## Modules
//!
//! - `model`: Classifier architecture and the on-disk model store
//! - `dataset`: Synthetic signage generator, augmentation and Burn batching
//! - `training`: Training loop with early stopping and LR reduction on plateau
//! - `inference`: Lazily initialized predictor that formats results
//! - `utils`: Errors, logging and binary classification metrics
//!
//! ## Pipeline
//!
//! ```text
//! SyntheticGenerator -> Trainer -> ModelStore -> Predictor -> caller
//! ```
//!
//! The predictor loads the persisted model on first use and, when none exists,
//! trains one synchronously before answering.

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use config::AppConfig;
pub use dataset::{
    DataSource, SignageBatch, SignageBatcher, SignageDataset, SignageItem, SignageLabel,
    SyntheticGenerator,
};
pub use inference::{PredictionResult, Predictor};
pub use model::{ArchitectureVariant, ModelStore, SignageClassifier, SignageClassifierConfig};
pub use training::{Trainer, TrainingConfig, TrainingControl, TrainingHistory};
pub use utils::error::{Result, SignageError};

/// Side length of the square network input, in pixels
pub const IMAGE_SIZE: usize = 224;

/// Number of color channels fed to the network (RGB)
pub const NUM_CHANNELS: usize = 3;

/// Probabilities strictly above this value are classified as authorized
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
