//! Application configuration
//!
//! JSON-serializable settings for training runs and artifact locations. The
//! network architecture itself lives in [`SignageClassifierConfig`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::cnn::SignageClassifierConfig;
use crate::utils::error::{Result, ResultExt, SignageError};

/// Hyperparameters and control settings for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of epochs
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Fraction of samples held out (as a suffix) for validation
    pub validation_split: f64,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    /// Adam epsilon
    pub adam_epsilon: f32,
    /// Number of samples requested from the data source
    pub num_samples: usize,

    /// Epochs without val_loss improvement before stopping
    pub early_stopping_patience: usize,
    /// Minimum val_loss decrease counted as improvement by early stopping
    pub early_stopping_min_delta: f64,
    /// Restore the best epoch's weights when stopping early
    pub restore_best_weights: bool,

    /// Epochs without val_loss improvement before the learning rate is reduced
    pub lr_patience: usize,
    /// Multiplicative factor applied on each reduction
    pub lr_factor: f64,
    /// Learning rate floor
    pub min_lr: f64,
    /// Minimum val_loss decrease counted as improvement by the LR schedule
    pub lr_min_delta: f64,

    /// Seed for data generation, shuffling and augmentation
    pub seed: u64,
    /// Abort the run once this many seconds have elapsed (checked between epochs)
    pub deadline_secs: Option<u64>,
    /// Training-time augmentation
    pub augmentation: AugmentationConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            learning_rate: 1e-3,
            adam_epsilon: 1e-7,
            num_samples: 2000,
            early_stopping_patience: 10,
            early_stopping_min_delta: 0.0,
            restore_best_weights: true,
            lr_patience: 5,
            lr_factor: 0.5,
            min_lr: 1e-7,
            lr_min_delta: 1e-4,
            seed: 42,
            deadline_secs: None,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Small run for smoke tests and demos
    pub fn quick() -> Self {
        Self::default().with_quick_sizes()
    }

    /// Shrink run length and dataset size, keeping every other setting
    pub fn with_quick_sizes(self) -> Self {
        Self {
            epochs: 3,
            batch_size: 8,
            num_samples: 32,
            early_stopping_patience: 2,
            lr_patience: 1,
            ..self
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.epochs == 0 {
            return Err("epochs must be > 0".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".into());
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(format!(
                "validation_split must be in (0, 1), got {}",
                self.validation_split
            ));
        }
        if self.num_samples < 2 {
            return Err("num_samples must be at least 2".into());
        }
        if self.learning_rate <= 0.0 {
            return Err("learning_rate must be > 0".into());
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(format!("lr_factor must be in (0, 1), got {}", self.lr_factor));
        }
        if self.min_lr < 0.0 {
            return Err("min_lr must be >= 0".into());
        }
        self.augmentation.validate()
    }
}

/// Locations of the persisted model and history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub model_path: PathBuf,
    pub history_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/signage_classifier.mpk"),
            history_path: PathBuf::from("models/training_history.json"),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: SignageClassifierConfig,
    pub training: TrainingConfig,
    pub store: StoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: SignageClassifierConfig::new(),
            training: TrainingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.model
            .validate()
            .and_then(|_| self.training.validate())
            .map_err(SignageError::Config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).persistence(path)
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).persistence(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SignageError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.num_samples, 2000);
        assert!((config.validation_split - 0.2).abs() < 1e-12);
        assert!(config.validate().is_ok());
        assert!(TrainingConfig::quick().validate().is_ok());
    }

    #[test]
    fn test_quick_sizes_keep_other_settings() {
        let loaded = TrainingConfig {
            seed: 7,
            deadline_secs: Some(120),
            learning_rate: 5e-4,
            validation_split: 0.3,
            ..TrainingConfig::default()
        };
        let quick = loaded.with_quick_sizes();

        assert_eq!(quick.epochs, 3);
        assert_eq!(quick.batch_size, 8);
        assert_eq!(quick.num_samples, 32);
        assert_eq!(quick.seed, 7);
        assert_eq!(quick.deadline_secs, Some(120));
        assert!((quick.learning_rate - 5e-4).abs() < 1e-12);
        assert!((quick.validation_split - 0.3).abs() < 1e-12);
        assert!(quick.validate().is_ok());
    }

    #[test]
    fn test_invalid_split_rejected() {
        let config = TrainingConfig {
            validation_split: 1.0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("validation_split"));
    }

    #[test]
    fn test_default_paths() {
        let store = StoreConfig::default();
        assert_eq!(store.model_path, PathBuf::from("models/signage_classifier.mpk"));
        assert_eq!(store.history_path, PathBuf::from("models/training_history.json"));
    }

    #[test]
    fn test_app_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("urban_guard.json");

        let mut config = AppConfig::default();
        config.training.epochs = 7;
        config.model.base_filters = 16;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.epochs, 7);
        assert_eq!(loaded.model.base_filters, 16);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");

        let mut config = AppConfig::default();
        config.training.batch_size = 0;
        config.save(&path).unwrap();

        assert!(matches!(AppConfig::load(&path), Err(SignageError::Config(_))));
    }
}
