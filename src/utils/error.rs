//! Error Handling Module
//!
//! Error taxonomy for generation, training, persistence and prediction.
//! Uses thiserror for ergonomic error definitions.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for signage classification operations
#[derive(Error, Debug)]
pub enum SignageError {
    /// Synthetic (or future real) data could not be produced
    #[error("Data generation error: {0}")]
    DataGeneration(String),

    /// The network could not be constructed from its configuration
    #[error("Model build error: {0}")]
    ModelBuild(String),

    /// Error during fitting
    #[error("Training error: {0}")]
    Training(String),

    /// The cancellation signal was raised between epochs
    #[error("Training cancelled after {epochs_completed} epoch(s)")]
    Cancelled { epochs_completed: usize },

    /// The training deadline elapsed between epochs
    #[error("Training deadline of {deadline_secs}s exceeded after {epochs_completed} epoch(s)")]
    DeadlineExceeded {
        deadline_secs: u64,
        epochs_completed: usize,
    },

    /// Reading or writing a stored artifact failed
    #[error("Persistence error at '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Preprocessing or inference failed
    #[error("Prediction error: {0}")]
    Prediction(String),

    /// Bytes could not be decoded as an image
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Error loading an image from disk
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SignageError {
    /// Build a persistence error for the given path
    pub fn persistence(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether this error ended a training run on request rather than by failure
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
}

/// Convenience Result type for signage classification operations
pub type Result<T> = std::result::Result<T, SignageError>;

/// Extension trait for tagging foreign errors with the stage they occurred in
pub trait ResultExt<T> {
    /// Map the error to a persistence error at `path`
    fn persistence(self, path: impl AsRef<Path>) -> Result<T>;

    /// Map the error to a training error with a message prefix
    fn during_training(self, msg: &str) -> Result<T>;

    /// Map the error to a prediction error with a message prefix
    fn during_prediction(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    fn persistence(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| SignageError::persistence(path, format!("{:?}", e)))
    }

    fn during_training(self, msg: &str) -> Result<T> {
        self.map_err(|e| SignageError::Training(format!("{}: {:?}", msg, e)))
    }

    fn during_prediction(self, msg: &str) -> Result<T> {
        self.map_err(|e| SignageError::Prediction(format!("{}: {:?}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SignageError::DataGeneration("zero samples".to_string());
        assert_eq!(format!("{}", err), "Data generation error: zero samples");
    }

    #[test]
    fn test_persistence_error_names_path() {
        let err = SignageError::persistence("models/signage_classifier.mpk", "disk full");
        let msg = err.to_string();
        assert!(msg.contains("signage_classifier.mpk"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_interruptions() {
        assert!(SignageError::Cancelled { epochs_completed: 2 }.is_interruption());
        assert!(SignageError::DeadlineExceeded {
            deadline_secs: 10,
            epochs_completed: 1
        }
        .is_interruption());
        assert!(!SignageError::Training("nan loss".into()).is_interruption());
    }

    #[test]
    fn test_result_ext_persistence() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));

        match result.persistence("/tmp/x.json") {
            Err(SignageError::Persistence { path, .. }) => {
                assert_eq!(path, PathBuf::from("/tmp/x.json"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_result_ext_prediction() {
        let result: std::result::Result<i32, &str> = Err("bad shape");
        let err = result.during_prediction("reading output").unwrap_err();
        assert!(err.to_string().contains("reading output"));
    }
}
