//! Training module
//!
//! - `trainer`: full training runs (generate, split, fit, persist)
//! - `callbacks`: early stopping and learning-rate reduction on plateau
//! - `control`: cancellation and deadlines checked between epochs
//! - `history`: per-epoch metrics persisted next to the model

pub mod callbacks;
pub mod control;
pub mod history;
pub mod trainer;

pub use crate::config::TrainingConfig;
pub use callbacks::{CallbackAction, EarlyStopping, EpochState, ReduceLrOnPlateau, TrainingCallback};
pub use control::TrainingControl;
pub use history::{EpochRecord, TrainingHistory};
pub use trainer::{evaluate, EvalSummary, Trainer, TrainingOutcome};
