//! Model module: classifier architecture and persistence

pub mod cnn;
pub mod store;

pub use cnn::{build, ArchitectureVariant, SignageClassifier, SignageClassifierConfig};
pub use store::{ModelStore, StoredModel};
