//! Inference module: the lazily initialized predictor and its result type

pub mod predictor;

pub use predictor::{preprocess, PredictionLabel, PredictionResult, Predictor};
