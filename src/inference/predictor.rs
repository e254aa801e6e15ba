//! Inference Predictor Module
//!
//! The predictor owns the in-memory model for one store location. It loads the
//! stored model on first use (training one when none is usable), preprocesses
//! arbitrary images to the network input, and turns every failure into an
//! `"error"` result instead of propagating it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::tensor::{backend::AutodiffBackend, backend::Backend, Tensor, TensorData};
use image::{DynamicImage, ImageReader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{AppConfig, TrainingConfig};
use crate::dataset::burn_dataset::image_to_chw;
use crate::dataset::{DataSource, SignageLabel, SyntheticGenerator};
use crate::model::cnn::{SignageClassifier, SignageClassifierConfig};
use crate::model::store::ModelStore;
use crate::training::{Trainer, TrainingControl};
use crate::utils::error::{Result, ResultExt, SignageError};
use crate::{IMAGE_SIZE, NUM_CHANNELS};

/// Outcome label reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionLabel {
    Authorized,
    Unauthorized,
    Error,
}

impl From<SignageLabel> for PredictionLabel {
    fn from(label: SignageLabel) -> Self {
        match label {
            SignageLabel::Authorized => Self::Authorized,
            SignageLabel::Unauthorized => Self::Unauthorized,
        }
    }
}

impl PredictionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Unauthorized => "unauthorized",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: PredictionLabel,
    /// Probability mass of the predicted class; 0 for errors
    pub confidence: f32,
    /// Human-readable explanation
    pub message: String,
    /// Network output for the authorized class; 0 for errors
    pub raw_probability: f32,
}

impl PredictionResult {
    /// Build a result from the authorized-class probability
    pub fn from_probability(p: f32) -> Self {
        let label = SignageLabel::from_probability(p);
        let confidence = match label {
            SignageLabel::Authorized => p,
            SignageLabel::Unauthorized => 1.0 - p,
        };

        let message = match label {
            SignageLabel::Authorized => format!(
                "This signage appears to be properly authorized and compliant with regulations. \
                 The AI model detected official characteristics with {:.1}% confidence.",
                confidence * 100.0
            ),
            SignageLabel::Unauthorized => format!(
                "This signage may be unauthorized or non-compliant. The AI model detected \
                 irregular patterns suggesting it may require further review with {:.1}% confidence.",
                confidence * 100.0
            ),
        };

        Self {
            prediction: label.into(),
            confidence,
            message,
            raw_probability: p,
        }
    }

    /// The sentinel returned when anything in the prediction path fails
    pub fn error(description: impl std::fmt::Display) -> Self {
        Self {
            prediction: PredictionLabel::Error,
            confidence: 0.0,
            message: format!("Error processing image: {}", description),
            raw_probability: 0.0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.prediction == PredictionLabel::Error
    }
}

/// Convert any raster image into a single-element network batch
///
/// The image is forced to RGB (dropping alpha, expanding grayscale) and resized
/// to the network's input size.
pub fn preprocess<B: Backend>(image: &DynamicImage, device: &B::Device) -> Result<Tensor<B, 4>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SignageError::Prediction("image has zero width or height".into()));
    }

    let pixels = image_to_chw(&image.to_rgb8(), IMAGE_SIZE);
    Ok(Tensor::<B, 4>::from_floats(
        TensorData::new(pixels, [1, NUM_CHANNELS, IMAGE_SIZE, IMAGE_SIZE]),
        device,
    ))
}

/// Lazily initialized classifier service for one model store
pub struct Predictor<B: AutodiffBackend> {
    store: ModelStore,
    training: TrainingConfig,
    model_config: SignageClassifierConfig,
    source: Arc<dyn DataSource>,
    control: TrainingControl,
    device: B::Device,
    model: Mutex<Option<SignageClassifier<B::InnerBackend>>>,
    init_gate: Mutex<()>,
    training_runs: AtomicUsize,
}

impl<B: AutodiffBackend> Predictor<B> {
    pub fn new(
        store: ModelStore,
        training: TrainingConfig,
        model_config: SignageClassifierConfig,
        device: B::Device,
    ) -> Self {
        Self {
            source: Arc::new(SyntheticGenerator::seeded(training.seed)),
            control: TrainingControl::for_training(&training),
            store,
            training,
            model_config,
            device,
            model: Mutex::new(None),
            init_gate: Mutex::new(()),
            training_runs: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &AppConfig, device: B::Device) -> Self {
        Self::new(
            ModelStore::from_config(&config.store),
            config.training.clone(),
            config.model.clone(),
            device,
        )
    }

    /// Data source used if the predictor has to train
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = source;
        self
    }

    /// Control handed to any training run this predictor starts
    ///
    /// The configured `deadline_secs` still applies when `control` has no
    /// deadline of its own.
    pub fn with_control(mut self, control: TrainingControl) -> Self {
        self.control = control.or_deadline_secs(self.training.deadline_secs);
        self
    }

    /// Serve an already fitted model instead of loading one
    pub fn with_model(self, model: SignageClassifier<B::InnerBackend>) -> Self {
        *self.model.lock() = Some(model);
        self
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Whether a model is held in memory
    pub fn is_ready(&self) -> bool {
        self.model.lock().is_some()
    }

    /// Number of training runs this predictor has started
    pub fn training_runs(&self) -> usize {
        self.training_runs.load(Ordering::SeqCst)
    }

    /// Make a model available: load it from the store, or train one
    ///
    /// Concurrent callers wait on a single gate, so at most one of them loads
    /// or trains; the rest return once the model is in place. Training errors
    /// are returned; load errors are logged and treated as a missing model.
    pub fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _gate = self.init_gate.lock();
        if self.is_ready() {
            return Ok(());
        }

        let model = match self.store.load::<B::InnerBackend>(&self.device) {
            Ok(Some(stored)) => stored.model,
            Ok(None) => {
                info!("No pre-trained model found. Training new model...");
                self.train_model()?
            }
            Err(e) => {
                warn!("Stored model could not be loaded ({}). Training new model...", e);
                self.train_model()?
            }
        };

        *self.model.lock() = Some(model);
        Ok(())
    }

    /// Drop the in-memory model and initialize again
    pub fn reload(&self) -> Result<()> {
        {
            let _gate = self.init_gate.lock();
            *self.model.lock() = None;
        }
        self.initialize()
    }

    fn train_model(&self) -> Result<SignageClassifier<B::InnerBackend>> {
        self.training_runs.fetch_add(1, Ordering::SeqCst);

        let mut trainer = Trainer::<B>::new(
            self.training.clone(),
            self.model_config.clone(),
            self.store.clone(),
            self.device.clone(),
        )
        .with_source(self.source.clone())
        .with_control(self.control.clone());

        let outcome = trainer.run(self.training.epochs, self.training.validation_split)?;
        Ok(outcome.model)
    }

    /// Classify an image, propagating failures
    pub fn try_predict(&self, image: &DynamicImage) -> Result<PredictionResult> {
        self.initialize()?;

        let model = self
            .model
            .lock()
            .clone()
            .ok_or_else(|| SignageError::Prediction("no model available".into()))?;

        let input = preprocess::<B::InnerBackend>(image, &self.device)?;
        let probabilities = model
            .forward_probability(input)
            .into_data()
            .to_vec::<f32>()
            .during_prediction("reading model output")?;

        let p = probabilities
            .first()
            .copied()
            .ok_or_else(|| SignageError::Prediction("model returned no output".into()))?;
        if !p.is_finite() {
            return Err(SignageError::Prediction(format!("model returned {}", p)));
        }

        Ok(PredictionResult::from_probability(p.clamp(0.0, 1.0)))
    }

    /// Classify an image; never fails
    pub fn predict(&self, image: &DynamicImage) -> PredictionResult {
        self.contain(|| self.try_predict(image))
    }

    /// Decode `bytes` (any supported format) and classify them; never fails
    pub fn predict_bytes(&self, bytes: &[u8]) -> PredictionResult {
        self.contain(|| {
            let image = image::load_from_memory(bytes)
                .map_err(|e| SignageError::ImageDecode(e.to_string()))?;
            self.try_predict(&image)
        })
    }

    /// Read and classify an image file; never fails
    pub fn predict_file(&self, path: impl AsRef<Path>) -> PredictionResult {
        let path = path.as_ref();
        self.contain(|| {
            let image = ImageReader::open(path)
                .and_then(|reader| reader.with_guessed_format())
                .map_err(|e| SignageError::ImageLoad(path.to_path_buf(), e.to_string()))?
                .decode()
                .map_err(|e| SignageError::ImageLoad(path.to_path_buf(), e.to_string()))?;
            self.try_predict(&image)
        })
    }

    fn contain<F>(&self, f: F) -> PredictionResult
    where
        F: FnOnce() -> Result<PredictionResult>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Error during prediction: {}", e);
                PredictionResult::error(e)
            }
            Err(panic) => {
                let description = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "internal error".to_string());
                error!("Prediction panicked: {}", description);
                PredictionResult::error(description)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{GrayAlphaImage, LumaA, Rgb, RgbImage, RgbaImage};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_model() -> SignageClassifierConfig {
        SignageClassifierConfig::new()
            .with_base_filters(2)
            .with_dense1_units(8)
            .with_dense2_units(4)
    }

    fn quick_training() -> TrainingConfig {
        TrainingConfig {
            num_samples: 12,
            batch_size: 4,
            epochs: 2,
            validation_split: 0.25,
            ..TrainingConfig::quick()
        }
    }

    fn predictor(dir: &Path) -> Predictor<TestBackend> {
        Predictor::new(
            ModelStore::in_dir(dir),
            quick_training(),
            tiny_model(),
            Default::default(),
        )
    }

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(300, 180, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 77])
        }))
    }

    #[test]
    fn test_authorized_message() {
        let result = PredictionResult::from_probability(0.873);
        assert_eq!(result.prediction, PredictionLabel::Authorized);
        assert!((result.confidence - 0.873).abs() < 1e-6);
        assert_eq!(
            result.message,
            "This signage appears to be properly authorized and compliant with regulations. \
             The AI model detected official characteristics with 87.3% confidence."
        );
    }

    #[test]
    fn test_unauthorized_message() {
        let result = PredictionResult::from_probability(0.25);
        assert_eq!(result.prediction, PredictionLabel::Unauthorized);
        assert!((result.confidence - 0.75).abs() < 1e-6);
        assert_eq!(
            result.message,
            "This signage may be unauthorized or non-compliant. The AI model detected \
             irregular patterns suggesting it may require further review with 75.0% confidence."
        );
    }

    #[test]
    fn test_confidence_invariants() {
        for i in 0..=100 {
            let p = i as f32 / 100.0;
            let result = PredictionResult::from_probability(p);

            assert!((0.5..=1.0).contains(&result.confidence), "p = {}", p);
            assert_eq!(result.prediction == PredictionLabel::Authorized, p > 0.5);
            assert_eq!(result.raw_probability, p);
        }
    }

    #[test]
    fn test_error_sentinel_serialization() {
        let result = PredictionResult::error("boom");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["prediction"], "error");
        assert_eq!(json["confidence"], 0.0);
        assert_eq!(json["raw_probability"], 0.0);
        assert_eq!(json["message"], "Error processing image: boom");
    }

    #[test]
    fn test_preprocess_shapes_any_mode() {
        let device = Default::default();
        let gray = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(31, 17, LumaA([200, 10])));
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(500, 500));

        for image in [gray, rgba, sample_image()] {
            let tensor = preprocess::<NdArray>(&image, &device).unwrap();
            assert_eq!(tensor.dims(), [1, 3, IMAGE_SIZE, IMAGE_SIZE]);
        }

        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(preprocess::<NdArray>(&empty, &device).is_err());
    }

    #[test]
    fn test_corrupt_bytes_yield_error_result() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(dir.path());

        let result = predictor.predict_bytes(b"definitely not an image");

        assert!(result.is_error());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.raw_probability, 0.0);
        assert!(result.message.starts_with("Error processing image: "));
        assert_eq!(predictor.training_runs(), 0);
    }

    #[test]
    fn test_missing_file_yields_error_result() {
        let dir = TempDir::new().unwrap();
        let result = predictor(dir.path()).predict_file(dir.path().join("missing.png"));
        assert!(result.is_error());
        assert!(result.message.contains("missing.png"));
    }

    #[test]
    fn test_lazy_train_then_reuse() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(dir.path());
        assert!(!predictor.is_ready());

        let first = predictor.predict(&sample_image());
        assert!(!first.is_error(), "{}", first.message);
        assert_eq!(predictor.training_runs(), 1);
        assert!(predictor.store().exists());
        assert!(predictor.store().load_history().unwrap().is_some());

        let second = predictor.predict(&sample_image());
        assert_eq!(predictor.training_runs(), 1);
        assert_eq!(first.prediction, second.prediction);
        assert!((first.raw_probability - second.raw_probability).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_first_calls_train_once() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(dir.path());
        let image = sample_image();

        let results: Vec<PredictionResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|_| scope.spawn(|| predictor.predict(&image)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(predictor.training_runs(), 1);
        assert!(results.iter().all(|r| !r.is_error()));
    }

    #[test]
    fn test_round_trip_through_store() {
        let dir = TempDir::new().unwrap();
        let trained = predictor(dir.path());
        let image = sample_image();
        let before = trained.predict(&image);

        let reloaded = predictor(dir.path());
        reloaded.initialize().unwrap();
        let after = reloaded.predict(&image);

        assert_eq!(reloaded.training_runs(), 0);
        assert_eq!(before.prediction, after.prediction);
        assert!((before.raw_probability - after.raw_probability).abs() < 1e-5);
    }

    #[test]
    fn test_reload_reads_store() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(dir.path());
        predictor.initialize().unwrap();
        assert!(predictor.is_ready());

        predictor.reload().unwrap();
        assert!(predictor.is_ready());
        assert_eq!(predictor.training_runs(), 1);
    }

    #[test]
    fn test_unreadable_store_triggers_training() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::in_dir(dir.path());
        std::fs::write(store.model_path(), b"garbage").unwrap();

        let predictor = predictor(dir.path());
        predictor.initialize().unwrap();

        assert_eq!(predictor.training_runs(), 1);
        assert!(store.load::<NdArray>(&Default::default()).unwrap().is_some());
    }

    #[test]
    fn test_with_model_skips_initialization() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = tiny_model().init::<NdArray>(&device);
        let predictor = predictor(dir.path()).with_model(model);

        let result = predictor.predict(&sample_image());
        assert!(!result.is_error());
        assert!((0.0..=1.0).contains(&result.raw_probability));
        assert_eq!(predictor.training_runs(), 0);
        assert!(!predictor.store().exists());
    }

    #[test]
    fn test_lazy_training_honors_configured_deadline() {
        let dir = TempDir::new().unwrap();
        let training = TrainingConfig {
            deadline_secs: Some(0),
            ..quick_training()
        };
        let image = sample_image();

        let predictor = Predictor::<TestBackend>::new(
            ModelStore::in_dir(dir.path()),
            training.clone(),
            tiny_model(),
            Default::default(),
        );
        let result = predictor.predict(&image);

        assert!(result.is_error());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.raw_probability, 0.0);
        assert!(result.message.contains("deadline"));
        assert!(!predictor.is_ready());
        assert!(!predictor.store().exists());
        assert!(predictor.store().load_history().unwrap().is_none());

        // a caller-supplied control without a deadline keeps the configured one
        let with_control = Predictor::<TestBackend>::new(
            ModelStore::in_dir(dir.path()),
            training,
            tiny_model(),
            Default::default(),
        )
        .with_control(TrainingControl::new());
        assert!(with_control.predict(&image).is_error());
        assert!(!with_control.store().exists());
    }

    #[test]
    fn test_cancelled_training_surfaces_as_error_result() {
        let dir = TempDir::new().unwrap();
        let control = TrainingControl::new();
        control.cancel();
        let predictor = predictor(dir.path()).with_control(control);

        let result = predictor.predict(&sample_image());
        assert!(result.is_error());
        assert!(result.message.contains("cancelled"));
        assert!(!predictor.is_ready());
    }
}
