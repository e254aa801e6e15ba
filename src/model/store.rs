//! Model Store
//!
//! Durable storage for the current model and its training history. Each
//! artifact is written to a staging file in the destination directory and then
//! renamed into place, while an exclusive lock file serializes writers.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::model::cnn::{SignageClassifier, SignageClassifierConfig};
use crate::training::history::TrainingHistory;
use crate::utils::error::{Result, ResultExt, SignageError};

/// Weights are stored at full precision so a reload predicts identically
pub type StoreRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const WEIGHTS_EXTENSION: &str = "mpk";

/// A model read back from the store together with the config that built it
#[derive(Debug)]
pub struct StoredModel<B: Backend> {
    pub model: SignageClassifier<B>,
    pub config: SignageClassifierConfig,
}

/// File-backed store for one model path and one history path
#[derive(Debug, Clone)]
pub struct ModelStore {
    model_path: PathBuf,
    history_path: PathBuf,
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl ModelStore {
    pub fn new(model_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            history_path: history_path.into(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.model_path, &config.history_path)
    }

    /// Store rooted in `dir` with the default file names
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let defaults = StoreConfig::default();
        let file_name = |p: &Path| p.file_name().map(PathBuf::from).unwrap_or_default();
        Self::new(
            dir.as_ref().join(file_name(&defaults.model_path)),
            dir.as_ref().join(file_name(&defaults.history_path)),
        )
    }

    /// Path of the weights file (always carries the recorder's extension)
    pub fn model_path(&self) -> PathBuf {
        self.model_path.with_extension(WEIGHTS_EXTENSION)
    }

    /// Path of the architecture config stored beside the weights
    pub fn config_path(&self) -> PathBuf {
        self.model_path.with_extension("json")
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Whether a weights artifact is present
    pub fn exists(&self) -> bool {
        self.model_path().is_file()
    }

    /// Persist `model`, its config and `history`, replacing any previous artifacts
    pub fn save<B: Backend>(
        &self,
        model: &SignageClassifier<B>,
        config: &SignageClassifierConfig,
        history: &TrainingHistory,
    ) -> Result<()> {
        let weights_path = self.model_path();
        let _lock = StoreLock::exclusive(&weights_path)?;

        let staging = staging_path(&weights_path);
        model
            .clone()
            .save_file(&staging, &StoreRecorder::new())
            .persistence(&weights_path)?;
        let staged = staging.with_extension(WEIGHTS_EXTENSION);
        fs::rename(&staged, &weights_path).persistence(&weights_path)?;
        debug!("Weights written to {:?}", weights_path);

        let config_json = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_path(), &config_json)?;

        write_atomic(&self.history_path, &serde_json::to_vec_pretty(history)?)?;

        info!(
            "Saved model to {:?} and history to {:?} ({} epochs)",
            weights_path,
            self.history_path,
            history.epochs_run()
        );
        Ok(())
    }

    /// Load the stored model, or `Ok(None)` when no weights file exists
    ///
    /// A missing config file falls back to the default architecture; any other
    /// read or decode failure is returned as a persistence error.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<Option<StoredModel<B>>> {
        let weights_path = self.model_path();
        if !weights_path.is_file() {
            debug!("No model artifact at {:?}", weights_path);
            return Ok(None);
        }

        let _lock = StoreLock::shared(&weights_path)?;

        let config_path = self.config_path();
        let config = if config_path.is_file() {
            let bytes = fs::read(&config_path).persistence(&config_path)?;
            serde_json::from_slice(&bytes).persistence(&config_path)?
        } else {
            warn!(
                "No architecture config at {:?}, assuming the default network",
                config_path
            );
            SignageClassifierConfig::new()
        };

        let model = SignageClassifier::new(&config, device)
            .load_file(&weights_path, &StoreRecorder::new(), device)
            .persistence(&weights_path)?;

        info!("Loaded model from {:?}", weights_path);
        Ok(Some(StoredModel { model, config }))
    }

    /// Persist only the training history
    pub fn save_history(&self, history: &TrainingHistory) -> Result<()> {
        let _lock = StoreLock::exclusive(&self.model_path())?;
        write_atomic(&self.history_path, &serde_json::to_vec_pretty(history)?)
    }

    /// Read the training history, or `Ok(None)` when none was written
    pub fn load_history(&self) -> Result<Option<TrainingHistory>> {
        if !self.history_path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&self.history_path).persistence(&self.history_path)?;
        let history: TrainingHistory =
            serde_json::from_slice(&bytes).persistence(&self.history_path)?;
        history
            .validate()
            .map_err(|reason| SignageError::persistence(&self.history_path, reason))?;
        Ok(Some(history))
    }
}

/// Advisory lock on `<dir>/.<stem>.lock`, released on drop
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn open(target: &Path) -> Result<File> {
        let dir = parent_dir(target);
        fs::create_dir_all(&dir).persistence(&dir)?;

        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let lock_path = dir.join(format!(".{}.lock", stem));

        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .persistence(&lock_path)
    }

    fn exclusive(target: &Path) -> Result<Self> {
        let file = Self::open(target)?;
        file.lock_exclusive().persistence(target)?;
        Ok(Self { file })
    }

    fn shared(target: &Path) -> Result<Self> {
        let file = Self::open(target)?;
        file.lock_shared().persistence(target)?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release model store lock: {}", e);
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_dir(path).join(format!("{}-staging", stem))
}

/// Write `bytes` next to `path` and rename over it
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).persistence(&dir)?;

    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(".{}.staging", file_name));

    fs::write(&staging, bytes).persistence(path)?;
    fs::rename(&staging, path).persistence(path)?;
    Ok(())
}
