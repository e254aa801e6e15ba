//! Training orchestration
//!
//! A run generates a fresh dataset, holds out a validation suffix, fits a
//! newly built classifier with Adam under early stopping and learning-rate
//! reduction, and finally persists the model and its history. Nothing is
//! written unless the run completes.

use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::{AppConfig, TrainingConfig};
use crate::dataset::{
    AugmentationConfig, AugmentingBatcher, DataSource, SignageBatcher, SignageDataset,
    SignageItem, SignageLabel, SyntheticGenerator,
};
use crate::model::cnn::{build, ArchitectureVariant, SignageClassifier, SignageClassifierConfig};
use crate::model::store::ModelStore;
use crate::training::callbacks::{
    CallbackAction, EarlyStopping, EpochState, ReduceLrOnPlateau, TrainingCallback,
};
use crate::training::control::TrainingControl;
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::error::{Result, ResultExt, SignageError};
use crate::utils::format_duration;
use crate::utils::metrics::{BinaryMetrics, RunningAverage};

/// A fitted model (on the inference backend) and the history that produced it
#[derive(Debug)]
pub struct TrainingOutcome<B: Backend> {
    pub model: SignageClassifier<B>,
    pub history: TrainingHistory,
}

/// Loss and confusion counts over one pass of a dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalSummary {
    pub loss: f64,
    pub metrics: BinaryMetrics,
}

/// Runs training for one model storage location
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    model_config: SignageClassifierConfig,
    store: ModelStore,
    source: Arc<dyn DataSource>,
    control: TrainingControl,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Trainer over a seeded synthetic data source
    pub fn new(
        config: TrainingConfig,
        model_config: SignageClassifierConfig,
        store: ModelStore,
        device: B::Device,
    ) -> Self {
        let control = TrainingControl::for_training(&config);

        Self {
            source: Arc::new(SyntheticGenerator::seeded(config.seed)),
            config,
            model_config,
            store,
            control,
            callbacks: Vec::new(),
            device,
        }
    }

    pub fn from_config(config: &AppConfig, device: B::Device) -> Self {
        Self::new(
            config.training.clone(),
            config.model.clone(),
            ModelStore::from_config(&config.store),
            device,
        )
    }

    /// Replace the data source
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the cancellation/deadline control
    ///
    /// A control without a deadline picks up `deadline_secs` from the config.
    pub fn with_control(mut self, control: TrainingControl) -> Self {
        self.control = control.or_deadline_secs(self.config.deadline_secs);
        self
    }

    /// Add a callback that runs after the built-in ones every epoch
    pub fn with_callback(mut self, callback: Box<dyn TrainingCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model_config(&self) -> &SignageClassifierConfig {
        &self.model_config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Handle that can cancel this trainer's runs
    pub fn control(&self) -> TrainingControl {
        self.control.clone()
    }

    /// Fit, persist the result, and return the history
    pub fn train(&mut self, epochs: usize, validation_split: f64) -> Result<TrainingHistory> {
        self.run(epochs, validation_split).map(|outcome| outcome.history)
    }

    /// Fit and persist, returning the fitted model as well
    pub fn run(
        &mut self,
        epochs: usize,
        validation_split: f64,
    ) -> Result<TrainingOutcome<B::InnerBackend>> {
        let outcome = self.fit(epochs, validation_split)?;
        self.store
            .save(&outcome.model, &self.model_config, &outcome.history)?;
        Ok(outcome)
    }

    /// Fit a fresh model without persisting anything
    pub fn fit(
        &mut self,
        epochs: usize,
        validation_split: f64,
    ) -> Result<TrainingOutcome<B::InnerBackend>> {
        let started = Instant::now();
        let config = TrainingConfig {
            epochs,
            validation_split,
            ..self.config.clone()
        };
        config.validate().map_err(SignageError::Config)?;
        self.control.check(started, 0)?;

        let dataset = self.source.generate(config.num_samples)?;
        let (train_set, val_set) = dataset.split_validation(validation_split)?;

        let mut model = build::<B>(&self.model_config, &self.device)?;
        let mut optimizer = AdamConfig::new()
            .with_epsilon(config.adam_epsilon)
            .init();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&self.device);

        let augmentation = match self.model_config.variant {
            ArchitectureVariant::Standard => config.augmentation.clone(),
            ArchitectureVariant::Compact => AugmentationConfig::none(),
        };
        let train_batcher = AugmentingBatcher::<B>::new(augmentation, config.seed);

        let mut early_stopping =
            EarlyStopping::new(config.early_stopping_patience, config.early_stopping_min_delta);
        let mut plateau = ReduceLrOnPlateau::new(
            config.lr_factor,
            config.lr_patience,
            config.min_lr,
            config.lr_min_delta,
        );

        info!(
            "Training on {} samples from '{}' ({} train / {} validation), up to {} epochs",
            config.num_samples,
            self.source.name(),
            train_set.len(),
            val_set.len(),
            epochs
        );
        info!(
            "Model: {:?} variant, {} parameters",
            self.model_config.variant,
            model.num_params()
        );

        let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut learning_rate = config.learning_rate;
        let mut history = TrainingHistory::new();
        history.epochs_requested = epochs;
        let mut best_model: Option<SignageClassifier<B::InnerBackend>> = None;
        let mut stopped_by_early_stopping = false;

        for epoch in 0..epochs {
            let mut indices: Vec<usize> = (0..train_set.len()).collect();
            indices.shuffle(&mut epoch_rng);

            let mut epoch_loss = RunningAverage::new();
            let mut train_metrics = BinaryMetrics::new();

            for (batch_idx, chunk) in indices.chunks(config.batch_size).enumerate() {
                let items: Vec<SignageItem> =
                    chunk.iter().filter_map(|&i| train_set.get(i)).collect();
                if items.is_empty() {
                    continue;
                }

                let batch = train_batcher.batch(items, &self.device);
                let batch_size = batch.labels.len();

                let logits = model.forward(batch.images).reshape([batch_size]);
                let loss = loss_fn.forward(logits.clone(), batch.targets);

                let loss_value: f64 = loss.clone().into_scalar().elem();
                if !loss_value.is_finite() {
                    return Err(SignageError::Training(format!(
                        "non-finite loss {} at epoch {}, batch {}",
                        loss_value,
                        epoch + 1,
                        batch_idx + 1
                    )));
                }
                epoch_loss.add_weighted(loss_value, batch_size as f64);

                let probabilities = sigmoid(logits.inner())
                    .into_data()
                    .to_vec::<f32>()
                    .during_training("reading batch probabilities")?;
                train_metrics.add_batch(&decisions(&probabilities), &batch.labels);

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(learning_rate, model, grads);

                debug!(
                    "Epoch {} batch {}: loss = {:.4}",
                    epoch + 1,
                    batch_idx + 1,
                    loss_value
                );
            }

            let inner = model.valid();
            let val = evaluate(&inner, &val_set, config.batch_size, &self.device)?;

            let record = EpochRecord {
                loss: epoch_loss.average(),
                accuracy: train_metrics.accuracy(),
                precision: train_metrics.precision(),
                recall: train_metrics.recall(),
                val_loss: val.loss,
                val_accuracy: val.metrics.accuracy(),
                val_precision: val.metrics.precision(),
                val_recall: val.metrics.recall(),
                learning_rate,
            };
            history.record(&record);

            info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - lr: {:.2e}",
                epoch + 1,
                epochs,
                record.loss,
                record.accuracy,
                record.val_loss,
                record.val_accuracy,
                learning_rate
            );

            let mut state = EpochState {
                epoch,
                train_loss: record.loss,
                val_loss: record.val_loss,
                learning_rate,
            };

            let mut stop = early_stopping.on_epoch_end(&mut state) == CallbackAction::Stop;
            stopped_by_early_stopping = stop;
            if early_stopping.improved() && config.restore_best_weights {
                best_model = Some(inner);
            }

            plateau.on_epoch_end(&mut state);
            for callback in self.callbacks.iter_mut() {
                if callback.on_epoch_end(&mut state) == CallbackAction::Stop {
                    info!("Callback '{}' requested stop", callback.name());
                    stop = true;
                }
            }
            learning_rate = state.learning_rate;

            self.control.check(started, epoch + 1)?;

            if stop {
                history.stopped_early = true;
                break;
            }
        }

        history.best_epoch = early_stopping.best_epoch();
        history.completed_at = Some(chrono::Local::now().to_rfc3339());

        let model = match best_model {
            Some(best) if stopped_by_early_stopping => {
                info!(
                    "Restoring weights from epoch {}",
                    history.best_epoch.map(|e| e + 1).unwrap_or(0)
                );
                best
            }
            _ => model.valid(),
        };

        if let Some(last) = history.last() {
            info!(
                "Training finished in {} after {} epoch(s): accuracy {:.4}, val_accuracy {:.4}, val_loss {:.4}",
                format_duration(started.elapsed().as_secs_f64()),
                history.epochs_run(),
                last.accuracy,
                last.val_accuracy,
                last.val_loss
            );
        }

        Ok(TrainingOutcome { model, history })
    }
}

/// Threshold probabilities into 0/1 decisions
fn decisions(probabilities: &[f32]) -> Vec<u8> {
    probabilities
        .iter()
        .map(|&p| SignageLabel::from_probability(p).as_u8())
        .collect()
}

/// Mean binary cross-entropy and confusion counts of `model` over `dataset`
pub fn evaluate<B: Backend>(
    model: &SignageClassifier<B>,
    dataset: &SignageDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvalSummary> {
    let batcher = SignageBatcher::<B>::new();
    let loss_fn: BinaryCrossEntropyLoss<B> = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(device);

    let mut loss = RunningAverage::new();
    let mut metrics = BinaryMetrics::new();
    let len = dataset.len();

    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let items: Vec<SignageItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch = batcher.batch(items, device);
        let n = batch.labels.len();
        let logits: Tensor<B, 1> = model.forward(batch.images).reshape([n]);

        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem();
        loss.add_weighted(batch_loss, n as f64);

        let probabilities = sigmoid(logits)
            .into_data()
            .to_vec::<f32>()
            .during_training("reading validation probabilities")?;
        metrics.add_batch(&decisions(&probabilities), &batch.labels);
    }

    Ok(EvalSummary {
        loss: loss.average(),
        metrics,
    })
}
