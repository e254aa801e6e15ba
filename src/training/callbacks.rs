//! Epoch-end training callbacks
//!
//! Both built-in callbacks watch validation loss: `ReduceLrOnPlateau` lowers
//! the learning rate after a short plateau and `EarlyStopping` ends the run
//! after a longer one.

use tracing::{debug, info};

/// What the training loop should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// State shared with callbacks at the end of each epoch
#[derive(Debug, Clone)]
pub struct EpochState {
    /// 0-based epoch index
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    /// Learning rate for the next epoch; callbacks may lower it
    pub learning_rate: f64,
}

/// Hook invoked by the trainer after every epoch
pub trait TrainingCallback: Send {
    fn on_epoch_end(&mut self, state: &mut EpochState) -> CallbackAction;

    fn name(&self) -> &str;
}

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

impl PlateauMode {
    fn initial(self) -> f64 {
        match self {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        }
    }

    fn improves(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            PlateauMode::Min => current < best - min_delta,
            PlateauMode::Max => current > best + min_delta,
        }
    }
}

/// Stop when validation loss has not improved for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    mode: PlateauMode,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    improved: bool,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        let mode = PlateauMode::Min;
        Self {
            patience,
            min_delta,
            mode,
            best: mode.initial(),
            best_epoch: None,
            wait: 0,
            improved: false,
            stopped_epoch: None,
        }
    }

    /// Whether the most recent epoch set a new best
    pub fn improved(&self) -> bool {
        self.improved
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl TrainingCallback for EarlyStopping {
    fn on_epoch_end(&mut self, state: &mut EpochState) -> CallbackAction {
        self.improved = self.mode.improves(state.val_loss, self.best, self.min_delta);

        if self.improved {
            self.best = state.val_loss;
            self.best_epoch = Some(state.epoch);
            self.wait = 0;
            return CallbackAction::Continue;
        }

        self.wait += 1;
        debug!(
            "EarlyStopping: no improvement for {}/{} epochs (best {:.4})",
            self.wait, self.patience, self.best
        );

        if self.wait >= self.patience && state.epoch > 0 {
            self.stopped_epoch = Some(state.epoch);
            info!(
                "Early stopping at epoch {}: val_loss has not improved since epoch {}",
                state.epoch + 1,
                self.best_epoch.map(|e| e + 1).unwrap_or(0)
            );
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }

    fn name(&self) -> &str {
        "early_stopping"
    }
}

/// Multiply the learning rate by `factor` when validation loss plateaus
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    mode: PlateauMode,
    best: f64,
    wait: usize,
    reductions: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64, min_delta: f64) -> Self {
        let mode = PlateauMode::Min;
        Self {
            factor,
            patience,
            min_lr,
            min_delta,
            mode,
            best: mode.initial(),
            wait: 0,
            reductions: 0,
        }
    }

    /// Number of reductions applied so far
    pub fn reductions(&self) -> usize {
        self.reductions
    }

    /// Epochs since the last improvement or reduction
    pub fn wait(&self) -> usize {
        self.wait
    }

    /// Feed one metric value; returns the learning rate to use next
    pub fn step(&mut self, metric: f64, current_lr: f64) -> f64 {
        if self.mode.improves(metric, self.best, self.min_delta) {
            self.best = metric;
            self.wait = 0;
            return current_lr;
        }

        self.wait += 1;
        if self.wait < self.patience {
            return current_lr;
        }

        // At the floor nothing is reduced, so the plateau keeps counting
        if current_lr <= self.min_lr {
            return current_lr;
        }

        self.wait = 0;
        let new_lr = (current_lr * self.factor).max(self.min_lr);
        self.reductions += 1;
        info!("Reducing learning rate to {:.3e}", new_lr);
        new_lr
    }
}

impl TrainingCallback for ReduceLrOnPlateau {
    fn on_epoch_end(&mut self, state: &mut EpochState) -> CallbackAction {
        state.learning_rate = self.step(state.val_loss, state.learning_rate);
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "reduce_lr_on_plateau"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(epoch: usize, val_loss: f64, lr: f64) -> EpochState {
        EpochState {
            epoch,
            train_loss: val_loss,
            val_loss,
            learning_rate: lr,
        }
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let mut es = EarlyStopping::new(3, 0.0);
        let losses = [1.0, 0.8, 0.9, 0.85, 0.81];
        let mut actions = Vec::new();

        for (epoch, &loss) in losses.iter().enumerate() {
            actions.push(es.on_epoch_end(&mut state(epoch, loss, 1e-3)));
        }

        assert_eq!(actions[3], CallbackAction::Continue);
        assert_eq!(actions[4], CallbackAction::Stop);
        assert_eq!(es.best_epoch(), Some(1));
        assert_eq!(es.stopped_epoch(), Some(4));
        assert!((es.best() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_early_stopping_improvement_resets_wait() {
        let mut es = EarlyStopping::new(2, 0.0);

        assert_eq!(es.on_epoch_end(&mut state(0, 1.0, 1e-3)), CallbackAction::Continue);
        assert!(es.improved());
        assert_eq!(es.on_epoch_end(&mut state(1, 1.1, 1e-3)), CallbackAction::Continue);
        assert!(!es.improved());
        assert_eq!(es.on_epoch_end(&mut state(2, 0.9, 1e-3)), CallbackAction::Continue);
        assert!(es.improved());
        assert_eq!(es.on_epoch_end(&mut state(3, 0.95, 1e-3)), CallbackAction::Continue);
        assert_eq!(es.on_epoch_end(&mut state(4, 0.95, 1e-3)), CallbackAction::Stop);
    }

    #[test]
    fn test_reduce_lr_halves_after_patience() {
        let mut plateau = ReduceLrOnPlateau::new(0.5, 2, 1e-7, 1e-4);
        let mut lr = 1e-3;

        lr = plateau.step(1.0, lr);
        assert_eq!(lr, 1e-3);
        lr = plateau.step(1.0, lr);
        assert_eq!(lr, 1e-3);
        lr = plateau.step(0.99995, lr); // below min_delta: still a plateau
        assert!((lr - 5e-4).abs() < 1e-12);
        assert_eq!(plateau.reductions(), 1);

        // wait resets after a reduction
        lr = plateau.step(1.0, lr);
        assert!((lr - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_lr_respects_floor() {
        let mut plateau = ReduceLrOnPlateau::new(0.5, 1, 1e-7, 1e-4);
        let mut lr = 1.5e-7;

        lr = plateau.step(1.0, lr); // first value is an improvement
        lr = plateau.step(1.0, lr);
        assert!((lr - 1e-7).abs() < 1e-15);
        lr = plateau.step(1.0, lr);
        assert!((lr - 1e-7).abs() < 1e-15);
        assert_eq!(plateau.reductions(), 1);
    }

    #[test]
    fn test_reduce_lr_wait_keeps_counting_at_floor() {
        let mut plateau = ReduceLrOnPlateau::new(0.5, 2, 1e-7, 1e-4);
        let lr = 1e-7;

        plateau.step(1.0, lr);
        assert_eq!(plateau.wait(), 0);
        for expected_wait in 1..=4 {
            assert_eq!(plateau.step(1.0, lr), lr);
            assert_eq!(plateau.wait(), expected_wait);
        }
        assert_eq!(plateau.reductions(), 0);

        // an actual reduction clears the counter
        let mut above_floor = ReduceLrOnPlateau::new(0.5, 1, 1e-7, 1e-4);
        above_floor.step(1.0, 1e-3);
        above_floor.step(1.0, 1e-3);
        assert_eq!(above_floor.wait(), 0);
        assert_eq!(above_floor.reductions(), 1);
    }

    #[test]
    fn test_callback_updates_state_lr() {
        let mut plateau = ReduceLrOnPlateau::new(0.5, 1, 1e-7, 0.0);
        let mut s = state(0, 1.0, 1e-3);
        plateau.on_epoch_end(&mut s);
        s.epoch = 1;
        assert_eq!(plateau.on_epoch_end(&mut s), CallbackAction::Continue);
        assert!((s.learning_rate - 5e-4).abs() < 1e-12);
        assert_eq!(plateau.name(), "reduce_lr_on_plateau");
    }
}
