//! Cooperative cancellation and deadlines for training runs
//!
//! The trainer polls its control between epochs. A triggered control makes the
//! run return before anything is persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TrainingConfig;
use crate::utils::error::{Result, SignageError};

/// Cancel flag plus an optional wall-clock budget
///
/// Clones share the cancel flag, so one clone can be handed to the trainer and
/// another kept by whoever may want to stop it.
#[derive(Debug, Clone, Default)]
pub struct TrainingControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Duration>,
}

impl TrainingControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control carrying the deadline configured in `config`, if any
    pub fn for_training(config: &TrainingConfig) -> Self {
        Self::new().or_deadline_secs(config.deadline_secs)
    }

    /// Use `secs` as the deadline unless one is already set
    pub fn or_deadline_secs(self, secs: Option<u64>) -> Self {
        match (self.deadline, secs) {
            (None, Some(secs)) => self.with_deadline(Duration::from_secs(secs)),
            _ => self,
        }
    }

    /// Abort runs that take longer than `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Request cancellation; takes effect at the next epoch boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the control can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Fail if the run was cancelled or has outlived its deadline
    pub fn check(&self, started: Instant, epochs_completed: usize) -> Result<()> {
        if self.is_cancelled() {
            return Err(SignageError::Cancelled { epochs_completed });
        }
        if let Some(deadline) = self.deadline {
            if started.elapsed() >= deadline {
                return Err(SignageError::DeadlineExceeded {
                    deadline_secs: deadline.as_secs(),
                    epochs_completed,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_control_passes() {
        let control = TrainingControl::new();
        assert!(control.check(Instant::now(), 0).is_ok());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let control = TrainingControl::new();
        let handle = control.clone();
        handle.cancel();

        match control.check(Instant::now(), 3) {
            Err(SignageError::Cancelled { epochs_completed }) => assert_eq!(epochs_completed, 3),
            other => panic!("expected cancellation, got {:?}", other),
        }

        control.reset();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_zero_deadline_expires() {
        let control = TrainingControl::new().with_deadline(Duration::ZERO);
        assert!(matches!(
            control.check(Instant::now(), 1),
            Err(SignageError::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn test_configured_deadline_is_kept() {
        let config = TrainingConfig {
            deadline_secs: Some(30),
            ..TrainingConfig::default()
        };
        assert_eq!(
            TrainingControl::for_training(&config).deadline(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            TrainingControl::for_training(&TrainingConfig::default()).deadline(),
            None
        );

        let explicit = TrainingControl::new().with_deadline(Duration::from_secs(5));
        let handle = explicit.clone();
        let merged = explicit.or_deadline_secs(Some(30));
        assert_eq!(merged.deadline(), Some(Duration::from_secs(5)));

        // the cancel flag survives the merge
        handle.cancel();
        assert!(merged.is_cancelled());
    }

    #[test]
    fn test_long_deadline_passes() {
        let control = TrainingControl::new().with_deadline(Duration::from_secs(3600));
        assert!(control.check(Instant::now(), 0).is_ok());
    }
}
