//! Patience-based early stopping

/// What the trainer should do after observing one validation loss
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopDecision {
    /// Strictly better than every previous loss; checkpoint now
    Improved,
    /// No improvement, patience not yet exhausted
    Continue { stale_epochs: usize },
    /// Patience exhausted; terminate the run
    Stop,
}

/// Trigger-counter state machine over validation losses
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    counter: usize,
    observed: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best_loss: f64::INFINITY,
            counter: 0,
            observed: 0,
        }
    }

    /// Feed the validation loss of the epoch that just finished
    ///
    /// Non-finite losses never count as an improvement.
    pub fn observe(&mut self, val_loss: f64) -> StopDecision {
        self.observed += 1;
        if val_loss.is_finite() && val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.counter = 0;
            return StopDecision::Improved;
        }

        self.counter += 1;
        if self.counter >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::Continue {
                stale_epochs: self.counter,
            }
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn observed(&self) -> usize {
        self.observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Number of observations consumed before the stopper says stop
    fn run(losses: impl IntoIterator<Item = f64>, patience: usize) -> (usize, bool) {
        let mut stopper = EarlyStopping::new(patience);
        for loss in losses {
            if stopper.observe(loss) == StopDecision::Stop {
                return (stopper.observed(), true);
            }
        }
        (stopper.observed(), false)
    }

    #[test]
    fn test_increasing_losses_stop_at_epoch_eleven() {
        let (epochs, stopped) = run((0..300).map(|i| 1.0 + i as f64), 10);

        assert!(stopped);
        assert_eq!(epochs, 11);
    }

    #[test]
    fn test_decreasing_losses_run_full_budget() {
        let (epochs, stopped) = run((0..300).map(|i| 1.0 / (1.0 + i as f64)), 10);

        assert!(!stopped);
        assert_eq!(epochs, 300);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut stopper = EarlyStopping::new(3);
        assert_eq!(stopper.observe(1.0), StopDecision::Improved);
        assert_eq!(stopper.observe(1.0), StopDecision::Continue { stale_epochs: 1 });
        assert_eq!(stopper.observe(2.0), StopDecision::Continue { stale_epochs: 2 });
        assert_eq!(stopper.observe(0.5), StopDecision::Improved);
        assert_eq!(stopper.observe(0.6), StopDecision::Continue { stale_epochs: 1 });
        assert_eq!(stopper.observe(0.6), StopDecision::Continue { stale_epochs: 2 });
        assert_eq!(stopper.observe(0.6), StopDecision::Stop);
        assert_eq!(stopper.best_loss(), 0.5);
    }

    #[test]
    fn test_nan_is_never_an_improvement() {
        let mut stopper = EarlyStopping::new(2);
        assert_eq!(stopper.observe(f64::NAN), StopDecision::Continue { stale_epochs: 1 });
        assert_eq!(stopper.observe(f64::NAN), StopDecision::Stop);
        assert!(stopper.best_loss().is_infinite());
    }
}
