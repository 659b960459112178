//! Training metrics and evaluation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Regression quality of a set of predictions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    pub count: usize,
}

impl RegressionMetrics {
    /// Compute from paired true/predicted values
    ///
    /// With constant targets R² is 1.0 for a perfect fit and 0.0 otherwise.
    pub fn compute(y_true: &[f32], y_pred: &[f32]) -> Self {
        let count = y_true.len().min(y_pred.len());
        if count == 0 {
            return RegressionMetrics::default();
        }

        let n = count as f64;
        let pairs = y_true.iter().zip(y_pred.iter()).take(count);

        let mut ss_res = 0.0;
        let mut abs_sum = 0.0;
        for (t, p) in pairs {
            let err = (*t as f64) - (*p as f64);
            ss_res += err * err;
            abs_sum += err.abs();
        }

        let mean = y_true.iter().take(count).map(|t| *t as f64).sum::<f64>() / n;
        let ss_tot: f64 = y_true
            .iter()
            .take(count)
            .map(|t| (*t as f64 - mean).powi(2))
            .sum();

        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let mse = ss_res / n;
        RegressionMetrics {
            mse,
            rmse: mse.sqrt(),
            mae: abs_sum / n,
            r2,
            count,
        }
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MSE: {:.4} | RMSE: {:.4} | MAE: {:.4} | R²: {:.4}",
            self.mse, self.rmse, self.mae, self.r2
        )
    }
}

/// Per-epoch loss curves of one training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub test_losses: Vec<f64>,
    pub learning_rates: Vec<f64>,
    pub best_val_loss: f64,
    pub best_epoch: Option<usize>,
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingHistory {
    pub fn new() -> Self {
        TrainingHistory {
            train_losses: Vec::new(),
            val_losses: Vec::new(),
            test_losses: Vec::new(),
            learning_rates: Vec::new(),
            best_val_loss: f64::INFINITY,
            best_epoch: None,
        }
    }

    /// Record losses for an epoch
    pub fn record_epoch(
        &mut self,
        epoch: usize,
        learning_rate: f64,
        train_loss: f64,
        val_loss: f64,
        test_loss: f64,
    ) {
        self.train_losses.push(train_loss);
        self.val_losses.push(val_loss);
        self.test_losses.push(test_loss);
        self.learning_rates.push(learning_rate);

        if val_loss < self.best_val_loss {
            self.best_val_loss = val_loss;
            self.best_epoch = Some(epoch);
        }
    }

    pub fn epochs(&self) -> usize {
        self.val_losses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = [0.1, 0.4, 0.9];
        let m = RegressionMetrics::compute(&y, &y);

        assert_eq!(m.mse, 0.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.count, 3);
    }

    #[test]
    fn test_known_values() {
        let m = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]);

        assert!((m.mse - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.rmse - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-9);
        // Predicting the mean gives R² = 0
        assert!(m.r2.abs() < 1e-9);
    }

    #[test]
    fn test_constant_targets_and_empty_input() {
        let m = RegressionMetrics::compute(&[0.5, 0.5], &[0.4, 0.6]);
        assert_eq!(m.r2, 0.0);

        let empty = RegressionMetrics::compute(&[], &[]);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_history_tracks_best_epoch() {
        let mut history = TrainingHistory::new();
        for (epoch, val) in [0.9, 0.5, 0.7, 0.4, 0.6].iter().enumerate() {
            history.record_epoch(epoch, 1e-3, 1.0, *val, 1.0);
        }

        assert_eq!(history.best_epoch, Some(3));
        assert_eq!(history.best_val_loss, 0.4);
        assert_eq!(history.epochs(), 5);
    }
}
