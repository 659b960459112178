//! Per-file run artifacts
//!
//! Plots, the test-set predictions table and a JSON summary of the search and
//! the final run.

pub mod plots;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::RegressorConfig;
use crate::training::engine::RunOutcome;
use crate::training::metrics::RegressionMetrics;
use crate::training::search::TrialResult;
use crate::Result;

pub const CHECKPOINT_STEM: &str = "best_model";
pub const LOSS_PLOT: &str = "loss_curve.svg";
pub const VAL_SCATTER: &str = "val_scatter.svg";
pub const TEST_SCATTER: &str = "test_scatter.svg";
pub const PREDICTIONS_CSV: &str = "test_predictions.csv";
pub const SUMMARY_JSON: &str = "summary.json";
pub const NORMALIZATION_JSON: &str = "normalization.json";

/// Paired true and predicted targets for one subset
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub y_true: Vec<f32>,
    pub y_pred: Vec<f32>,
}

impl Predictions {
    pub fn new(y_true: Vec<f32>, y_pred: Vec<f32>) -> Self {
        Predictions { y_true, y_pred }
    }

    pub fn len(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }

    pub fn metrics(&self) -> RegressionMetrics {
        RegressionMetrics::compute(&self.y_true, &self.y_pred)
    }

    /// Write a `true,predicted` table
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["true", "predicted"])?;
        for (t, p) in self.y_true.iter().zip(&self.y_pred) {
            writer.write_record([t.to_string(), p.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSizes {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

/// Everything known about a finished file run
///
/// Write-only: non-finite losses are stored as `null`. Read stored runs back
/// through `StoredModel`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub rows: usize,
    pub split: SplitSizes,
    pub model: RegressorConfig,
    pub best_trial: TrialResult,
    pub trials: Vec<TrialResult>,
    pub final_run: RunOutcome,
    pub validation: RegressionMetrics,
    pub test: RegressionMetrics,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Model section of a stored summary, enough to rebuild the regressor
#[derive(Debug, Clone, Deserialize)]
pub struct StoredModel {
    pub model: RegressorConfig,
}

impl StoredModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Write plots, predictions and summary into `dir`
pub fn write_artifacts(
    dir: &Path,
    summary: &RunSummary,
    val: &Predictions,
    test: &Predictions,
    with_plots: bool,
) -> Result<()> {
    if with_plots {
        plots::loss_curve(&dir.join(LOSS_PLOT), &summary.final_run.history)?;
        plots::prediction_scatter(
            &dir.join(VAL_SCATTER),
            "Validation set",
            &val.y_true,
            &val.y_pred,
            &summary.validation,
        )?;
        plots::prediction_scatter(
            &dir.join(TEST_SCATTER),
            "Test set",
            &test.y_true,
            &test.y_pred,
            &summary.test,
        )?;
    }

    test.write_csv(&dir.join(PREDICTIONS_CSV))?;
    summary.save(&dir.join(SUMMARY_JSON))?;

    log::info!("Validation: {}", summary.validation);
    log::info!("Test:       {}", summary.test);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Activation;
    use crate::training::metrics::TrainingHistory;
    use crate::training::search::Hyperparams;

    #[test]
    fn test_predictions_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        Predictions::new(vec![0.1, 0.2, 0.3], vec![0.15, 0.25, 0.35])
            .write_csv(&path)
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["true", "predicted"]);
        let rows: Vec<_> = reader.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][1].parse::<f32>().unwrap(), 0.35);
    }

    fn summary_with_history(history: TrainingHistory) -> RunSummary {
        let hyperparams = Hyperparams {
            epochs: 3,
            dropout: 0.001,
            batch_size: 16,
            activation: Activation::LeakyReLU,
        };
        let trial = TrialResult {
            index: 0,
            hyperparams,
            best_val_loss: 0.2,
            best_epoch: Some(0),
            epochs_run: 3,
            early_stopped: false,
            duration_secs: 0.1,
            failure: None,
        };
        RunSummary {
            source: "in/site.csv".into(),
            rows: 4,
            split: SplitSizes { train: 2, val: 1, test: 1 },
            model: RegressorConfig::new(11, 0.001, Activation::LeakyReLU),
            best_trial: trial.clone(),
            trials: vec![trial],
            final_run: RunOutcome {
                best_val_loss: history.best_val_loss,
                best_epoch: history.best_epoch,
                epochs_run: history.epochs(),
                early_stopped: false,
                history,
            },
            validation: RegressionMetrics::default(),
            test: RegressionMetrics::default(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_with_nan_losses_still_loads_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUMMARY_JSON);
        let mut history = TrainingHistory::new();
        history.record_epoch(0, 1e-3, 0.5, 0.2, f64::NAN);
        history.record_epoch(1, 1e-3, 0.4, 0.3, f64::NAN);
        summary_with_history(history).save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["final_run"]["history"]["test_losses"][0].is_null());

        let stored = StoredModel::load(&path).unwrap();
        assert_eq!(stored.model.activation, Activation::LeakyReLU);
        assert_eq!(stored.model.input_dim, 11);
    }

    #[test]
    fn test_empty_predictions_still_write_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        Predictions::default().write_csv(&path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "true,predicted");
    }
}
