//! Aerosol optical depth regression tuning
//!
//! For every input table, searches hyperparameters of a feed-forward regressor
//! predicting `AOD550_AVG`, trains a final model with the winning configuration
//! under early stopping, and writes diagnostic plots and metrics.

pub mod data;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod training;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::training::search::SearchSpace;

/// Predictor columns, in model input order
pub const FEATURE_COLUMNS: [&str; 11] = [
    "AOD440_AVG",
    "AOD675_AVG",
    "AOD870_AVG",
    "AOD1020_AVG",
    "SSA440_AVG",
    "SSA675_AVG",
    "SSA870_AVG",
    "SSA1020_AVG",
    "ASY440_AVG",
    "ASY675_AVG",
    "ASY870_AVG",
];

/// Regression target column
pub const TARGET_COLUMN: &str = "AOD550_AVG";

/// Marker used by the source tables for missing measurements
pub const SENTINEL_VALUE: f64 = -999.0;

/// Application-wide errors
#[derive(Debug, Error)]
pub enum AodError {
    #[error("Insufficient data: {rows} usable rows, need at least {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("Split produced an empty {subset} subset from {rows} rows")]
    EmptySubset { subset: &'static str, rows: usize },

    #[error("Column '{column}' not found in {file}")]
    MissingColumn { column: String, file: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AodError {
    /// True for errors meaning the data cannot support a train/val/test split
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            AodError::InsufficientData { .. } | AodError::EmptySubset { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AodError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub search: SearchConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_dir: PathBuf,
    pub feature_columns: Vec<String>,
    pub target_column: String,
    pub sentinel: f64,
    pub split_seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            input_dir: PathBuf::from("data"),
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            target_column: TARGET_COLUMN.to_string(),
            sentinel: SENTINEL_VALUE,
            split_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub trials: usize,
    pub seed: u64,
    pub parallel: bool,
    pub space: SearchSpace,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            trials: 50,
            seed: 7,
            parallel: false,
            space: SearchSpace::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub search_learning_rate: f64,
    pub final_learning_rate: f64,
    pub lr_decay_factor: f64,
    pub lr_decay_step: usize,
    pub early_stopping_patience: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            search_learning_rate: training::SEARCH_LEARNING_RATE,
            final_learning_rate: training::FINAL_LEARNING_RATE,
            lr_decay_factor: 0.1,
            lr_decay_step: 50,
            early_stopping_patience: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub plots: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            output_dir: PathBuf::from("output"),
            plots: true,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AodError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| AodError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AodError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
