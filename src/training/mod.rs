//! Model training
//!
//! Early-stopping training runs, learning-rate schedule, checkpointing,
//! metrics and the hyperparameter search that drives them.

pub mod checkpoint;
pub mod early_stopping;
pub mod engine;
pub mod metrics;
pub mod schedule;
pub mod search;

pub use checkpoint::CheckpointSlot;
pub use early_stopping::{EarlyStopping, StopDecision};
pub use engine::{EngineConfig, RunOutcome, TrainingEngine, TrainingPhase};
pub use metrics::{RegressionMetrics, TrainingHistory};
pub use schedule::StepSchedule;
pub use search::{
    HyperparameterSearch, Hyperparams, SearchOutcome, SearchSpace, TrialResult,
    TRIAL_FAILURE_LOSS,
};

/// Base learning rate for search trials
pub const SEARCH_LEARNING_RATE: f64 = 1e-4;

/// Base learning rate for the final run with the winning configuration
pub const FINAL_LEARNING_RATE: f64 = 1e-3;
