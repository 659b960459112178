//! Hyperparameter search over the regressor's training configuration
//!
//! Configurations are pre-sampled from a seeded RNG, every trial trains a fresh
//! model on its own split, and the trial with the lowest best validation loss
//! wins. Trials share nothing but the best-result accumulator, so they can run
//! on a rayon pool.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::dataset::AodDataset;
use crate::data::split::{DataSplit, SplitRatios};
use crate::model::Activation;
use crate::training::checkpoint::CheckpointSlot;
use crate::training::engine::{EngineConfig, TrainingEngine, TrainingPhase};
use crate::{AodError, Result, SearchConfig, TrainingConfig};

/// Score assigned to trials that could not train (e.g. not enough rows)
pub const TRIAL_FAILURE_LOSS: f64 = 1e10;

/// Legal values for every tuned hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub epochs_min: usize,
    pub epochs_max: usize,
    pub epochs_step: usize,
    pub dropout_min: f64,
    pub dropout_max: f64,
    pub batch_sizes: Vec<usize>,
    pub activations: Vec<Activation>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        SearchSpace {
            epochs_min: 50,
            epochs_max: 300,
            epochs_step: 50,
            dropout_min: 0.0001,
            dropout_max: 0.002,
            batch_sizes: vec![16, 32, 48, 64],
            activations: Activation::ALL.to_vec(),
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<()> {
        if self.epochs_step == 0 || self.epochs_min == 0 || self.epochs_min > self.epochs_max {
            return Err(AodError::Config(format!(
                "Invalid epoch range {}..={} step {}",
                self.epochs_min, self.epochs_max, self.epochs_step
            )));
        }
        if !(self.dropout_min >= 0.0 && self.dropout_min <= self.dropout_max && self.dropout_max < 1.0)
        {
            return Err(AodError::Config(format!(
                "Invalid dropout range [{}, {}]",
                self.dropout_min, self.dropout_max
            )));
        }
        if self.batch_sizes.is_empty() || self.batch_sizes.contains(&0) {
            return Err(AodError::Config("Batch sizes must be non-empty and positive".into()));
        }
        if self.activations.is_empty() {
            return Err(AodError::Config("At least one activation is required".into()));
        }
        Ok(())
    }

    pub fn epoch_choices(&self) -> Vec<usize> {
        (self.epochs_min..=self.epochs_max)
            .step_by(self.epochs_step.max(1))
            .collect()
    }

    /// Draw one configuration uniformly from the space
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Hyperparams {
        let epochs = self
            .epoch_choices()
            .choose(rng)
            .copied()
            .unwrap_or(self.epochs_min);
        let dropout = if self.dropout_max > self.dropout_min {
            rng.gen_range(self.dropout_min..=self.dropout_max)
        } else {
            self.dropout_min
        };
        let batch_size = self.batch_sizes.choose(rng).copied().unwrap_or(32);
        let activation = self
            .activations
            .choose(rng)
            .copied()
            .unwrap_or(Activation::ReLU);

        Hyperparams {
            epochs,
            dropout,
            batch_size,
            activation,
        }
    }

    pub fn contains(&self, hp: &Hyperparams) -> bool {
        self.epoch_choices().contains(&hp.epochs)
            && hp.dropout >= self.dropout_min
            && hp.dropout <= self.dropout_max
            && self.batch_sizes.contains(&hp.batch_size)
            && self.activations.contains(&hp.activation)
    }
}

/// One sampled training configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparams {
    pub epochs: usize,
    pub dropout: f64,
    pub batch_size: usize,
    pub activation: Activation,
}

impl fmt::Display for Hyperparams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epochs={}, dropout={:.5}, batch_size={}, activation={}",
            self.epochs, self.dropout, self.batch_size, self.activation
        )
    }
}

/// Results from a tuning trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub hyperparams: Hyperparams,
    pub best_val_loss: f64,
    pub best_epoch: Option<usize>,
    pub epochs_run: usize,
    pub early_stopped: bool,
    pub duration_secs: f64,
    /// Reason the trial scored `TRIAL_FAILURE_LOSS`
    pub failure: Option<String>,
}

impl TrialResult {
    fn failed(index: usize, hyperparams: Hyperparams, reason: String) -> Self {
        TrialResult {
            index,
            hyperparams,
            best_val_loss: TRIAL_FAILURE_LOSS,
            best_epoch: None,
            epochs_run: 0,
            early_stopped: false,
            duration_secs: 0.0,
            failure: Some(reason),
        }
    }

    /// Ordering used to pick the winner: lower loss, then lower index
    fn beats(&self, other: &TrialResult) -> bool {
        self.best_val_loss < other.best_val_loss
            || (self.best_val_loss == other.best_val_loss && self.index < other.index)
    }
}

/// Minimum-loss accumulator shared by concurrent trials
#[derive(Debug, Default)]
pub struct BestTrial {
    inner: Mutex<Option<TrialResult>>,
}

impl BestTrial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `result` if it beats the current best; returns true when it does
    pub fn offer(&self, result: &TrialResult) -> bool {
        let mut best = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let better = match best.as_ref() {
            Some(current) => result.beats(current),
            None => true,
        };
        if better {
            *best = Some(result.clone());
        }
        better
    }

    pub fn into_inner(self) -> Option<TrialResult> {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of a full search
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub best: TrialResult,
    pub trials: Vec<TrialResult>,
}

/// Drives repeated training runs over sampled configurations
pub struct HyperparameterSearch<B: AutodiffBackend> {
    search: SearchConfig,
    engine: TrainingEngine<B>,
    ratios: SplitRatios,
    split_seed: u64,
}

impl<B: AutodiffBackend> HyperparameterSearch<B> {
    pub fn new(
        search: SearchConfig,
        training: &TrainingConfig,
        split_seed: u64,
        device: B::Device,
    ) -> Self {
        let engine = TrainingEngine::new(
            EngineConfig::for_phase(TrainingPhase::Search, training),
            device,
        );
        HyperparameterSearch {
            search,
            engine,
            ratios: SplitRatios::default(),
            split_seed,
        }
    }

    /// Configurations for every trial, in trial order
    pub fn sample_configurations(&self) -> Vec<Hyperparams> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.search.seed);
        (0..self.search.trials)
            .map(|_| self.search.space.sample(&mut rng))
            .collect()
    }

    /// Run all trials and return the winner
    pub fn run(&self, dataset: &AodDataset) -> Result<SearchOutcome> {
        self.search.space.validate()?;
        if self.search.trials == 0 {
            return Err(AodError::Config("Search needs at least one trial".into()));
        }

        let configurations = self.sample_configurations();
        let best = BestTrial::new();
        let total = configurations.len();

        log::info!(
            "Starting search: {} trials ({})",
            total,
            if self.search.parallel { "parallel" } else { "sequential" }
        );

        let run_one = |(index, hyperparams): (usize, Hyperparams)| -> Result<TrialResult> {
            let result = self.run_trial(index, hyperparams, dataset)?;
            let improved = best.offer(&result);
            log::info!(
                "Trial {}/{}: {} -> val_loss={:.6}{}",
                index + 1,
                total,
                result.hyperparams,
                result.best_val_loss,
                if improved { " (best so far)" } else { "" }
            );
            Ok(result)
        };

        let mut trials = if self.search.parallel {
            configurations
                .into_par_iter()
                .enumerate()
                .map(run_one)
                .collect::<Result<Vec<_>>>()?
        } else {
            configurations
                .into_iter()
                .enumerate()
                .map(run_one)
                .collect::<Result<Vec<_>>>()?
        };
        trials.sort_by_key(|t| t.index);

        let best = best
            .into_inner()
            .ok_or_else(|| AodError::Config("Search finished without any trial".into()))?;

        log::info!(
            "Best trial {}: {} (val_loss={:.6})",
            best.index + 1,
            best.hyperparams,
            best.best_val_loss
        );

        Ok(SearchOutcome { best, trials })
    }

    /// Train one configuration on a fresh split; data shortage scores the failure loss
    pub fn run_trial(
        &self,
        index: usize,
        hyperparams: Hyperparams,
        dataset: &AodDataset,
    ) -> Result<TrialResult> {
        let start = Instant::now();

        let split = match DataSplit::new(dataset, self.ratios, self.split_seed) {
            Ok(split) => split,
            Err(e) if e.is_insufficient_data() => {
                log::warn!("Trial {}: {}", index + 1, e);
                return Ok(TrialResult::failed(index, hyperparams, e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let mut slot = CheckpointSlot::in_memory();
        match self.engine.run(&split, &hyperparams, &mut slot) {
            Ok(outcome) => Ok(TrialResult {
                index,
                hyperparams,
                best_val_loss: outcome.best_val_loss.min(TRIAL_FAILURE_LOSS),
                best_epoch: outcome.best_epoch,
                epochs_run: outcome.epochs_run,
                early_stopped: outcome.early_stopped,
                duration_secs: start.elapsed().as_secs_f64(),
                failure: None,
            }),
            Err(e) if e.is_insufficient_data() => {
                log::warn!("Trial {}: {}", index + 1, e);
                Ok(TrialResult::failed(index, hyperparams, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
