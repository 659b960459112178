//! Training loop for one hyperparameter configuration
//!
//! Runs shuffled mini-batch epochs with Adam on an MSE objective, evaluates
//! validation and test loss with the model in inference mode after every
//! epoch, checkpoints on strict validation improvement and stops early once
//! patience runs out.

use std::sync::Mutex;

use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

use crate::data::dataset::{AodBatch, AodBatcher};
use crate::data::split::DataSplit;
use crate::model::{Regressor, RegressorConfig};
use crate::training::checkpoint::CheckpointSlot;
use crate::training::early_stopping::{EarlyStopping, StopDecision};
use crate::training::metrics::TrainingHistory;
use crate::training::schedule::StepSchedule;
use crate::training::search::Hyperparams;
use crate::{AodError, Result, TrainingConfig};

/// Which part of the pipeline a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Search,
    Final,
}

/// Settings shared by every run of one phase
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub phase: TrainingPhase,
    pub schedule: StepSchedule,
    pub patience: usize,
    pub seed: u64,
}

impl EngineConfig {
    pub fn for_phase(phase: TrainingPhase, training: &TrainingConfig) -> Self {
        let learning_rate = match phase {
            TrainingPhase::Search => training.search_learning_rate,
            TrainingPhase::Final => training.final_learning_rate,
        };
        EngineConfig {
            phase,
            schedule: StepSchedule::new(
                learning_rate,
                training.lr_decay_factor,
                training.lr_decay_step,
            ),
            patience: training.early_stopping_patience,
            seed: training.seed,
        }
    }
}

/// Summary of one bounded training run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Lowest validation loss seen in the run (not necessarily the last epoch's)
    pub best_val_loss: f64,
    pub best_epoch: Option<usize>,
    pub epochs_run: usize,
    pub early_stopped: bool,
    pub history: TrainingHistory,
}

/// The backend RNG is process-wide; seeding and initialization must not
/// interleave across concurrent trials.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Runs one training session per call
pub struct TrainingEngine<B: AutodiffBackend> {
    config: EngineConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> TrainingEngine<B> {
    pub fn new(config: EngineConfig, device: B::Device) -> Self {
        TrainingEngine { config, device }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Train a fresh model on `split` with `hyperparams`
    ///
    /// The slot receives a snapshot each time validation loss strictly
    /// improves, so after the run it holds the best epoch's parameters.
    pub fn run(
        &self,
        split: &DataSplit,
        hyperparams: &Hyperparams,
        slot: &mut CheckpointSlot<B::InnerBackend>,
    ) -> Result<RunOutcome> {
        if split.train.is_empty() {
            return Err(AodError::EmptySubset {
                subset: "training",
                rows: split.train.len() + split.val.len() + split.test.len(),
            });
        }
        if split.val.is_empty() {
            return Err(AodError::EmptySubset {
                subset: "validation",
                rows: split.train.len() + split.val.len() + split.test.len(),
            });
        }

        let model_config =
            RegressorConfig::new(split.feature_dim(), hyperparams.dropout, hyperparams.activation);
        let mut model = self.init_model(model_config);
        let mut optimizer = AdamConfig::new().init();

        let train_loader = DataLoaderBuilder::new(AodBatcher::<B>::new(self.device.clone()))
            .batch_size(hyperparams.batch_size.max(1))
            .shuffle(self.config.seed)
            .build(split.train.clone());

        let val_batch = split.val.to_batch::<B::InnerBackend>(&self.device);
        let test_batch = if split.test.is_empty() {
            None
        } else {
            Some(split.test.to_batch::<B::InnerBackend>(&self.device))
        };

        let mut stopper = EarlyStopping::new(self.config.patience);
        let mut history = TrainingHistory::new();
        let mut early_stopped = false;

        log::debug!(
            "{:?} run: {} (lr={})",
            self.config.phase,
            hyperparams,
            self.config.schedule.initial
        );

        for epoch in 0..hyperparams.epochs {
            let learning_rate = self.config.schedule.learning_rate(epoch);

            let mut train_loss_sum = 0.0;
            let mut train_count = 0usize;
            for batch in train_loader.iter() {
                let batch_size = batch.targets.dims()[0];
                let loss = mse(model.forward(batch.features), batch.targets);
                let loss_val: f64 = loss.clone().into_scalar().elem();

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(learning_rate, model, grads);

                train_loss_sum += loss_val * batch_size as f64;
                train_count += batch_size;
            }
            let train_loss = train_loss_sum / train_count.max(1) as f64;

            let inference = model.valid();
            let val_loss = evaluate(&inference, &val_batch);
            let test_loss = test_batch
                .as_ref()
                .map(|batch| evaluate(&inference, batch))
                .unwrap_or(f64::NAN);

            history.record_epoch(epoch, learning_rate, train_loss, val_loss, test_loss);
            self.log_epoch(epoch, hyperparams.epochs, train_loss, val_loss, test_loss);

            match stopper.observe(val_loss) {
                StopDecision::Improved => {
                    slot.store(inference, epoch, val_loss)?;
                    log::debug!("  New best model (val_loss: {:.6})", val_loss);
                }
                StopDecision::Continue { .. } => {}
                StopDecision::Stop => {
                    log::info!(
                        "Early stopping at epoch {} (best was epoch {})",
                        epoch + 1,
                        history.best_epoch.map(|e| e + 1).unwrap_or(0)
                    );
                    early_stopped = true;
                    break;
                }
            }
        }

        Ok(RunOutcome {
            best_val_loss: stopper.best_loss(),
            best_epoch: slot.best_epoch(),
            epochs_run: history.epochs(),
            early_stopped,
            history,
        })
    }

    /// Fresh weights drawn from the backend RNG seeded with the engine seed
    fn init_model(&self, config: RegressorConfig) -> Regressor<B> {
        let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        B::seed(self.config.seed);
        config.init(&self.device)
    }

    fn log_epoch(&self, epoch: usize, epochs: usize, train: f64, val: f64, test: f64) {
        let message = format!(
            "Epoch {}/{}: train_loss={:.6}, val_loss={:.6}, test_loss={:.6}",
            epoch + 1,
            epochs,
            train,
            val,
            test
        );
        match self.config.phase {
            TrainingPhase::Final => log::info!("{}", message),
            TrainingPhase::Search => log::debug!("{}", message),
        }
    }
}

/// Mean squared error over a [batch, 1] prediction
fn mse<B: Backend>(predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (predictions - targets).powf_scalar(2.0).mean()
}

/// Loss over a full subset with no parameter updates
pub fn evaluate<B: Backend>(model: &Regressor<B>, batch: &AodBatch<B>) -> f64 {
    let loss = mse(model.forward(batch.features.clone()), batch.targets.clone());
    loss.into_scalar().elem()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{AodDataset, AodSample};
    use crate::data::split::{FeatureNormalization, SplitRatios};
    use crate::model::Activation;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn linear_dataset(n: usize) -> AodDataset {
        let samples = (0..n)
            .map(|i| {
                let x = i as f32 / n as f32;
                AodSample {
                    features: vec![x, 1.0 - x, (x * 3.0).sin()],
                    target: 0.2 + 0.5 * x,
                }
            })
            .collect();
        AodDataset::from_samples(samples, 3)
    }

    fn hyperparams(epochs: usize) -> Hyperparams {
        Hyperparams {
            epochs,
            dropout: 0.001,
            batch_size: 16,
            activation: Activation::ReLU,
        }
    }

    fn engine(phase: TrainingPhase) -> TrainingEngine<TestAutodiffBackend> {
        let config = EngineConfig::for_phase(phase, &TrainingConfig::default());
        TrainingEngine::new(config, Default::default())
    }

    #[test]
    fn test_phase_learning_rates() {
        let training = TrainingConfig::default();
        let search = EngineConfig::for_phase(TrainingPhase::Search, &training);
        let fin = EngineConfig::for_phase(TrainingPhase::Final, &training);

        assert_eq!(search.schedule.initial, 1e-4);
        assert_eq!(fin.schedule.initial, 1e-3);
        assert_eq!(fin.patience, 10);
    }

    #[test]
    fn test_run_respects_epoch_budget() {
        let split = DataSplit::new(&linear_dataset(40), SplitRatios::default(), 42).unwrap();
        let mut slot = CheckpointSlot::in_memory();

        let outcome = engine(TrainingPhase::Search)
            .run(&split, &hyperparams(5), &mut slot)
            .unwrap();

        assert!(outcome.epochs_run <= 5);
        assert_eq!(outcome.history.train_losses.len(), outcome.epochs_run);
        assert!(outcome.best_val_loss.is_finite());
        assert!(slot.best_model().is_some());
    }

    #[test]
    fn test_best_loss_is_minimum_of_history() {
        let split = DataSplit::new(&linear_dataset(40), SplitRatios::default(), 42).unwrap();
        let mut slot = CheckpointSlot::in_memory();

        let outcome = engine(TrainingPhase::Final)
            .run(&split, &hyperparams(30), &mut slot)
            .unwrap();

        let min = outcome
            .history
            .val_losses
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        assert_eq!(outcome.best_val_loss, min);
        assert_eq!(outcome.best_epoch, outcome.history.best_epoch);
    }

    /// Validation shares the training inputs but has the opposite target, so
    /// every step that fits training pushes validation loss up.
    fn diverging_split() -> DataSplit {
        let features = |i: usize| {
            let x = i as f32 / 20.0 - 0.5;
            vec![x, -x, x * x]
        };
        let make = |target: f32| {
            let samples = (0..20)
                .map(|i| AodSample {
                    features: features(i),
                    target,
                })
                .collect();
            AodDataset::from_samples(samples, 3)
        };
        DataSplit {
            train: make(5.0),
            val: make(-5.0),
            test: make(5.0),
            normalization: FeatureNormalization {
                mean: vec![0.0; 3],
                std: vec![1.0; 3],
            },
            train_indices: (0..20).collect(),
            val_indices: Vec::new(),
            test_indices: Vec::new(),
        }
    }

    #[test]
    fn test_rising_validation_loss_stops_after_patience() {
        let split = diverging_split();
        let mut slot = CheckpointSlot::in_memory();

        let outcome = engine(TrainingPhase::Search)
            .run(&split, &hyperparams(50), &mut slot)
            .unwrap();

        assert!(outcome.early_stopped);
        assert_eq!(outcome.epochs_run, 11);
        assert_eq!(outcome.best_epoch, Some(0));
        assert_eq!(slot.writes(), 1);
    }

    #[test]
    fn test_checkpoint_file_matches_best_epoch_snapshot() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let split = diverging_split();
        let stem = dir.path().join("best_model");
        let mut slot = CheckpointSlot::file(&stem);

        let hp = hyperparams(50);
        let outcome = engine(TrainingPhase::Search).run(&split, &hp, &mut slot).unwrap();

        let best_epoch = outcome.best_epoch.unwrap();
        assert!(best_epoch < outcome.epochs_run - 1);
        assert_eq!(slot.best_epoch(), Some(best_epoch));

        let config = RegressorConfig::new(3, hp.dropout, hp.activation);
        let restored = Regressor::<TestBackend>::load(&device, &stem, config).unwrap();
        let val_batch = split.val.to_batch::<TestBackend>(&device);

        let snapshot = slot.best_model().unwrap();
        assert_eq!(
            restored.predict(val_batch.features.clone()).unwrap(),
            snapshot.predict(val_batch.features.clone()).unwrap()
        );
        assert_eq!(
            evaluate(&restored, &val_batch),
            outcome.history.val_losses[best_epoch]
        );
        let last = *outcome.history.val_losses.last().unwrap();
        assert!(evaluate(&restored, &val_batch) < last);
    }

    #[test]
    fn test_concurrent_inits_draw_identical_weights() {
        use rayon::prelude::*;

        let device = Default::default();
        let engine = engine(TrainingPhase::Search);
        let config = RegressorConfig::new(3, 0.001, Activation::Tanh);
        let x = Tensor::<TestBackend, 2>::ones([2, 3], &device);

        let outputs: Vec<Vec<f32>> = (0..8)
            .into_par_iter()
            .map(|_| engine.init_model(config).valid().predict(x.clone()).unwrap())
            .collect();

        assert!(outputs.iter().all(|o| o == &outputs[0]));
    }

    #[test]
    fn test_empty_validation_is_rejected_before_training() {
        let mut split = DataSplit::new(&linear_dataset(20), SplitRatios::default(), 1).unwrap();
        split.val = AodDataset::from_samples(Vec::new(), 3);
        let mut slot = CheckpointSlot::in_memory();

        let err = engine(TrainingPhase::Search)
            .run(&split, &hyperparams(5), &mut slot)
            .unwrap_err();

        assert!(err.is_insufficient_data());
        assert_eq!(slot.writes(), 0);
    }
}
