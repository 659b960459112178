//! Batch driver: one output directory per input table
//!
//! The output directory doubles as the completion marker. It is claimed with
//! an exclusive `create_dir`, so two workers never train the same file, and
//! it carries a `status.json` record (in progress, done or failed).

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::dataset::AodDataset;
use crate::data::split::{DataSplit, SplitRatios};
use crate::model::{Regressor, RegressorConfig};
use crate::predict::Predictor;
use crate::report::{self, RunSummary, SplitSizes, CHECKPOINT_STEM, NORMALIZATION_JSON};
use crate::training::checkpoint::CheckpointSlot;
use crate::training::engine::{EngineConfig, TrainingEngine, TrainingPhase};
use crate::training::search::HyperparameterSearch;
use crate::{Config, Result};

pub const STATUS_JSON: &str = "status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    InProgress,
    Done,
    Failed,
}

/// Status record stored in every claimed output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl RunStatus {
    fn started(source: &Path) -> Self {
        RunStatus {
            state: RunState::InProgress,
            source: source.display().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            message: None,
        }
    }

    fn finish(&self, state: RunState, message: Option<String>) -> Self {
        RunStatus {
            state,
            finished_at: Some(Utc::now()),
            message,
            ..self.clone()
        }
    }

    /// Write via a temporary file and rename
    pub fn write(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{}.tmp", STATUS_JSON));
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, dir.join(STATUS_JSON))?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(dir.join(STATUS_JSON)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Result of handling one input file
#[derive(Debug)]
pub enum FileOutcome {
    Completed(Box<RunSummary>),
    /// Output directory already present
    Skipped(PathBuf),
}

/// Counts over a whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub insufficient: usize,
    pub failed: usize,
}

/// Walks the input directory and runs search + final training per file
pub struct RunOrchestrator<B: AutodiffBackend> {
    config: Config,
    device: B::Device,
}

impl<B: AutodiffBackend> RunOrchestrator<B> {
    pub fn new(config: Config, device: B::Device) -> Self {
        RunOrchestrator { config, device }
    }

    /// CSV files of the input directory, sorted by name
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config.data.input_dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if path.is_file() && is_csv {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// `<output_dir>/<file stem>`
    pub fn output_dir_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.config.output.output_dir.join(stem)
    }

    /// Process every input file; one file's failure never stops the batch
    pub fn run_all(&self) -> Result<BatchSummary> {
        let files = self.input_files()?;
        if files.is_empty() {
            log::warn!(
                "No CSV files found in {}",
                self.config.data.input_dir.display()
            );
        }

        let mut summary = BatchSummary::default();
        for (i, path) in files.iter().enumerate() {
            log::info!("[{}/{}] {}", i + 1, files.len(), path.display());
            match self.process_file(path, false) {
                Ok(FileOutcome::Completed(_)) => summary.processed += 1,
                Ok(FileOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) if e.is_insufficient_data() => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    summary.insufficient += 1;
                }
                Err(e) => {
                    log::error!("Failed to process {}: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "Batch finished: {} processed, {} skipped, {} insufficient, {} failed",
            summary.processed,
            summary.skipped,
            summary.insufficient,
            summary.failed
        );
        Ok(summary)
    }

    /// Process one file; `force` reuses an existing output directory
    pub fn process_file(&self, input: &Path, force: bool) -> Result<FileOutcome> {
        let out_dir = self.output_dir_for(input);
        if !force && out_dir.exists() {
            self.log_skip(input, &out_dir);
            return Ok(FileOutcome::Skipped(out_dir));
        }

        let dataset = AodDataset::from_csv(input, &self.config.data)?;
        // Reject unusable data before claiming the directory
        DataSplit::new(&dataset, SplitRatios::default(), self.config.data.split_seed)?;

        if !self.claim(&out_dir, force)? {
            self.log_skip(input, &out_dir);
            return Ok(FileOutcome::Skipped(out_dir));
        }

        let status = RunStatus::started(input);
        status.write(&out_dir)?;

        match self.train_file(input, &dataset, &out_dir) {
            Ok(summary) => {
                status.finish(RunState::Done, None).write(&out_dir)?;
                Ok(FileOutcome::Completed(Box::new(summary)))
            }
            Err(e) => {
                if let Err(write_err) = status
                    .finish(RunState::Failed, Some(e.to_string()))
                    .write(&out_dir)
                {
                    log::warn!("Could not record failure status: {}", write_err);
                }
                Err(e)
            }
        }
    }

    fn log_skip(&self, input: &Path, out_dir: &Path) {
        match RunStatus::read(out_dir) {
            Some(status) => log::info!(
                "Skipping {}: already processed ({:?})",
                input.display(),
                status.state
            ),
            None => log::info!("Skipping {}: already processed", input.display()),
        }
    }

    /// Exclusive directory creation; false when another run got there first
    fn claim(&self, out_dir: &Path, force: bool) -> Result<bool> {
        std::fs::create_dir_all(&self.config.output.output_dir)?;
        match std::fs::create_dir(out_dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(force),
            Err(e) => Err(e.into()),
        }
    }

    fn train_file(&self, input: &Path, dataset: &AodDataset, out_dir: &Path) -> Result<RunSummary> {
        let search = HyperparameterSearch::<B>::new(
            self.config.search.clone(),
            &self.config.training,
            self.config.data.split_seed,
            self.device.clone(),
        );
        let search_outcome = search.run(dataset)?;
        let best = search_outcome.best.hyperparams;

        let split = DataSplit::new(dataset, SplitRatios::default(), self.config.data.split_seed)?;
        let engine = TrainingEngine::<B>::new(
            EngineConfig::for_phase(TrainingPhase::Final, &self.config.training),
            self.device.clone(),
        );
        let stem = out_dir.join(CHECKPOINT_STEM);
        let mut slot = CheckpointSlot::file(&stem);

        log::info!("Final training with {}", best);
        let final_run = engine.run(&split, &best, &mut slot)?;
        log::info!(
            "Final run: {} epochs, best val_loss={:.6} at epoch {}{}",
            final_run.epochs_run,
            final_run.best_val_loss,
            final_run.best_epoch.map(|e| e + 1).unwrap_or(0),
            if final_run.early_stopped { " (early stopped)" } else { "" }
        );

        // Score the persisted best checkpoint, not the last epoch
        let model_config = RegressorConfig::new(split.feature_dim(), best.dropout, best.activation);
        let model = Regressor::<B::InnerBackend>::load(&self.device, &stem, model_config)?;
        split.normalization.save(&out_dir.join(NORMALIZATION_JSON))?;

        let predictor = Predictor::new(
            model,
            split.normalization.clone(),
            model_config,
            self.device.clone(),
        );
        let val = predictor.predict_standardized(&split.val)?;
        let test = predictor.predict_standardized(&split.test)?;

        let summary = RunSummary {
            source: input.display().to_string(),
            rows: dataset.len(),
            split: SplitSizes {
                train: split.train.len(),
                val: split.val.len(),
                test: split.test.len(),
            },
            model: model_config,
            best_trial: search_outcome.best,
            trials: search_outcome.trials,
            final_run,
            validation: val.metrics(),
            test: test.metrics(),
            finished_at: Utc::now(),
        };

        report::write_artifacts(out_dir, &summary, &val, &test, self.config.output.plots)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn orchestrator(input: &Path, output: &Path) -> RunOrchestrator<TestAutodiffBackend> {
        let mut config = Config::default();
        config.data.input_dir = input.to_path_buf();
        config.output.output_dir = output.to_path_buf();
        RunOrchestrator::new(config, Default::default())
    }

    #[test]
    fn test_output_dir_named_after_file_stem() {
        let orch = orchestrator(Path::new("in"), Path::new("out"));
        assert_eq!(
            orch.output_dir_for(Path::new("in/site_A.csv")),
            PathBuf::from("out/site_A")
        );
    }

    #[test]
    fn test_input_files_filters_and_sorts() {
        let input = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.CSV", "notes.txt"] {
            std::fs::write(input.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(input.path().join("dir.csv")).unwrap();

        let orch = orchestrator(input.path(), Path::new("out"));
        let names: Vec<String> = orch
            .input_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let output = tempfile::tempdir().unwrap();
        let orch = orchestrator(Path::new("in"), output.path());
        let dir = output.path().join("site");

        assert!(orch.claim(&dir, false).unwrap());
        assert!(!orch.claim(&dir, false).unwrap());
        assert!(orch.claim(&dir, true).unwrap());
    }

    #[test]
    fn test_status_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::started(Path::new("in/x.csv"));
        status.write(dir.path()).unwrap();
        assert_eq!(RunStatus::read(dir.path()).unwrap().state, RunState::InProgress);

        status
            .finish(RunState::Failed, Some("boom".into()))
            .write(dir.path())
            .unwrap();
        let read = RunStatus::read(dir.path()).unwrap();
        assert_eq!(read.state, RunState::Failed);
        assert_eq!(read.message.as_deref(), Some("boom"));
        assert!(read.finished_at.is_some());
        assert!(!dir.path().join("status.json.tmp").exists());
    }
}
