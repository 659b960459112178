//! Best-model checkpoint slot
//!
//! Holds the parameters of the best epoch seen so far in one run. A file-backed
//! slot writes the new snapshot next to the old one and renames it into place,
//! so the previous checkpoint is only replaced after a complete write.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;

use crate::model::Regressor;
use crate::Result;

/// Extension appended by the burn file recorder
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// A single slot holding the best model of a run
pub struct CheckpointSlot<B: Backend> {
    stem: Option<PathBuf>,
    best: Option<Regressor<B>>,
    best_epoch: Option<usize>,
    best_val_loss: f64,
    writes: usize,
}

impl<B: Backend> CheckpointSlot<B> {
    /// Slot kept only in memory (search trials)
    pub fn in_memory() -> Self {
        CheckpointSlot {
            stem: None,
            best: None,
            best_epoch: None,
            best_val_loss: f64::INFINITY,
            writes: 0,
        }
    }

    /// Slot persisted to `<stem>.mpk`
    pub fn file(stem: impl Into<PathBuf>) -> Self {
        CheckpointSlot {
            stem: Some(stem.into()),
            ..Self::in_memory()
        }
    }

    /// Path of the persisted checkpoint, if file-backed
    pub fn path(&self) -> Option<PathBuf> {
        self.stem
            .as_ref()
            .map(|stem| stem.with_extension(CHECKPOINT_EXTENSION))
    }

    /// Replace the slot contents with `model`
    pub fn store(&mut self, model: Regressor<B>, epoch: usize, val_loss: f64) -> Result<()> {
        if let Some(stem) = &self.stem {
            write_atomically(&model, stem)?;
        }
        self.best = Some(model);
        self.best_epoch = Some(epoch);
        self.best_val_loss = val_loss;
        self.writes += 1;
        Ok(())
    }

    pub fn best_model(&self) -> Option<&Regressor<B>> {
        self.best.as_ref()
    }

    pub fn into_best_model(self) -> Option<Regressor<B>> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_val_loss(&self) -> f64 {
        self.best_val_loss
    }

    /// Number of snapshots stored over the slot's lifetime
    pub fn writes(&self) -> usize {
        self.writes
    }
}

fn partial_stem(stem: &Path) -> PathBuf {
    let name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    // No dot: the recorder replaces the extension
    stem.with_file_name(format!("{}-partial", name))
}

fn write_atomically<B: Backend>(model: &Regressor<B>, stem: &Path) -> Result<()> {
    let partial = partial_stem(stem);
    model.save(&partial)?;
    std::fs::rename(
        partial.with_extension(CHECKPOINT_EXTENSION),
        stem.with_extension(CHECKPOINT_EXTENSION),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activation, RegressorConfig};
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_in_memory_slot_keeps_latest_store() {
        let device = Default::default();
        let config = RegressorConfig::new(4, 0.001, Activation::ReLU);
        let mut slot = CheckpointSlot::<TestBackend>::in_memory();
        assert!(slot.best_model().is_none());
        assert!(slot.path().is_none());

        slot.store(config.init(&device), 0, 0.9).unwrap();
        slot.store(config.init(&device), 3, 0.4).unwrap();

        assert_eq!(slot.best_epoch(), Some(3));
        assert_eq!(slot.best_val_loss(), 0.4);
        assert_eq!(slot.writes(), 2);
    }

    #[test]
    fn test_file_slot_overwrites_single_checkpoint() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = RegressorConfig::new(4, 0.001, Activation::Sigmoid);
        let mut slot = CheckpointSlot::<TestBackend>::file(dir.path().join("best_model"));

        let first = config.init::<TestBackend>(&device);
        let second = config.init::<TestBackend>(&device);
        slot.store(first, 0, 1.0).unwrap();
        slot.store(second.clone(), 1, 0.5).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(slot.path().unwrap(), dir.path().join("best_model.mpk"));

        let loaded = Regressor::<TestBackend>::load(&device, &dir.path().join("best_model"), config).unwrap();
        let x = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        assert_eq!(loaded.predict(x.clone()).unwrap(), second.predict(x).unwrap());
    }
}
