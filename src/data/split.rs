//! Seeded train/validation/test splits with train-only standardization

use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::dataset::{AodDataset, AodSample};
use crate::{AodError, Result};

/// Smallest cleaned dataset a split is attempted on
pub const MIN_ROWS: usize = 2;

/// Split ratios for train/val/test
#[derive(Debug, Clone, Copy)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        SplitRatios {
            train: 0.70,
            val: 0.15,
            test: 0.15,
        }
    }
}

fn ceil_fraction(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction) - 1e-9).ceil().max(0.0) as usize
}

impl SplitRatios {
    /// Subset sizes for `n` rows as (train, val, test)
    ///
    /// The held-out share is rounded up and then halved with the test side
    /// rounded up, so 20 rows give (14, 3, 3) and 15 rows give (10, 2, 3).
    pub fn sizes(&self, n: usize) -> (usize, usize, usize) {
        let held_out_fraction = self.val + self.test;
        let held_out = ceil_fraction(n, held_out_fraction).min(n);
        let test = if held_out_fraction > 0.0 {
            ceil_fraction(held_out, self.test / held_out_fraction).min(held_out)
        } else {
            0
        };
        (n - held_out, held_out - test, test)
    }
}

/// Per-column z-score parameters fitted on the training subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureNormalization {
    /// Compute from training samples (population std, constant columns scale by 1)
    pub fn fit(samples: &[AodSample]) -> Self {
        let dim = samples.first().map(|s| s.features.len()).unwrap_or(0);
        let n = samples.len().max(1) as f64;

        let mut sum = vec![0.0f64; dim];
        let mut sum_sq = vec![0.0f64; dim];
        for sample in samples {
            for (j, &v) in sample.features.iter().enumerate() {
                sum[j] += v as f64;
                sum_sq[j] += (v as f64) * (v as f64);
            }
        }

        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| {
                let sd = (sq / n - m * m).max(0.0).sqrt();
                if sd < 1e-8 {
                    1.0
                } else {
                    sd as f32
                }
            })
            .collect();

        FeatureNormalization {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    pub fn normalize(&self, sample: &AodSample) -> AodSample {
        AodSample {
            features: sample
                .features
                .iter()
                .zip(self.mean.iter().zip(self.std.iter()))
                .map(|(x, (m, s))| (x - m) / s)
                .collect(),
            target: sample.target,
        }
    }

    pub fn apply(&self, dataset: &AodDataset) -> AodDataset {
        let samples = dataset.samples().iter().map(|s| self.normalize(s)).collect();
        AodDataset::from_samples(samples, dataset.feature_dim())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Standardized train/validation/test subsets of one dataset
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train: AodDataset,
    pub val: AodDataset,
    pub test: AodDataset,
    pub normalization: FeatureNormalization,
    pub train_indices: Vec<usize>,
    pub val_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

impl DataSplit {
    /// Shuffle with `seed`, partition by `ratios`, and standardize with
    /// statistics from the training subset only
    pub fn new(dataset: &AodDataset, ratios: SplitRatios, seed: u64) -> Result<Self> {
        let n = dataset.len();
        if n < MIN_ROWS {
            return Err(AodError::InsufficientData {
                rows: n,
                required: MIN_ROWS,
            });
        }

        let (n_train, n_val, _) = ratios.sizes(n);
        if n_train == 0 {
            return Err(AodError::EmptySubset { subset: "training", rows: n });
        }
        if n_val == 0 {
            return Err(AodError::EmptySubset { subset: "validation", rows: n });
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let train_indices = indices[..n_train].to_vec();
        let val_indices = indices[n_train..n_train + n_val].to_vec();
        let test_indices = indices[n_train + n_val..].to_vec();

        let pick = |idx: &[usize]| -> Vec<AodSample> {
            idx.iter().map(|&i| dataset.samples()[i].clone()).collect()
        };
        let train_raw = pick(&train_indices);
        let normalization = FeatureNormalization::fit(&train_raw);

        let standardize = |raw: Vec<AodSample>| {
            let samples = raw.iter().map(|s| normalization.normalize(s)).collect();
            AodDataset::from_samples(samples, dataset.feature_dim())
        };

        let split = DataSplit {
            train: standardize(train_raw),
            val: standardize(pick(&val_indices)),
            test: standardize(pick(&test_indices)),
            normalization,
            train_indices,
            val_indices,
            test_indices,
        };

        log::debug!(
            "Split {} samples: train={}, val={}, test={}",
            n,
            split.train.len(),
            split.val.len(),
            split.test.len()
        );

        Ok(split)
    }

    pub fn feature_dim(&self) -> usize {
        self.train.feature_dim()
    }
}
