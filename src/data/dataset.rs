//! Burn Dataset implementation for tabular AOD measurements
//!
//! Loads delimited tables, drops rows with missing or sentinel values in any
//! used column, and batches samples into feature/target tensors.

use std::io::Read;
use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::{AodError, DataConfig, Result};

/// A single cleaned row: predictor values and the AOD550 target
#[derive(Debug, Clone, PartialEq)]
pub struct AodSample {
    pub features: Vec<f32>,
    pub target: f32,
}

/// Counts gathered while cleaning a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub total_rows: usize,
    pub missing_rows: usize,
    pub sentinel_rows: usize,
}

impl CleaningStats {
    pub fn kept_rows(&self) -> usize {
        self.total_rows - self.missing_rows - self.sentinel_rows
    }
}

/// Immutable collection of cleaned samples
#[derive(Debug, Clone, Default)]
pub struct AodDataset {
    samples: Vec<AodSample>,
    feature_dim: usize,
    stats: CleaningStats,
}

enum Cell {
    Value(f64),
    Missing,
    Sentinel,
}

fn parse_cell(raw: &str, sentinel: f64) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Missing;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "na" | "n/a" | "nan" | "null" | "none" => return Cell::Missing,
        _ => {}
    }
    match trimmed.parse::<f64>() {
        Ok(v) if !v.is_finite() => Cell::Missing,
        Ok(v) if (v - sentinel).abs() < 1e-9 => Cell::Sentinel,
        Ok(v) => Cell::Value(v),
        Err(_) => Cell::Missing,
    }
}

impl AodDataset {
    /// Load and clean a CSV file
    pub fn from_csv(path: &Path, config: &DataConfig) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, config, &path.display().to_string())
    }

    /// Load and clean CSV content from any reader
    ///
    /// `source` only names the input in error messages.
    pub fn from_reader<R: Read>(reader: R, config: &DataConfig, source: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column_index = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| AodError::MissingColumn {
                    column: name.to_string(),
                    file: source.to_string(),
                })
        };

        let feature_idx = config
            .feature_columns
            .iter()
            .map(|c| column_index(c))
            .collect::<Result<Vec<_>>>()?;
        let target_idx = column_index(&config.target_column)?;

        let mut samples = Vec::new();
        let mut stats = CleaningStats::default();

        for record in reader.records() {
            let record = record?;
            stats.total_rows += 1;

            let mut values = Vec::with_capacity(feature_idx.len() + 1);
            let mut missing = false;
            let mut sentinel = false;
            for &idx in feature_idx.iter().chain(std::iter::once(&target_idx)) {
                match parse_cell(record.get(idx).unwrap_or(""), config.sentinel) {
                    Cell::Value(v) => values.push(v as f32),
                    Cell::Missing => missing = true,
                    Cell::Sentinel => sentinel = true,
                }
            }

            if missing {
                stats.missing_rows += 1;
                continue;
            }
            if sentinel {
                stats.sentinel_rows += 1;
                continue;
            }

            let target = values.pop().unwrap_or_default();
            samples.push(AodSample {
                features: values,
                target,
            });
        }

        log::info!(
            "Loaded {}: {} rows, {} kept ({} missing, {} sentinel)",
            source,
            stats.total_rows,
            stats.kept_rows(),
            stats.missing_rows,
            stats.sentinel_rows
        );

        Ok(AodDataset {
            samples,
            feature_dim: feature_idx.len(),
            stats,
        })
    }

    /// Build a dataset from already-clean samples
    pub fn from_samples(samples: Vec<AodSample>, feature_dim: usize) -> Self {
        let stats = CleaningStats {
            total_rows: samples.len(),
            ..CleaningStats::default()
        };
        AodDataset {
            samples,
            feature_dim,
            stats,
        }
    }

    /// Get the number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn samples(&self) -> &[AodSample] {
        &self.samples
    }

    pub fn stats(&self) -> CleaningStats {
        self.stats
    }

    pub fn targets(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.target).collect()
    }

    /// Whole dataset as a single batch on `device`
    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> AodBatch<B> {
        AodBatcher::<B>::new(device.clone()).batch(self.samples.clone(), device)
    }
}

impl Dataset<AodSample> for AodDataset {
    fn get(&self, index: usize) -> Option<AodSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Batch of samples for training
#[derive(Debug, Clone)]
pub struct AodBatch<B: Backend> {
    /// Standardized features: [batch, feature_dim]
    pub features: Tensor<B, 2>,
    /// Targets: [batch, 1]
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating training batches
#[derive(Clone)]
pub struct AodBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> AodBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        AodBatcher { device }
    }
}

impl<B: Backend> Batcher<B, AodSample, AodBatch<B>> for AodBatcher<B> {
    fn batch(&self, items: Vec<AodSample>, _device: &B::Device) -> AodBatch<B> {
        let batch_size = items.len();
        let feature_dim = items.first().map(|s| s.features.len()).unwrap_or(0);

        let mut feature_data = Vec::with_capacity(batch_size * feature_dim);
        let mut target_data = Vec::with_capacity(batch_size);
        for sample in &items {
            feature_data.extend_from_slice(&sample.features);
            target_data.push(sample.target);
        }

        let features = Tensor::<B, 1>::from_floats(feature_data.as_slice(), &self.device)
            .reshape([batch_size, feature_dim]);
        let targets = Tensor::<B, 1>::from_floats(target_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        AodBatch { features, targets }
    }
}
