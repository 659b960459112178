//! Data ingestion
//!
//! CSV loading and cleaning, seeded splits and feature standardization.

pub mod dataset;
pub mod split;

pub use dataset::{AodBatch, AodBatcher, AodDataset, AodSample};
pub use split::{DataSplit, FeatureNormalization, SplitRatios};
