//! Prediction and inference
//!
//! Load finished runs and score new tables.

pub mod inference;

pub use inference::Predictor;
