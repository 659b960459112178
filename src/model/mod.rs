//! Neural network architecture
//!
//! A fixed-depth feed-forward regressor with a tunable activation and dropout rate.

pub mod regressor;

pub use regressor::{Activation, Regressor, RegressorConfig};
