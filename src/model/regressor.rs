//! Feed-forward AOD regressor
//!
//! Architecture: Input(11) → Hidden1(512) → act → Dropout
//!                        → Hidden2(256) → act → Dropout
//!                        → Hidden3(128) → act → Dropout
//!                        → output(1)

use std::path::Path;

use burn::module::{Ignored, Module};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::activation::{leaky_relu, relu, sigmoid, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::{AodError, Result};

/// Hidden layer widths (fixed, not part of the search space)
pub const HIDDEN_DIMS: [usize; 3] = [512, 256, 128];

/// Negative slope used by `Activation::LeakyReLU`
pub const LEAKY_RELU_SLOPE: f64 = 0.01;

/// Hidden-layer activation function
///
/// Serialized by name; unknown names read back as ReLU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Activation {
    ReLU,
    LeakyReLU,
    Sigmoid,
    Tanh,
}

impl Activation {
    /// Name lookup table shared by config parsing and reporting
    pub const TABLE: [(&'static str, Activation); 4] = [
        ("ReLU", Activation::ReLU),
        ("LeakyReLU", Activation::LeakyReLU),
        ("Sigmoid", Activation::Sigmoid),
        ("Tanh", Activation::Tanh),
    ];

    pub const ALL: [Activation; 4] = [
        Activation::ReLU,
        Activation::LeakyReLU,
        Activation::Sigmoid,
        Activation::Tanh,
    ];

    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, a)| a == self)
            .map(|(name, _)| *name)
            .unwrap_or("ReLU")
    }

    /// Resolve a name case-insensitively; unknown names fall back to ReLU
    pub fn from_name(name: &str) -> Self {
        match Self::TABLE
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
        {
            Some((_, activation)) => *activation,
            None => {
                log::warn!("Unknown activation '{}', using ReLU", name);
                Activation::ReLU
            }
        }
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::ReLU => relu(x),
            Activation::LeakyReLU => leaky_relu(x, LEAKY_RELU_SLOPE),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => tanh(x),
        }
    }
}

impl From<String> for Activation {
    fn from(name: String) -> Self {
        Activation::from_name(&name)
    }
}

impl From<Activation> for String {
    fn from(activation: Activation) -> Self {
        activation.name().to_string()
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the regressor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressorConfig {
    /// Input dimension (feature columns)
    pub input_dim: usize,
    /// Dropout rate after every hidden activation
    pub dropout: f64,
    pub activation: Activation,
}

impl RegressorConfig {
    pub fn new(input_dim: usize, dropout: f64, activation: Activation) -> Self {
        RegressorConfig {
            input_dim,
            dropout,
            activation,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Regressor<B> {
        Regressor::new(device, *self)
    }
}

/// A single hidden layer block: Linear → activation → Dropout
#[derive(Module, Debug)]
pub struct HiddenBlock<B: Backend> {
    linear: Linear<B>,
    activation: Ignored<Activation>,
    dropout: Dropout,
}

impl<B: Backend> HiddenBlock<B> {
    pub fn new(
        device: &B::Device,
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        dropout: f64,
    ) -> Self {
        HiddenBlock {
            linear: LinearConfig::new(in_dim, out_dim).init(device),
            activation: Ignored(activation),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = self.activation.0.apply(x);
        self.dropout.forward(x)
    }
}

/// Multi-layer perceptron producing one scalar per input row
#[derive(Module, Debug)]
pub struct Regressor<B: Backend> {
    hidden: Vec<HiddenBlock<B>>,
    output: Linear<B>,
}

impl<B: Backend> Regressor<B> {
    /// Create a new regressor with freshly initialized weights
    pub fn new(device: &B::Device, config: RegressorConfig) -> Self {
        let mut hidden = Vec::with_capacity(HIDDEN_DIMS.len());
        let mut in_dim = config.input_dim;
        for &out_dim in HIDDEN_DIMS.iter() {
            hidden.push(HiddenBlock::new(
                device,
                in_dim,
                out_dim,
                config.activation,
                config.dropout,
            ));
            in_dim = out_dim;
        }

        Regressor {
            hidden,
            output: LinearConfig::new(in_dim, 1).init(device),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `features` - Standardized features [batch, input_dim]
    ///
    /// # Returns
    /// Predictions [batch, 1]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self
            .hidden
            .iter()
            .fold(features, |x, block| block.forward(x));
        self.output.forward(x)
    }

    /// Predict a flat vector of targets
    pub fn predict(&self, features: Tensor<B, 2>) -> Result<Vec<f32>> {
        self.forward(features)
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|e| AodError::TensorData(format!("{:?}", e)))
    }

    /// Save model to `<path>.mpk`
    pub fn save(&self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.clone().into_record(), path.to_path_buf())
            .map_err(|e| AodError::Checkpoint(e.to_string()))
    }

    /// Load model from `<path>.mpk`
    pub fn load(device: &B::Device, path: &Path, config: RegressorConfig) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(path.to_path_buf(), device)
            .map_err(|e| AodError::Checkpoint(e.to_string()))?;

        let model = Self::new(device, config);
        Ok(model.load_record(record))
    }
}
