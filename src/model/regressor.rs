//! Fixed-topology feed-forward regressor
//!
//! Architecture: Input(dim) → Hidden(16) → ReLU → Dropout
//!                          → Hidden(16) → ReLU → Dropout
//!                          → Output(1)

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::TrainingConfig;

/// Configuration for the regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorConfig {
    /// Number of input features
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub dropout: f64,
}

impl RegressorConfig {
    pub fn new(input_dim: usize) -> Self {
        RegressorConfig {
            input_dim,
            hidden_dim: 16,
            dropout: 0.2,
        }
    }

    pub fn from_training(input_dim: usize, training: &TrainingConfig) -> Self {
        RegressorConfig {
            input_dim,
            hidden_dim: training.hidden_dim,
            dropout: training.dropout,
        }
    }
}

/// A single hidden layer block: Linear → ReLU → Dropout
#[derive(Module, Debug)]
pub struct HiddenBlock<B: Backend> {
    linear: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> HiddenBlock<B> {
    pub fn new(device: &B::Device, in_dim: usize, out_dim: usize, dropout: f64) -> Self {
        HiddenBlock {
            linear: LinearConfig::new(in_dim, out_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    /// Sum of squared kernel weights, biases excluded
    pub fn kernel_sq_sum(&self) -> Tensor<B, 1> {
        self.linear.weight.val().powf_scalar(2.0).sum()
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = relu(x);
        self.dropout.forward(x)
    }
}

/// Two hidden blocks and a single linear output
#[derive(Module, Debug)]
pub struct Regressor<B: Backend> {
    hidden1: HiddenBlock<B>,
    hidden2: HiddenBlock<B>,
    output: Linear<B>,
}

impl<B: Backend> Regressor<B> {
    pub fn new(device: &B::Device, config: &RegressorConfig) -> Self {
        Regressor {
            hidden1: HiddenBlock::new(device, config.input_dim, config.hidden_dim, config.dropout),
            hidden2: HiddenBlock::new(device, config.hidden_dim, config.hidden_dim, config.dropout),
            output: LinearConfig::new(config.hidden_dim, 1).init(device),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `features` - Normalized features [batch, input_dim]
    ///
    /// # Returns
    /// Predictions [batch, 1]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden1.forward(features);
        let x = self.hidden2.forward(x);
        self.output.forward(x)
    }

    /// L2 penalty on the two hidden kernels; the output layer is not penalised
    pub fn l2_penalty(&self, factor: f64) -> Tensor<B, 1> {
        (self.hidden1.kernel_sq_sum() + self.hidden2.kernel_sq_sum()).mul_scalar(factor)
    }

    /// Save model to file
    pub fn save(&self, path: &str) -> crate::Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.clone().into_record(), path.into())
            .map_err(|e| crate::ConcertError::Io(std::io::Error::other(e.to_string())))
    }

    /// Load model from file
    pub fn load(device: &B::Device, path: &str, config: &RegressorConfig) -> crate::Result<Self>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(path.into(), device)
            .map_err(|e| crate::ConcertError::Io(std::io::Error::other(e.to_string())))?;

        Ok(Self::new(device, config).load_record(record))
    }
}
