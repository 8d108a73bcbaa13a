//! Learner hyperparameters.

use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SeqTagError};

/// Configuration for a sequence-labelling learner.
///
/// Every field has a documented default; JSON files may give any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// `-1` runs on the CPU, `n >= 0` on accelerator `n`
    pub cuda_device: i32,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    /// Hub id or local directory of the transformer checkpoint
    pub pretrained_model: Option<String>,
    /// Use a CRF tag decoder instead of a per-token softmax
    pub using_crf: bool,
    /// Subword positions per document, special tokens included
    pub max_sequence_length: usize,
    /// Seed for document shuffling
    pub seed: u64,
    /// Penalise illegal IOB transitions in the CRF
    pub constrain_transitions: bool,
    pub weight_decay: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            cuda_device: -1,
            batch_size: 8,
            learning_rate: 1e-5,
            epochs: 3,
            pretrained_model: None,
            using_crf: false,
            max_sequence_length: 512,
            seed: 42,
            constrain_transitions: true,
            weight_decay: 0.01,
        }
    }
}

impl LearnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_cuda_device(mut self, device: i32) -> Self {
        self.cuda_device = device;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_pretrained_model(mut self, model: impl Into<String>) -> Self {
        self.pretrained_model = Some(model.into());
        self
    }

    pub fn with_crf(mut self, using_crf: bool) -> Self {
        self.using_crf = using_crf;
        self
    }

    pub fn with_max_sequence_length(mut self, length: usize) -> Self {
        self.max_sequence_length = length;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_constrained_transitions(mut self, constrain: bool) -> Self {
        self.constrain_transitions = constrain;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Check hyperparameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cuda_device < -1 {
            return Err(SeqTagError::Configuration(format!(
                "cuda_device must be -1 (CPU) or a device index, got {}",
                self.cuda_device
            )));
        }
        if self.batch_size == 0 {
            return Err(SeqTagError::Configuration(
                "batch_size must be positive".into(),
            ));
        }
        if self.epochs == 0 {
            return Err(SeqTagError::Configuration("epochs must be positive".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(SeqTagError::Configuration(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(SeqTagError::Configuration(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        // [CLS] + one piece + [SEP]
        if self.max_sequence_length < 3 {
            return Err(SeqTagError::Configuration(format!(
                "max_sequence_length must be at least 3, got {}",
                self.max_sequence_length
            )));
        }
        if matches!(&self.pretrained_model, Some(model) if model.trim().is_empty()) {
            return Err(SeqTagError::Configuration(
                "pretrained_model must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The checkpoint required by the transformer encoder.
    pub fn require_pretrained_model(&self) -> Result<&str> {
        self.pretrained_model
            .as_deref()
            .ok_or_else(|| SeqTagError::Configuration("pretrained_model is required".into()))
    }

    /// Open the configured device.
    pub fn device(&self) -> Result<Device> {
        if self.cuda_device < 0 {
            info!("Using CPU device");
            return Ok(Device::Cpu);
        }
        let index = self.cuda_device as usize;
        let device = Device::new_cuda(index).map_err(|e| {
            SeqTagError::Configuration(format!("cannot open CUDA device {index}: {e}"))
        })?;
        info!(index, "Using CUDA device");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LearnerConfig::default();
        assert_eq!(config.cuda_device, -1);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.learning_rate, 1e-5);
        assert_eq!(config.epochs, 3);
        assert!(!config.using_crf);
        assert!(config.pretrained_model.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LearnerConfig::new()
            .with_batch_size(1)
            .with_epochs(10)
            .with_crf(true)
            .with_pretrained_model("bert-base-cased");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.epochs, 10);
        assert!(config.using_crf);
        assert_eq!(config.require_pretrained_model().unwrap(), "bert-base-cased");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let bad = [
            LearnerConfig::new().with_batch_size(0),
            LearnerConfig::new().with_epochs(0),
            LearnerConfig::new().with_learning_rate(0.0),
            LearnerConfig::new().with_learning_rate(f64::NAN),
            LearnerConfig::new().with_cuda_device(-2),
            LearnerConfig::new().with_max_sequence_length(2),
            LearnerConfig::new().with_weight_decay(-1.0),
            LearnerConfig::new().with_pretrained_model("  "),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(SeqTagError::Configuration(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_pretrained_model() {
        let err = LearnerConfig::new().require_pretrained_model().unwrap_err();
        assert!(err.to_string().contains("pretrained_model"));
    }

    #[test]
    fn test_partial_json() {
        let config: LearnerConfig =
            serde_json::from_str(r#"{"batch_size": 2, "using_crf": true}"#).unwrap();
        assert_eq!(config.batch_size, 2);
        assert!(config.using_crf);
        assert_eq!(config.epochs, 3);
    }

    #[test]
    fn test_cpu_device() {
        assert!(LearnerConfig::new().device().unwrap().is_cpu());
    }
}
