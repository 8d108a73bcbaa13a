//! # Sequence Encoders
//!
//! An encoder maps a padded batch of subword ids `[batch, seq_len]` and its
//! attention mask to one embedding per position `[batch, seq_len, hidden]`.
//! It is a pure function of its weights and input.

pub mod bert;
pub mod lookup;
pub mod pretrained;

use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use bert::BertEncoder;
pub use lookup::LookupEncoder;
pub use pretrained::{LoadSummary, PretrainedFiles, copy_pretrained};

/// Per-subword embedding producer shared by training and inference.
pub trait SequenceEncoder: Debug + Send + Sync {
    /// Width of each output embedding.
    fn hidden_size(&self) -> usize;

    /// Longest sequence the encoder accepts, if bounded.
    fn max_positions(&self) -> Option<usize> {
        None
    }

    /// Encode `input_ids` `[batch, seq_len]` (u32) under `attention_mask`
    /// (1 = real token, 0 = padding).
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor>;

    /// Description from which the same architecture can be rebuilt.
    fn spec(&self) -> EncoderSpec;
}

/// Serializable encoder architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderSpec {
    /// BERT body; `config` is the checkpoint's `config.json`.
    Bert { config: serde_json::Value },
    /// Embedding table with a tanh projection.
    Lookup {
        vocab_size: usize,
        hidden_size: usize,
    },
}

impl EncoderSpec {
    /// Instantiate the encoder, creating or fetching its weights through `vb`.
    pub fn build(&self, vb: VarBuilder) -> Result<Box<dyn SequenceEncoder>> {
        match self {
            EncoderSpec::Bert { config } => Ok(Box::new(BertEncoder::new(config.clone(), vb)?)),
            EncoderSpec::Lookup {
                vocab_size,
                hidden_size,
            } => Ok(Box::new(LookupEncoder::new(*vocab_size, *hidden_size, vb)?)),
        }
    }
}
