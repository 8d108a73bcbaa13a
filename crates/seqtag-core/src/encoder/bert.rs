//! BERT body as a [`SequenceEncoder`].

use candle_core::Tensor;
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use tracing::debug;

use crate::encoder::{EncoderSpec, SequenceEncoder};
use crate::error::{Result, SeqTagError};

/// Dimensions read from a checkpoint's `config.json`.
#[derive(Debug, Deserialize)]
struct Dimensions {
    hidden_size: usize,
    #[serde(default)]
    max_position_embeddings: Option<usize>,
}

/// Transformer encoder under the `bert.*` parameter prefix.
pub struct BertEncoder {
    model: BertModel,
    config: serde_json::Value,
    hidden_size: usize,
    max_positions: Option<usize>,
}

impl std::fmt::Debug for BertEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEncoder")
            .field("hidden_size", &self.hidden_size)
            .field("max_positions", &self.max_positions)
            .finish()
    }
}

impl BertEncoder {
    /// Build the architecture described by `config` (a `config.json` value).
    pub fn new(config: serde_json::Value, vb: VarBuilder) -> Result<Self> {
        let dims: Dimensions = serde_json::from_value(config.clone())
            .map_err(|e| SeqTagError::ModelLoad(format!("invalid BERT config: {e}")))?;
        let bert_config: Config = serde_json::from_value(config.clone())
            .map_err(|e| SeqTagError::ModelLoad(format!("invalid BERT config: {e}")))?;

        let model = BertModel::load(vb.pp("bert"), &bert_config)?;
        debug!(
            hidden_size = dims.hidden_size,
            max_positions = ?dims.max_position_embeddings,
            "Built BERT encoder"
        );

        Ok(Self {
            model,
            config,
            hidden_size: dims.hidden_size,
            max_positions: dims.max_position_embeddings,
        })
    }
}

impl SequenceEncoder for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn max_positions(&self) -> Option<usize> {
        self.max_positions
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let token_type_ids = input_ids.zeros_like()?;
        Ok(self
            .model
            .forward(input_ids, &token_type_ids, Some(attention_mask))?)
    }

    fn spec(&self) -> EncoderSpec {
        EncoderSpec::Bert {
            config: self.config.clone(),
        }
    }
}
