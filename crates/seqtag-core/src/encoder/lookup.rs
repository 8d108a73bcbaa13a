//! Embedding-table encoder for small vocabularies and CPU experiments.

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder, embedding, linear};

use crate::encoder::{EncoderSpec, SequenceEncoder};
use crate::error::{Result, SeqTagError};

/// `tanh(W · embed(id) + b)`, position-independent.
#[derive(Debug)]
pub struct LookupEncoder {
    embeddings: Embedding,
    projection: Linear,
    vocab_size: usize,
    hidden_size: usize,
}

impl LookupEncoder {
    /// Parameters live under `lookup.*`.
    pub fn new(vocab_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        if vocab_size == 0 || hidden_size == 0 {
            return Err(SeqTagError::Configuration(
                "lookup encoder needs a non-empty vocabulary and hidden size".into(),
            ));
        }
        let vb = vb.pp("lookup");
        let embeddings = embedding(vocab_size, hidden_size, vb.pp("embeddings"))?;
        let projection = linear(hidden_size, hidden_size, vb.pp("projection"))?;
        Ok(Self {
            embeddings,
            projection,
            vocab_size,
            hidden_size,
        })
    }
}

impl SequenceEncoder for LookupEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let embedded = self.embeddings.forward(input_ids)?;
        let hidden = self.projection.forward(&embedded)?.tanh()?;
        // Zero padded positions so they carry no signal.
        let mask = attention_mask
            .to_dtype(hidden.dtype())?
            .unsqueeze(2)?
            .broadcast_as(hidden.shape())?;
        Ok(hidden.mul(&mask)?)
    }

    fn spec(&self) -> EncoderSpec {
        EncoderSpec::Lookup {
            vocab_size: self.vocab_size,
            hidden_size: self.hidden_size,
        }
    }
}
