//! Padded model input for a group of aligned documents.

use candle_core::{Device, Tensor};
use seqtag_core::Result;
use seqtag_core::text::AlignedDocument;

/// One forward-pass worth of documents, padded to equal subword length.
#[derive(Debug)]
pub struct Batch {
    /// `[batch, seq_len]` subword ids, padded with the vocabulary's pad id
    pub input_ids: Tensor,
    /// `[batch, seq_len]`, 1 for real positions and 0 for padding
    pub attention_mask: Tensor,
    /// First-piece positions of each document, unpadded
    pub score_masks: Vec<Vec<bool>>,
}

impl Batch {
    /// Pad `documents` to the longest sequence among them.
    pub fn new(documents: &[&AlignedDocument], pad_id: u32, device: &Device) -> Result<Self> {
        let batch_size = documents.len();
        let seq_len = documents
            .iter()
            .map(|doc| doc.input_ids.len())
            .max()
            .unwrap_or(0);

        let mut ids = vec![pad_id; batch_size * seq_len];
        let mut mask = vec![0u32; batch_size * seq_len];
        for (row, doc) in documents.iter().enumerate() {
            let offset = row * seq_len;
            ids[offset..offset + doc.input_ids.len()].copy_from_slice(&doc.input_ids);
            mask[offset..offset + doc.input_ids.len()].fill(1);
        }

        Ok(Self {
            input_ids: Tensor::from_vec(ids, (batch_size, seq_len), device)?,
            attention_mask: Tensor::from_vec(mask, (batch_size, seq_len), device)?,
            score_masks: documents
                .iter()
                .map(|doc| doc.alignment.score_mask())
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.score_masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.score_masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tiny_aligner;

    #[test]
    fn pads_to_longest_document() {
        let aligner = tiny_aligner(32);
        let long = aligner.align(&["Tom", "has", "ibuprofen"]).unwrap();
        let short = aligner.align(&["Tom"]).unwrap();
        let batch = Batch::new(&[&long, &short], aligner.pad_id(), &Device::Cpu).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.input_ids.dims(), &[2, 8]);
        let ids = batch.input_ids.to_vec2::<u32>().unwrap();
        assert_eq!(ids[1], vec![2, 4, 3, 0, 0, 0, 0, 0]);
        let mask = batch.attention_mask.to_vec2::<u32>().unwrap();
        assert_eq!(mask[1], vec![1, 1, 1, 0, 0, 0, 0, 0]);
        assert_eq!(mask[0], vec![1; 8]);
        assert_eq!(batch.score_masks[1], vec![false, true, false]);
    }
}
