//! # Subword Alignment
//!
//! Bridges word-level documents and the subword sequences a pretrained
//! transformer consumes. Each word is encoded on its own so that its pieces
//! form one contiguous range; the sequence is wrapped in `[CLS] ... [SEP]`.
//!
//! Documents longer than the model's maximum length are truncated from the
//! end at word granularity. The same policy applies in training and
//! inference; the number of dropped words is reported on the alignment map.

use std::ops::Range;
use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;
use tracing::debug;

use crate::error::{Result, SeqTagError};
use crate::tagging::decoder::SubwordTargets;

/// Names of the special tokens looked up in the subword vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: String,
    pub sep: String,
    pub pad: String,
    pub unk: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            cls: "[CLS]".into(),
            sep: "[SEP]".into(),
            pad: "[PAD]".into(),
            unk: "[UNK]".into(),
        }
    }
}

/// For each kept word, the range of subword positions it expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMap {
    spans: Vec<Range<usize>>,
    sequence_len: usize,
    truncated_words: usize,
}

impl AlignmentMap {
    /// Subword ranges (positions in the full sequence, specials included).
    pub fn spans(&self) -> &[Range<usize>] {
        &self.spans
    }

    /// Number of words that made it into the sequence.
    pub fn word_count(&self) -> usize {
        self.spans.len()
    }

    /// Number of trailing words dropped to fit the maximum length.
    pub fn truncated_words(&self) -> usize {
        self.truncated_words
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated_words > 0
    }

    /// Length of the subword sequence, special tokens included.
    pub fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    /// Total pieces produced by the kept words (special tokens excluded).
    pub fn piece_count(&self) -> usize {
        self.spans.iter().map(|span| span.len()).sum()
    }

    /// `true` at the first piece of every kept word.
    pub fn score_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.sequence_len];
        for span in &self.spans {
            mask[span.start] = true;
        }
        mask
    }
}

/// A document encoded as subword ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedDocument {
    pub input_ids: Vec<u32>,
    pub alignment: AlignmentMap,
}

/// Maps words onto the pretrained tokenizer's subword vocabulary.
#[derive(Clone)]
pub struct SubwordAligner {
    tokenizer: HfTokenizer,
    cls_id: u32,
    sep_id: u32,
    pad_id: u32,
    unk_id: u32,
    max_length: usize,
}

impl std::fmt::Debug for SubwordAligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubwordAligner")
            .field("vocab_size", &self.vocab_size())
            .field("max_length", &self.max_length)
            .finish()
    }
}

impl SubwordAligner {
    /// Create an aligner using BERT-style special token names.
    pub fn new(tokenizer: HfTokenizer, max_length: usize) -> Result<Self> {
        Self::with_special_tokens(tokenizer, &SpecialTokens::default(), max_length)
    }

    /// The tokenizer's own padding and truncation are switched off: words
    /// are encoded one at a time and the sequence limit is enforced here.
    pub fn with_special_tokens(
        mut tokenizer: HfTokenizer,
        special: &SpecialTokens,
        max_length: usize,
    ) -> Result<Self> {
        if max_length < 3 {
            return Err(SeqTagError::Configuration(format!(
                "max sequence length {max_length} cannot hold two special tokens and a word"
            )));
        }
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| SeqTagError::Tokenizer(format!("failed to disable truncation: {e}")))?;

        let lookup = |token: &str| {
            tokenizer.token_to_id(token).ok_or_else(|| {
                SeqTagError::Configuration(format!("special token {token} missing from vocabulary"))
            })
        };
        let cls_id = lookup(&special.cls)?;
        let sep_id = lookup(&special.sep)?;
        let pad_id = lookup(&special.pad)?;
        let unk_id = lookup(&special.unk)?;

        Ok(Self {
            tokenizer,
            cls_id,
            sep_id,
            pad_id,
            unk_id,
            max_length,
        })
    }

    /// Load a `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = HfTokenizer::from_file(path).map_err(|e| {
            SeqTagError::Tokenizer(format!("failed to load {}: {e}", path.display()))
        })?;
        Self::new(tokenizer, max_length)
    }

    pub fn tokenizer(&self) -> &HfTokenizer {
        &self.tokenizer
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Same vocabulary, different maximum sequence length.
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self> {
        if max_length < 3 {
            return Err(SeqTagError::Configuration(format!(
                "max sequence length {max_length} cannot hold two special tokens and a word"
            )));
        }
        self.max_length = max_length;
        Ok(self)
    }

    /// Subword ids of a single word. Never empty: a word the vocabulary
    /// cannot represent becomes `[UNK]`.
    pub fn word_pieces(&self, word: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(word, false)
            .map_err(|e| SeqTagError::Tokenizer(format!("failed to encode {word:?}: {e}")))?;
        let ids = encoding.get_ids();
        if ids.is_empty() {
            Ok(vec![self.unk_id])
        } else {
            Ok(ids.to_vec())
        }
    }

    /// Encode a word sequence and record which positions each word owns.
    pub fn align<S: AsRef<str>>(&self, words: &[S]) -> Result<AlignedDocument> {
        let mut input_ids = vec![self.cls_id];
        let mut spans = Vec::with_capacity(words.len());
        let mut truncated_words = 0;

        for (idx, word) in words.iter().enumerate() {
            let pieces = self.word_pieces(word.as_ref())?;
            // one slot stays reserved for [SEP]
            if input_ids.len() + pieces.len() + 1 > self.max_length {
                truncated_words = words.len() - idx;
                debug!(
                    kept = idx,
                    truncated = truncated_words,
                    max_length = self.max_length,
                    "truncating document"
                );
                break;
            }
            let start = input_ids.len();
            input_ids.extend_from_slice(&pieces);
            spans.push(start..input_ids.len());
        }
        input_ids.push(self.sep_id);

        let alignment = AlignmentMap {
            spans,
            sequence_len: input_ids.len(),
            truncated_words,
        };
        Ok(AlignedDocument {
            input_ids,
            alignment,
        })
    }

    /// Spread word labels onto subword positions.
    ///
    /// The first piece of each word receives the word's label; continuation
    /// pieces and special tokens are `None` and excluded from the loss.
    /// Labels of truncated words are dropped.
    pub fn project_labels(&self, word_labels: &[usize], map: &AlignmentMap) -> SubwordTargets {
        let mut targets = vec![None; map.sequence_len];
        for (span, &label) in map.spans.iter().zip(word_labels) {
            targets[span.start] = Some(label);
        }
        targets
    }

    /// Collapse subword predictions back to one label per kept word, taking
    /// the prediction of each word's first piece.
    pub fn project_predictions(
        &self,
        subword_predictions: &[Option<usize>],
        map: &AlignmentMap,
    ) -> Result<Vec<usize>> {
        map.spans
            .iter()
            .enumerate()
            .map(|(word, span)| {
                subword_predictions
                    .get(span.start)
                    .copied()
                    .flatten()
                    .ok_or_else(|| {
                        SeqTagError::Alignment(format!(
                            "no prediction for word {word} at subword position {}",
                            span.start
                        ))
                    })
            })
            .collect()
    }
}
