//! Fixtures shared by this crate's tests and downstream test suites.

use std::collections::HashMap;

use tokenizers::Tokenizer as HfTokenizer;
use tokenizers::models::wordpiece::WordPiece;

use crate::text::SubwordAligner;

/// Fourteen-entry WordPiece vocabulary: `ibuprofen` splits into four
/// pieces, `aspirin` into two, anything else unknown becomes `[UNK]`.
pub fn tiny_tokenizer() -> HfTokenizer {
    let tokens = [
        "[PAD]", "[UNK]", "[CLS]", "[SEP]", "Tom", "has", "ib", "##up", "##ro", "##fen", "asp",
        "##irin", "takes", "daily",
    ];
    let vocab: HashMap<String, u32> = tokens
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), id as u32))
        .collect();
    let model = WordPiece::builder()
        .vocab(vocab)
        .unk_token("[UNK]".to_string())
        .build()
        .expect("fixture vocabulary is valid");
    HfTokenizer::new(model)
}

/// Aligner over [`tiny_tokenizer`].
pub fn tiny_aligner(max_length: usize) -> SubwordAligner {
    SubwordAligner::new(tiny_tokenizer(), max_length).expect("fixture aligner is valid")
}
