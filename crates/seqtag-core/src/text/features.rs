//! Token features for non-neural pipeline variants.
//!
//! The transformer tagger only needs token text; richer extractors can plug
//! in behind [`FeatureExtractor`].

use serde::{Deserialize, Serialize};

use crate::text::tokenizer::Token;

/// Features of a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFeatures {
    pub index: usize,
    pub text: String,
}

pub trait FeatureExtractor {
    fn extract(&self, tokens: &[Token]) -> Vec<TokenFeatures>;
}

/// Text-only extractor: each token contributes its surface form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureExtractor for TextExtractor {
    fn extract(&self, tokens: &[Token]) -> Vec<TokenFeatures> {
        tokens
            .iter()
            .map(|token| TokenFeatures {
                index: token.index,
                text: token.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokenizer::{DocumentTokenizer, WordTokenizer};

    #[test]
    fn text_extractor_keeps_surface_forms() {
        let tokens = WordTokenizer::new().tokenize("Tom has ibuprofen.");
        let features = TextExtractor::new().extract(&tokens);
        assert_eq!(features.len(), 4);
        assert_eq!(features[2].text, "ibuprofen");
        assert_eq!(features[3].index, 3);
    }
}
