//! # Word Tokenizer
//!
//! Splits raw text into word tokens with byte offsets. Runs of word
//! characters form one token; every punctuation or symbol character is a
//! token of its own, which keeps entity boundaries at character granularity
//! around hyphens, slashes and parentheses common in clinical text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A token extracted from raw text with positional information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The token text content
    pub text: String,
    /// Start byte position in the original string
    pub start: usize,
    /// End byte position in the original string
    pub end: usize,
    /// Token index in the sequence
    pub index: usize,
}

/// Segments raw text into word tokens.
pub trait DocumentTokenizer {
    fn tokenize(&self, input: &str) -> Vec<Token>;
}

static WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+|[^\w\s]").unwrap_or_else(|e| panic!("invalid word pattern: {e}"))
});

/// Whitespace and punctuation tokenizer.
#[derive(Debug, Clone, Default)]
pub struct WordTokenizer;

impl WordTokenizer {
    /// Create a new tokenizer instance.
    pub fn new() -> Self {
        Self
    }

    /// Get the original byte span covered by tokens `start_idx..end_idx`.
    pub fn get_spans(
        &self,
        tokens: &[Token],
        start_idx: usize,
        end_idx: usize,
    ) -> Option<(usize, usize)> {
        if start_idx >= tokens.len() || end_idx > tokens.len() || start_idx >= end_idx {
            return None;
        }

        let start = tokens[start_idx].start;
        let end = tokens[end_idx - 1].end;
        Some((start, end))
    }
}

impl DocumentTokenizer for WordTokenizer {
    /// # Examples
    /// ```
    /// use seqtag_core::text::{DocumentTokenizer, WordTokenizer};
    ///
    /// let tokens = WordTokenizer::new().tokenize("Tom has ibuprofen-400.");
    /// let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
    /// assert_eq!(texts, ["Tom", "has", "ibuprofen", "-", "400", "."]);
    /// ```
    fn tokenize(&self, input: &str) -> Vec<Token> {
        WORD_PATTERN
            .find_iter(input)
            .enumerate()
            .map(|(index, m)| Token {
                text: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
                index,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = WordTokenizer::new().tokenize("Tom has ibuprofen");

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2].text, "ibuprofen");
        assert_eq!(tokens[2].start, 8);
        assert_eq!(tokens[2].end, 17);
        assert_eq!(tokens[2].index, 2);
    }

    #[test]
    fn test_tokenize_splits_punctuation() {
        let tokens = WordTokenizer::new().tokenize("(5mg/day)");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.clone()).collect();
        assert_eq!(texts, vec!["(", "5mg", "/", "day", ")"]);
    }

    #[test]
    fn test_tokenize_unicode_offsets() {
        let input = "café olé";
        let tokens = WordTokenizer::new().tokenize(input);
        assert_eq!(tokens.len(), 2);
        assert_eq!(&input[tokens[1].start..tokens[1].end], "olé");
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(WordTokenizer::new().tokenize("").is_empty());
        assert!(WordTokenizer::new().tokenize("   \n\t").is_empty());
    }

    #[test]
    fn test_get_spans() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.tokenize("Tom has ibuprofen");

        assert_eq!(tokenizer.get_spans(&tokens, 1, 3), Some((4, 17)));
        assert_eq!(tokenizer.get_spans(&tokens, 2, 2), None);
    }
}
