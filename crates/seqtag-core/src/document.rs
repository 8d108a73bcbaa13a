use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqTagError};

/// A pre-tokenized document, optionally carrying one gold tag per token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub tokens: Vec<String>,
    #[serde(default, rename = "ner_tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Document {
    /// Creates an unlabeled document for inference.
    pub fn unlabeled<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            tags: None,
        }
    }

    /// Creates a labeled training document.
    ///
    /// Fails if the token and tag sequences differ in length.
    pub fn labeled<S: Into<String>, T: Into<String>>(
        tokens: impl IntoIterator<Item = S>,
        tags: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let doc = Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            tags: Some(tags.into_iter().map(Into::into).collect()),
        };
        doc.check()?;
        Ok(doc)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Verifies `tokens.len() == tags.len()` when tags are present.
    pub fn check(&self) -> Result<()> {
        match &self.tags {
            Some(tags) if tags.len() != self.tokens.len() => Err(SeqTagError::Configuration(
                format!(
                    "document has {} tokens but {} tags",
                    self.tokens.len(),
                    tags.len()
                ),
            )),
            _ => Ok(()),
        }
    }
}
