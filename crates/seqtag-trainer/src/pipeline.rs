//! # BERT Pipeline
//!
//! Wires a word tokenizer, a text feature extractor and a transformer
//! learner into one named pipeline.

use serde::{Deserialize, Serialize};

use seqtag_core::tagging::LabelSpace;
use seqtag_core::text::{
    DocumentTokenizer, Entity, FeatureExtractor, TextExtractor, WordTokenizer, assemble_entities,
};
use seqtag_core::{Document, LearnerConfig, Result};

use crate::learner::Learner;

const NAME: &str = "bert_pipeline";
const DESCRIPTION: &str =
    "Pipeline tuned for the extraction of ADE related entities from the 2018 N2C2 Shared Task";
const LEARNER_NAME: &str = "BERT";

/// Tagged text with its entity mentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub tokens: Vec<String>,
    pub tags: Vec<String>,
    pub entities: Vec<Entity>,
    pub truncated_words: usize,
}

/// Named pipeline around a BERT learner.
#[derive(Debug, Clone)]
pub struct BertPipeline {
    entities: Vec<String>,
    labels: LabelSpace,
    config: LearnerConfig,
    tokenizer: WordTokenizer,
    extractor: TextExtractor,
}

impl BertPipeline {
    /// Validate `config` (a pretrained model is required) and build the
    /// IOB label space for `entities`.
    pub fn new<S: AsRef<str>>(entities: &[S], config: LearnerConfig) -> Result<Self> {
        config.validate()?;
        config.require_pretrained_model()?;
        let labels = LabelSpace::from_entities(entities)?;
        Ok(Self {
            entities: entities.iter().map(|e| e.as_ref().to_string()).collect(),
            labels,
            config,
            tokenizer: WordTokenizer::new(),
            extractor: TextExtractor::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        NAME
    }

    pub fn description(&self) -> &'static str {
        DESCRIPTION
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// The learner's display name and a fresh learner built from the
    /// pipeline's hyperparameters.
    pub fn learner(&self) -> Result<(&'static str, Learner)> {
        let learner = Learner::new(self.config.clone(), self.labels.clone())?;
        Ok((LEARNER_NAME, learner))
    }

    pub fn tokenizer(&self) -> &WordTokenizer {
        &self.tokenizer
    }

    pub fn feature_extractor(&self) -> &dyn FeatureExtractor {
        &self.extractor
    }

    /// Tag raw text with a trained learner.
    pub fn annotate(&self, learner: &Learner, text: &str) -> Result<Annotation> {
        annotate(learner, &self.tokenizer, text)
    }
}

/// Tokenize, predict and assemble entities for one text.
pub fn annotate(
    learner: &Learner,
    tokenizer: &impl DocumentTokenizer,
    text: &str,
) -> Result<Annotation> {
    let mut annotations = annotate_batch(learner, tokenizer, &[text])?;
    Ok(annotations.pop().unwrap_or_else(|| Annotation {
        tokens: Vec::new(),
        tags: Vec::new(),
        entities: Vec::new(),
        truncated_words: 0,
    }))
}

/// Batched [`annotate`].
pub fn annotate_batch<S: AsRef<str>>(
    learner: &Learner,
    tokenizer: &impl DocumentTokenizer,
    texts: &[S],
) -> Result<Vec<Annotation>> {
    let tokenized: Vec<_> = texts
        .iter()
        .map(|text| tokenizer.tokenize(text.as_ref()))
        .collect();
    let documents: Vec<Document> = tokenized
        .iter()
        .map(|tokens| Document::unlabeled(tokens.iter().map(|t| t.text.clone())))
        .collect();
    let predictions = learner.predict(&documents)?;

    Ok(texts
        .iter()
        .zip(tokenized)
        .zip(predictions)
        .map(|((text, tokens), prediction)| Annotation {
            entities: assemble_entities(text.as_ref(), &tokens, &prediction.tags),
            tokens: tokens.into_iter().map(|t| t.text).collect(),
            tags: prediction.tags,
            truncated_words: prediction.truncated_words,
        })
        .collect())
}
