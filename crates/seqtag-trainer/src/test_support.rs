//! Shared fixtures: lookup-encoder learners over the core test vocabulary.

use seqtag_core::tagging::LabelSpace;
use seqtag_core::{Document, LearnerConfig};

use crate::learner::Learner;

pub(crate) use seqtag_core::testing::tiny_aligner;

pub(crate) fn lookup_learner(config: LearnerConfig, entities: &[&str]) -> Learner {
    let labels = LabelSpace::from_entities(entities).unwrap();
    let aligner = tiny_aligner(config.max_sequence_length);
    Learner::lookup(config, labels, aligner, 16).unwrap()
}

pub(crate) fn doc(tokens: &[&str], tags: &[&str]) -> Document {
    Document::labeled(tokens.iter().copied(), tags.iter().copied()).unwrap()
}
