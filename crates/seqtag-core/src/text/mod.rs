//! Text handling: word segmentation, subword alignment and entity assembly.

pub mod aligner;
pub mod entities;
pub mod features;
pub mod tokenizer;

pub use aligner::{AlignedDocument, AlignmentMap, SpecialTokens, SubwordAligner};
pub use entities::{Entity, assemble_entities, entity_spans};
pub use features::{FeatureExtractor, TextExtractor, TokenFeatures};
pub use tokenizer::{DocumentTokenizer, Token, WordTokenizer};
