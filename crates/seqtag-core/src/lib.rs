//! # Seqtag Core
//!
//! Building blocks of a transformer named-entity tagger: the IOB label
//! space, the word-to-subword aligner, sequence encoders and the softmax or
//! CRF tag decoders that sit on top of them.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqtag_core::tagging::LabelSpace;
//!
//! let labels = LabelSpace::from_entities(&["Drug", "Name"]).unwrap();
//! let id = labels.encode("B-Drug").unwrap();
//!
//! assert_eq!(labels.decode(id), Some("B-Drug"));
//! assert_eq!(labels.len(), 5);
//! ```
pub mod config;
pub mod document;
pub mod encoder;
pub mod error;
pub mod tagging;
pub mod text;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export primary API
pub use config::LearnerConfig;
pub use document::Document;
pub use encoder::{BertEncoder, EncoderSpec, LookupEncoder, PretrainedFiles, SequenceEncoder};
pub use error::{Result, SeqTagError};
pub use tagging::{BioTag, LabelSpace, SubwordTargets, TagDecoder, ViterbiDecoder};
pub use text::{
    AlignedDocument, AlignmentMap, DocumentTokenizer, Entity, FeatureExtractor, SubwordAligner,
    TextExtractor, Token, WordTokenizer, assemble_entities,
};
