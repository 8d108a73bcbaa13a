//! IOB label space and the tag decoders that sit on top of the encoder.

pub mod bio_tags;
pub mod decoder;
pub mod viterbi;

pub use bio_tags::{BioTag, Boundary, LabelSpace, OUTSIDE, TRANSITION_PENALTY};
pub use decoder::{CrfHead, SoftmaxHead, SubwordTargets, TagDecoder};
pub use viterbi::ViterbiDecoder;
