//! # Seqtag Trainer
//!
//! Training and batched inference for transformer taggers: dataset loading,
//! batch construction, the [`Learner`] loop and the [`BertPipeline`] adapter.

pub mod batch;
pub mod data;
pub mod learner;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::Batch;
pub use data::{load_bio_dataset, load_documents, load_jsonl_dataset, validate_documents};
pub use learner::{Learner, LearnerState, Prediction, TrainingReport};
pub use pipeline::{Annotation, BertPipeline, annotate, annotate_batch};
