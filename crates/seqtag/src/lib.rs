//! # Seqtag
//!
//! Transformer named-entity recognition with a softmax or CRF tagging head.
//!
//! ```rust,no_run
//! use seqtag::{BertPipeline, Document, LearnerConfig};
//!
//! # fn main() -> seqtag::Result<()> {
//! let config = LearnerConfig::new()
//!     .with_pretrained_model("bert-base-cased")
//!     .with_crf(true);
//! let pipeline = BertPipeline::new(&["Drug", "ADE"], config)?;
//! let (_, mut learner) = pipeline.learner()?;
//!
//! let training = vec![Document::labeled(["Tom", "has", "ibuprofen"], ["O", "O", "B-Drug"])?];
//! learner.train(&training)?;
//!
//! let annotation = pipeline.annotate(&learner, "Tom takes aspirin daily")?;
//! println!("{:?}", annotation.entities);
//! # Ok(())
//! # }
//! ```

pub use seqtag_core::*;
pub use seqtag_trainer::{
    Annotation, Batch, BertPipeline, Learner, LearnerState, Prediction, TrainingReport, annotate,
    annotate_batch, load_bio_dataset, load_documents, load_jsonl_dataset, validate_documents,
};

/// Training-side modules.
pub mod trainer {
    pub use seqtag_trainer::{batch, data, learner, pipeline};
}
