use thiserror::Error;

/// Errors that can occur while building, training or running a tagger.
#[derive(Debug, Error)]
pub enum SeqTagError {
    /// A hyperparameter is invalid or a required option is missing.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A tag outside the configured label set was encountered.
    #[error("unknown label {label:?} in document {document} at token {position}")]
    UnknownLabel {
        /// The offending tag string.
        label: String,
        /// Index of the document in the input collection.
        document: usize,
        /// Token index (or source line, for file loaders) inside the document.
        position: usize,
    },

    /// The device ran out of memory while processing a batch.
    ///
    /// Recoverable: retry the same documents with a smaller batch size.
    #[error("out of memory in epoch {epoch}, batch {batch} (documents {documents:?}): {message}")]
    OutOfMemory {
        epoch: usize,
        batch: usize,
        /// Indices of the batch's documents in the caller's input.
        documents: Vec<usize>,
        message: String,
    },

    /// The training loss became NaN or infinite.
    #[error("loss diverged to {loss} in epoch {epoch}, batch {batch}")]
    Divergence { epoch: usize, batch: usize, loss: f32 },

    /// `predict` was called before the learner was trained or loaded.
    #[error("learner has not been trained")]
    NotTrained,

    /// Subword alignment and predictions disagree.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// The subword tokenizer failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Pretrained files could not be resolved or read.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("ML framework error: {0}")]
    CandleError(String),
}

impl SeqTagError {
    /// Returns `true` if the caller can retry the same work with a smaller batch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SeqTagError::OutOfMemory { .. })
    }
}

impl From<candle_core::Error> for SeqTagError {
    fn from(err: candle_core::Error) -> Self {
        SeqTagError::CandleError(err.to_string())
    }
}

/// Result type alias for seqtag operations.
pub type Result<T> = std::result::Result<T, SeqTagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SeqTagError::UnknownLabel {
            label: "B-Dose".into(),
            document: 3,
            position: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("B-Dose"));
        assert!(msg.contains("document 3"));

        let err = SeqTagError::Divergence {
            epoch: 1,
            batch: 4,
            loss: f32::NAN,
        };
        assert!(err.to_string().contains("epoch 1, batch 4"));
    }

    #[test]
    fn only_out_of_memory_is_recoverable() {
        let oom = SeqTagError::OutOfMemory {
            epoch: 0,
            batch: 2,
            documents: vec![3, 0, 7],
            message: "CUDA_ERROR_OUT_OF_MEMORY".into(),
        };
        assert!(oom.is_recoverable());
        assert!(!SeqTagError::NotTrained.is_recoverable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SeqTagError>();
    }
}
