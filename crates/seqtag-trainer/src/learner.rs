//! # Training and Inference Loop
//!
//! A [`Learner`] owns one encoder, one tag decoder and their parameters on a
//! single device. `train` shuffles documents every epoch, runs one optimizer
//! step per batch and leaves the learner `Trained`; `predict` runs batched
//! forward passes and projects the decoded tags back to words.
//!
//! Documents longer than the maximum sequence length lose their trailing
//! words. Training ignores the dropped words; prediction tags them `O` so the
//! output always has one tag per input token. Both report the count.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use oorandom::Rand64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use seqtag_core::encoder::{EncoderSpec, PretrainedFiles, SequenceEncoder, copy_pretrained};
use seqtag_core::tagging::{LabelSpace, OUTSIDE, SubwordTargets, TagDecoder};
use seqtag_core::text::{AlignedDocument, SubwordAligner};
use seqtag_core::{Document, LearnerConfig, Result, SeqTagError};

use crate::batch::Batch;

const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";
const MANIFEST_FILE: &str = "learner.json";

/// Lifecycle of a learner.
///
/// Prediction borrows the learner immutably while training borrows it
/// mutably, so the two never overlap and "predicting" needs no state of its
/// own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearnerState {
    /// Freshly built; encoder weights may be pretrained but the tag decoder is not.
    Uninitialized,
    /// An optimization run is in progress.
    Training,
    /// Ready for prediction.
    Trained,
}

/// Tags predicted for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// One tag per input token
    pub tags: Vec<String>,
    /// Trailing tokens that did not fit and were tagged `O`
    pub truncated_words: usize,
}

/// Summary of a `train` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Mean batch loss of each epoch
    pub epoch_losses: Vec<f32>,
    /// Optimizer steps taken
    pub steps: usize,
    /// Documents that lost trailing words to the length limit
    pub truncated_documents: usize,
    /// Batch size actually used
    pub batch_size: usize,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

/// Everything besides the weights needed to rebuild a saved learner.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    config: LearnerConfig,
    labels: LabelSpace,
    encoder: EncoderSpec,
    max_sequence_length: usize,
}

/// A training document after alignment.
struct EncodedDocument {
    /// Position in the caller's document slice
    index: usize,
    aligned: AlignedDocument,
    targets: SubwordTargets,
}

/// Sequence-labelling learner: subword aligner, encoder and tag decoder.
pub struct Learner {
    config: LearnerConfig,
    labels: LabelSpace,
    aligner: SubwordAligner,
    encoder: Box<dyn SequenceEncoder>,
    decoder: TagDecoder,
    varmap: VarMap,
    device: Device,
    state: LearnerState,
    epochs_trained: usize,
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner")
            .field("labels", &self.labels.tags())
            .field("encoder", &self.encoder)
            .field("using_crf", &self.decoder.is_crf())
            .field("state", &self.state)
            .finish()
    }
}

impl Learner {
    /// Build a transformer learner from `config.pretrained_model`.
    ///
    /// The encoder starts from the checkpoint's weights; the tag decoder is
    /// freshly initialised.
    pub fn new(config: LearnerConfig, labels: LabelSpace) -> Result<Self> {
        config.validate()?;
        let model = config.require_pretrained_model()?;
        let files = PretrainedFiles::resolve(model)?;

        let aligner = SubwordAligner::from_file(&files.tokenizer, config.max_sequence_length)?;
        let spec = EncoderSpec::Bert {
            config: files.read_config()?,
        };
        let learner = Self::with_encoder(config, labels, aligner, spec)?;
        copy_pretrained(&learner.varmap, &files.weights, "bert.")?;
        Ok(learner)
    }

    /// Build a learner over a lookup encoder covering the aligner's vocabulary.
    pub fn lookup(
        config: LearnerConfig,
        labels: LabelSpace,
        aligner: SubwordAligner,
        hidden_size: usize,
    ) -> Result<Self> {
        let spec = EncoderSpec::Lookup {
            vocab_size: aligner.vocab_size(),
            hidden_size,
        };
        Self::with_encoder(config, labels, aligner, spec)
    }

    /// Build a learner with freshly initialised weights for `spec`.
    pub fn with_encoder(
        config: LearnerConfig,
        labels: LabelSpace,
        aligner: SubwordAligner,
        spec: EncoderSpec,
    ) -> Result<Self> {
        config.validate()?;
        if let EncoderSpec::Lookup { vocab_size, .. } = &spec {
            if *vocab_size < aligner.vocab_size() {
                return Err(SeqTagError::Configuration(format!(
                    "lookup vocabulary of {vocab_size} cannot cover {} subword ids",
                    aligner.vocab_size()
                )));
            }
        }

        let device = config.device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = spec.build(vb.clone())?;

        let aligner = match encoder.max_positions() {
            Some(limit) if limit < aligner.max_length() => {
                warn!(
                    requested = aligner.max_length(),
                    limit, "Clamping max sequence length to the encoder's position limit"
                );
                aligner.with_max_length(limit)?
            }
            _ => aligner,
        };

        let decoder = TagDecoder::new(
            config.using_crf,
            encoder.hidden_size(),
            &labels,
            config.constrain_transitions,
            vb,
        )?;

        info!(
            tags = labels.len(),
            hidden_size = encoder.hidden_size(),
            using_crf = config.using_crf,
            max_length = aligner.max_length(),
            "Built learner"
        );

        Ok(Self {
            config,
            labels,
            aligner,
            encoder,
            decoder,
            varmap,
            device,
            state: LearnerState::Uninitialized,
            epochs_trained: 0,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    pub fn aligner(&self) -> &SubwordAligner {
        &self.aligner
    }

    pub fn decoder(&self) -> &TagDecoder {
        &self.decoder
    }

    pub fn state(&self) -> LearnerState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// All learned parameters, encoder and decoder.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Train on labeled documents for `config.epochs` epochs with
    /// `config.batch_size` documents per step.
    ///
    /// Continues from the current weights when called again.
    pub fn train(&mut self, documents: &[Document]) -> Result<TrainingReport> {
        self.train_with_batch_size(documents, self.config.batch_size)
    }

    /// Like [`Learner::train`], but restarts with half the batch size after
    /// an out-of-memory failure, down to a batch of one.
    pub fn train_with_backoff(&mut self, documents: &[Document]) -> Result<TrainingReport> {
        let mut batch_size = self.config.batch_size;
        loop {
            match self.train_with_batch_size(documents, batch_size) {
                Err(err) if err.is_recoverable() && batch_size > 1 => {
                    let reduced = batch_size / 2;
                    warn!(
                        error = %err,
                        from = batch_size,
                        to = reduced,
                        "Out of memory, retrying with a smaller batch"
                    );
                    batch_size = reduced;
                }
                result => return result,
            }
        }
    }

    fn train_with_batch_size(
        &mut self,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<TrainingReport> {
        if batch_size == 0 {
            return Err(SeqTagError::Configuration(
                "batch_size must be positive".into(),
            ));
        }
        let encoded = self.encode_training_set(documents)?;
        if encoded.is_empty() {
            return Err(SeqTagError::Configuration(
                "no non-empty training documents".into(),
            ));
        }

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;
        let mut rng = Rand64::new(u128::from(self.config.seed) + self.epochs_trained as u128);

        let previous = self.state;
        self.state = LearnerState::Training;
        let result = self.run_epochs(&encoded, batch_size, &mut optimizer, &mut rng);
        match &result {
            Ok(report) => {
                self.state = LearnerState::Trained;
                self.epochs_trained += report.epoch_losses.len();
            }
            Err(_) => self.state = previous,
        }
        result
    }

    fn encode_training_set(&self, documents: &[Document]) -> Result<Vec<EncodedDocument>> {
        let mut encoded = Vec::with_capacity(documents.len());
        for (idx, document) in documents.iter().enumerate() {
            let Some(tags) = &document.tags else {
                return Err(SeqTagError::Configuration(format!(
                    "training document {idx} has no tags"
                )));
            };
            if tags.len() != document.tokens.len() {
                return Err(SeqTagError::Configuration(format!(
                    "training document {idx} has {} tokens but {} tags",
                    document.tokens.len(),
                    tags.len()
                )));
            }
            let word_labels = self.labels.encode_document(document, idx)?;
            if document.is_empty() {
                debug!(document = idx, "Skipping empty document");
                continue;
            }

            let aligned = self.aligner.align(&document.tokens)?;
            if aligned.alignment.is_truncated() {
                warn!(
                    document = idx,
                    truncated = aligned.alignment.truncated_words(),
                    "Document exceeds the maximum sequence length, trailing words dropped"
                );
            }
            let targets = self.aligner.project_labels(&word_labels, &aligned.alignment);
            encoded.push(EncodedDocument {
                index: idx,
                aligned,
                targets,
            });
        }
        Ok(encoded)
    }

    fn run_epochs(
        &self,
        encoded: &[EncodedDocument],
        batch_size: usize,
        optimizer: &mut AdamW,
        rng: &mut Rand64,
    ) -> Result<TrainingReport> {
        let mut report = TrainingReport {
            truncated_documents: encoded
                .iter()
                .filter(|doc| doc.aligned.alignment.is_truncated())
                .count(),
            batch_size,
            ..Default::default()
        };

        for epoch in 0..self.config.epochs {
            let order = shuffled(encoded.len(), rng);
            let mut total = 0.0f32;
            let mut batches = 0usize;

            for (batch, chunk) in order.chunks(batch_size).enumerate() {
                let docs: Vec<&EncodedDocument> = chunk.iter().map(|&i| &encoded[i]).collect();
                let loss = self
                    .train_step(&docs, optimizer, epoch, batch)
                    .map_err(|e| {
                        let indices = docs.iter().map(|doc| doc.index).collect();
                        classify_failure(e, epoch, batch, indices)
                    })?;
                debug!(epoch, batch, loss, "Batch complete");

                total += loss;
                batches += 1;
                report.steps += 1;
            }

            let mean = total / batches.max(1) as f32;
            info!(
                epoch = epoch + 1,
                epochs = self.config.epochs,
                loss = mean,
                "Epoch complete"
            );
            report.epoch_losses.push(mean);
        }

        Ok(report)
    }

    /// Forward, loss, backward and one optimizer step for a batch.
    fn train_step(
        &self,
        docs: &[&EncodedDocument],
        optimizer: &mut AdamW,
        epoch: usize,
        batch: usize,
    ) -> Result<f32> {
        let aligned: Vec<&AlignedDocument> = docs.iter().map(|doc| &doc.aligned).collect();
        let input = Batch::new(&aligned, self.aligner.pad_id(), &self.device)?;
        let targets: Vec<SubwordTargets> = docs.iter().map(|doc| doc.targets.clone()).collect();

        let hidden = self
            .encoder
            .forward(&input.input_ids, &input.attention_mask)?;
        let loss = self.decoder.loss(&hidden, &targets)?;
        let value = ensure_finite(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?, epoch, batch)?;

        optimizer.backward_step(&loss)?;
        Ok(value)
    }

    /// Predict one tag per token for each document, `config.batch_size`
    /// documents per forward pass.
    pub fn predict(&self, documents: &[Document]) -> Result<Vec<Prediction>> {
        self.predict_with_batch_size(documents, self.config.batch_size)
    }

    /// Predict with an explicit batch size. Empty documents yield empty tag
    /// sequences without touching the model.
    pub fn predict_with_batch_size(
        &self,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<Vec<Prediction>> {
        if self.state != LearnerState::Trained {
            return Err(SeqTagError::NotTrained);
        }
        if batch_size == 0 {
            return Err(SeqTagError::Configuration(
                "batch_size must be positive".into(),
            ));
        }

        let mut predictions = vec![Prediction::default(); documents.len()];
        let mut pending = Vec::new();
        for (idx, document) in documents.iter().enumerate() {
            if document.is_empty() {
                continue;
            }
            let aligned = self.aligner.align(&document.tokens)?;
            if aligned.alignment.is_truncated() {
                warn!(
                    document = idx,
                    truncated = aligned.alignment.truncated_words(),
                    "Document exceeds the maximum sequence length, trailing words tagged O"
                );
            }
            pending.push((idx, aligned));
        }

        for (batch, chunk) in pending.chunks(batch_size).enumerate() {
            let aligned: Vec<&AlignedDocument> = chunk.iter().map(|(_, doc)| doc).collect();
            let decoded = self.decode_batch(&aligned).map_err(|e| {
                let indices = chunk.iter().map(|(idx, _)| *idx).collect();
                classify_failure(e, 0, batch, indices)
            })?;

            for ((idx, doc), subword_tags) in chunk.iter().zip(decoded) {
                predictions[*idx] = self.word_tags(&subword_tags, doc)?;
            }
            debug!(batch, documents = chunk.len(), "Predicted batch");
        }

        Ok(predictions)
    }

    fn decode_batch(&self, aligned: &[&AlignedDocument]) -> Result<Vec<SubwordTargets>> {
        let input = Batch::new(aligned, self.aligner.pad_id(), &self.device)?;
        let hidden = self
            .encoder
            .forward(&input.input_ids, &input.attention_mask)?;
        self.decoder.decode(&hidden, &input.score_masks)
    }

    fn word_tags(&self, subword_tags: &[Option<usize>], doc: &AlignedDocument) -> Result<Prediction> {
        let ids = self
            .aligner
            .project_predictions(subword_tags, &doc.alignment)?;
        let mut tags = ids
            .into_iter()
            .map(|id| {
                self.labels
                    .decode(id)
                    .map(str::to_string)
                    .ok_or_else(|| SeqTagError::Alignment(format!("tag id {id} out of range")))
            })
            .collect::<Result<Vec<_>>>()?;

        let truncated_words = doc.alignment.truncated_words();
        tags.extend(std::iter::repeat_n(OUTSIDE.to_string(), truncated_words));
        Ok(Prediction {
            tags,
            truncated_words,
        })
    }

    /// Write weights, tokenizer and manifest into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        self.aligner
            .tokenizer()
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| SeqTagError::Tokenizer(format!("failed to save tokenizer: {e}")))?;

        let manifest = Manifest {
            config: self.config.clone(),
            labels: self.labels.clone(),
            encoder: self.encoder.spec(),
            max_sequence_length: self.aligner.max_length(),
        };
        let file = std::fs::File::create(dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(file, &manifest)?;

        info!(dir = %dir.display(), "Saved learner");
        Ok(())
    }

    /// Rebuild a learner written by [`Learner::save`], ready for prediction.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::load_with_device(dir, None)
    }

    /// Like [`Learner::load`], optionally overriding the saved device.
    pub fn load_with_device<P: AsRef<Path>>(dir: P, cuda_device: Option<i32>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest: Manifest =
            serde_json::from_reader(std::io::BufReader::new(std::fs::File::open(
                dir.join(MANIFEST_FILE),
            )?))?;

        let mut config = manifest.config;
        if let Some(device) = cuda_device {
            config.cuda_device = device;
        }
        let aligner =
            SubwordAligner::from_file(dir.join(TOKENIZER_FILE), manifest.max_sequence_length)?;

        let mut learner = Self::with_encoder(config, manifest.labels, aligner, manifest.encoder)?;
        learner
            .varmap
            .load(dir.join(WEIGHTS_FILE))
            .map_err(|e| SeqTagError::ModelLoad(format!("failed to load weights: {e}")))?;
        learner.state = LearnerState::Trained;

        info!(dir = %dir.display(), "Loaded learner");
        Ok(learner)
    }
}

/// Fisher-Yates shuffle of `0..len`.
fn shuffled(len: usize, rng: &mut Rand64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    for i in (1..len).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

fn ensure_finite(loss: f32, epoch: usize, batch: usize) -> Result<f32> {
    if loss.is_finite() {
        Ok(loss)
    } else {
        Err(SeqTagError::Divergence { epoch, batch, loss })
    }
}

fn is_out_of_memory(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("out of memory") || message.contains("out_of_memory")
}

/// Tag allocation failures with the batch that caused them.
fn classify_failure(
    err: SeqTagError,
    epoch: usize,
    batch: usize,
    documents: Vec<usize>,
) -> SeqTagError {
    match err {
        SeqTagError::CandleError(message) if is_out_of_memory(&message) => {
            SeqTagError::OutOfMemory {
                epoch,
                batch,
                documents,
                message,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{doc, lookup_learner, tiny_aligner};
    use candle_core::Tensor;
    use seqtag_core::encoder::LookupEncoder;
    use std::sync::{Arc, Mutex};

    /// Lookup encoder that fails like an exhausted device above `max_rows`
    /// documents per batch and can poison its output with NaN.
    #[derive(Debug)]
    struct FlakyEncoder {
        inner: LookupEncoder,
        max_rows: usize,
        poison: bool,
        rows_seen: Arc<Mutex<Vec<usize>>>,
    }

    impl SequenceEncoder for FlakyEncoder {
        fn hidden_size(&self) -> usize {
            self.inner.hidden_size()
        }

        fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
            let rows = input_ids.dim(0)?;
            self.rows_seen.lock().unwrap().push(rows);
            if rows > self.max_rows {
                return Err(candle_core::Error::Msg(
                    "CUDA_ERROR_OUT_OF_MEMORY: out of memory".into(),
                )
                .into());
            }
            let hidden = self.inner.forward(input_ids, attention_mask)?;
            if self.poison {
                Ok(hidden.affine(f64::NAN, 0.0)?)
            } else {
                Ok(hidden)
            }
        }

        fn spec(&self) -> EncoderSpec {
            self.inner.spec()
        }
    }

    /// Swap in a [`FlakyEncoder`] sharing the learner's lookup weights.
    fn install_flaky(
        learner: &mut Learner,
        max_rows: usize,
        poison: bool,
    ) -> Arc<Mutex<Vec<usize>>> {
        let vb = VarBuilder::from_varmap(&learner.varmap, DType::F32, &learner.device);
        let inner = LookupEncoder::new(learner.aligner.vocab_size(), 16, vb).unwrap();
        let rows_seen = Arc::new(Mutex::new(Vec::new()));
        learner.encoder = Box::new(FlakyEncoder {
            inner,
            max_rows,
            poison,
            rows_seen: Arc::clone(&rows_seen),
        });
        rows_seen
    }

    fn four_documents() -> Vec<Document> {
        vec![
            doc(&["Tom", "takes", "ibuprofen"], &["O", "O", "B-Drug"]),
            doc(&["has", "aspirin"], &["O", "B-Drug"]),
            doc(&["ibuprofen", "daily"], &["B-Drug", "O"]),
            doc(&["Tom", "has"], &["O", "O"]),
        ]
    }

    fn fast_config() -> LearnerConfig {
        LearnerConfig::new()
            .with_learning_rate(0.05)
            .with_weight_decay(0.0)
            .with_batch_size(1)
            .with_epochs(50)
    }

    fn toy_dataset() -> Vec<Document> {
        vec![
            doc(&["Tom", "takes", "ibuprofen"], &["O", "O", "B-Drug"]),
            doc(&["has", "ibuprofen", "aspirin"], &["O", "B-Drug", "I-Drug"]),
        ]
    }

    fn assert_converges(using_crf: bool) {
        let mut learner = lookup_learner(fast_config().with_crf(using_crf), &["Drug"]);
        let dataset = toy_dataset();
        let report = learner.train(&dataset).unwrap();

        assert_eq!(report.epoch_losses.len(), 50);
        assert_eq!(report.steps, 100);
        let first = report.epoch_losses[0];
        let last = report.final_loss().unwrap();
        assert!(last < first, "loss did not decrease: {first} -> {last}");
        assert!(last < 0.1, "loss {last} not near zero");

        let predictions = learner.predict(&dataset).unwrap();
        for (prediction, document) in predictions.iter().zip(&dataset) {
            assert_eq!(Some(&prediction.tags), document.tags.as_ref());
        }
    }

    #[test]
    fn softmax_converges_on_tiny_dataset() {
        assert_converges(false);
    }

    #[test]
    fn crf_converges_on_tiny_dataset() {
        assert_converges(true);
    }

    #[test]
    fn single_document_scenario() {
        for using_crf in [false, true] {
            let config = LearnerConfig::new()
                .with_batch_size(1)
                .with_epochs(1)
                .with_crf(using_crf);
            let mut learner = lookup_learner(config, &["Name", "Drug"]);
            let training = vec![doc(&["Tom", "has", "ibuprofen"], &["B-Name", "O", "B-Drug"])];

            let report = learner.train(&training).unwrap();
            assert_eq!(report.steps, 1);
            assert_eq!(learner.state(), LearnerState::Trained);

            let predictions = learner
                .predict(&[Document::unlabeled(["Tom", "has", "ibuprofen"])])
                .unwrap();
            assert_eq!(predictions[0].tags.len(), 3);
            assert!(
                predictions[0]
                    .tags
                    .iter()
                    .all(|tag| learner.labels().encode(tag).is_some())
            );
        }
    }

    #[test]
    fn empty_document_predicts_empty_sequence() {
        let mut learner = lookup_learner(LearnerConfig::new().with_epochs(1), &["Drug"]);
        learner.train(&toy_dataset()).unwrap();

        let empty: [&str; 0] = [];
        let predictions = learner
            .predict(&[Document::unlabeled(empty), Document::unlabeled(["aspirin"])])
            .unwrap();
        assert_eq!(predictions.len(), 2);
        assert!(predictions[0].tags.is_empty());
        assert_eq!(predictions[0].truncated_words, 0);
        assert_eq!(predictions[1].tags.len(), 1);
    }

    #[test]
    fn empty_training_documents_are_skipped() {
        let mut learner = lookup_learner(LearnerConfig::new().with_epochs(1), &["Drug"]);
        let empty: [&str; 0] = [];
        let mut dataset = toy_dataset();
        dataset.push(Document::labeled(empty, empty).unwrap());
        let report = learner.train(&dataset).unwrap();
        assert_eq!(report.steps, 1);
    }

    #[test]
    fn long_documents_are_truncated_and_reported() {
        let config = LearnerConfig::new()
            .with_epochs(1)
            .with_batch_size(2)
            .with_max_sequence_length(6);
        let mut learner = lookup_learner(config, &["Name", "Drug"]);
        let training = vec![
            doc(
                &["Tom", "has", "ibuprofen", "daily"],
                &["B-Name", "O", "B-Drug", "O"],
            ),
            doc(&["Tom"], &["B-Name"]),
        ];

        let report = learner.train(&training).unwrap();
        assert_eq!(report.truncated_documents, 1);

        let predictions = learner
            .predict(&[Document::unlabeled(["Tom", "has", "ibuprofen", "daily"])])
            .unwrap();
        assert_eq!(predictions[0].tags.len(), 4);
        assert_eq!(predictions[0].truncated_words, 2);
        assert_eq!(&predictions[0].tags[2..], &["O", "O"]);
    }

    #[test]
    fn predict_requires_training() {
        let learner = lookup_learner(LearnerConfig::new(), &["Drug"]);
        assert_eq!(learner.state(), LearnerState::Uninitialized);
        let err = learner
            .predict(&[Document::unlabeled(["aspirin"])])
            .unwrap_err();
        assert!(matches!(err, SeqTagError::NotTrained));
    }

    #[test]
    fn unknown_label_is_reported_with_position() {
        let mut learner = lookup_learner(LearnerConfig::new().with_epochs(1), &["Drug"]);
        let training = vec![
            doc(&["aspirin"], &["B-Drug"]),
            doc(&["Tom", "has"], &["O", "B-Dose"]),
        ];
        let err = learner.train(&training).unwrap_err();
        match err {
            SeqTagError::UnknownLabel {
                label,
                document,
                position,
            } => {
                assert_eq!(label, "B-Dose");
                assert_eq!(document, 1);
                assert_eq!(position, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(learner.state(), LearnerState::Uninitialized);
    }

    #[test]
    fn unlabeled_training_document_is_rejected() {
        let mut learner = lookup_learner(LearnerConfig::new(), &["Drug"]);
        let err = learner
            .train(&[Document::unlabeled(["aspirin"])])
            .unwrap_err();
        assert!(matches!(err, SeqTagError::Configuration(_)));
    }

    #[test]
    fn training_continues_from_current_weights() {
        let mut learner = lookup_learner(fast_config().with_epochs(10), &["Drug"]);
        let first = learner.train(&toy_dataset()).unwrap();
        let second = learner.train(&toy_dataset()).unwrap();
        assert!(second.epoch_losses[0] < first.epoch_losses[0]);
        assert_eq!(learner.state(), LearnerState::Trained);
    }

    #[test]
    fn backoff_trains_normally_without_failures() {
        let mut learner = lookup_learner(
            LearnerConfig::new().with_epochs(2).with_batch_size(4),
            &["Drug"],
        );
        let report = learner.train_with_backoff(&toy_dataset()).unwrap();
        assert_eq!(report.batch_size, 4);
        assert_eq!(report.steps, 2);
    }

    #[test]
    fn backoff_halves_batch_size_until_it_fits() {
        let mut learner = lookup_learner(
            LearnerConfig::new().with_epochs(1).with_batch_size(4),
            &["Drug"],
        );
        let rows_seen = install_flaky(&mut learner, 1, false);

        let report = learner.train_with_backoff(&four_documents()).unwrap();
        assert_eq!(report.batch_size, 1);
        assert_eq!(report.steps, 4);
        assert_eq!(learner.state(), LearnerState::Trained);
        assert_eq!(*rows_seen.lock().unwrap(), vec![4, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn backoff_gives_up_at_batch_of_one() {
        let mut learner = lookup_learner(
            LearnerConfig::new().with_epochs(1).with_batch_size(4),
            &["Drug"],
        );
        let rows_seen = install_flaky(&mut learner, 0, false);

        let err = learner.train_with_backoff(&four_documents()).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(*rows_seen.lock().unwrap(), vec![4, 2, 1]);
        assert_eq!(learner.state(), LearnerState::Uninitialized);
    }

    #[test]
    fn out_of_memory_names_input_documents() {
        let mut learner = lookup_learner(
            LearnerConfig::new().with_epochs(1).with_batch_size(2),
            &["Drug"],
        );
        install_flaky(&mut learner, 1, false);

        let empty: [&str; 0] = [];
        let mut dataset = vec![Document::labeled(empty, empty).unwrap()];
        dataset.extend(four_documents().into_iter().skip(1));

        // The empty document is skipped, so the epoch shuffles inputs 1..=3.
        let order = shuffled(3, &mut Rand64::new(u128::from(learner.config().seed)));
        let expected: Vec<usize> = order[..2].iter().map(|i| i + 1).collect();

        match learner.train(&dataset).unwrap_err() {
            SeqTagError::OutOfMemory {
                epoch,
                batch,
                documents,
                ..
            } => {
                assert_eq!((epoch, batch), (0, 0));
                assert_eq!(documents, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn predict_out_of_memory_names_input_documents() {
        let mut learner = lookup_learner(LearnerConfig::new().with_epochs(1), &["Drug"]);
        learner.train(&toy_dataset()).unwrap();
        install_flaky(&mut learner, 1, false);

        let empty: [&str; 0] = [];
        let inputs = [
            Document::unlabeled(["aspirin"]),
            Document::unlabeled(empty),
            Document::unlabeled(["Tom", "has"]),
        ];
        let err = learner.predict_with_batch_size(&inputs, 2).unwrap_err();
        assert!(matches!(
            err,
            SeqTagError::OutOfMemory { ref documents, .. } if documents == &[0, 2]
        ));
    }

    #[test]
    fn divergence_aborts_training_and_restores_state() {
        let mut learner = lookup_learner(
            LearnerConfig::new().with_epochs(2).with_batch_size(2),
            &["Drug"],
        );
        install_flaky(&mut learner, usize::MAX, true);
        let err = learner.train(&toy_dataset()).unwrap_err();
        assert!(matches!(
            err,
            SeqTagError::Divergence {
                epoch: 0,
                batch: 0,
                ..
            }
        ));
        assert!(!err.is_recoverable());
        assert_eq!(learner.state(), LearnerState::Uninitialized);

        install_flaky(&mut learner, usize::MAX, false);
        learner.train(&toy_dataset()).unwrap();
        install_flaky(&mut learner, usize::MAX, true);
        assert!(matches!(
            learner.train(&toy_dataset()).unwrap_err(),
            SeqTagError::Divergence { .. }
        ));
        assert_eq!(learner.state(), LearnerState::Trained);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let mut learner = lookup_learner(fast_config().with_epochs(5).with_crf(true), &["Drug"]);
        learner.train(&toy_dataset()).unwrap();

        let dir = std::env::temp_dir().join(format!("seqtag-learner-{}", std::process::id()));
        learner.save(&dir).unwrap();
        let restored = Learner::load(&dir).unwrap();

        assert_eq!(restored.state(), LearnerState::Trained);
        assert!(restored.decoder().is_crf());
        assert_eq!(restored.labels(), learner.labels());

        let inputs = [Document::unlabeled(["Tom", "takes", "ibuprofen", "daily"])];
        assert_eq!(
            restored.predict(&inputs).unwrap(),
            learner.predict(&inputs).unwrap()
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn lookup_vocabulary_must_cover_tokenizer() {
        let labels = LabelSpace::from_entities(&["Drug"]).unwrap();
        let spec = EncoderSpec::Lookup {
            vocab_size: 4,
            hidden_size: 8,
        };
        let err = Learner::with_encoder(LearnerConfig::new(), labels, tiny_aligner(32), spec)
            .unwrap_err();
        assert!(matches!(err, SeqTagError::Configuration(_)));
    }

    #[test]
    fn bert_learner_requires_pretrained_model() {
        let labels = LabelSpace::from_entities(&["Drug"]).unwrap();
        let err = Learner::new(LearnerConfig::new(), labels).unwrap_err();
        assert!(matches!(err, SeqTagError::Configuration(_)));
    }

    #[test]
    fn non_finite_loss_is_divergence() {
        assert_eq!(ensure_finite(0.5, 0, 0).unwrap(), 0.5);
        let err = ensure_finite(f32::NAN, 2, 7).unwrap_err();
        assert!(matches!(
            err,
            SeqTagError::Divergence {
                epoch: 2,
                batch: 7,
                ..
            }
        ));
        assert!(ensure_finite(f32::INFINITY, 0, 0).is_err());
    }

    #[test]
    fn allocation_failures_become_out_of_memory() {
        let err = classify_failure(
            SeqTagError::CandleError("CUDA_ERROR_OUT_OF_MEMORY: out of memory".into()),
            1,
            3,
            vec![5, 2],
        );
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            SeqTagError::OutOfMemory {
                epoch: 1,
                batch: 3,
                ref documents,
                ..
            } if documents == &[5, 2]
        ));

        let other =
            classify_failure(SeqTagError::CandleError("shape mismatch".into()), 0, 0, vec![0]);
        assert!(!other.is_recoverable());
    }

    #[test]
    fn shuffle_is_a_seeded_permutation() {
        let a = shuffled(10, &mut Rand64::new(42));
        let b = shuffled(10, &mut Rand64::new(42));
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }
}
