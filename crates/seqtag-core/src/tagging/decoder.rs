//! # Tag Decoders
//!
//! Turn per-subword embeddings into tag scores. Two variants share one
//! contract: `loss` for training and `decode` for inference.
//!
//! Both operate on full padded subword sequences and only look at *scored*
//! positions: the first piece of each word. Padding, special tokens and word
//! continuation pieces are skipped identically in training and decoding. In
//! the CRF the chain links consecutive scored positions, so a word's
//! continuation pieces never sit between two tags.

use candle_core::{DType, IndexOp, Module, Tensor, D};
use candle_nn::{linear, ops::log_softmax, Init, Linear, VarBuilder};

use crate::error::{Result, SeqTagError};
use crate::tagging::bio_tags::LabelSpace;
use crate::tagging::viterbi::ViterbiDecoder;

const TRANSITION_INIT: Init = Init::Uniform { lo: -0.1, up: 0.1 };

/// Per-position gold tags of one document; `None` marks an ignored position.
pub type SubwordTargets = Vec<Option<usize>>;

/// Selected tag decoder.
#[derive(Debug)]
pub enum TagDecoder {
    /// Independent per-token classification.
    Softmax(SoftmaxHead),
    /// Linear-chain CRF over emission scores.
    Crf(CrfHead),
}

impl TagDecoder {
    /// Build the decoder chosen by `using_crf`.
    ///
    /// Parameters are created under `classifier.*` and, for the CRF, `crf.*`.
    pub fn new(
        using_crf: bool,
        hidden_size: usize,
        labels: &LabelSpace,
        constrain_transitions: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if using_crf {
            Ok(TagDecoder::Crf(CrfHead::new(
                hidden_size,
                labels,
                constrain_transitions,
                vb,
            )?))
        } else {
            Ok(TagDecoder::Softmax(SoftmaxHead::new(
                hidden_size,
                labels.len(),
                vb,
            )?))
        }
    }

    pub fn is_crf(&self) -> bool {
        matches!(self, TagDecoder::Crf(_))
    }

    pub fn num_tags(&self) -> usize {
        match self {
            TagDecoder::Softmax(head) => head.num_tags,
            TagDecoder::Crf(head) => head.num_tags,
        }
    }

    /// Emission scores `[batch, seq_len, num_tags]`.
    pub fn emissions(&self, hidden: &Tensor) -> Result<Tensor> {
        let classifier = match self {
            TagDecoder::Softmax(head) => &head.classifier,
            TagDecoder::Crf(head) => &head.emission,
        };
        Ok(classifier.forward(hidden)?)
    }

    /// Scalar training loss for a batch.
    ///
    /// `targets[doc][pos]` holds the gold tag of each scored position; the
    /// vectors may be shorter than the padded sequence length.
    pub fn loss(&self, hidden: &Tensor, targets: &[SubwordTargets]) -> Result<Tensor> {
        match self {
            TagDecoder::Softmax(head) => head.loss(hidden, targets),
            TagDecoder::Crf(head) => head.loss(hidden, targets),
        }
    }

    /// Predict a tag for each scored position, `None` elsewhere.
    pub fn decode(&self, hidden: &Tensor, score_mask: &[Vec<bool>]) -> Result<Vec<SubwordTargets>> {
        match self {
            TagDecoder::Softmax(head) => head.decode(hidden, score_mask),
            TagDecoder::Crf(head) => head.decode(hidden, score_mask),
        }
    }
}

/// Linear classifier with per-token cross-entropy.
#[derive(Debug)]
pub struct SoftmaxHead {
    classifier: Linear,
    num_tags: usize,
}

impl SoftmaxHead {
    pub fn new(hidden_size: usize, num_tags: usize, vb: VarBuilder) -> Result<Self> {
        let classifier = linear(hidden_size, num_tags, vb.pp("classifier"))?;
        Ok(Self {
            classifier,
            num_tags,
        })
    }

    /// Mean negative log-likelihood over scored positions.
    pub fn loss(&self, hidden: &Tensor, targets: &[SubwordTargets]) -> Result<Tensor> {
        let logits = self.classifier.forward(hidden)?;
        let (batch, seq_len, num_tags) = logits.dims3()?;
        let chain = ChainTargets::new(targets, batch, seq_len, num_tags)?;
        let device = logits.device();

        let tags = Tensor::from_vec(chain.tags.clone(), (batch, seq_len, 1), device)?;
        let mask =
            Tensor::from_vec(chain.mask.clone(), (batch, seq_len), device)?.to_dtype(logits.dtype())?;

        let log_probs = log_softmax(&logits, D::Minus1)?;
        let picked = log_probs.gather(&tags, 2)?.squeeze(2)?;
        let total = picked.mul(&mask)?.sum_all()?;
        Ok((total.neg()? / chain.scored_positions().max(1) as f64)?)
    }

    /// Per-position arg-max.
    pub fn decode(&self, hidden: &Tensor, score_mask: &[Vec<bool>]) -> Result<Vec<SubwordTargets>> {
        let logits = self
            .classifier
            .forward(hidden)?
            .to_dtype(DType::F32)?
            .to_vec3::<f32>()?;

        score_mask
            .iter()
            .enumerate()
            .map(|(doc, mask)| {
                let rows = document_rows(&logits, doc, mask.len())?;
                Ok(mask
                    .iter()
                    .zip(rows)
                    .map(|(&scored, row)| scored.then(|| argmax(row)))
                    .collect())
            })
            .collect()
    }
}

/// Constant scores added to the learned CRF parameters.
#[derive(Debug)]
struct TransitionPenalties {
    transitions: Tensor,
    start: Tensor,
}

/// A linear-chain CRF (emission projection + transition scores).
#[derive(Debug)]
pub struct CrfHead {
    emission: Linear,
    transitions: Tensor,
    start_transitions: Tensor,
    end_transitions: Tensor,
    penalties: Option<TransitionPenalties>,
    viterbi: ViterbiDecoder,
    num_tags: usize,
}

impl CrfHead {
    pub fn new(
        hidden_size: usize,
        labels: &LabelSpace,
        constrain_transitions: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let num_tags = labels.len();
        let emission = linear(hidden_size, num_tags, vb.pp("classifier"))?;

        let crf = vb.pp("crf");
        let transitions =
            crf.get_with_hints((num_tags, num_tags), "transitions", TRANSITION_INIT)?;
        let start_transitions =
            crf.get_with_hints(num_tags, "start_transitions", TRANSITION_INIT)?;
        let end_transitions = crf.get_with_hints(num_tags, "end_transitions", TRANSITION_INIT)?;

        let penalties = if constrain_transitions {
            let device = transitions.device();
            let flat: Vec<f32> = labels.transition_penalties().into_iter().flatten().collect();
            Some(TransitionPenalties {
                transitions: Tensor::from_vec(flat, (num_tags, num_tags), device)?
                    .to_dtype(transitions.dtype())?,
                start: Tensor::from_vec(labels.start_penalties(), num_tags, device)?
                    .to_dtype(transitions.dtype())?,
            })
        } else {
            None
        };

        Ok(Self {
            emission,
            transitions,
            start_transitions,
            end_transitions,
            penalties,
            viterbi: ViterbiDecoder::new(num_tags),
            num_tags,
        })
    }

    /// Learned `[from, to]` transition scores, without penalties.
    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    /// Transition, start and end scores as used for scoring and decoding.
    pub fn scores(&self) -> Result<(Tensor, Tensor, Tensor)> {
        match &self.penalties {
            Some(penalties) => Ok((
                (&self.transitions + &penalties.transitions)?,
                (&self.start_transitions + &penalties.start)?,
                self.end_transitions.clone(),
            )),
            None => Ok((
                self.transitions.clone(),
                self.start_transitions.clone(),
                self.end_transitions.clone(),
            )),
        }
    }

    /// Mean negative log-likelihood of the gold chains over documents with
    /// at least one scored position.
    pub fn loss(&self, hidden: &Tensor, targets: &[SubwordTargets]) -> Result<Tensor> {
        let emissions = self.emission.forward(hidden)?;
        let (batch, seq_len, num_tags) = emissions.dims3()?;
        let chain = ChainTargets::new(targets, batch, seq_len, num_tags)?;
        let device = emissions.device();
        let dtype = emissions.dtype();
        let (transitions, start, end) = self.scores()?;

        // Score of the gold path
        let tags = Tensor::from_vec(chain.tags.clone(), (batch, seq_len, 1), device)?;
        let mask = Tensor::from_vec(chain.mask.clone(), (batch, seq_len), device)?.to_dtype(dtype)?;
        let gold_emissions = emissions.gather(&tags, 2)?.squeeze(2)?.mul(&mask)?.sum(1)?;

        let pair_width = chain.pair_width();
        let pair_index = Tensor::from_vec(chain.pair_index.clone(), batch * pair_width, device)?;
        let pair_mask = Tensor::from_vec(chain.pair_mask.clone(), (batch, pair_width), device)?
            .to_dtype(dtype)?;
        let gold_transitions = transitions
            .flatten_all()?
            .index_select(&pair_index, 0)?
            .reshape((batch, pair_width))?
            .mul(&pair_mask)?
            .sum(1)?;

        let first = Tensor::from_vec(chain.first.clone(), batch, device)?;
        let last = Tensor::from_vec(chain.last.clone(), batch, device)?;
        let has_tags = Tensor::from_vec(chain.has_tags.clone(), batch, device)?.to_dtype(dtype)?;
        let gold_bounds = (start.index_select(&first, 0)? + end.index_select(&last, 0)?)?
            .mul(&has_tags)?;
        let gold = ((gold_emissions + gold_transitions)? + gold_bounds)?;

        // Log partition via the forward algorithm; alpha only advances on
        // scored positions.
        let mut alpha = Tensor::zeros((batch, num_tags), dtype, device)?;
        let trans = transitions.unsqueeze(0)?;
        let start_row = start.unsqueeze(0)?;
        for pos in 0..seq_len {
            if !chain.any_scored_at(pos) {
                continue;
            }
            let emit = emissions.i((.., pos, ..))?;
            let fresh = emit.broadcast_add(&start_row)?;
            let carried = log_sum_exp(
                &alpha
                    .unsqueeze(2)?
                    .broadcast_add(&trans)?
                    .broadcast_add(&emit.unsqueeze(1)?)?,
                1,
            )?;

            let (started, not_started) = chain.column_pair(&chain.started, pos);
            let step = (carried.broadcast_mul(&column(started, device, dtype)?)?
                + fresh.broadcast_mul(&column(not_started, device, dtype)?)?)?;

            let (scored, unscored) = chain.column_pair(&chain.mask, pos);
            alpha = (step.broadcast_mul(&column(scored, device, dtype)?)?
                + alpha.broadcast_mul(&column(unscored, device, dtype)?)?)?;
        }
        let log_partition = log_sum_exp(&alpha.broadcast_add(&end.unsqueeze(0)?)?, 1)?;

        let nll = (log_partition - gold)?.mul(&has_tags)?.sum_all()?;
        Ok((nll / chain.scored_documents().max(1) as f64)?)
    }

    /// Viterbi-decode each document over its scored positions.
    pub fn decode(&self, hidden: &Tensor, score_mask: &[Vec<bool>]) -> Result<Vec<SubwordTargets>> {
        let emissions = self
            .emission
            .forward(hidden)?
            .to_dtype(DType::F32)?
            .to_vec3::<f32>()?;
        let (transitions, start, end) = self.scores()?;
        let transitions = transitions.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let start = start.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let end = end.to_dtype(DType::F32)?.to_vec1::<f32>()?;

        score_mask
            .iter()
            .enumerate()
            .map(|(doc, mask)| {
                let rows = document_rows(&emissions, doc, mask.len())?;
                let positions: Vec<usize> = mask
                    .iter()
                    .enumerate()
                    .filter_map(|(pos, &scored)| scored.then_some(pos))
                    .collect();
                let scores: Vec<Vec<f32>> =
                    positions.iter().map(|&pos| rows[pos].clone()).collect();

                let path = self.viterbi.decode(&scores, &transitions, &start, &end)?;
                let mut decoded = vec![None; mask.len()];
                for (pos, tag) in positions.into_iter().zip(path) {
                    decoded[pos] = Some(tag);
                }
                Ok(decoded)
            })
            .collect()
    }
}

/// Host-side view of a batch's gold chains, flattened for tensor building.
struct ChainTargets {
    batch: usize,
    seq_len: usize,
    /// `[batch * seq_len]` gold tag (0 where unscored).
    tags: Vec<u32>,
    /// `[batch * seq_len]` 1.0 at scored positions.
    mask: Vec<f32>,
    /// `[batch * seq_len]` 1.0 once an earlier position was scored.
    started: Vec<f32>,
    /// `[batch * pair_width]` flat `from * num_tags + to` indices.
    pair_index: Vec<u32>,
    pair_mask: Vec<f32>,
    first: Vec<u32>,
    last: Vec<u32>,
    has_tags: Vec<f32>,
}

impl ChainTargets {
    fn new(
        targets: &[SubwordTargets],
        batch: usize,
        seq_len: usize,
        num_tags: usize,
    ) -> Result<Self> {
        if targets.len() != batch {
            return Err(SeqTagError::Alignment(format!(
                "{} target sequences for a batch of {batch}",
                targets.len()
            )));
        }

        let mut tags = vec![0u32; batch * seq_len];
        let mut mask = vec![0f32; batch * seq_len];
        let mut started = vec![0f32; batch * seq_len];
        let mut pairs: Vec<Vec<u32>> = Vec::with_capacity(batch);
        let mut first = vec![0u32; batch];
        let mut last = vec![0u32; batch];
        let mut has_tags = vec![0f32; batch];

        for (doc, doc_targets) in targets.iter().enumerate() {
            if doc_targets.len() > seq_len {
                return Err(SeqTagError::Alignment(format!(
                    "document {doc} has {} targets for {seq_len} positions",
                    doc_targets.len()
                )));
            }
            let mut prev: Option<u32> = None;
            let mut doc_pairs = Vec::new();
            for (pos, target) in doc_targets.iter().enumerate() {
                let flat = doc * seq_len + pos;
                if prev.is_some() {
                    started[flat] = 1.0;
                }
                let Some(tag) = *target else { continue };
                if tag >= num_tags {
                    return Err(SeqTagError::Alignment(format!(
                        "tag id {tag} out of range for {num_tags} tags"
                    )));
                }
                let tag = tag as u32;
                tags[flat] = tag;
                mask[flat] = 1.0;
                match prev {
                    Some(from) => doc_pairs.push(from * num_tags as u32 + tag),
                    None => first[doc] = tag,
                }
                prev = Some(tag);
            }
            if let Some(tag) = prev {
                last[doc] = tag;
                has_tags[doc] = 1.0;
            }
            pairs.push(doc_pairs);
        }

        let pair_width = pairs.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let mut pair_index = vec![0u32; batch * pair_width];
        let mut pair_mask = vec![0f32; batch * pair_width];
        for (doc, doc_pairs) in pairs.iter().enumerate() {
            for (k, &idx) in doc_pairs.iter().enumerate() {
                pair_index[doc * pair_width + k] = idx;
                pair_mask[doc * pair_width + k] = 1.0;
            }
        }

        Ok(Self {
            batch,
            seq_len,
            tags,
            mask,
            started,
            pair_index,
            pair_mask,
            first,
            last,
            has_tags,
        })
    }

    fn pair_width(&self) -> usize {
        self.pair_index.len() / self.batch.max(1)
    }

    fn any_scored_at(&self, pos: usize) -> bool {
        (0..self.batch).any(|doc| self.mask[doc * self.seq_len + pos] > 0.0)
    }

    /// Column `pos` of a `[batch, seq_len]` 0/1 matrix and its complement.
    fn column_pair(&self, values: &[f32], pos: usize) -> (Vec<f32>, Vec<f32>) {
        (0..self.batch)
            .map(|doc| {
                let v = values[doc * self.seq_len + pos];
                (v, 1.0 - v)
            })
            .unzip()
    }

    fn scored_positions(&self) -> usize {
        self.mask.iter().filter(|&&m| m > 0.0).count()
    }

    fn scored_documents(&self) -> usize {
        self.has_tags.iter().filter(|&&h| h > 0.0).count()
    }
}

fn column(values: Vec<f32>, device: &candle_core::Device, dtype: DType) -> Result<Tensor> {
    let len = values.len();
    Ok(Tensor::from_vec(values, (len, 1), device)?.to_dtype(dtype)?)
}

/// Numerically stable `log(sum(exp(xs)))` over `dim`, removing that dimension.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let summed = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok((summed + max)?.squeeze(dim)?)
}

fn document_rows(scores: &[Vec<Vec<f32>>], doc: usize, len: usize) -> Result<&[Vec<f32>]> {
    let rows = scores
        .get(doc)
        .ok_or_else(|| SeqTagError::Alignment(format!("no scores for document {doc}")))?;
    rows.get(..len).ok_or_else(|| {
        SeqTagError::Alignment(format!(
            "document {doc} has {len} positions but only {} scores",
            rows.len()
        ))
    })
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}
