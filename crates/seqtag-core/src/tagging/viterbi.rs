//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring tag sequence given per-position emission scores,
//! a tag-to-tag transition matrix and start/end scores. Illegal IOB moves are
//! expected to arrive as large negative transition scores, never as holes in
//! the search space, so every tag stays reachable.

use crate::error::{Result, SeqTagError};

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

/// Path score and backpointer for Viterbi decoding.
#[derive(Debug, Clone, Copy)]
struct PathState {
    score: f32,
    prev_tag: usize,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags in the label space
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - `[seq_len][num_tags]` emission scores
    /// * `transition_matrix` - `[num_tags][num_tags]`, indexed `[from][to]`
    /// * `start_scores` - `[num_tags]` score for beginning with each tag
    /// * `end_scores` - `[num_tags]` score for ending with each tag
    ///
    /// # Returns
    /// The optimal tag sequence as indices, one per emission row.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }
        self.check_dims(emission_scores, transition_matrix, start_scores, end_scores)?;

        let mut dp: Vec<Vec<PathState>> = vec![
            vec![
                PathState {
                    score: f32::NEG_INFINITY,
                    prev_tag: 0
                };
                self.num_tags
            ];
            seq_len
        ];

        for tag in 0..self.num_tags {
            dp[0][tag].score = start_scores[tag] + emission_scores[0][tag];
        }

        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for prev_tag in 0..self.num_tags {
                    let score =
                        dp[pos - 1][prev_tag].score + transition_matrix[prev_tag][curr_tag];
                    if score > best_score {
                        best_score = score;
                        best_prev = prev_tag;
                    }
                }

                dp[pos][curr_tag] = PathState {
                    score: best_score + emission_scores[pos][curr_tag],
                    prev_tag: best_prev,
                };
            }
        }

        // Find best final tag
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            let score = dp[seq_len - 1][tag].score + end_scores[tag];
            if score > best_final_score {
                best_final_score = score;
                best_final_tag = tag;
            }
        }

        let mut path = Vec::with_capacity(seq_len);
        path.push(best_final_tag);
        let mut curr_tag = best_final_tag;
        for pos in (1..seq_len).rev() {
            curr_tag = dp[pos][curr_tag].prev_tag;
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }

    /// Total score of a given path under the same scoring model.
    pub fn path_score(
        &self,
        path: &[usize],
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> f32 {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return 0.0;
        };
        let mut score = start_scores[first] + end_scores[last];
        for (pos, &tag) in path.iter().enumerate() {
            score += emission_scores[pos][tag];
            if pos > 0 {
                score += transition_matrix[path[pos - 1]][tag];
            }
        }
        score
    }

    fn check_dims(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> Result<()> {
        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(SeqTagError::Alignment(format!(
                "emission score dimension mismatch: expected {}, got {}",
                self.num_tags,
                row.len()
            )));
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
        {
            return Err(SeqTagError::Alignment(format!(
                "transition matrix must be {0}x{0}",
                self.num_tags
            )));
        }
        if start_scores.len() != self.num_tags || end_scores.len() != self.num_tags {
            return Err(SeqTagError::Alignment(format!(
                "start/end scores must have {} entries",
                self.num_tags
            )));
        }
        Ok(())
    }
}
