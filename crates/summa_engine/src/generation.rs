//! Beam search decoding with n-gram repetition blocking

use candle_core::Result;
use std::cmp::Ordering;

/// Decoding constraints for [`crate::Seq2SeqModel::generate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub num_beams: usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    /// Fill value for finished rows; inert for per-row decoding.
    pub pad_token_id: u32,
    /// Upper bound on the generated length, start token included.
    pub max_length: usize,
    pub no_repeat_ngram_size: usize,
    pub length_penalty: f64,
    /// Reuse the encoder states across decode steps instead of recomputing them.
    pub use_cache: bool,
}

impl GenerationParams {
    pub fn new(num_beams: usize, start_id: u32, eos_id: u32, max_length: usize) -> Self {
        Self {
            num_beams,
            decoder_start_token_id: start_id,
            eos_token_id: eos_id,
            pad_token_id: eos_id,
            max_length,
            no_repeat_ngram_size: 0,
            length_penalty: 1.0,
            use_cache: true,
        }
    }

    pub fn with_no_repeat_ngram_size(mut self, size: usize) -> Self {
        self.no_repeat_ngram_size = size;
        self
    }

    pub fn with_pad_token_id(mut self, pad_id: u32) -> Self {
        self.pad_token_id = pad_id;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

#[derive(Clone, Debug)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f64,
}

impl Hypothesis {
    fn normalized(&self, length_penalty: f64) -> f64 {
        self.score / (self.tokens.len() as f64).powf(length_penalty)
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
pub fn banned_ngram_tokens(tokens: &[u32], ngram_size: usize) -> Vec<u32> {
    if ngram_size == 0 || tokens.len() + 1 < ngram_size {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() + 1 - ngram_size..];
    tokens
        .windows(ngram_size)
        .filter(|window| &window[..ngram_size - 1] == prefix)
        .map(|window| window[ngram_size - 1])
        .collect()
}

/// Indices of the `k` largest finite values, best first.
fn top_k(values: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i as u32, v))
        .collect();
    let by_score = |a: &(u32, f32), b: &(u32, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    if indexed.len() > k && k > 0 {
        indexed.select_nth_unstable_by(k - 1, by_score);
        indexed.truncate(k);
    }
    indexed.sort_by(by_score);
    indexed
}

/// Runs beam search for a single source row.
///
/// `next_log_probs` receives the live prefixes (all of equal length) and must
/// return one log-probability row over the vocabulary per prefix.
pub fn beam_search<F>(params: &GenerationParams, mut next_log_probs: F) -> Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
{
    let num_beams = params.num_beams.max(1);
    let mut beams = vec![Hypothesis {
        tokens: vec![params.decoder_start_token_id],
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    while beams[0].tokens.len() < params.max_length {
        let prefixes: Vec<Vec<u32>> = beams.iter().map(|b| b.tokens.clone()).collect();
        let log_probs = next_log_probs(&prefixes)?;
        if log_probs.len() != beams.len() {
            candle_core::bail!(
                "decoder returned {} rows for {} beams",
                log_probs.len(),
                beams.len()
            );
        }

        let mut candidates: Vec<(usize, u32, f64)> = Vec::with_capacity(beams.len() * num_beams * 2);
        for (beam_idx, (beam, row)) in beams.iter().zip(log_probs.iter()).enumerate() {
            let mut row = row.clone();
            for banned in banned_ngram_tokens(&beam.tokens, params.no_repeat_ngram_size) {
                if let Some(slot) = row.get_mut(banned as usize) {
                    *slot = f32::NEG_INFINITY;
                }
            }
            for (token, lp) in top_k(&row, 2 * num_beams) {
                candidates.push((beam_idx, token, beam.score + lp as f64));
            }
        }
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

        let mut next_beams = Vec::with_capacity(num_beams);
        for (rank, (beam_idx, token, score)) in candidates.into_iter().enumerate() {
            let mut tokens = beams[beam_idx].tokens.clone();
            tokens.push(token);
            if token == params.eos_token_id {
                // Only EOS among the top `num_beams` candidates may close a hypothesis.
                if rank < num_beams {
                    finished.push(Hypothesis { tokens, score });
                }
            } else {
                next_beams.push(Hypothesis { tokens, score });
            }
            if next_beams.len() == num_beams {
                break;
            }
        }

        if next_beams.is_empty() {
            break;
        }
        beams = next_beams;

        if finished.len() >= num_beams {
            finished.sort_by(|a, b| {
                b.normalized(params.length_penalty)
                    .partial_cmp(&a.normalized(params.length_penalty))
                    .unwrap_or(Ordering::Equal)
            });
            finished.truncate(num_beams);
            let worst_finished = finished[num_beams - 1].normalized(params.length_penalty);
            let best_running = beams[0].normalized(params.length_penalty);
            if best_running <= worst_finished {
                break;
            }
        }
    }

    // Hypotheses that hit the length bound compete with the EOS-terminated ones.
    finished.extend(beams);
    let best = finished
        .into_iter()
        .max_by(|a, b| {
            a.normalized(params.length_penalty)
                .partial_cmp(&b.normalized(params.length_penalty))
                .unwrap_or(Ordering::Equal)
        })
        .map(|h| h.tokens)
        .unwrap_or_else(|| vec![params.decoder_start_token_id]);

    Ok(best)
}
