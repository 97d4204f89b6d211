use anyhow::Result;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl Score {
    pub fn new(precision: f64, recall: f64) -> Self {
        let fmeasure = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            fmeasure,
        }
    }

    fn from_overlap(overlap: usize, prediction_len: usize, target_len: usize) -> Self {
        Self::new(
            overlap as f64 / prediction_len.max(1) as f64,
            overlap as f64 / target_len.max(1) as f64,
        )
    }
}

/// Per-example scores keyed by metric name.
pub type RougeRecord = BTreeMap<String, Score>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RougeMetric {
    /// n-gram overlap
    N(usize),
    /// longest common subsequence
    L,
}

impl fmt::Display for RougeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RougeMetric::N(n) => write!(f, "rouge{}", n),
            RougeMetric::L => f.write_str("rougeL"),
        }
    }
}

impl std::str::FromStr for RougeMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix("rouge") {
            Some("L") => Ok(RougeMetric::L),
            Some(n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Ok(RougeMetric::N(n)),
                _ => anyhow::bail!("Unknown ROUGE metric '{}'", s),
            },
            None => anyhow::bail!("Unknown ROUGE metric '{}'", s),
        }
    }
}

/// Tokens this short are compared verbatim.
const MIN_STEM_LEN: usize = 4;

pub struct RougeScorer {
    metrics: Vec<RougeMetric>,
    non_alnum: Regex,
    stemmer: Stemmer,
}

impl RougeScorer {
    pub fn new(metrics: Vec<RougeMetric>) -> Result<Self> {
        Ok(Self {
            metrics,
            non_alnum: Regex::new(r"[^a-z0-9]+")?,
            stemmer: Stemmer::create(Algorithm::English),
        })
    }

    /// rouge1, rouge2 and rougeL.
    pub fn standard() -> Result<Self> {
        Self::new(vec![RougeMetric::N(1), RougeMetric::N(2), RougeMetric::L])
    }

    /// Lowercases, splits on every run of non-alphanumeric characters and
    /// Porter-stems tokens longer than three characters.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.non_alnum
            .replace_all(&lowered, " ")
            .split_whitespace()
            .map(|token| {
                if token.len() >= MIN_STEM_LEN {
                    self.stemmer.stem(token).into_owned()
                } else {
                    token.to_string()
                }
            })
            .collect()
    }

    pub fn score(&self, target: &str, prediction: &str) -> RougeRecord {
        let target = self.tokenize(target);
        let prediction = self.tokenize(prediction);
        self.metrics
            .iter()
            .map(|metric| {
                let score = match metric {
                    RougeMetric::N(n) => score_ngrams(&target, &prediction, *n),
                    RougeMetric::L => score_lcs(&target, &prediction),
                };
                (metric.to_string(), score)
            })
            .collect()
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn score_ngrams(target: &[String], prediction: &[String], n: usize) -> Score {
    let target_counts = ngram_counts(target, n);
    let prediction_counts = ngram_counts(prediction, n);
    let overlap: usize = target_counts
        .iter()
        .map(|(gram, &c)| c.min(prediction_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    Score::from_overlap(
        overlap,
        prediction_counts.values().sum(),
        target_counts.values().sum(),
    )
}

pub fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn score_lcs(target: &[String], prediction: &[String]) -> Score {
    if target.is_empty() || prediction.is_empty() {
        return Score::default();
    }
    Score::from_overlap(lcs_len(target, prediction), prediction.len(), target.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_tokenize_normalizes() -> Result<()> {
        let scorer = RougeScorer::standard()?;
        assert_eq!(scorer.tokenize("The Cat, sat!  on-the mat."), toks("the cat sat on the mat"));
        assert!(scorer.tokenize(" ... ").is_empty());
        Ok(())
    }

    #[test]
    fn test_long_tokens_are_stemmed() -> Result<()> {
        let scorer = RougeScorer::standard()?;
        assert_eq!(scorer.tokenize("The dogs were running"), toks("the dog were run"));
        // "was" is too short to stem, "dogs" and "dog" meet on the stem
        let record = scorer.score("the dogs were running", "the dog was running");
        assert!((record["rouge1"].fmeasure - 0.75).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_identical_texts_score_one() -> Result<()> {
        let record = RougeScorer::standard()?.score("the cat sat", "the cat sat");
        for metric in ["rouge1", "rouge2", "rougeL"] {
            assert_eq!(record[metric], Score::new(1.0, 1.0));
        }
        Ok(())
    }

    #[test]
    fn test_partial_overlap() -> Result<()> {
        let record = RougeScorer::standard()?.score("dogs run fast", "dogs ran fast");
        let r1 = record["rouge1"];
        assert!((r1.fmeasure - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(record["rouge2"].fmeasure, 0.0);
        assert!((record["rougeL"].recall - 2.0 / 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_clipped_ngram_counts() -> Result<()> {
        // "the" appears twice in the prediction but once in the target
        let record = RougeScorer::new(vec![RougeMetric::N(1)])?.score("the cat", "the the");
        assert_eq!(record["rouge1"], Score::new(0.5, 0.5));
        Ok(())
    }

    #[test]
    fn test_lcs_and_empty_inputs() -> Result<()> {
        assert_eq!(lcs_len(&toks("a b c d e"), &toks("a c e x")), 3);
        let record = RougeScorer::standard()?.score("", "something");
        assert_eq!(record["rougeL"], Score::default());
        assert_eq!(record["rouge1"].fmeasure, 0.0);
        Ok(())
    }

    #[test]
    fn test_metric_names_roundtrip() -> Result<()> {
        for name in ["rouge1", "rouge2", "rougeL"] {
            assert_eq!(name.parse::<RougeMetric>()?.to_string(), name);
        }
        assert!("rouge0".parse::<RougeMetric>().is_err());
        assert!("bleu".parse::<RougeMetric>().is_err());
        Ok(())
    }
}
