//! Bootstrap aggregation of per-example scores
//!
//! Each metric is resampled with replacement `n_samples` times; the report
//! keeps the low / mid / high percentiles of the resampled means.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

use super::rouge::{RougeRecord, Score};

pub const DEFAULT_SAMPLES: usize = 1000;
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AggregateScore {
    pub low: Score,
    pub mid: Score,
    pub high: Score,
}

pub struct BootstrapAggregator {
    scores: BTreeMap<String, Vec<Score>>,
    n_samples: usize,
    confidence: f64,
    seed: u64,
}

impl BootstrapAggregator {
    pub fn new(seed: u64) -> Self {
        Self::with_params(DEFAULT_SAMPLES, DEFAULT_CONFIDENCE, seed)
    }

    pub fn with_params(n_samples: usize, confidence: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&confidence),
            "confidence must lie in [0, 1]"
        );
        Self {
            scores: BTreeMap::new(),
            n_samples: n_samples.max(1),
            confidence,
            seed,
        }
    }

    pub fn add_scores(&mut self, record: &RougeRecord) {
        for (metric, score) in record {
            self.scores.entry(metric.clone()).or_default().push(*score);
        }
    }

    pub fn len(&self) -> usize {
        self.scores.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentile intervals per metric. Independent of insertion order.
    pub fn aggregate(&self) -> BTreeMap<String, AggregateScore> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let low_pct = (1.0 - self.confidence) / 2.0 * 100.0;
        let high_pct = 100.0 - low_pct;

        let mut result = BTreeMap::new();
        for (metric, scores) in &self.scores {
            if scores.is_empty() {
                continue;
            }
            let mut canonical = scores.clone();
            canonical.sort_by(|a, b| {
                a.precision
                    .total_cmp(&b.precision)
                    .then(a.recall.total_cmp(&b.recall))
                    .then(a.fmeasure.total_cmp(&b.fmeasure))
            });

            let n = canonical.len();
            let mut means: [Vec<f64>; 3] = Default::default();
            for _ in 0..self.n_samples {
                let mut sums = [0.0f64; 3];
                for _ in 0..n {
                    let s = &canonical[rng.gen_range(0..n)];
                    sums[0] += s.precision;
                    sums[1] += s.recall;
                    sums[2] += s.fmeasure;
                }
                for (column, sum) in means.iter_mut().zip(sums) {
                    column.push(sum / n as f64);
                }
            }
            for column in means.iter_mut() {
                column.sort_by(f64::total_cmp);
            }
            let at = |pct: f64| Score {
                precision: percentile(&means[0], pct),
                recall: percentile(&means[1], pct),
                fmeasure: percentile(&means[2], pct),
            };
            result.insert(
                metric.clone(),
                AggregateScore {
                    low: at(low_pct),
                    mid: at(50.0),
                    high: at(high_pct),
                },
            );
        }
        result
    }
}

/// Linear-interpolated percentile of an ascending slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::rouge::RougeScorer;
    use proptest::prelude::*;

    fn record(f: f64) -> RougeRecord {
        let mut r = RougeRecord::new();
        r.insert("rouge1".to_string(), Score::new(f, f));
        r
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 50.0), 2.0);
        assert!((percentile(&v, 2.5) - 0.1).abs() < 1e-12);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert_eq!(percentile(&[7.0], 97.5), 7.0);
    }

    #[test]
    fn test_constant_scores_collapse_interval() {
        let mut agg = BootstrapAggregator::new(42);
        for _ in 0..10 {
            agg.add_scores(&record(0.5));
        }
        let result = agg.aggregate();
        let r1 = result["rouge1"];
        assert!((r1.low.fmeasure - 0.5).abs() < 1e-12);
        assert!((r1.mid.fmeasure - 0.5).abs() < 1e-12);
        assert!((r1.high.fmeasure - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_interval_is_ordered() {
        let mut agg = BootstrapAggregator::new(1);
        for i in 0..50 {
            agg.add_scores(&record(i as f64 / 50.0));
        }
        let r1 = agg.aggregate()["rouge1"];
        assert!(r1.low.fmeasure <= r1.mid.fmeasure);
        assert!(r1.mid.fmeasure <= r1.high.fmeasure);
        assert!(r1.low.fmeasure < r1.high.fmeasure);
    }

    #[test]
    fn test_empty_aggregator_reports_nothing() {
        assert!(BootstrapAggregator::new(0).aggregate().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_aggregation_is_commutative(
            pairs in prop::collection::vec(("[a-c ]{0,12}", "[a-c ]{0,12}"), 1..12),
            rotate in 0usize..12,
        ) {
            let scorer = RougeScorer::standard().unwrap();
            let records: Vec<RougeRecord> =
                pairs.iter().map(|(t, p)| scorer.score(t, p)).collect();

            let mut forward = BootstrapAggregator::with_params(200, 0.95, 9);
            records.iter().for_each(|r| forward.add_scores(r));

            let mut reordered = records.clone();
            reordered.reverse();
            let k = rotate % reordered.len();
            reordered.rotate_left(k);
            let mut permuted = BootstrapAggregator::with_params(200, 0.95, 9);
            reordered.iter().for_each(|r| permuted.add_scores(r));

            prop_assert_eq!(forward.aggregate(), permuted.aggregate());
        }
    }
}
