//! Scoring Module - ROUGE statistics and bootstrap aggregation
//!
//! - rouge: per-example ROUGE-N / ROUGE-L precision, recall and f-measure
//! - bootstrap: confidence-interval aggregation over many examples

pub mod bootstrap;
pub mod rouge;

pub use bootstrap::{AggregateScore, BootstrapAggregator};
pub use rouge::{RougeMetric, RougeRecord, RougeScorer, Score};
