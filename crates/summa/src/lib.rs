//! Summa
//!
//! Training and evaluation orchestration for an encoder-decoder summarizer:
//! data framing and caching, batch sanitizing, learning-rate schedules,
//! grouped AdamW with gradient accumulation, beam-search generation and
//! ROUGE scoring with bootstrap confidence intervals.

pub mod cli;
pub mod config;
pub mod data;
pub mod evaluate;
pub mod export;
pub mod generate;
pub mod inference;
pub mod scoring;
pub mod tokenizer;
pub mod train;

pub use config::SummarizerConfig;
pub use tokenizer::SummaryTokenizer;
