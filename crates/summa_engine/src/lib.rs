//! Summa Engine
//!
//! Transformer encoder-decoder for abstractive summarization, built on candle.
//! Exposes the [`Seq2SeqModel`] capability (cross-entropy loss and beam-search
//! generation) consumed by the `summa` training/evaluation pipeline.

pub mod device_utils;
pub mod generation;
pub mod layers;
pub mod model;

pub use generation::{beam_search, banned_ngram_tokens, GenerationParams};
pub use model::{
    EncoderDecoderModel, Seq2SeqConfig, Seq2SeqModel, CONFIG_FILE, IGNORE_INDEX, WEIGHTS_FILE,
};
