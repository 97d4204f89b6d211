//! Model Module - encoder-decoder architecture
//!
//! - Seq2SeqModel: the capability the training/evaluation pipeline consumes
//! - EncoderLayer / DecoderLayer: transformer blocks
//! - EncoderDecoderModel: full model with shared embeddings and LM head
//! - Seq2SeqConfig: model configuration

use candle_core::{Result, Tensor};

use crate::generation::GenerationParams;

pub mod block;
pub mod config;
pub mod encoder_decoder;

pub use block::{DecoderLayer, EncoderLayer};
pub use config::Seq2SeqConfig;
pub use encoder_decoder::{
    shifted_cross_entropy, EncoderDecoderModel, CONFIG_FILE, IGNORE_INDEX, WEIGHTS_FILE,
};

/// A sequence-to-sequence model as seen by the orchestration layer.
///
/// All id and mask tensors are `[batch, len]` u32; `labels` is `[batch, len]`
/// i64 with [`IGNORE_INDEX`] at positions excluded from the loss.
pub trait Seq2SeqModel {
    /// Returns the scalar cross-entropy loss and the `[batch, len, vocab]` logits.
    fn loss_and_logits(
        &self,
        source_ids: &Tensor,
        source_mask: &Tensor,
        target_ids: &Tensor,
        target_mask: &Tensor,
        labels: &Tensor,
    ) -> Result<(Tensor, Tensor)>;

    /// Returns one generated id sequence per input row.
    fn generate(
        &self,
        source_ids: &Tensor,
        source_mask: &Tensor,
        params: &GenerationParams,
    ) -> Result<Vec<Vec<u32>>>;
}
