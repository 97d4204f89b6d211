//! EncoderLayer / DecoderLayer - attention + MLP blocks

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{FeedForward, MultiHeadAttention};
use crate::model::Seq2SeqConfig;

/// Bidirectional self-attention followed by the MLP.
pub struct EncoderLayer {
    pub attention: MultiHeadAttention,
    pub mlp: FeedForward,
}

impl EncoderLayer {
    pub fn load(cfg: &Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        let attention = MultiHeadAttention::load(cfg, vb.pp("attention"))?;
        let mlp = FeedForward::load(cfg, vb.clone())?;
        Ok(Self { attention, mlp })
    }

    pub fn forward(&self, x: &Tensor, padding_bias: &Tensor) -> Result<Tensor> {
        let x = self.attention.forward(x, x, Some(padding_bias))?;
        self.mlp.forward(&x)
    }
}

/// Causal self-attention, cross-attention over the encoder states, then the MLP.
pub struct DecoderLayer {
    pub attention: MultiHeadAttention,
    pub cross_attention: MultiHeadAttention,
    pub mlp: FeedForward,
}

impl DecoderLayer {
    pub fn load(cfg: &Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        let attention = MultiHeadAttention::load(cfg, vb.pp("attention"))?;
        let cross_attention = MultiHeadAttention::load(cfg, vb.pp("crossattention"))?;
        let mlp = FeedForward::load(cfg, vb.clone())?;
        Ok(Self {
            attention,
            cross_attention,
            mlp,
        })
    }

    pub fn forward(
        &self,
        x: &Tensor,
        self_bias: &Tensor,
        encoder_states: &Tensor,
        cross_bias: &Tensor,
    ) -> Result<Tensor> {
        let x = self.attention.forward(x, x, Some(self_bias))?;
        let x = self
            .cross_attention
            .forward(&x, encoder_states, Some(cross_bias))?;
        self.mlp.forward(&x)
    }
}
