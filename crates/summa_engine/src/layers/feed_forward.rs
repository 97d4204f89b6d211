//! FeedForward - GELU MLP (`intermediate` -> `output`)

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};

use crate::model::Seq2SeqConfig;

pub struct FeedForward {
    pub intermediate: Linear,
    pub output: Linear,
    pub norm: LayerNorm,
}

impl FeedForward {
    pub fn load(cfg: &Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        let intermediate = candle_nn::linear(
            cfg.hidden_dim,
            cfg.intermediate_dim,
            vb.pp("intermediate").pp("dense"),
        )?;
        let output = candle_nn::linear(cfg.intermediate_dim, cfg.hidden_dim, vb.pp("output").pp("dense"))?;
        let norm = candle_nn::layer_norm(cfg.hidden_dim, cfg.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?;
        Ok(Self {
            intermediate,
            output,
            norm,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.intermediate.forward(x)?.gelu_erf()?;
        let out = self.output.forward(&hidden)?;
        self.norm.forward(&(out + x)?)
    }
}
