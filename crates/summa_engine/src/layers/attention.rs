//! MultiHeadAttention - scaled dot-product attention over padded batches

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};

use crate::model::Seq2SeqConfig;

/// Attention sub-layer: `query/key/value` projections under `self`,
/// output projection and residual LayerNorm under `output`.
#[derive(Clone)]
pub struct MultiHeadAttention {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub dense: Linear,
    pub norm: LayerNorm,
    pub num_heads: usize,
    pub head_dim: usize,
    pub scaling: f64,
}

impl MultiHeadAttention {
    pub fn load(cfg: &Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_dim;
        let head_dim = cfg.head_dim();
        let scaling = 1.0 / (head_dim as f64).sqrt();

        let query = candle_nn::linear(hidden, hidden, vb.pp("self").pp("query"))?;
        let key = candle_nn::linear(hidden, hidden, vb.pp("self").pp("key"))?;
        let value = candle_nn::linear(hidden, hidden, vb.pp("self").pp("value"))?;
        let dense = candle_nn::linear(hidden, hidden, vb.pp("output").pp("dense"))?;
        let norm = candle_nn::layer_norm(hidden, cfg.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?;

        Ok(Self {
            query,
            key,
            value,
            dense,
            norm,
            num_heads: cfg.num_heads,
            head_dim,
            scaling,
        })
    }

    /// Attends `hidden` (queries) over `context` (keys/values).
    /// For self-attention pass the same tensor twice.
    /// `bias` broadcasts against `[batch, heads, q_len, k_len]`.
    pub fn forward(&self, hidden: &Tensor, context: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let (b_sz, q_len, hidden_dim) = hidden.dims3()?;
        let (_, k_len, _) = context.dims3()?;

        // [Batch, Seq, Hidden] -> [Batch, Heads, Seq, Dim]
        let q = self
            .query
            .forward(hidden)?
            .reshape((b_sz, q_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .key
            .forward(context)?
            .reshape((b_sz, k_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .value
            .forward(context)?
            .reshape((b_sz, k_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scaling)?;
        let scores = match bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        // [Batch, Heads, Seq, Dim] -> [Batch, Seq, Hidden]
        let attended = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b_sz, q_len, hidden_dim))?;

        let projected = self.dense.forward(&attended)?;
        self.norm.forward(&(projected + hidden)?)
    }
}
