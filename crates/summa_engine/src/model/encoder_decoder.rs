//! EncoderDecoderModel - shared embeddings, encoder/decoder stacks, LM head

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use std::path::Path;

use crate::generation::{beam_search, GenerationParams};
use crate::layers::{causal_bias, padding_bias};
use crate::model::{DecoderLayer, EncoderLayer, Seq2SeqConfig, Seq2SeqModel};

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

/// File names of an exported model directory.
pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Token + learned position embeddings with LayerNorm
pub struct Embeddings {
    pub word_embeddings: Embedding,
    pub position_embeddings: Embedding,
    pub norm: LayerNorm,
    pub max_positions: usize,
}

impl Embeddings {
    pub fn load(cfg: &Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        let word_embeddings =
            candle_nn::embedding(cfg.vocab_size, cfg.hidden_dim, vb.pp("word_embeddings"))?;
        let position_embeddings = candle_nn::embedding(
            cfg.max_position_embeddings,
            cfg.hidden_dim,
            vb.pp("position_embeddings"),
        )?;
        let norm = candle_nn::layer_norm(cfg.hidden_dim, cfg.layer_norm_eps, vb.pp("LayerNorm"))?;
        Ok(Self {
            word_embeddings,
            position_embeddings,
            norm,
            max_positions: cfg.max_position_embeddings,
        })
    }

    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let (_b_sz, seq_len) = ids.dims2()?;
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {} exceeds max_position_embeddings {}",
                seq_len,
                self.max_positions
            );
        }
        let positions = Tensor::arange(0u32, seq_len as u32, ids.device())?;
        let tokens = self.word_embeddings.forward(ids)?;
        let positions = self.position_embeddings.forward(&positions)?;
        self.norm.forward(&tokens.broadcast_add(&positions)?)
    }
}

/// Transformer encoder-decoder for conditional generation
pub struct EncoderDecoderModel {
    pub embeddings: Embeddings,
    pub encoder: Vec<EncoderLayer>,
    pub decoder: Vec<DecoderLayer>,
    pub lm_head: Linear,
    pub config: Seq2SeqConfig,
    pub device: Device,
}

impl EncoderDecoderModel {
    pub fn load(cfg: Seq2SeqConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let device = vb.device().clone();
        let embeddings = Embeddings::load(&cfg, vb.pp("embeddings"))?;

        let mut encoder = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            encoder.push(EncoderLayer::load(&cfg, vb.pp(format!("encoder.layer.{}", i)))?);
        }
        let mut decoder = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            decoder.push(DecoderLayer::load(&cfg, vb.pp(format!("decoder.layer.{}", i)))?);
        }

        let lm_head = candle_nn::linear(cfg.hidden_dim, cfg.vocab_size, vb.pp("lm_head"))?;

        tracing::debug!(
            "EncoderDecoderModel: vocab={} hidden={} layers={} heads={}",
            cfg.vocab_size,
            cfg.hidden_dim,
            cfg.num_layers,
            cfg.num_heads
        );

        Ok(Self {
            embeddings,
            encoder,
            decoder,
            lm_head,
            config: cfg,
            device,
        })
    }

    /// Load `config.json` + `model.safetensors` from an exported directory.
    pub fn load_dir<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let config = Seq2SeqConfig::load(dir.join(CONFIG_FILE))?;
        let weights = dir.join(WEIGHTS_FILE);
        if !weights.exists() {
            candle_core::bail!("No {} found in {:?}", WEIGHTS_FILE, dir);
        }
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        Self::load(config, vb)
    }

    /// `[batch, src_len]` ids + mask -> `[batch, src_len, hidden]` states
    pub fn encode(&self, source_ids: &Tensor, source_mask: &Tensor) -> Result<Tensor> {
        let mut hidden = self.embeddings.forward(source_ids)?;
        let bias = padding_bias(source_mask, hidden.dtype())?;
        for layer in &self.encoder {
            hidden = layer.forward(&hidden, &bias)?;
        }
        Ok(hidden)
    }

    /// Decoder pass over the full target prefix -> `[batch, tgt_len, vocab]` logits
    pub fn decode(
        &self,
        target_ids: &Tensor,
        target_mask: Option<&Tensor>,
        encoder_states: &Tensor,
        source_mask: &Tensor,
    ) -> Result<Tensor> {
        let (_b_sz, tgt_len) = target_ids.dims2()?;
        let mut hidden = self.embeddings.forward(target_ids)?;
        let dtype = hidden.dtype();

        let causal = causal_bias(tgt_len, dtype, &self.device)?;
        let self_bias = match target_mask {
            Some(mask) => causal.broadcast_add(&padding_bias(mask, dtype)?)?,
            None => causal,
        };
        let cross_bias = padding_bias(source_mask, dtype)?;

        for layer in &self.decoder {
            hidden = layer.forward(&hidden, &self_bias, encoder_states, &cross_bias)?;
        }
        self.lm_head.forward(&hidden)
    }

    /// Log-probabilities of the next token for each row of `prefixes`.
    fn next_token_log_probs(
        &self,
        prefixes: &[Vec<u32>],
        encoder_states: &Tensor,
        source_mask: &Tensor,
    ) -> Result<Vec<Vec<f32>>> {
        let n_rows = prefixes.len();
        let cur_len = prefixes[0].len();
        let flat: Vec<u32> = prefixes.iter().flatten().copied().collect();
        let ids = Tensor::from_vec(flat, (n_rows, cur_len), &self.device)?;

        let states = encoder_states.repeat((n_rows, 1, 1))?;
        let mask = source_mask.repeat((n_rows, 1))?;

        let logits = self.decode(&ids, None, &states, &mask)?;
        let last = logits.narrow(1, cur_len - 1, 1)?.squeeze(1)?;
        candle_nn::ops::log_softmax(&last, D::Minus1)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()
    }
}

impl Seq2SeqModel for EncoderDecoderModel {
    fn loss_and_logits(
        &self,
        source_ids: &Tensor,
        source_mask: &Tensor,
        target_ids: &Tensor,
        target_mask: &Tensor,
        labels: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let encoder_states = self.encode(source_ids, source_mask)?;
        let logits = self.decode(target_ids, Some(target_mask), &encoder_states, source_mask)?;
        let loss = shifted_cross_entropy(&logits, labels)?;
        Ok((loss, logits))
    }

    fn generate(
        &self,
        source_ids: &Tensor,
        source_mask: &Tensor,
        params: &GenerationParams,
    ) -> Result<Vec<Vec<u32>>> {
        let (b_sz, _src_len) = source_ids.dims2()?;
        let mut outputs = Vec::with_capacity(b_sz);

        for row in 0..b_sz {
            let ids = source_ids.narrow(0, row, 1)?;
            let mask = source_mask.narrow(0, row, 1)?;
            let cached = if params.use_cache {
                Some(self.encode(&ids, &mask)?)
            } else {
                None
            };

            let best = beam_search(params, |prefixes| {
                let states = match &cached {
                    Some(states) => states.clone(),
                    None => self.encode(&ids, &mask)?,
                };
                self.next_token_log_probs(prefixes, &states, &mask)
            })?;
            outputs.push(best);
        }

        Ok(outputs)
    }
}

/// Next-token cross-entropy: `logits[:, :-1]` against `labels[:, 1:]`,
/// skipping every label equal to [`IGNORE_INDEX`].
pub fn shifted_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b_sz, seq_len, vocab) = logits.dims3()?;
    let (l_b, l_len) = labels.dims2()?;
    if (l_b, l_len) != (b_sz, seq_len) {
        candle_core::bail!(
            "labels shape ({}, {}) does not match logits ({}, {})",
            l_b,
            l_len,
            b_sz,
            seq_len
        );
    }
    if seq_len < 2 {
        return Tensor::zeros((), DType::F32, logits.device());
    }

    let logits = logits
        .narrow(1, 0, seq_len - 1)?
        .reshape((b_sz * (seq_len - 1), vocab))?
        .to_dtype(DType::F32)?;
    let labels = labels
        .narrow(1, 1, seq_len - 1)?
        .to_dtype(DType::I64)?
        .reshape(b_sz * (seq_len - 1))?;

    let valid = labels.ge(0i64)?;
    let safe_labels = valid.where_cond(&labels, &labels.zeros_like()?)?;
    let weights = valid.to_dtype(DType::F32)?;

    let log_sm = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let nll = log_sm
        .gather(&safe_labels.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;

    let count = weights.sum_all()?.to_scalar::<f32>()?;
    let total = (nll * weights)?.sum_all()?;
    if count == 0.0 {
        return total.zeros_like();
    }
    total / count as f64
}
