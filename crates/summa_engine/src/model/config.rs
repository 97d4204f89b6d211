//! Seq2SeqConfig - Model configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Epsilon for LayerNorm
pub const LAYER_NORM_EPS: f64 = 1e-12;

/// Model configuration for the encoder-decoder
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Seq2SeqConfig {
    pub vocab_size: usize,
    #[serde(alias = "hidden_size")]
    pub hidden_dim: usize,
    #[serde(alias = "num_hidden_layers", alias = "n_layers")]
    pub num_layers: usize,
    #[serde(alias = "num_attention_heads")]
    pub num_heads: usize,
    #[serde(alias = "intermediate_size")]
    pub intermediate_dim: usize,
    pub max_position_embeddings: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_layer_norm_eps() -> f64 {
    LAYER_NORM_EPS
}

impl Seq2SeqConfig {
    pub fn new(
        vocab_size: usize,
        hidden_dim: usize,
        num_layers: usize,
        num_heads: usize,
        max_position_embeddings: usize,
    ) -> Self {
        Self {
            vocab_size,
            hidden_dim,
            num_layers,
            num_heads,
            intermediate_dim: hidden_dim * 4,
            max_position_embeddings,
            layer_norm_eps: LAYER_NORM_EPS,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }

    /// Checks the dimension constraints the layers rely on.
    pub fn validate(&self) -> candle_core::Result<()> {
        if self.num_heads == 0 || self.hidden_dim % self.num_heads != 0 {
            candle_core::bail!(
                "hidden_dim ({}) must be a positive multiple of num_heads ({})",
                self.hidden_dim,
                self.num_heads
            );
        }
        if self.vocab_size == 0 || self.max_position_embeddings == 0 {
            candle_core::bail!("vocab_size and max_position_embeddings must be non-zero");
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> candle_core::Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(candle_core::Error::wrap)?;
        let config: Self = serde_json::from_str(&config_str).map_err(candle_core::Error::wrap)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> candle_core::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(candle_core::Error::wrap)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hf_style_keys_deserialize() {
        let json = r#"{
            "vocab_size": 30522,
            "hidden_size": 768,
            "num_hidden_layers": 12,
            "num_attention_heads": 12,
            "intermediate_size": 3072,
            "max_position_embeddings": 512
        }"#;
        let cfg: Seq2SeqConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.hidden_dim, 768);
        assert_eq!(cfg.num_layers, 12);
        assert_eq!(cfg.head_dim(), 64);
        assert_eq!(cfg.layer_norm_eps, LAYER_NORM_EPS);
    }

    #[test]
    fn test_validate_rejects_uneven_heads() {
        let mut cfg = Seq2SeqConfig::new(100, 30, 2, 4, 64);
        assert!(cfg.validate().is_err());
        cfg.num_heads = 3;
        assert!(cfg.validate().is_ok());
    }
}
