//! Layers Module - Transformer building blocks
//!
//! - MultiHeadAttention: self/cross attention with post-LayerNorm residual
//! - FeedForward: GELU MLP with post-LayerNorm residual
//! - attention bias helpers for padding and causal masking

use candle_core::{DType, Device, Result, Tensor};

pub mod attention;
pub mod feed_forward;

pub use attention::MultiHeadAttention;
pub use feed_forward::FeedForward;

/// Additive bias applied to masked attention scores.
/// Finite so that a fully padded row still yields a valid softmax.
pub const MASK_BIAS: f64 = -1e4;

/// Turns a `[batch, len]` 0/1 mask into a `[batch, 1, 1, len]` additive bias.
pub fn padding_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (b_sz, len) = mask.dims2()?;
    // 1 -> 0.0, 0 -> MASK_BIAS
    mask.to_dtype(dtype)?
        .affine(-MASK_BIAS, MASK_BIAS)?
        .reshape((b_sz, 1, 1, len))
}

/// `[1, 1, len, len]` bias that hides future positions.
pub fn causal_bias(len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..len)
        .flat_map(|i| (0..len).map(move |j| if j <= i { 0.0 } else { MASK_BIAS as f32 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, len, len), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_bias_values() -> anyhow::Result<()> {
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu)?;
        let bias = padding_bias(&mask, DType::F32)?;
        assert_eq!(bias.dims(), &[1, 1, 1, 3]);
        let v = bias.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(v[0], 0.0);
        assert_eq!(v[1], 0.0);
        assert_eq!(v[2], MASK_BIAS as f32);
        Ok(())
    }

    #[test]
    fn test_causal_bias_is_lower_triangular() -> anyhow::Result<()> {
        let bias = causal_bias(3, DType::F32, &Device::Cpu)?;
        let rows = bias.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![0.0, MASK_BIAS as f32, MASK_BIAS as f32]);
        assert_eq!(rows[2], vec![0.0, 0.0, 0.0]);
        Ok(())
    }
}
