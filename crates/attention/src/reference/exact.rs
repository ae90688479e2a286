//! Reference scaled dot-product attention.
//!
//! The exact path prioritises numerical fidelity. Inputs are laid out as
//! `[batch, heads, seq_len, head_dim]` and are expected to already sit in the
//! compute dtype; nothing here casts.

use candle_core::{Result as CandleResult, Tensor, D};

use crate::core::AttentionError;

/// Softmax over the last axis that tolerates fully excluded rows.
///
/// Rows whose entries are all `-inf` produce all-zero weights instead of NaN.
pub fn masked_softmax(scores: &Tensor) -> CandleResult<Tensor> {
    let row_max = scores.max_keepdim(D::Minus1)?.maximum(f32::MIN)?;
    let exp = scores.broadcast_sub(&row_max)?.exp()?;
    let denom = exp.sum_keepdim(D::Minus1)?.maximum(f32::MIN_POSITIVE)?;
    exp.broadcast_div(&denom)
}

/// Computes `softmax(q·kᵀ * scale + bias) · v`.
///
/// * `q` is `[batch, heads, q_len, head_dim]`, `k`/`v` are
///   `[batch, heads, k_len, head_dim]`.
/// * `bias`, when present, must broadcast to `[batch, heads, q_len, k_len]`.
pub fn scaled_dot_product_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    bias: Option<&Tensor>,
    scale: f64,
) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, head_dim) = q
        .dims4()
        .map_err(|_| AttentionError::shape("q must have shape [batch, heads, seq_len, head_dim]"))?;
    let (kb, kh, k_len, kd) = k
        .dims4()
        .map_err(|_| AttentionError::shape("k must have shape [batch, heads, seq_len, head_dim]"))?;
    let (vb, vh, vk, vd) = v
        .dims4()
        .map_err(|_| AttentionError::shape("v must have shape [batch, heads, seq_len, head_dim]"))?;

    if kb != batch || kh != heads || kd != head_dim {
        return Err(AttentionError::shape(format!(
            "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
        )));
    }
    if vb != batch || vh != heads || vk != k_len {
        return Err(AttentionError::shape(format!(
            "v shape mismatch: expected [{batch}, {heads}, {k_len}, ?] got [{vb}, {vh}, {vk}, {vd}]"
        )));
    }

    let mut scores = q
        .contiguous()?
        .matmul(&k.contiguous()?.transpose(2, 3)?)?
        .affine(scale, 0.0)?;
    if let Some(bias) = bias {
        scores = scores.broadcast_add(bias).map_err(|_| {
            AttentionError::shape(format!(
                "bias {:?} does not broadcast to [{batch}, {heads}, {q_len}, {k_len}]",
                bias.dims()
            ))
        })?;
    }

    let probs = masked_softmax(&scores)?;
    Ok(probs.matmul(&v.contiguous()?)?)
}
