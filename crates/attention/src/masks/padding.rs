//! Builders for padding masks and their additive form.
//!
//! Padding masks are `[batch, seq_len]` tensors of dtype
//! [`MASK_DTYPE`](super::MASK_DTYPE); `1` marks a padded position.

use candle_core::{DType, Device, Tensor};

use crate::core::AttentionError;

/// Construct padding masks from per-batch valid lengths.
pub fn padding_mask_from_lengths(
    device: &Device,
    lengths: &[usize],
    max_len: usize,
) -> Result<Tensor, AttentionError> {
    let mut data = vec![0u8; lengths.len() * max_len];
    for (row, &valid) in data.chunks_mut(max_len.max(1)).zip(lengths) {
        for flag in row.iter_mut().skip(valid.min(max_len)) {
            *flag = 1;
        }
    }
    Ok(Tensor::from_vec(data, (lengths.len(), max_len), device)?)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded position.
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
) -> Result<Tensor, AttentionError> {
    let seq_len = padding.first().map(Vec::len).unwrap_or(0);
    if padding.iter().any(|row| row.len() != seq_len) {
        return Err(AttentionError::shape(
            "all boolean padding rows must share seq_len",
        ));
    }
    let data: Vec<u8> = padding
        .iter()
        .flat_map(|row| row.iter().map(|&padded| u8::from(padded)))
        .collect();
    Ok(Tensor::from_vec(data, (padding.len(), seq_len), device)?)
}

/// Converts a mask into an additive bias of dtype `dtype`.
///
/// Boolean masks map `1 -> -inf` and `0 -> 0`; float masks are assumed to be
/// biases already and are only cast.
pub fn additive_bias(mask: &Tensor, dtype: DType) -> Result<Tensor, AttentionError> {
    match mask.dtype() {
        DType::U8 => {
            let keep = Tensor::zeros(mask.shape(), dtype, mask.device())?;
            let drop = Tensor::full(f32::NEG_INFINITY, mask.shape(), mask.device())?
                .to_dtype(dtype)?;
            Ok(mask.where_cond(&drop, &keep)?)
        }
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(mask.to_dtype(dtype)?),
        other => Err(AttentionError::UnsupportedDType {
            requested: format!("mask dtype {other:?}"),
        }),
    }
}

/// Normalises a score mask to a rank-4 additive bias.
///
/// Accepted layouts are `[B, Sk]` (key padding), `[B, Sq | 1, Sk]` and
/// `[B, H | 1, Sq | 1, Sk]`; `B` may also be `1`. The result broadcasts
/// against scores shaped `[batch, heads, q_len, k_len]`.
pub fn expand_attention_bias(
    mask: &Tensor,
    batch: usize,
    q_len: usize,
    k_len: usize,
    dtype: DType,
) -> Result<Tensor, AttentionError> {
    let expanded = match *mask.dims() {
        [mb, mk] => mask.reshape((mb, 1, 1, mk))?,
        [mb, mq, mk] => mask.reshape((mb, 1, mq, mk))?,
        [_, _, _, _] => mask.clone(),
        ref dims => {
            return Err(AttentionError::shape(format!(
                "mask must be rank 2, 3 or 4, got {dims:?}"
            )))
        }
    };
    let (mb, _mh, mq, mk) = expanded.dims4()?;
    if (mb != batch && mb != 1) || (mq != q_len && mq != 1) || mk != k_len {
        return Err(AttentionError::shape(format!(
            "mask {:?} does not broadcast to [{batch}, *, {q_len}, {k_len}]",
            mask.dims()
        )));
    }
    additive_bias(&expanded, dtype)
}
