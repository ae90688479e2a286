//! Dense window masks.
//!
//! The windowed attention module never materialises these; they exist so the
//! O(n²) relative-position path can reproduce a windowed computation for
//! comparison and for callers that want explicit masks.

use candle_core::{Device, Tensor};

use crate::core::{AttentionError, ContextWindow};

/// Construct a `[batch, q_len, k_len]` boolean mask excluding keys outside
/// `window`.
///
/// When `k_len > q_len`, query `q` is aligned with key `k_len - q_len + q`.
pub fn window_mask(
    device: &Device,
    batch: usize,
    q_len: usize,
    k_len: usize,
    window: &ContextWindow,
) -> Result<Tensor, AttentionError> {
    let offset = k_len.saturating_sub(q_len) as isize;
    let mut row_block = vec![0u8; q_len * k_len];
    for (q, row) in row_block.chunks_mut(k_len.max(1)).enumerate() {
        let anchor = q as isize + offset;
        for (k, flag) in row.iter_mut().enumerate() {
            if !window.admits(k as isize - anchor) {
                *flag = 1;
            }
        }
    }
    let data = row_block.repeat(batch);
    Ok(Tensor::from_vec(data, (batch, q_len, k_len), device)?)
}
