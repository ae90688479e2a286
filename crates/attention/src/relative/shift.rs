//! Transformer-XL relative shift.

use candle_core::{Result, Tensor};

/// Re-indexes content-position scores from absolute positional rows to
/// per-query relative offsets.
///
/// `scores` is `[batch, heads, q_len, pos_len]`, where column `c` scores the
/// positional row encoding offset `(pos_len - 1) / 2 - c`. After the shift,
/// column `j` of query row `i` holds the score of offset
/// `(k_len - q_len) + i - j`, for every `j < k_len`, provided
/// `pos_len >= q_len + k_len - 1`. Columns past `k_len` carry no meaning and
/// are truncated by the caller.
///
/// The shift pads one zero column on the left, reinterprets the buffer as
/// `[pos_len + 1, q_len]`, drops the first row and reinterprets the rest as
/// `[q_len, pos_len]`.
pub fn rel_shift(scores: &Tensor) -> Result<Tensor> {
    let (batch, heads, q_len, pos_len) = scores.dims4()?;
    scores
        .pad_with_zeros(3, 1, 0)?
        .reshape((batch, heads, pos_len + 1, q_len))?
        .narrow(2, 1, pos_len)?
        .contiguous()?
        .reshape((batch, heads, q_len, pos_len))
}
