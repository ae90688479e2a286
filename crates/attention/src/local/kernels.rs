//! Banded score and value kernels.
//!
//! Both kernels walk only the `2w + 1` keys a query can reach, so their cost
//! is `O(seq * w)` instead of `O(seq²)`. Query `i` is anchored at key
//! `i + shift` (stick-to-right alignment, `shift = k_len - q_len`), and band
//! column `c` refers to key `i + shift + c - w`. References outside the key
//! tensor score `-inf` in [`banded_qk`] and contribute nothing in
//! [`banded_pv`].
//!
//! Work items are independent rows and run on the rayon pool. Accumulation
//! happens in `f32`; results are cast to the query/probability dtype on write.

use candle_core::{DType, Tensor};
use rayon::prelude::*;

use crate::core::AttentionError;

fn to_f32_vec(tensor: &Tensor) -> Result<Vec<f32>, AttentionError> {
    Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

/// Key index referenced by band column `column` of query `query`, if any.
#[inline]
fn band_key(query: usize, column: usize, shift: usize, half_width: usize, keys: usize) -> Option<usize> {
    let key = (query + shift + column).checked_sub(half_width)?;
    (key < keys).then_some(key)
}

/// Banded dot products `out[b, h, i, c] = query[b, h, i] · key[b, h, i + shift + c - w]`.
///
/// * `query` is `[batch, heads, q_len, dim]`, `key` is `[batch, heads, k_len, dim]`.
/// * Returns `[batch, heads, q_len, 2w + 1]`.
///
/// With `dim == 1` and an all-ones query this bands an additive per-key bias,
/// which is how padding masks are brought into band layout.
pub fn banded_qk(
    query: &Tensor,
    key: &Tensor,
    half_width: usize,
    shift: usize,
) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, dim) = query.dims4()?;
    let (kb, kh, k_len, kd) = key.dims4()?;
    if (kb, kh, kd) != (batch, heads, dim) {
        return Err(AttentionError::invariant(format!(
            "banded_qk operands disagree: query {:?}, key {:?}",
            query.dims(),
            key.dims()
        )));
    }
    let band = 2 * half_width + 1;
    log::trace!(
        "banded_qk grid rows={} band={band} dim={dim} shift={shift}",
        batch * heads * q_len
    );

    let q_data = to_f32_vec(query)?;
    let k_data = to_f32_vec(key)?;
    let mut scores = vec![0f32; batch * heads * q_len * band];

    scores
        .par_chunks_mut(band)
        .enumerate()
        .for_each(|(row, out)| {
            let (bh, i) = (row / q_len, row % q_len);
            let q_row = &q_data[row * dim..(row + 1) * dim];
            for (column, slot) in out.iter_mut().enumerate() {
                *slot = match band_key(i, column, shift, half_width, k_len) {
                    Some(j) => {
                        let k_row = &k_data[(bh * k_len + j) * dim..(bh * k_len + j + 1) * dim];
                        q_row.iter().zip(k_row).map(|(a, b)| a * b).sum()
                    }
                    None => f32::NEG_INFINITY,
                };
            }
        });

    let out = Tensor::from_vec(scores, (batch, heads, q_len, band), query.device())?;
    Ok(out.to_dtype(query.dtype())?)
}

/// Banded weighted sums `out[b, i, h * dim + d] = Σ_c probs[b, h, i, c] * value[b, h, i + shift + c - w, d]`.
///
/// * `probs` is `[batch, heads, q_len, 2w + 1]`, `value` is
///   `[batch, heads, v_len, dim]`.
/// * Returns `[batch, q_len, heads * dim]`; heads are merged in place.
pub fn banded_pv(
    probs: &Tensor,
    value: &Tensor,
    half_width: usize,
    shift: usize,
) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, band) = probs.dims4()?;
    let (vb, vh, v_len, dim) = value.dims4()?;
    if band != 2 * half_width + 1 {
        return Err(AttentionError::invariant(format!(
            "banded_pv expects {} band columns, got {band}",
            2 * half_width + 1
        )));
    }
    if (vb, vh) != (batch, heads) {
        return Err(AttentionError::invariant(format!(
            "banded_pv operands disagree: probs {:?}, value {:?}",
            probs.dims(),
            value.dims()
        )));
    }
    log::trace!(
        "banded_pv grid rows={} channels={} band={band} shift={shift}",
        batch * q_len,
        heads * dim
    );

    let p_data = to_f32_vec(probs)?;
    let v_data = to_f32_vec(value)?;
    let width = heads * dim;
    let mut context = vec![0f32; batch * q_len * width];

    context
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            let (b, i) = (row / q_len, row % q_len);
            for (h, channels) in out.chunks_mut(dim).enumerate() {
                let bh = b * heads + h;
                let weights = &p_data[(bh * q_len + i) * band..(bh * q_len + i + 1) * band];
                for (column, &weight) in weights.iter().enumerate() {
                    if weight == 0.0 {
                        continue;
                    }
                    let Some(j) = band_key(i, column, shift, half_width, v_len) else {
                        continue;
                    };
                    let v_row = &v_data[(bh * v_len + j) * dim..(bh * v_len + j + 1) * dim];
                    for (acc, v) in channels.iter_mut().zip(v_row) {
                        *acc += weight * v;
                    }
                }
            }
        });

    let out = Tensor::from_vec(context, (batch, q_len, width), probs.device())?;
    Ok(out.to_dtype(probs.dtype())?)
}
