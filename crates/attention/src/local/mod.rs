//! Windowed relative-position multi-head attention.
//!
//! Every query attends to at most `2w + 1` keys, `w = max(left, right)`.
//! Scores live in band layout `[batch, heads, q_len, 2w + 1]` and are never
//! expanded to `q_len x k_len`; [`kernels::banded_qk`] and
//! [`kernels::banded_pv`] do the work in `O(seq * w)`.
//!
//! Queries stick to the right of the key sequence: when a cache makes keys
//! longer than queries, query `i` is aligned with key `k_len - q_len + i`.

pub mod kernels;

use candle_core::{DType, Device, Tensor};
use layers::{Linear, LinearConfig, LinearInit};

use crate::core::{Attention, AttentionConfig, AttentionError, ContextWindow};
use crate::kv_cache::{extend_context, AttentionCache};
use crate::masks::{additive_bias, MASK_DTYPE};
use crate::multi_head::{MultiHeadAttention, Projections};
use crate::reference::masked_softmax;
use crate::relative::{PositionBias, RelPositionMultiHeadAttention};

pub use kernels::{banded_pv, banded_qk};

/// Relative-position attention restricted to a local window.
#[derive(Debug, Clone)]
pub struct LocalRelPositionMultiHeadAttention {
    rel: RelPositionMultiHeadAttention,
    window: ContextWindow,
}

impl LocalRelPositionMultiHeadAttention {
    /// Constructs a module with Xavier-initialised projections.
    ///
    /// Missing `pos_bias` values are zero-filled.
    pub fn new(
        config: AttentionConfig,
        window: ContextWindow,
        pos_bias: Option<PositionBias>,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::with_init(&config, &LinearInit::XavierUniform, device, dtype)?;
        let linear_pos = Linear::with_init(
            LinearConfig::new(config.n_feat, config.n_feat).with_bias(false),
            &LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        let pos_bias = match pos_bias {
            Some(bias) => bias,
            None => PositionBias::zeros(&config, device, dtype)?,
        };
        let base = MultiHeadAttention::from_projections(config, projections, dtype)?;
        let rel = RelPositionMultiHeadAttention::from_parts(base, linear_pos, pos_bias)?;
        Ok(Self::from_parts(rel, window))
    }

    /// Windows an existing relative-position module, sharing its weights.
    pub fn from_parts(rel: RelPositionMultiHeadAttention, window: ContextWindow) -> Self {
        log::debug!(
            "attention::local built window=({}, {}) band={}",
            window.left(),
            window.right(),
            window.band_width()
        );
        Self { rel, window }
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn config(&self) -> &AttentionConfig {
        self.rel.config()
    }

    pub fn relative(&self) -> &RelPositionMultiHeadAttention {
        &self.rel
    }

    /// Per-key boolean mask covering `k_len` keys padded to `padded_len`.
    ///
    /// Keys that precede the query chunk (cached history) are never padding.
    fn key_mask(&self, mask: &Tensor, k_len: usize, padded_len: usize) -> Result<Tensor, AttentionError> {
        let (batch, q_len) = mask.dims2()?;
        let history = k_len - q_len;
        let mask = if history > 0 {
            let visible = Tensor::zeros((batch, history), MASK_DTYPE, mask.device())?;
            Tensor::cat(&[&visible, mask], 1)?
        } else {
            mask.clone()
        };
        pad_mask(&mask, padded_len)
    }
}

/// Smallest multiple of `chunk` that holds `len`.
fn padded_len(len: usize, chunk: usize) -> usize {
    len.div_ceil(chunk) * chunk
}

/// Right-pads axis 2 of a `[batch, heads, seq, dim]` tensor with zeros.
fn pad_sequence(x: &Tensor, target: usize) -> Result<Tensor, AttentionError> {
    let len = x.dim(2)?;
    if len == target {
        return Ok(x.clone());
    }
    Ok(x.pad_with_zeros(2, 0, target - len)?)
}

/// Right-pads a `[batch, seq]` boolean mask, marking the new tail as padding.
fn pad_mask(mask: &Tensor, target: usize) -> Result<Tensor, AttentionError> {
    let (batch, len) = mask.dims2()?;
    if len == target {
        return Ok(mask.clone());
    }
    let tail = Tensor::ones((batch, target - len), MASK_DTYPE, mask.device())?;
    Ok(Tensor::cat(&[mask, &tail], 1)?)
}

/// Adds the content-position band `bd` into the content-content band `ac`
/// and excludes offsets outside `window`.
///
/// `ac` is `[.., 2w + 1]`; `bd` is `[.., pos_len]`. The left
/// `min(left, w)` columns receive `bd`'s leading columns. The columns from
/// `2w - right` onward receive `bd`'s columns starting at `min(left, 2w + 1)`.
/// Every width is clamped to the extents actually present.
pub(crate) fn compose_band(
    ac: &Tensor,
    bd: &Tensor,
    window: &ContextWindow,
) -> Result<Tensor, AttentionError> {
    let band = ac.dim(3)?;
    let pos_len = bd.dim(3)?;
    let (left, right, w) = (window.left(), window.right(), window.half_width());
    if band != 2 * w + 1 {
        return Err(AttentionError::invariant(format!(
            "content band has {band} columns for half width {w}"
        )));
    }

    let mut scores = ac.clone();
    let left_width = left.min(w).min(pos_len);
    if left_width > 0 {
        let piece = bd.narrow(3, 0, left_width)?.pad_with_zeros(3, 0, band - left_width)?;
        scores = scores.add(&piece)?;
    }
    let ac_start = band - (right + 1);
    let bd_start = left.min(band);
    let right_width = (band - ac_start).min(pos_len.saturating_sub(bd_start));
    if right_width > 0 {
        let piece = bd
            .narrow(3, bd_start, right_width)?
            .pad_with_zeros(3, ac_start, band - ac_start - right_width)?;
        scores = scores.add(&piece)?;
    }

    let outside: Vec<f32> = (0..band)
        .map(|c| {
            if c + left < w || c >= w + right + 1 {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    let outside = Tensor::from_vec(outside, (1, 1, 1, band), ac.device())?.to_dtype(ac.dtype())?;
    Ok(scores.broadcast_add(&outside)?)
}

impl Attention for LocalRelPositionMultiHeadAttention {
    /// `pos_emb` must hold exactly `2w + 1` rows for offsets `w ..= -w` (as
    /// produced by `LocalRelPositionalEncoding`). `mask`, when present, is a
    /// `[B, Sq]` `U8` tensor flagging padded positions; it applies to queries
    /// and to the matching keys.
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_emb: Option<&Tensor>,
        mask: Option<&Tensor>,
        cache: Option<&mut dyn AttentionCache>,
    ) -> Result<Tensor, AttentionError> {
        const VARIANT: &str = "windowed relative-position";
        let pos_emb = pos_emb.ok_or(AttentionError::MissingPositionalEmbedding { variant: VARIANT })?;
        let base = self.rel.base();
        base.log_first_call("local", || {
            format!(
                "window=({}, {}) band={}",
                self.window.left(),
                self.window.right(),
                self.window.band_width()
            )
        });

        let context = extend_context(cache, key, value, Some(pos_emb))?;
        let pos_emb = context
            .pos_emb
            .as_ref()
            .ok_or(AttentionError::MissingPositionalEmbedding { variant: VARIANT })?;
        let dims = base.validate_inputs(query, &context.key, &context.value)?;
        if dims.k_len < dims.q_len {
            return Err(AttentionError::shape(format!(
                "key length {} is shorter than query length {}",
                dims.k_len, dims.q_len
            )));
        }
        let shift = dims.k_len - dims.q_len;
        let (w, band) = (self.window.half_width(), self.window.band_width());

        let mask = match mask {
            Some(mask) => {
                if mask.dtype() != MASK_DTYPE {
                    return Err(AttentionError::UnsupportedDType {
                        requested: format!("windowed attention mask dtype {:?}", mask.dtype()),
                    });
                }
                if mask.dims() != [dims.batch, dims.q_len] {
                    return Err(AttentionError::shape(format!(
                        "windowed attention mask must be [{}, {}], got {:?}",
                        dims.batch,
                        dims.q_len,
                        mask.dims()
                    )));
                }
                mask.clone()
            }
            None => Tensor::zeros((dims.batch, dims.q_len), MASK_DTYPE, query.device())?,
        };

        let (q, k, v) = base.forward_qkv(query, &context.key, &context.value)?;
        let p = self.rel.project_pos(pos_emb, dims.batch)?;
        if p.dim(2)? != band {
            return Err(AttentionError::shape(format!(
                "pos_emb must hold {band} rows for window ({}, {}), got {}",
                self.window.left(),
                self.window.right(),
                p.dim(2)?
            )));
        }

        let q_padded = padded_len(dims.q_len, 2 * w);
        let k_padded = padded_len(dims.k_len, 2 * w);
        let q = pad_sequence(&q, q_padded)?;
        let k = pad_sequence(&k, k_padded)?;
        let v = pad_sequence(&v, k_padded)?;
        let query_mask = pad_mask(&mask, q_padded)?;
        let key_mask = self.key_mask(&mask, dims.k_len, k_padded)?;

        let (q_u, q_v) = self.rel.biased_queries(&q)?;
        let matrix_ac = banded_qk(&q_u, &k, w, shift)?;
        let matrix_bd = self.rel.position_scores(&q_v, &p)?;
        let scores = compose_band(&matrix_ac, &matrix_bd, &self.window)?.affine(self.config().scale(), 0.0)?;

        let compute = base.policy().compute();
        let key_bias = additive_bias(&key_mask, compute)?.reshape((dims.batch, 1, k_padded, 1))?;
        let probe = Tensor::ones((dims.batch, 1, q_padded, 1), compute, query.device())?;
        let mask_band = banded_qk(&probe, &key_bias, w, shift)?;
        let probs = masked_softmax(&scores.broadcast_add(&mask_band)?)?;

        let keep = query_mask
            .eq(0u8)?
            .to_dtype(compute)?
            .reshape((dims.batch, 1, q_padded, 1))?;
        let probs = probs.broadcast_mul(&keep)?;

        let attended = banded_pv(&probs, &v, w, shift)?;
        if attended.dim(1)? < dims.q_len {
            return Err(AttentionError::invariant(format!(
                "banded context has {} rows for {} queries",
                attended.dim(1)?,
                dims.q_len
            )));
        }
        base.project_out(&attended.narrow(1, 0, dims.q_len)?.contiguous()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{padding_mask_from_lengths, window_mask};
    use candle_core::Result as CandleResult;
    use embedding::{LocalRelPositionalEncoding, RelPositionalEncoding};

    fn rel_module(config: AttentionConfig, init: LinearInit) -> RelPositionMultiHeadAttention {
        let device = Device::Cpu;
        let projections = Projections::with_init(&config, &init, &device, DType::F32).unwrap();
        let linear_pos = Linear::with_init(
            LinearConfig::new(config.n_feat, config.n_feat).with_bias(false),
            &init,
            &device,
            DType::F32,
        )
        .unwrap();
        let pos_bias = PositionBias {
            u: Tensor::randn(0f32, 0.5, (config.n_heads, config.head_dim()), &device).unwrap(),
            v: Tensor::randn(0f32, 0.5, (config.n_heads, config.head_dim()), &device).unwrap(),
        };
        let base = MultiHeadAttention::from_projections(config, projections, DType::F32).unwrap();
        RelPositionMultiHeadAttention::from_parts(base, linear_pos, pos_bias).unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()
    }

    #[test]
    fn padded_len_rounds_up_to_chunks() {
        assert_eq!(padded_len(5, 4), 8);
        assert_eq!(padded_len(8, 4), 8);
        assert_eq!(padded_len(1, 2), 2);
    }

    #[test]
    fn symmetric_composition_adds_the_whole_band() -> CandleResult<()> {
        let device = Device::Cpu;
        let window = ContextWindow::symmetric(2).unwrap();
        let ac = Tensor::randn(0f32, 1.0, (1, 2, 3, 5), &device)?;
        let bd = Tensor::randn(0f32, 1.0, (1, 2, 3, 5), &device)?;
        let composed = compose_band(&ac, &bd, &window).unwrap();
        assert!(max_abs_diff(&composed, &ac.add(&bd)?)? < 1e-6);
        Ok(())
    }

    #[test]
    fn asymmetric_composition_excludes_outside_offsets() -> CandleResult<()> {
        let device = Device::Cpu;
        // w = 3, band = 7, admissible columns 2..=6.
        let window = ContextWindow::new(1, 3).unwrap();
        let ac = Tensor::zeros((1, 1, 1, 7), DType::F32, &device)?;
        let bd = Tensor::arange(1f32, 8.0, &device)?.reshape((1, 1, 1, 7))?;
        let row = compose_band(&ac, &bd, &window)
            .unwrap()
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert_eq!(row[0], f32::NEG_INFINITY);
        assert_eq!(row[1], f32::NEG_INFINITY);
        // Left piece covers column 0 only; right piece maps bd[1..5) onto 3..7.
        assert_eq!(row[2], 0.0);
        assert_eq!(&row[3..7], &[2.0, 3.0, 4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn requires_positional_embedding() -> CandleResult<()> {
        let window = ContextWindow::symmetric(2).unwrap();
        let attention = LocalRelPositionMultiHeadAttention::new(
            AttentionConfig::new(2, 8),
            window,
            None,
            &Device::Cpu,
            DType::F32,
        )
        .unwrap();
        let x = Tensor::zeros((1, 5, 8), DType::F32, &Device::Cpu)?;
        let err = attention.forward(&x, &x, &x, None, None, None).unwrap_err();
        assert!(matches!(err, AttentionError::MissingPositionalEmbedding { .. }));
        Ok(())
    }

    #[test]
    fn rejects_positional_rows_outside_the_band() -> CandleResult<()> {
        let window = ContextWindow::symmetric(2).unwrap();
        let attention = LocalRelPositionMultiHeadAttention::new(
            AttentionConfig::new(2, 8),
            window,
            None,
            &Device::Cpu,
            DType::F32,
        )
        .unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 8), &Device::Cpu)?;
        let pos_emb = Tensor::randn(0f32, 1.0, (1, 9, 8), &Device::Cpu)?;
        let err = attention.forward(&x, &x, &x, Some(&pos_emb), None, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn rejects_float_masks() -> CandleResult<()> {
        let device = Device::Cpu;
        let window = ContextWindow::symmetric(1).unwrap();
        let attention = LocalRelPositionMultiHeadAttention::new(
            AttentionConfig::new(2, 8),
            window,
            None,
            &device,
            DType::F32,
        )
        .unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let pos_emb = LocalRelPositionalEncoding::new(8, 1, false, &device, DType::F32)?.pos_emb();
        let mask = Tensor::zeros((1, 4), DType::F32, &device)?;
        let err = attention
            .forward(&x, &x, &x, Some(&pos_emb), Some(&mask), None)
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }

    #[test]
    fn full_window_matches_relative_attention() -> CandleResult<()> {
        let device = Device::Cpu;
        let len = 6;
        let rel = rel_module(AttentionConfig::new(2, 8), LinearInit::XavierUniform);
        let window = ContextWindow::symmetric(len as i64).unwrap();
        let local = LocalRelPositionMultiHeadAttention::from_parts(rel.clone(), window);

        let x = Tensor::randn(0f32, 1.0, (2, len, 8), &device)?;
        let full_pos = RelPositionalEncoding::new(8, len, false, &device, DType::F32)?.pos_emb(len)?;
        let band_pos = LocalRelPositionalEncoding::new(8, len, false, &device, DType::F32)?.pos_emb();

        let expected = rel.forward(&x, &x, &x, Some(&full_pos), None, None).unwrap();
        let out = local.forward(&x, &x, &x, Some(&band_pos), None, None).unwrap();
        assert_eq!(out.dims(), &[2, len, 8]);
        let diff = max_abs_diff(&out, &expected)?;
        assert!(diff < 1e-5, "diff {diff}");
        Ok(())
    }

    #[test]
    fn narrow_window_matches_masked_relative_attention() -> CandleResult<()> {
        let device = Device::Cpu;
        let len = 5;
        let rel = rel_module(AttentionConfig::new(2, 8), LinearInit::Identity);
        let window = ContextWindow::symmetric(2).unwrap();
        let local = LocalRelPositionMultiHeadAttention::from_parts(rel.clone(), window);

        let x = Tensor::randn(0f32, 1.0, (1, len, 8), &device)?;
        let full_pos = RelPositionalEncoding::new(8, len, false, &device, DType::F32)?.pos_emb(len)?;
        let band_pos = LocalRelPositionalEncoding::new(8, 2, false, &device, DType::F32)?.pos_emb();
        let dense_window = window_mask(&device, 1, len, len, &window).unwrap();

        let expected = rel
            .forward(&x, &x, &x, Some(&full_pos), Some(&dense_window), None)
            .unwrap();
        let out = local.forward(&x, &x, &x, Some(&band_pos), None, None).unwrap();
        let diff = max_abs_diff(&out, &expected)?;
        assert!(diff < 1e-5, "diff {diff}");
        Ok(())
    }

    #[test]
    fn padded_queries_yield_zero_context() -> CandleResult<()> {
        let device = Device::Cpu;
        let config = AttentionConfig {
            bias: false,
            ..AttentionConfig::new(2, 8)
        };
        let window = ContextWindow::symmetric(2).unwrap();
        let attention =
            LocalRelPositionMultiHeadAttention::new(config, window, None, &device, DType::F32).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 6, 8), &device)?;
        let pos_emb = LocalRelPositionalEncoding::new(8, 2, false, &device, DType::F32)?.pos_emb();
        let mask = padding_mask_from_lengths(&device, &[4, 6], 6).unwrap();

        let out = attention
            .forward(&x, &x, &x, Some(&pos_emb), Some(&mask), None)
            .unwrap();
        let values = out.to_vec3::<f32>()?;
        assert!(values.iter().flatten().flatten().all(|v| v.is_finite()));
        assert!(values[0][4..].iter().flatten().all(|v| *v == 0.0));
        assert!(values[1][5].iter().any(|v| *v != 0.0));
        Ok(())
    }
}
