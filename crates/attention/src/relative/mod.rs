//! Relative-position multi-head attention.
//!
//! Scores decompose into a content-content term `(q + u)·kᵀ` and a
//! content-position term `(q + v)·pᵀ`, where `p` is the projected relative
//! positional embedding and `u`, `v` are learned per-head biases. The
//! content-position term is computed against absolute positional rows and
//! re-indexed to relative offsets with [`rel_shift`].

pub mod shift;

use candle_core::{DType, Device, Tensor};
use layers::{checks, Linear, LinearConfig, LinearInit};

use crate::core::{Attention, AttentionConfig, AttentionError};
use crate::kv_cache::{extend_context, AttentionCache};
use crate::masks::expand_attention_bias;
use crate::multi_head::{MultiHeadAttention, Projections};
use crate::reference::scaled_dot_product_attention;

pub use shift::rel_shift;

/// Learned per-head biases added to queries before the two score terms.
#[derive(Debug, Clone)]
pub struct PositionBias {
    /// Added for the content-content term, `[n_heads, head_dim]`.
    pub u: Tensor,
    /// Added for the content-position term, `[n_heads, head_dim]`.
    pub v: Tensor,
}

impl PositionBias {
    pub fn zeros(config: &AttentionConfig, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        let shape = (config.n_heads, config.head_dim());
        Ok(Self {
            u: Tensor::zeros(shape, dtype, device)?,
            v: Tensor::zeros(shape, dtype, device)?,
        })
    }

    fn validate(&self, config: &AttentionConfig) -> Result<(), AttentionError> {
        let expected = [config.n_heads, config.head_dim()];
        for (name, bias) in [("pos_bias_u", &self.u), ("pos_bias_v", &self.v)] {
            checks::expect_shape(name, bias, &expected)
                .map_err(|e| AttentionError::config(e.to_string()))?;
        }
        Ok(())
    }
}

/// Relative-position attention over the full `q_len x k_len` score matrix.
#[derive(Debug, Clone)]
pub struct RelPositionMultiHeadAttention {
    base: MultiHeadAttention,
    linear_pos: Linear,
    pos_bias: PositionBias,
}

impl RelPositionMultiHeadAttention {
    /// Constructs a module with Xavier-initialised projections.
    ///
    /// Missing `pos_bias` values are zero-filled.
    pub fn new(
        config: AttentionConfig,
        pos_bias: Option<PositionBias>,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections =
            Projections::with_init(&config, &LinearInit::XavierUniform, device, dtype)?;
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
        Self::from_parts(base, linear_pos, pos_bias)
    }

    /// Assembles a module from already-built pieces.
    pub fn from_parts(
        base: MultiHeadAttention,
        linear_pos: Linear,
        pos_bias: PositionBias,
    ) -> Result<Self, AttentionError> {
        let config = base.config();
        let pos_cfg = linear_pos.config();
        if pos_cfg.bias {
            return Err(AttentionError::config("positional projection must not carry a bias"));
        }
        if pos_cfg.input_dim != config.n_feat || pos_cfg.output_dim != config.n_feat {
            return Err(AttentionError::config(format!(
                "positional projection must map {0} -> {0}, got {1} -> {2}",
                config.n_feat, pos_cfg.input_dim, pos_cfg.output_dim
            )));
        }
        pos_bias.validate(config)?;
        Ok(Self {
            base,
            linear_pos,
            pos_bias,
        })
    }

    pub fn base(&self) -> &MultiHeadAttention {
        &self.base
    }

    pub fn config(&self) -> &AttentionConfig {
        self.base.config()
    }

    pub fn linear_pos(&self) -> &Linear {
        &self.linear_pos
    }

    pub fn pos_bias(&self) -> &PositionBias {
        &self.pos_bias
    }

    /// Projects `[1 | batch, pos_len, n_feat]` to
    /// `[batch, heads, pos_len, head_dim]`.
    pub(crate) fn project_pos(&self, pos_emb: &Tensor, batch: usize) -> Result<Tensor, AttentionError> {
        let n_feat = self.config().n_feat;
        checks::expect_batch_seq_hidden("pos_emb", pos_emb, n_feat)
            .map_err(|e| AttentionError::shape(e.to_string()))?;
        let (pos_batch, _, _) = pos_emb.dims3()?;
        let p = self.base.project_heads(&self.linear_pos, pos_emb)?;
        match pos_batch {
            b if b == batch => Ok(p),
            1 => {
                let (_, heads, pos_len, head_dim) = p.dims4()?;
                Ok(p.broadcast_as((batch, heads, pos_len, head_dim))?.contiguous()?)
            }
            other => Err(AttentionError::shape(format!(
                "pos_emb batch {other} must be 1 or {batch}"
            ))),
        }
    }

    /// Returns `(q + u, q + v)` for `q` shaped `[batch, heads, seq, head_dim]`.
    pub(crate) fn biased_queries(&self, q: &Tensor) -> Result<(Tensor, Tensor), AttentionError> {
        let policy = self.base.policy();
        let (heads, head_dim) = (self.config().n_heads, self.config().head_dim());
        let u = policy
            .cast_for_compute(&self.pos_bias.u)?
            .reshape((1, heads, 1, head_dim))?;
        let v = policy
            .cast_for_compute(&self.pos_bias.v)?
            .reshape((1, heads, 1, head_dim))?;
        Ok((q.broadcast_add(&u)?, q.broadcast_add(&v)?))
    }

    /// Content-position scores `(q + v)·pᵀ`, `[batch, heads, q_len, pos_len]`.
    pub(crate) fn position_scores(&self, q_v: &Tensor, p: &Tensor) -> Result<Tensor, AttentionError> {
        Ok(q_v.contiguous()?.matmul(&p.transpose(2, 3)?.contiguous()?)?)
    }
}

impl Attention for RelPositionMultiHeadAttention {
    /// `pos_emb` must cover offsets `k_len-1 ..= -(k_len-1)` (`2k_len-1`
    /// rows, as produced by `RelPositionalEncoding`). Masks follow
    /// [`MultiHeadAttention`]: `[B, Sk]`, `[B, Sq | 1, Sk]` or
    /// `[B, H | 1, Sq | 1, Sk]`.
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_emb: Option<&Tensor>,
        mask: Option<&Tensor>,
        cache: Option<&mut dyn AttentionCache>,
    ) -> Result<Tensor, AttentionError> {
        const VARIANT: &str = "relative-position";
        let pos_emb = pos_emb.ok_or(AttentionError::MissingPositionalEmbedding { variant: VARIANT })?;
        self.base.log_first_call("relative", || {
            format!("pos_rows={}", pos_emb.dims().get(1).copied().unwrap_or(0))
        });

        let context = extend_context(cache, key, value, Some(pos_emb))?;
        let pos_emb = context
            .pos_emb
            .as_ref()
            .ok_or(AttentionError::MissingPositionalEmbedding { variant: VARIANT })?;
        let dims = self.base.validate_inputs(query, &context.key, &context.value)?;
        if dims.k_len < dims.q_len {
            return Err(AttentionError::shape(format!(
                "key length {} is shorter than query length {}",
                dims.k_len, dims.q_len
            )));
        }

        let (q, k, v) = self.base.forward_qkv(query, &context.key, &context.value)?;
        let p = self.project_pos(pos_emb, dims.batch)?;
        let (q_u, q_v) = self.biased_queries(&q)?;

        let matrix_bd = rel_shift(&self.position_scores(&q_v, &p)?)?;
        let shifted_len = matrix_bd.dim(3)?;
        if shifted_len < dims.k_len {
            return Err(AttentionError::invariant(format!(
                "shifted content-position term has {shifted_len} columns for {} keys",
                dims.k_len
            )));
        }
        let mut matrix_bd = matrix_bd
            .narrow(3, 0, dims.k_len)?
            .affine(self.config().scale(), 0.0)?;
        if let Some(mask) = mask {
            let bias = expand_attention_bias(
                mask,
                dims.batch,
                dims.q_len,
                dims.k_len,
                self.base.policy().compute(),
            )?;
            matrix_bd = matrix_bd.broadcast_add(&bias)?;
        }

        let attended = scaled_dot_product_attention(
            &q_u,
            &k,
            &v,
            Some(&matrix_bd),
            self.config().scale(),
        )?;
        self.base.project_out(&self.base.merge_heads(&attended)?)
    }
}
