//! Dense multi-head attention.
//!
//! [`MultiHeadAttention`] owns the four projections every variant shares and
//! the head split/merge helpers. The relative-position variants compose it
//! rather than duplicating those pieces.

use std::sync::OnceLock;

use candle_core::{DType, Device, Tensor};
use layers::{checks, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::core::{Attention, AttentionConfig, AttentionError};
use crate::kv_cache::{extend_context, AttentionCache};
use crate::masks::expand_attention_bias;
use crate::reference::scaled_dot_product_attention;

/// Query, key, value and output projections of one attention module.
#[derive(Debug, Clone)]
pub struct Projections {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub output: Linear,
}

impl Projections {
    /// Builds `n_feat -> n_feat` projections following `init`.
    pub fn with_init(
        config: &AttentionConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let linear = LinearConfig::new(config.n_feat, config.n_feat).with_bias(config.bias);
        let build = || Linear::with_init(linear.clone(), init, device, dtype);
        Ok(Self {
            query: build()?,
            key: build()?,
            value: build()?,
            output: build()?,
        })
    }

    fn validate(&self, config: &AttentionConfig) -> Result<(), AttentionError> {
        for (name, linear) in [
            ("query", &self.query),
            ("key", &self.key),
            ("value", &self.value),
            ("output", &self.output),
        ] {
            let cfg = linear.config();
            if cfg.input_dim != config.n_feat || cfg.output_dim != config.n_feat {
                return Err(AttentionError::config(format!(
                    "{name} projection must map {0} -> {0}, got {1} -> {2}",
                    config.n_feat, cfg.input_dim, cfg.output_dim
                )));
            }
        }
        Ok(())
    }
}

/// Sequence lengths shared by one call's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SequenceDims {
    pub batch: usize,
    pub q_len: usize,
    pub k_len: usize,
}

/// Baseline scaled dot-product attention without positional bias.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: AttentionConfig,
    policy: PrecisionPolicy,
    projections: Projections,
    first_call: OnceLock<()>,
}

impl MultiHeadAttention {
    /// Constructs a module with Xavier-initialised projections.
    pub fn new(config: AttentionConfig, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::with_init(&config, &LinearInit::XavierUniform, device, dtype)?;
        Self::from_projections(config, projections, dtype)
    }

    /// Constructs a module around existing projections stored in `dtype`.
    pub fn from_projections(
        config: AttentionConfig,
        projections: Projections,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        projections.validate(&config)?;
        log::debug!(
            "attention::dense built heads={} n_feat={} bias={} dtype={:?}",
            config.n_heads,
            config.n_feat,
            config.bias,
            dtype
        );
        Ok(Self {
            config,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            projections,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    pub fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    pub fn projections(&self) -> &Projections {
        &self.projections
    }

    /// Checks the `[batch, seq, n_feat]` contract of query/key/value.
    pub(crate) fn validate_inputs(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<SequenceDims, AttentionError> {
        for (name, tensor) in [("query", query), ("key", key), ("value", value)] {
            checks::expect_batch_seq_hidden(name, tensor, self.config.n_feat)
                .map_err(|e| AttentionError::shape(e.to_string()))?;
            checks::expect_dtype_in(name, tensor, checks::FLOAT_DTYPES).map_err(|_| {
                AttentionError::UnsupportedDType {
                    requested: format!("{name} dtype {:?}", tensor.dtype()),
                }
            })?;
        }
        let (batch, q_len, _) = query.dims3()?;
        let (kb, k_len, _) = key.dims3()?;
        let (vb, v_len, _) = value.dims3()?;
        if kb != batch || vb != batch {
            return Err(AttentionError::shape(format!(
                "batch mismatch: query {batch}, key {kb}, value {vb}"
            )));
        }
        if v_len != k_len {
            return Err(AttentionError::shape(format!(
                "key length {k_len} differs from value length {v_len}"
            )));
        }
        if q_len == 0 || k_len == 0 {
            return Err(AttentionError::shape("sequence lengths must be non-zero"));
        }
        Ok(SequenceDims {
            batch,
            q_len,
            k_len,
        })
    }

    /// Projects `[batch, seq, n_feat]` and splits it into
    /// `[batch, heads, seq, head_dim]` in the compute dtype.
    pub(crate) fn project_heads(&self, linear: &Linear, x: &Tensor) -> Result<Tensor, AttentionError> {
        let projected = linear.forward(x, &self.policy)?;
        self.split_heads(&projected)
    }

    pub(crate) fn split_heads(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, seq, _) = x.dims3()?;
        Ok(x
            .reshape((batch, seq, self.config.n_heads, self.config.head_dim()))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// Projects and splits query, key and value.
    pub(crate) fn forward_qkv(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor), AttentionError> {
        Ok((
            self.project_heads(&self.projections.query, query)?,
            self.project_heads(&self.projections.key, key)?,
            self.project_heads(&self.projections.value, value)?,
        ))
    }

    /// Merges `[batch, heads, seq, head_dim]` back into `[batch, seq, n_feat]`.
    pub(crate) fn merge_heads(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, heads, seq, head_dim) = x.dims4()?;
        Ok(x.transpose(1, 2)?.reshape((batch, seq, heads * head_dim))?)
    }

    /// Applies the output projection and casts to the storage dtype.
    pub(crate) fn project_out(&self, context: &Tensor) -> Result<Tensor, AttentionError> {
        let out = self.projections.output.forward(context, &self.policy)?;
        Ok(self.policy.cast_to_storage(&out)?)
    }

    pub(crate) fn log_first_call(&self, variant: &str, detail: impl FnOnce() -> String) {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::{variant} init heads={} head_dim={} precision={:?}->{:?} {}",
                self.config.n_heads,
                self.config.head_dim(),
                self.policy.storage(),
                self.policy.compute(),
                detail()
            );
        }
    }
}

impl Attention for MultiHeadAttention {
    /// Masks may be `[B, Sk]`, `[B, Sq | 1, Sk]` or `[B, H | 1, Sq | 1, Sk]`,
    /// boolean or additive. `pos_emb` is ignored.
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        _pos_emb: Option<&Tensor>,
        mask: Option<&Tensor>,
        cache: Option<&mut dyn AttentionCache>,
    ) -> Result<Tensor, AttentionError> {
        self.log_first_call("dense", String::new);
        let context = extend_context(cache, key, value, None)?;
        let dims = self.validate_inputs(query, &context.key, &context.value)?;

        let (q, k, v) = self.forward_qkv(query, &context.key, &context.value)?;
        let bias = match mask {
            Some(mask) => Some(expand_attention_bias(
                mask,
                dims.batch,
                dims.q_len,
                dims.k_len,
                self.policy.compute(),
            )?),
            None => None,
        };
        let attended =
            scaled_dot_product_attention(&q, &k, &v, bias.as_ref(), self.config.scale())?;
        self.project_out(&self.merge_heads(&attended)?)
    }
}
