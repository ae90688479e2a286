//! Run-time selection of an attention variant.

use candle_core::{DType, Device};

use crate::core::{Attention, AttentionConfig, AttentionError, AttentionKind, ContextWindow};
use crate::local::LocalRelPositionMultiHeadAttention;
use crate::multi_head::MultiHeadAttention;
use crate::relative::RelPositionMultiHeadAttention;

/// Builds the variant named by `kind` with freshly initialised weights.
///
/// `window` is required by [`AttentionKind::RelPosLocalAttn`] and ignored by
/// the other kinds.
pub fn build_attention(
    kind: AttentionKind,
    config: AttentionConfig,
    window: Option<ContextWindow>,
    device: &Device,
    dtype: DType,
) -> Result<Box<dyn Attention>, AttentionError> {
    log::debug!("attention::builder kind={kind:?} heads={} n_feat={}", config.n_heads, config.n_feat);
    Ok(match kind {
        AttentionKind::AbsPos => Box::new(MultiHeadAttention::new(config, device, dtype)?),
        AttentionKind::RelPos => Box::new(RelPositionMultiHeadAttention::new(config, None, device, dtype)?),
        AttentionKind::RelPosLocalAttn => {
            let window = window.ok_or_else(|| {
                AttentionError::config("rel_pos_local_attn requires a context window")
            })?;
            Box::new(LocalRelPositionMultiHeadAttention::new(config, window, None, device, dtype)?)
        }
    })
}
