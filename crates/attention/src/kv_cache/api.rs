//! Public traits describing cache behaviour.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Key/value/positional sequences after a cache prepended its history.
#[derive(Debug, Clone)]
pub struct CacheExtension {
    /// `[batch, history + k_len, n_feat]`.
    pub key: Tensor,
    /// `[batch, history + k_len, n_feat]`.
    pub value: Tensor,
    /// Positional embedding covering the extended span, when one was supplied.
    pub pos_emb: Option<Tensor>,
}

/// Abstract cache able to extend attention context with prior history.
pub trait AttentionCache {
    /// Returns `key`/`value`/`pos_emb` extended with whatever history the cache
    /// holds. Implementations may update their own state as a side effect.
    fn extend(
        &mut self,
        key: &Tensor,
        value: &Tensor,
        pos_emb: Option<&Tensor>,
    ) -> Result<CacheExtension, AttentionError>;
}

/// Runs the optional cache, passing inputs through untouched without one.
pub(crate) fn extend_context(
    cache: Option<&mut dyn AttentionCache>,
    key: &Tensor,
    value: &Tensor,
    pos_emb: Option<&Tensor>,
) -> Result<CacheExtension, AttentionError> {
    match cache {
        Some(cache) => {
            let extended = cache.extend(key, value, pos_emb)?;
            log::trace!(
                "attention cache extended keys {:?} -> {:?}",
                key.dims(),
                extended.key.dims()
            );
            Ok(extended)
        }
        None => Ok(CacheExtension {
            key: key.clone(),
            value: value.clone(),
            pos_emb: pos_emb.cloned(),
        }),
    }
}
