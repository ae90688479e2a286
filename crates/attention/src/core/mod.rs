//! Core traits and types shared across attention implementations.
//!
//! Implementations consume sequences laid out as `[batch, seq_len, n_feat]`
//! and return the context sequence in the same layout with the query's length.
//! Internally every variant splits features into `[batch, n_heads, seq_len,
//! head_dim]`, accumulates in the compute dtype of its
//! [`PrecisionPolicy`](layers::PrecisionPolicy) and casts the result back to
//! the parameter dtype on write.

pub mod config;
pub mod errors;

use candle_core::Tensor;

use crate::kv_cache::AttentionCache;

pub use config::{AttentionConfig, AttentionKind, ContextWindow};
pub use errors::AttentionError;

/// Unified interface for the attention variants.
///
/// * `query` is `[batch, q_len, n_feat]`; `key` and `value` are
///   `[batch, k_len, n_feat]` with `k_len >= q_len`. When `k_len > q_len`
///   queries align with the tail of the keys (stick-to-right).
/// * `pos_emb` is `[1 | batch, pos_len, n_feat]`. Dense attention ignores it;
///   both relative variants reject calls without it.
/// * `mask` marks excluded positions. Boolean masks use `DType::U8` with `1`
///   meaning "exclude"; float masks are taken as additive biases. Accepted
///   shapes are documented on each implementation.
/// * `cache`, when supplied, extends key/value/positional context with prior
///   history before any projection happens.
pub trait Attention: Send + Sync {
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_emb: Option<&Tensor>,
        mask: Option<&Tensor>,
        cache: Option<&mut dyn AttentionCache>,
    ) -> Result<Tensor, AttentionError>;
}
