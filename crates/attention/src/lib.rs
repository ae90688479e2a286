//! Multi-head attention for speech encoders.
//!
//! Three variants share one [`Attention`] interface:
//!
//! * [`MultiHeadAttention`]: dense scaled dot-product attention.
//! * [`RelPositionMultiHeadAttention`]: Transformer-XL style relative
//!   positional attention over the full score matrix, re-indexed with
//!   [`rel_shift`].
//! * [`LocalRelPositionMultiHeadAttention`]: the relative variant restricted
//!   to a `(left, right)` context window, computed in band layout so cost
//!   grows with `seq_len * window` instead of `seq_len²`.
//!
//! Inputs are `[batch, seq_len, n_feat]` tensors in f32, f16 or bf16. Half
//! precision parameters compute in f32 and outputs are cast back to the
//! parameter dtype. Boolean masks use `DType::U8` with `1` marking an excluded
//! position; see [`masks`] for builders.
//!
//! Streaming callers may pass an [`AttentionCache`] that prepends history to
//! the key/value sequences. Queries are then aligned with the tail of the keys.

pub mod builder;
pub mod core;
pub mod kv_cache;
pub mod local;
pub mod masks;
pub mod multi_head;
pub mod reference;
pub mod relative;

pub use builder::build_attention;
pub use core::{Attention, AttentionConfig, AttentionError, AttentionKind, ContextWindow};
pub use kv_cache::{AttentionCache, CacheExtension};
pub use local::LocalRelPositionMultiHeadAttention;
pub use multi_head::{MultiHeadAttention, Projections};
pub use relative::{rel_shift, PositionBias, RelPositionMultiHeadAttention};
