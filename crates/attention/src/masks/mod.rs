//! Mask utilities shared by attention implementations.
//!
//! Boolean masks have dtype [`MASK_DTYPE`] (`u8`) where `1` excludes a
//! position. Before softmax they become additive biases whose values are
//! either `0.0` (keep) or `-inf` (discard), matching the dtype of the scores
//! they are added to.

pub mod padding;
pub mod window;

use candle_core::DType;

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use padding::{
    additive_bias, expand_attention_bias, padding_mask_from_booleans, padding_mask_from_lengths,
};
pub use window::window_mask;

#[cfg(test)]
mod tests;
