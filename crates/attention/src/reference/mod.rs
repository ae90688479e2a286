//! Portable, exact attention primitives.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the windowed kernels are validated against.

pub mod exact;

pub use exact::{masked_softmax, scaled_dot_product_attention};
