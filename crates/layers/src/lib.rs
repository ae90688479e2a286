//! Building blocks shared by the attention modules.
//!
//! The crate hosts the dense projections applied to queries, keys, values,
//! positional embeddings and attention outputs, together with the precision
//! policy and validation helpers those projections rely on.

pub mod checks;
pub mod dtypes;
pub mod linear;

pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
