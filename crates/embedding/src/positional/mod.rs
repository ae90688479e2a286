//! Positional encodings consumed by relative-position attention.

pub mod relative;

pub use relative::{sinusoid_table, LocalRelPositionalEncoding, RelPositionalEncoding};
