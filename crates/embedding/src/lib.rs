//! Embedding crate
//!
//! The positional module exposes the sinusoidal relative positional encodings
//! that feed the content-position term of relative-position attention.

pub mod positional;

pub use positional::*;
