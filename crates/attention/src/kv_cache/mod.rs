//! Cache capability consumed by streaming callers.
//!
//! Attention modules do not own any history. A caller that streams audio in
//! chunks hands an [`AttentionCache`] to each call; the module asks it to
//! extend the raw key/value (and positional) sequences before projecting them.
//! How the cache retains or evicts history is entirely its own business.

pub mod api;

pub use api::{AttentionCache, CacheExtension};

pub(crate) use api::extend_context;
