//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// Construction parameters that can never yield a working module.
    #[error("invalid attention configuration: {reason}")]
    InvalidConfig { reason: String },
    /// A relative-position variant was called without its positional stream.
    #[error("{variant} attention requires a positional embedding")]
    MissingPositionalEmbedding { variant: &'static str },
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    /// Internal bookkeeping disagreed with the tensors it produced.
    #[error("attention invariant violated: {context}")]
    Invariant { context: String },
    /// A backend-specific failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn invariant(context: impl Into<String>) -> Self {
        Self::Invariant {
            context: context.into(),
        }
    }
}
