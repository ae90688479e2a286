//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking. Every helper takes a
//! `context` label that is prefixed to the error message.

use candle_core::{DType, Error, Result, Tensor};

/// Dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(context: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.rank();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected rank {rank}, got {actual} ({:?})",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(context: &str, lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    if lhs.dtype() == rhs.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: dtype mismatch {:?} vs {:?}",
            lhs.dtype(),
            rhs.dtype()
        )))
    }
}
