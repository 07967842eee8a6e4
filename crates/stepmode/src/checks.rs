//! Labelled shape and dtype assertions shared across the spiking crates.
//!
//! Each helper returns `candle_core::Result<()>` so call sites propagate
//! failures with `?` instead of panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures the tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.dims().len();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got rank {actual} with shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates a multi-step input: `rank` dimensions with a non-empty leading
/// time axis.
pub fn expect_multi_step(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() != rank {
        return Err(Error::Msg(format!(
            "{label}: multi-step input must have rank {rank} with a leading time axis, \
             got shape {:?}",
            dims
        )));
    }
    if dims[0] == 0 {
        return Err(Error::Msg(format!(
            "{label}: multi-step input has an empty time axis"
        )));
    }
    Ok(())
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}
