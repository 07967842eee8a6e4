//! Temporal reshaping helpers behind the two step-mode strategies.
//!
//! Stateless layers handle a `[T, N, ...]` sequence by folding the time axis
//! into the batch axis, running once, and unfolding ([`seq_to_ann_forward`]).
//! Stateful layers must observe timesteps in order, so they iterate along the
//! time axis and stack the per-step outputs ([`multi_step_forward`]).

use candle_core::{Error, Result, Tensor};

/// Folds `[T, N, ...]` into `[T * N, ...]`, returning the merged tensor and
/// the length of the time axis.
pub fn flatten_time(x_seq: &Tensor) -> Result<(Tensor, usize)> {
    let dims = x_seq.dims();
    if dims.len() < 2 {
        return Err(Error::Msg(format!(
            "expected a [T, N, ...] sequence with rank >= 2, got shape {dims:?}"
        )));
    }
    let t = dims[0];
    if t == 0 {
        return Err(Error::Msg("sequence has an empty time axis".to_string()));
    }
    let mut merged = Vec::with_capacity(dims.len() - 1);
    merged.push(t * dims[1]);
    merged.extend_from_slice(&dims[2..]);
    Ok((x_seq.contiguous()?.reshape(merged)?, t))
}

/// Splits the leading axis of `y` back into `[t, leading / t, ...]`.
pub fn unflatten_time(y: &Tensor, t: usize) -> Result<Tensor> {
    let dims = y.dims();
    if dims.is_empty() || t == 0 || dims[0] % t != 0 {
        return Err(Error::Msg(format!(
            "cannot split leading axis of shape {dims:?} into {t} timesteps"
        )));
    }
    let mut split = Vec::with_capacity(dims.len() + 1);
    split.push(t);
    split.push(dims[0] / t);
    split.extend_from_slice(&dims[1..]);
    y.contiguous()?.reshape(split)
}

/// Applies a stateless function once over the merged time-batch axis.
pub fn seq_to_ann_forward<F>(x_seq: &Tensor, f: F) -> Result<Tensor>
where
    F: FnOnce(&Tensor) -> Result<Tensor>,
{
    let (merged, t) = flatten_time(x_seq)?;
    let y = f(&merged)?;
    unflatten_time(&y, t)
}

/// Drives a stateful function over the time axis, stacking per-step outputs
/// back into a `[T, ...]` sequence.
pub fn multi_step_forward<F>(x_seq: &Tensor, mut f: F) -> Result<Tensor>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    let dims = x_seq.dims();
    if dims.is_empty() || dims[0] == 0 {
        return Err(Error::Msg(format!(
            "expected a non-empty [T, ...] sequence, got shape {dims:?}"
        )));
    }
    let t = dims[0];
    let mut outputs = Vec::with_capacity(t);
    for step in 0..t {
        outputs.push(f(&x_seq.get(step)?)?);
    }
    Tensor::stack(&outputs, 0)
}
