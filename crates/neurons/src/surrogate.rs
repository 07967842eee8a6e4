//! Surrogate spike functions.
//!
//! The spike itself is `Θ(v - v_th)`. Differentiating through it uses the
//! detach trick: `spike = g(x) + (Θ(x) - g(x)).detach()` where `g` is a
//! smooth primitive. Candle's autograd then propagates `g'(x)` while the
//! forward value remains exactly binary.

use candle_core::{Result, Tensor};

/// Smooth primitives available for the backward pass.
///
/// The host framework exposes no arctangent kernel, so the original
/// arctangent surrogate is unavailable; [`Surrogate::SoftSign`] has the
/// closest derivative shape (heavy polynomial tails) and `Sigmoid` matches
/// the classical exponential-tail surrogate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Surrogate {
    /// `g(x) = σ(αx)`, derivative `α·σ(αx)·(1-σ(αx))`.
    Sigmoid { alpha: f64 },
    /// `g(x) = (αx / (1 + |αx|) + 1) / 2`, derivative `α / 2(1+|αx|)²`.
    SoftSign { alpha: f64 },
    /// `g(x) = (erf(αx) + 1) / 2`, Gaussian-tail derivative.
    Erf { alpha: f64 },
}

impl Default for Surrogate {
    fn default() -> Self {
        Surrogate::Sigmoid { alpha: 4.0 }
    }
}

/// Binary threshold crossing, `1.0` where `v_shift >= 0`.
pub fn heaviside(v_shift: &Tensor) -> Result<Tensor> {
    let zeros = v_shift.zeros_like()?;
    v_shift.ge(&zeros)?.to_dtype(v_shift.dtype())
}

impl Surrogate {
    /// Steepness parameter of the primitive.
    pub fn alpha(&self) -> f64 {
        match self {
            Surrogate::Sigmoid { alpha }
            | Surrogate::SoftSign { alpha }
            | Surrogate::Erf { alpha } => *alpha,
        }
    }

    fn primitive(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Surrogate::Sigmoid { alpha } => candle_nn::ops::sigmoid(&(x * *alpha)?),
            Surrogate::SoftSign { alpha } => {
                let ax = (x * *alpha)?;
                let denom = (ax.abs()? + 1.0)?;
                let squashed = (ax / denom)?;
                (squashed * 0.5)? + 0.5
            }
            Surrogate::Erf { alpha } => {
                let ax = (x * *alpha)?;
                (ax.erf()? + 1.0)? * 0.5
            }
        }
    }

    /// Spike generation on the shifted potential `v - v_th`.
    ///
    /// Forward value is `Θ(v_shift)`; the gradient is the primitive's.
    pub fn apply(&self, v_shift: &Tensor) -> Result<Tensor> {
        let spike = heaviside(v_shift)?;
        let smooth = self.primitive(v_shift)?;
        let jump = (spike - &smooth)?.detach();
        &smooth + &jump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn forward_values_are_binary() -> Result<()> {
        let device = Device::Cpu;
        let v_shift = Tensor::from_vec(vec![-0.5f32, -0.01, 0.0, 0.3, 2.0], (5,), &device)?;
        for surrogate in [
            Surrogate::Sigmoid { alpha: 4.0 },
            Surrogate::SoftSign { alpha: 2.0 },
            Surrogate::Erf { alpha: 2.0 },
        ] {
            let spikes = surrogate.apply(&v_shift)?.to_vec1::<f32>()?;
            assert_eq!(spikes, vec![0.0, 0.0, 1.0, 1.0, 1.0]);
        }
        Ok(())
    }

    #[test]
    fn gradient_follows_the_primitive() -> Result<()> {
        let device = Device::Cpu;
        let v_shift = Var::new(&[0.0f32, 1.0, -1.0], &device)?;
        let surrogate = Surrogate::Sigmoid { alpha: 4.0 };
        let spikes = surrogate.apply(v_shift.as_tensor())?;
        let grads = spikes.sum_all()?.backward()?;
        let grad = grads
            .get(v_shift.as_tensor())
            .expect("input gradient present")
            .to_vec1::<f32>()?;
        // sigmoid surrogate derivative: alpha * s * (1 - s)
        assert!((grad[0] - 1.0).abs() < 1e-5);
        assert!(grad[1] > 0.0 && grad[1] < grad[0]);
        assert!((grad[1] - grad[2]).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn heaviside_keeps_dtype() -> Result<()> {
        let device = Device::Cpu;
        let v_shift = Tensor::from_vec(vec![-1f32, 1.0], (2,), &device)?;
        let spikes = heaviside(&v_shift)?;
        assert_eq!(spikes.dtype(), v_shift.dtype());
        Ok(())
    }
}
