//! Low-pass synapse filter.
//!
//! Smooths a spike train into a decaying current:
//! `i[t] = i[t-1] - (1 - s[t]) * i[t-1] / tau + s[t]`. With a learnable time
//! constant the decay is parameterized as `1/tau = sigma(w)` so it stays in
//! `(0, 1)` during optimization.

use candle_core::{Error, Result, Tensor};
use candle_nn::{init::Init, VarBuilder};
use stepmode::{functional, StepMode, StepModule};

#[derive(Debug)]
enum TimeConstant {
    Fixed(f64),
    Learnable(Tensor),
}

/// Stateful synaptic low-pass filter.
#[derive(Debug)]
pub struct SynapseFilter {
    time_constant: TimeConstant,
    current: Option<Tensor>,
    step_mode: StepMode,
}

impl SynapseFilter {
    pub fn new(tau: f64) -> Result<Self> {
        if tau <= 1.0 {
            return Err(Error::Msg(format!("tau must exceed 1.0, got {tau}")));
        }
        Ok(Self {
            time_constant: TimeConstant::Fixed(tau),
            current: None,
            step_mode: StepMode::Single,
        })
    }

    /// Learnable variant; `init_tau` seeds `w` with `sigma(w) = 1/init_tau`.
    pub fn learnable(init_tau: f64, vb: VarBuilder) -> Result<Self> {
        if init_tau <= 1.0 {
            return Err(Error::Msg(format!(
                "init_tau must exceed 1.0, got {init_tau}"
            )));
        }
        let init_w = -(init_tau - 1.0).ln();
        let w = vb.get_with_hints((), "w", Init::Const(init_w))?;
        Ok(Self {
            time_constant: TimeConstant::Learnable(w),
            current: None,
            step_mode: StepMode::Single,
        })
    }

    /// Effective time constant.
    pub fn tau(&self) -> Result<f64> {
        match &self.time_constant {
            TimeConstant::Fixed(tau) => Ok(*tau),
            TimeConstant::Learnable(w) => {
                let inv_tau = candle_nn::ops::sigmoid(w)?.to_vec0::<f32>()?;
                Ok(1.0 / inv_tau as f64)
            }
        }
    }

    fn single_step(&mut self, spikes: &Tensor) -> Result<Tensor> {
        let current = match &self.current {
            Some(i) => i.clone(),
            None => spikes.zeros_like()?,
        };
        let gate = spikes.affine(-1.0, 1.0)?; // 1 - s
        let leak = gate.mul(&current)?;
        let leak = match &self.time_constant {
            TimeConstant::Fixed(tau) => (leak / *tau)?,
            TimeConstant::Learnable(w) => {
                let inv_tau = candle_nn::ops::sigmoid(w)?;
                leak.broadcast_mul(&inv_tau)?
            }
        };
        let next = ((current - leak)? + spikes)?;
        self.current = Some(next.clone());
        Ok(next)
    }
}

impl StepModule for SynapseFilter {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.single_step(xs),
            StepMode::Multi => functional::multi_step_forward(xs, |x| self.single_step(x)),
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn current_jumps_on_spikes_and_decays_between() -> Result<()> {
        let device = Device::Cpu;
        let mut filter = SynapseFilter::new(2.0)?;
        let spike = Tensor::ones((1,), DType::F32, &device)?;
        let silence = Tensor::zeros((1,), DType::F32, &device)?;

        let i1 = filter.forward_t(&spike, true)?.to_vec1::<f32>()?[0];
        assert!((i1 - 1.0).abs() < 1e-6);
        let i2 = filter.forward_t(&silence, true)?.to_vec1::<f32>()?[0];
        assert!((i2 - 0.5).abs() < 1e-6);
        let i3 = filter.forward_t(&silence, true)?.to_vec1::<f32>()?[0];
        assert!((i3 - 0.25).abs() < 1e-6);
        let i4 = filter.forward_t(&spike, true)?.to_vec1::<f32>()?[0];
        assert!((i4 - 1.25).abs() < 1e-6);

        filter.reset();
        let fresh = filter.forward_t(&silence, true)?.to_vec1::<f32>()?[0];
        assert_eq!(fresh, 0.0);
        Ok(())
    }

    #[test]
    fn learnable_filter_matches_fixed_at_init() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut learnable = SynapseFilter::learnable(4.0, vb.pp("syn"))?;
        let mut fixed = SynapseFilter::new(4.0)?;
        assert!((learnable.tau()? - 4.0).abs() < 1e-4);

        learnable.set_step_mode(StepMode::Multi);
        fixed.set_step_mode(StepMode::Multi);
        let spikes = Tensor::from_vec(vec![1f32, 0.0, 0.0, 1.0], (4, 1), &device)?;
        let a = learnable.forward_t(&spikes, true)?;
        let b = fixed.forward_t(&spikes, true)?;
        let diff = a.sub(&b)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }
}
