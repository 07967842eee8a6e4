//! Integrate-and-fire neuron models.
//!
//! All nodes share the charge / fire / reset decomposition. The membrane
//! potential is materialized lazily from the first input's shape, filled with
//! the reset potential, and kept until [`StepModule::reset`] ends the
//! simulation.

use candle_core::{Error, Result, Tensor};
use candle_nn::{init::Init, VarBuilder};
use stepmode::{functional, StepMode, StepModule};

use crate::surrogate::Surrogate;

/// Firing and reset behavior shared by every neuron model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuronConfig {
    /// Firing threshold.
    pub v_threshold: f64,
    /// Hard reset potential; `None` selects soft reset (subtract threshold).
    pub v_reset: Option<f64>,
    /// Surrogate used for the backward pass of the threshold crossing.
    pub surrogate: Surrogate,
    /// Detach the spike from the autograd graph inside the reset arithmetic.
    pub detach_reset: bool,
}

impl Default for NeuronConfig {
    fn default() -> Self {
        Self {
            v_threshold: 1.0,
            v_reset: Some(0.0),
            surrogate: Surrogate::default(),
            detach_reset: false,
        }
    }
}

impl NeuronConfig {
    /// Fill value for lazily created membrane state.
    pub fn state_fill(&self) -> f64 {
        self.v_reset.unwrap_or(0.0)
    }

    fn validate(&self) -> Result<()> {
        if self.v_threshold <= 0.0 {
            return Err(Error::Msg(format!(
                "v_threshold must be positive, got {}",
                self.v_threshold
            )));
        }
        Ok(())
    }
}

fn carried_state(slot: &Option<Tensor>, x: &Tensor, fill: f64) -> Result<Tensor> {
    match slot {
        Some(v) => {
            if v.dims() != x.dims() {
                return Err(Error::Msg(format!(
                    "membrane state shape {:?} does not match input shape {:?}; \
                     call reset() before starting a new simulation",
                    v.dims(),
                    x.dims()
                )));
            }
            Ok(v.clone())
        }
        None => {
            let zeros = x.zeros_like()?;
            if fill == 0.0 {
                Ok(zeros)
            } else {
                zeros + fill
            }
        }
    }
}

fn neuronal_fire(v: &Tensor, cfg: &NeuronConfig) -> Result<Tensor> {
    cfg.surrogate.apply(&(v - cfg.v_threshold)?)
}

fn neuronal_reset(v: &Tensor, spike: &Tensor, cfg: &NeuronConfig) -> Result<Tensor> {
    let spike = if cfg.detach_reset {
        spike.detach()
    } else {
        spike.clone()
    };
    match cfg.v_reset {
        Some(v_reset) => {
            let keep = spike.affine(-1.0, 1.0)?;
            let kept = v.mul(&keep)?;
            kept + (spike * v_reset)?
        }
        None => v - (spike * cfg.v_threshold)?,
    }
}

/// Integrate-and-fire neuron: `v += x`, no leak.
#[derive(Debug)]
pub struct IfNode {
    cfg: NeuronConfig,
    step_mode: StepMode,
    v: Option<Tensor>,
}

impl IfNode {
    pub fn new(cfg: NeuronConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            step_mode: StepMode::Single,
            v: None,
        })
    }

    /// Current membrane potential, if a simulation is in flight.
    pub fn membrane(&self) -> Option<&Tensor> {
        self.v.as_ref()
    }

    fn single_step(&mut self, x: &Tensor) -> Result<Tensor> {
        let v = carried_state(&self.v, x, self.cfg.state_fill())?;
        let v = (v + x)?;
        let spike = neuronal_fire(&v, &self.cfg)?;
        self.v = Some(neuronal_reset(&v, &spike, &self.cfg)?);
        Ok(spike)
    }
}

impl StepModule for IfNode {
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
        self.v = None;
    }
}

/// Leaky integrate-and-fire neuron with membrane time constant `tau`.
///
/// With `decay_input` (the default) the charge step is
/// `v += (x - (v - v_rest)) / tau`; otherwise the input bypasses the decay:
/// `v = v - (v - v_rest) / tau + x`.
#[derive(Debug)]
pub struct LifNode {
    cfg: NeuronConfig,
    tau: f64,
    decay_input: bool,
    step_mode: StepMode,
    v: Option<Tensor>,
}

impl LifNode {
    pub fn new(cfg: NeuronConfig, tau: f64) -> Result<Self> {
        Self::with_decay_input(cfg, tau, true)
    }

    pub fn with_decay_input(cfg: NeuronConfig, tau: f64, decay_input: bool) -> Result<Self> {
        cfg.validate()?;
        if tau <= 1.0 {
            return Err(Error::Msg(format!("tau must exceed 1.0, got {tau}")));
        }
        Ok(Self {
            cfg,
            tau,
            decay_input,
            step_mode: StepMode::Single,
            v: None,
        })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Current membrane potential, if a simulation is in flight.
    pub fn membrane(&self) -> Option<&Tensor> {
        self.v.as_ref()
    }

    fn single_step(&mut self, x: &Tensor) -> Result<Tensor> {
        let v_rest = self.cfg.state_fill();
        let v = carried_state(&self.v, x, v_rest)?;
        let drift = (&v - v_rest)?;
        let v = if self.decay_input {
            let delta = ((x - drift)? / self.tau)?;
            (v + delta)?
        } else {
            let decay = (drift / self.tau)?;
            ((v - decay)? + x)?
        };
        let spike = neuronal_fire(&v, &self.cfg)?;
        self.v = Some(neuronal_reset(&v, &spike, &self.cfg)?);
        Ok(spike)
    }
}

impl StepModule for LifNode {
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
        self.v = None;
    }
}

/// LIF variant whose decay rate `1/tau = σ(w)` is a learnable scalar.
///
/// The parameter lives in the caller's `VarBuilder` scope, so the training
/// loop optimizes it together with the synaptic weights.
#[derive(Debug)]
pub struct ParametricLifNode {
    cfg: NeuronConfig,
    decay_input: bool,
    w: Tensor,
    step_mode: StepMode,
    v: Option<Tensor>,
}

impl ParametricLifNode {
    pub fn new(cfg: NeuronConfig, init_tau: f64, vb: VarBuilder) -> Result<Self> {
        Self::with_decay_input(cfg, init_tau, true, vb)
    }

    pub fn with_decay_input(
        cfg: NeuronConfig,
        init_tau: f64,
        decay_input: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate()?;
        if init_tau <= 1.0 {
            return Err(Error::Msg(format!(
                "init_tau must exceed 1.0, got {init_tau}"
            )));
        }
        // sigma(w) = 1 / init_tau
        let init_w = -(init_tau - 1.0).ln();
        let w = vb.get_with_hints((), "w", Init::Const(init_w))?;
        Ok(Self {
            cfg,
            decay_input,
            w,
            step_mode: StepMode::Single,
            v: None,
        })
    }

    /// Effective membrane time constant derived from the learnable decay.
    pub fn tau(&self) -> Result<f64> {
        let inv_tau = candle_nn::ops::sigmoid(&self.w)?.to_vec0::<f32>()?;
        Ok(1.0 / inv_tau as f64)
    }

    fn single_step(&mut self, x: &Tensor) -> Result<Tensor> {
        let v_rest = self.cfg.state_fill();
        let v = carried_state(&self.v, x, v_rest)?;
        let inv_tau = candle_nn::ops::sigmoid(&self.w)?;
        let drift = (&v - v_rest)?;
        let v = if self.decay_input {
            let delta = (x - drift)?.broadcast_mul(&inv_tau)?;
            (v + delta)?
        } else {
            let decay = drift.broadcast_mul(&inv_tau)?;
            ((v - decay)? + x)?
        };
        let spike = neuronal_fire(&v, &self.cfg)?;
        self.v = Some(neuronal_reset(&v, &spike, &self.cfg)?);
        Ok(spike)
    }
}

impl StepModule for ParametricLifNode {
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
        self.v = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn drive(node: &mut dyn StepModule, inputs: &[f32], device: &Device) -> Result<Vec<f32>> {
        let mut spikes = Vec::with_capacity(inputs.len());
        for &value in inputs {
            let x = Tensor::from_vec(vec![value], (1,), device)?;
            spikes.push(node.forward_t(&x, true)?.to_vec1::<f32>()?[0]);
        }
        Ok(spikes)
    }

    #[test]
    fn if_node_fires_on_accumulated_charge() -> Result<()> {
        let device = Device::Cpu;
        let mut node = IfNode::new(NeuronConfig::default())?;
        let spikes = drive(&mut node, &[0.5, 0.5, 0.5, 0.5], &device)?;
        assert_eq!(spikes, vec![0.0, 1.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn soft_reset_keeps_residual_charge() -> Result<()> {
        let device = Device::Cpu;
        let cfg = NeuronConfig {
            v_reset: None,
            ..NeuronConfig::default()
        };
        let mut node = IfNode::new(cfg)?;
        let spikes = drive(&mut node, &[0.6, 0.6, 0.6, 0.6], &device)?;
        assert_eq!(spikes, vec![0.0, 1.0, 0.0, 1.0]);
        let residual = node.membrane().unwrap().to_vec1::<f32>()?[0];
        assert!((residual - 0.4).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn lif_leak_prevents_subthreshold_firing() -> Result<()> {
        let device = Device::Cpu;
        let mut node = LifNode::new(NeuronConfig::default(), 2.0)?;
        // v converges to the input value 0.9 < v_threshold, so no spikes.
        let spikes = drive(&mut node, &[0.9; 8], &device)?;
        assert!(spikes.iter().all(|&s| s == 0.0));
        let v = node.membrane().unwrap().to_vec1::<f32>()?[0];
        assert!(v < 0.9);
        Ok(())
    }

    #[test]
    fn multi_step_matches_repeated_single_steps() -> Result<()> {
        let device = Device::Cpu;
        let x_seq = Tensor::rand(0f32, 2f32, (6, 3, 4), &device)?;

        let mut stepped = LifNode::new(NeuronConfig::default(), 2.0)?;
        let mut collected = Vec::new();
        for t in 0..6 {
            collected.push(stepped.forward_t(&x_seq.get(t)?, true)?);
        }
        let stepped_out = Tensor::stack(&collected, 0)?;

        let mut batched = LifNode::new(NeuronConfig::default(), 2.0)?;
        batched.set_step_mode(StepMode::Multi);
        let batched_out = batched.forward_t(&x_seq, true)?;

        let diff = stepped_out
            .sub(&batched_out)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn state_shape_mismatch_is_an_error() -> Result<()> {
        let device = Device::Cpu;
        let mut node = IfNode::new(NeuronConfig::default())?;
        node.forward_t(&Tensor::zeros((2, 4), DType::F32, &device)?, true)?;
        let err = node.forward_t(&Tensor::zeros((3, 4), DType::F32, &device)?, true);
        assert!(err.is_err());
        node.reset();
        assert!(node
            .forward_t(&Tensor::zeros((3, 4), DType::F32, &device)?, true)
            .is_ok());
        Ok(())
    }

    #[test]
    fn parametric_lif_recovers_init_tau() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let node = ParametricLifNode::new(NeuronConfig::default(), 2.0, vb.pp("plif"))?;
        assert!((node.tau()? - 2.0).abs() < 1e-4);
        assert_eq!(varmap.all_vars().len(), 1);
        Ok(())
    }

    #[test]
    fn invalid_hyper_parameters_are_rejected() {
        assert!(LifNode::new(NeuronConfig::default(), 1.0).is_err());
        let bad = NeuronConfig {
            v_threshold: 0.0,
            ..NeuronConfig::default()
        };
        assert!(IfNode::new(bad).is_err());
    }
}
