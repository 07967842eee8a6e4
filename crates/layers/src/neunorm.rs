//! Neuron normalization (NeuNorm).
//!
//! Tracks an exponential trace of the per-position spike count across
//! channels and subtracts a learned projection of it from the incoming
//! spikes. Placed after `Conv2d -> neuron` stages.

use candle_core::{Error, Result, Tensor};
use candle_nn::{init, VarBuilder};
use stepmode::{checks, functional, StepMode, StepModule};

/// Auxiliary normalization layer for `[N, C, H, W]` spike maps.
#[derive(Debug)]
pub struct NeuNorm {
    k0: f64,
    k1: f64,
    weight: Tensor,
    trace: Option<Tensor>,
    step_mode: StepMode,
}

impl NeuNorm {
    /// `k` is the trace momentum; the compensation factor is
    /// `k1 = (1 - k) / in_channels^2`. With `shared_across_channels` the
    /// learnable weight collapses to a single `[1, H, W]` plane.
    pub fn new(
        in_channels: usize,
        height: usize,
        width: usize,
        k: f64,
        shared_across_channels: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&k) {
            return Err(Error::Msg(format!("momentum k must be in [0, 1), got {k}")));
        }
        if in_channels == 0 {
            return Err(Error::Msg("in_channels must be non-zero".to_string()));
        }
        let weight_channels = if shared_across_channels { 1 } else { in_channels };
        let weight = vb.get_with_hints(
            (weight_channels, height, width),
            "weight",
            init::DEFAULT_KAIMING_UNIFORM,
        )?;
        Ok(Self {
            k0: k,
            k1: (1.0 - k) / (in_channels * in_channels) as f64,
            weight,
            trace: None,
            step_mode: StepMode::Single,
        })
    }

    fn single_step(&mut self, in_spikes: &Tensor) -> Result<Tensor> {
        checks::expect_rank("neu_norm.input", in_spikes, 4)?;
        let channel_sum = in_spikes.sum_keepdim(1)?; // [N, 1, H, W]
        let trace = match &self.trace {
            Some(prev) => ((prev * self.k0)? + (channel_sum * self.k1)?)?,
            None => (channel_sum * self.k1)?,
        };
        let correction = trace.broadcast_mul(&self.weight)?;
        let out = in_spikes.broadcast_sub(&correction)?;
        self.trace = Some(trace);
        Ok(out)
    }
}

impl StepModule for NeuNorm {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.single_step(xs),
            StepMode::Multi => {
                checks::expect_multi_step("neu_norm.input", xs, 5)?;
                functional::multi_step_forward(xs, |x| self.single_step(x))
            }
        }
    }

    fn reset(&mut self) {
        self.trace = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn trace_accumulates_with_momentum() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut norm = NeuNorm::new(2, 3, 3, 0.5, false, vb.pp("nn"))?;

        let spikes = Tensor::ones((1, 2, 3, 3), DType::F32, &device)?;
        norm.forward_t(&spikes, true)?;
        // k1 = (1 - 0.5) / 4 = 0.125, channel sum = 2 -> trace = 0.25
        let first = norm
            .trace
            .as_ref()
            .unwrap()
            .flatten_all()?
            .to_vec1::<f32>()?[0];
        assert!((first - 0.25).abs() < 1e-6);

        norm.forward_t(&spikes, true)?;
        // trace = 0.5 * 0.25 + 0.125 * 2 = 0.375
        let second = norm
            .trace
            .as_ref()
            .unwrap()
            .flatten_all()?
            .to_vec1::<f32>()?[0];
        assert!((second - 0.375).abs() < 1e-6);

        norm.reset();
        assert!(norm.trace.is_none());
        Ok(())
    }

    #[test]
    fn shared_weight_is_a_single_plane() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = NeuNorm::new(8, 5, 5, 0.9, true, vb.pp("nn"))?;
        assert_eq!(norm.weight.dims(), &[1, 5, 5]);
        Ok(())
    }
}
