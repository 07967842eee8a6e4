//! Temporal-wise attention over the time axis of a spike sequence.

use candle_core::{Error, Result, Tensor};
use candle_nn::{Module, VarBuilder};
use stepmode::{checks, StepMode, StepModule};

/// Accepted input layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureLayout {
    /// `[T, N, C, H, W]` convolutional feature maps.
    Conv,
    /// `[T, N, L]` flat feature vectors.
    Flat,
}

impl FeatureLayout {
    fn rank(self) -> usize {
        match self {
            FeatureLayout::Conv => 5,
            FeatureLayout::Flat => 3,
        }
    }
}

/// Squeeze-and-excitation gate over timesteps.
///
/// Squeeze: global average and max over every non-time feature axis give two
/// `[N, T]` descriptors. Excite: a shared bottleneck MLP (`T -> T/r -> T`,
/// no bias, ReLU) scores both; the sigmoid of their sum scales the input
/// along the time axis.
pub struct TemporalWiseAttention {
    time_steps: usize,
    layout: FeatureLayout,
    squeeze: candle_nn::Linear,
    excite: candle_nn::Linear,
}

impl TemporalWiseAttention {
    pub fn new(
        time_steps: usize,
        reduction: usize,
        layout: FeatureLayout,
        vb: VarBuilder,
    ) -> Result<Self> {
        if reduction == 0 || reduction > time_steps {
            return Err(Error::Msg(format!(
                "reduction must be in 1..={time_steps}, got {reduction}"
            )));
        }
        let bottleneck = (time_steps / reduction).max(1);
        let squeeze = candle_nn::linear_no_bias(time_steps, bottleneck, vb.pp("fc1"))?;
        let excite = candle_nn::linear_no_bias(bottleneck, time_steps, vb.pp("fc2"))?;
        Ok(Self {
            time_steps,
            layout,
            squeeze,
            excite,
        })
    }

    fn scores(&self, descriptor: &Tensor) -> Result<Tensor> {
        let hidden = self.squeeze.forward(descriptor)?.relu()?;
        self.excite.forward(&hidden)
    }
}

impl StepModule for TemporalWiseAttention {
    fn step_mode(&self) -> StepMode {
        StepMode::Multi
    }

    fn set_step_mode(&mut self, _mode: StepMode) {
        // multi-step only: the gate spans the whole sequence
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        checks::expect_multi_step("temporal_attention.input", xs, self.layout.rank())?;
        let dims = xs.dims();
        if dims[0] != self.time_steps {
            return Err(Error::Msg(format!(
                "temporal_attention.input: expected {} timesteps, got {}",
                self.time_steps, dims[0]
            )));
        }

        let batch_first = xs.transpose(0, 1)?.contiguous()?; // [N, T, ...]
        let flat = batch_first.flatten_from(2)?; // [N, T, L]
        let avg_descriptor = flat.mean(2)?;
        let max_descriptor = flat.max(2)?;

        let summed = (self.scores(&avg_descriptor)? + self.scores(&max_descriptor)?)?;
        let gate = candle_nn::ops::sigmoid(&summed)?; // [N, T]

        let mut gate_shape = vec![dims[1], self.time_steps];
        gate_shape.extend(std::iter::repeat(1).take(dims.len() - 2));
        let gate = gate.reshape(gate_shape)?;

        batch_first.broadcast_mul(&gate)?.transpose(0, 1)?.contiguous()
    }
}
