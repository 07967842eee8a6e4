//! Affine projection wrapper with step-mode dispatch.

use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};
use stepmode::{functional, StepMode, StepModule};

/// Dense projection over the last axis, `[..., in] -> [..., out]`.
#[derive(Debug)]
pub struct Linear {
    inner: candle_nn::Linear,
    step_mode: StepMode,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let inner = if bias {
            candle_nn::linear(in_features, out_features, vb)?
        } else {
            candle_nn::linear_no_bias(in_features, out_features, vb)?
        };
        Ok(Self {
            inner,
            step_mode: StepMode::Single,
        })
    }
}

impl StepModule for Linear {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.inner.forward(xs),
            StepMode::Multi => {
                functional::seq_to_ann_forward(xs, |merged| self.inner.forward(merged))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn multi_step_projection_keeps_time_axis() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut linear = Linear::new(6, 4, true, vb.pp("fc"))?;
        linear.set_step_mode(StepMode::Multi);

        let x_seq = Tensor::rand(0f32, 1f32, (3, 2, 6), &device)?;
        let y_seq = linear.forward_t(&x_seq, true)?;
        assert_eq!(y_seq.dims(), &[3, 2, 4]);

        linear.set_step_mode(StepMode::Single);
        let first = linear.forward_t(&x_seq.get(0)?, true)?;
        let diff = y_seq
            .get(0)?
            .sub(&first)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }
}
