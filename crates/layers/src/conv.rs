//! Convolution wrapper with step-mode dispatch.

use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};
use stepmode::{checks, functional, StepMode, StepModule};

/// Construction parameters for [`Conv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub groups: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    /// Square convolution with unit stride and no padding.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: 0,
            dilation: 1,
            groups: 1,
            bias: true,
        }
    }
}

/// 2D convolution over `[N, C, H, W]` (single-step) or `[T, N, C, H, W]`
/// (multi-step, applied over the merged time-batch axis).
#[derive(Debug)]
pub struct Conv2d {
    inner: candle_nn::Conv2d,
    step_mode: StepMode,
}

impl Conv2d {
    pub fn new(cfg: &Conv2dConfig, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = candle_nn::Conv2dConfig {
            padding: cfg.padding,
            stride: cfg.stride,
            dilation: cfg.dilation,
            groups: cfg.groups,
            ..Default::default()
        };
        let inner = if cfg.bias {
            candle_nn::conv2d(
                cfg.in_channels,
                cfg.out_channels,
                cfg.kernel_size,
                conv_cfg,
                vb,
            )?
        } else {
            candle_nn::conv2d_no_bias(
                cfg.in_channels,
                cfg.out_channels,
                cfg.kernel_size,
                conv_cfg,
                vb,
            )?
        };
        Ok(Self {
            inner,
            step_mode: StepMode::Single,
        })
    }
}

impl StepModule for Conv2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("conv2d.input", xs, 4)?;
                self.inner.forward(xs)
            }
            StepMode::Multi => {
                checks::expect_multi_step("conv2d.input", xs, 5)?;
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

    fn build(device: &Device) -> Result<Conv2d> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut cfg = Conv2dConfig::new(3, 8, 3);
        cfg.padding = 1;
        Conv2d::new(&cfg, vb.pp("conv"))
    }

    #[test]
    fn multi_step_equals_per_step_application() -> Result<()> {
        let device = Device::Cpu;
        let mut conv = build(&device)?;
        let x_seq = Tensor::rand(0f32, 1f32, (4, 2, 3, 8, 8), &device)?;

        conv.set_step_mode(StepMode::Multi);
        let folded = conv.forward_t(&x_seq, true)?;
        assert_eq!(folded.dims(), &[4, 2, 8, 8, 8]);

        conv.set_step_mode(StepMode::Single);
        let mut per_step = Vec::new();
        for t in 0..4 {
            per_step.push(conv.forward_t(&x_seq.get(t)?, true)?);
        }
        let stacked = Tensor::stack(&per_step, 0)?;
        let diff = folded.sub(&stacked)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn multi_step_rejects_rank_four_input() -> Result<()> {
        let device = Device::Cpu;
        let mut conv = build(&device)?;
        conv.set_step_mode(StepMode::Multi);
        let x = Tensor::rand(0f32, 1f32, (2, 3, 8, 8), &device)?;
        assert!(conv.forward_t(&x, true).is_err());
        Ok(())
    }
}
