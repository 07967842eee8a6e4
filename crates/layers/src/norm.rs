//! Normalization wrappers with step-mode dispatch.
//!
//! Batch statistics are always computed by the Candle primitive; multi-step
//! inputs are folded into the batch axis first, so a `[T, N, C, H, W]`
//! sequence is normalized over `T · N` samples at once. That folding is what
//! threshold-dependent batch norm relies on.

use candle_core::{Error, Result, Tensor};
use candle_nn::{init::Init, Module, ModuleT, VarBuilder};
use stepmode::{checks, functional, StepMode, StepModule};

/// Batch normalization over the channel axis of `[N, C, H, W]` inputs.
#[derive(Debug)]
pub struct BatchNorm2d {
    inner: candle_nn::BatchNorm,
    step_mode: StepMode,
}

impl BatchNorm2d {
    pub fn new(num_features: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let inner = candle_nn::batch_norm(num_features, eps, vb)?;
        Ok(Self {
            inner,
            step_mode: StepMode::Single,
        })
    }
}

impl StepModule for BatchNorm2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("batch_norm2d.input", xs, 4)?;
                self.inner.forward_t(xs, train)
            }
            StepMode::Multi => {
                checks::expect_multi_step("batch_norm2d.input", xs, 5)?;
                functional::seq_to_ann_forward(xs, |merged| self.inner.forward_t(merged, train))
            }
        }
    }
}

/// Group normalization over `[N, C, ...]` inputs.
#[derive(Debug)]
pub struct GroupNorm {
    inner: candle_nn::GroupNorm,
    step_mode: StepMode,
}

impl GroupNorm {
    pub fn new(num_groups: usize, num_channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let inner = candle_nn::group_norm(num_groups, num_channels, eps, vb)?;
        Ok(Self {
            inner,
            step_mode: StepMode::Single,
        })
    }
}

impl StepModule for GroupNorm {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.inner.forward(xs),
            StepMode::Multi => functional::seq_to_ann_forward(xs, |merged| {
                self.inner.forward(merged)
            }),
        }
    }
}

/// Threshold-dependent batch normalization.
///
/// Multi-step only: statistics cover the whole `[T · N, C, H, W]` view so
/// pre-activations are scaled relative to the firing threshold of the neuron
/// layer that follows. The affine scale starts at `alpha * v_threshold`.
#[derive(Debug)]
pub struct ThresholdDependentBatchNorm2d {
    inner: candle_nn::BatchNorm,
}

impl ThresholdDependentBatchNorm2d {
    pub fn new(
        num_features: usize,
        alpha: f64,
        v_threshold: f64,
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        if alpha <= 0.0 || v_threshold <= 0.0 {
            return Err(Error::Msg(format!(
                "threshold-dependent batch norm needs positive alpha and v_threshold, \
                 got alpha={alpha} v_threshold={v_threshold}"
            )));
        }
        // seed the scale before batch_norm claims it with its ones init;
        // the builder hands back the existing var on the second lookup
        vb.get_with_hints(num_features, "weight", Init::Const(alpha * v_threshold))?;
        let inner = candle_nn::batch_norm(num_features, eps, vb)?;
        Ok(Self { inner })
    }

    /// Current affine scale, exposed for inspection.
    pub fn weight(&self) -> Option<&Tensor> {
        self.inner.weight_and_bias().map(|(weight, _)| weight)
    }
}

impl StepModule for ThresholdDependentBatchNorm2d {
    fn step_mode(&self) -> StepMode {
        StepMode::Multi
    }

    fn set_step_mode(&mut self, _mode: StepMode) {
        // multi-step only
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_multi_step("td_batch_norm2d.input", xs, 5)?;
        functional::seq_to_ann_forward(xs, |merged| self.inner.forward_t(merged, train))
    }
}
