//! Spiking dropout with a per-simulation frozen mask.
//!
//! Unlike framework dropout, the zeroed elements must stay fixed for every
//! timestep of a simulation: the surviving sub-network has to be identical
//! across the forward passes that share one backward pass. The mask is
//! sampled on the first step after a [`StepModule::reset`] and reused until
//! the next one.

use candle_core::{Error, Result, Tensor};
use stepmode::{checks, StepMode, StepModule};

fn sample_mask(like: &Tensor, p: f64) -> Result<Tensor> {
    // inverted dropout on a tensor of ones: zeros with probability p,
    // survivors scaled by 1/(1-p)
    candle_nn::ops::dropout(&like.ones_like()?, p as f32)
}

/// Element-wise spiking dropout.
#[derive(Debug)]
pub struct Dropout {
    p: f64,
    mask: Option<Tensor>,
    step_mode: StepMode,
}

impl Dropout {
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }
        Ok(Self {
            p,
            mask: None,
            step_mode: StepMode::Single,
        })
    }

    fn masked(&mut self, x: &Tensor, template: &Tensor) -> Result<Tensor> {
        if self.mask.is_none() {
            self.mask = Some(sample_mask(template, self.p)?);
        }
        let mask = self.mask.as_ref().unwrap();
        x.broadcast_mul(mask)
    }
}

impl StepModule for Dropout {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train {
            return Ok(xs.clone());
        }
        match self.step_mode {
            StepMode::Single => self.masked(xs, xs),
            StepMode::Multi => {
                // mask shaped like one timestep, broadcast over the time axis
                let template = xs.get(0)?;
                self.masked(xs, &template)
            }
        }
    }

    fn reset(&mut self) {
        self.mask = None;
    }
}

/// Channel-wise spiking dropout for `[N, C, H, W]` feature maps.
#[derive(Debug)]
pub struct Dropout2d {
    p: f64,
    mask: Option<Tensor>,
    step_mode: StepMode,
}

impl Dropout2d {
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }
        Ok(Self {
            p,
            mask: None,
            step_mode: StepMode::Single,
        })
    }

    fn masked(&mut self, x: &Tensor, step: &Tensor) -> Result<Tensor> {
        if self.mask.is_none() {
            let (n, c, _, _) = step.dims4()?;
            let template = Tensor::ones((n, c, 1, 1), step.dtype(), step.device())?;
            self.mask = Some(candle_nn::ops::dropout(&template, self.p as f32)?);
        }
        let mask = self.mask.as_ref().unwrap();
        x.broadcast_mul(mask)
    }
}

impl StepModule for Dropout2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train {
            return Ok(xs.clone());
        }
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("dropout2d.input", xs, 4)?;
                self.masked(xs, xs)
            }
            StepMode::Multi => {
                checks::expect_multi_step("dropout2d.input", xs, 5)?;
                let step = xs.get(0)?;
                self.masked(xs, &step)
            }
        }
    }

    fn reset(&mut self) {
        self.mask = None;
    }
}
