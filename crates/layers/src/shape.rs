//! Shape-rearranging layers: flattening and population voting.

use candle_core::{D, Error, Result, Tensor};
use stepmode::{functional, StepMode, StepModule};

/// Flattens everything from `start_dim` onward (batch axis excluded by the
/// default `start_dim = 1`).
#[derive(Debug, Clone, Copy)]
pub struct Flatten {
    start_dim: usize,
    step_mode: StepMode,
}

impl Flatten {
    pub fn new() -> Self {
        Self::from_dim(1)
    }

    pub fn from_dim(start_dim: usize) -> Self {
        Self {
            start_dim,
            step_mode: StepMode::Single,
        }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl StepModule for Flatten {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => xs.flatten_from(self.start_dim),
            StepMode::Multi => {
                let start_dim = self.start_dim;
                functional::seq_to_ann_forward(xs, |merged| merged.flatten_from(start_dim))
            }
        }
    }
}

/// Population voting: averages consecutive groups of `voting_size` values on
/// the last axis, collapsing `[..., C * voting_size]` to `[..., C]`.
#[derive(Debug, Clone, Copy)]
pub struct VotingLayer {
    voting_size: usize,
    step_mode: StepMode,
}

impl VotingLayer {
    pub fn new(voting_size: usize) -> Result<Self> {
        if voting_size == 0 {
            return Err(Error::Msg("voting_size must be non-zero".to_string()));
        }
        Ok(Self {
            voting_size,
            step_mode: StepMode::Single,
        })
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let dims = xs.dims();
        let last = *dims.last().ok_or_else(|| {
            Error::Msg("voting layer expects at least one dimension".to_string())
        })?;
        if last % self.voting_size != 0 {
            return Err(Error::Msg(format!(
                "voting layer input width {last} is not divisible by voting_size {}",
                self.voting_size
            )));
        }
        let mut grouped = dims[..dims.len() - 1].to_vec();
        grouped.push(last / self.voting_size);
        grouped.push(self.voting_size);
        xs.reshape(grouped)?.mean(D::Minus1)
    }
}

impl StepModule for VotingLayer {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.apply(xs),
            StepMode::Multi => functional::seq_to_ann_forward(xs, |merged| self.apply(merged)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn flatten_merges_feature_dims() -> Result<()> {
        let device = Device::Cpu;
        let mut flatten = Flatten::new();
        let x = Tensor::rand(0f32, 1f32, (2, 3, 4, 4), &device)?;
        assert_eq!(flatten.forward_t(&x, true)?.dims(), &[2, 48]);

        flatten.set_step_mode(StepMode::Multi);
        let x_seq = Tensor::rand(0f32, 1f32, (5, 2, 3, 4, 4), &device)?;
        assert_eq!(flatten.forward_t(&x_seq, true)?.dims(), &[5, 2, 48]);
        Ok(())
    }

    #[test]
    fn voting_averages_groups() -> Result<()> {
        let device = Device::Cpu;
        let mut voting = VotingLayer::new(2)?;
        let x = Tensor::from_vec(vec![1f32, 3.0, 0.0, 2.0], (1, 4), &device)?;
        let y = voting.forward_t(&x, true)?;
        assert_eq!(y.to_vec2::<f32>()?, vec![vec![2.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn voting_rejects_indivisible_width() -> Result<()> {
        let device = Device::Cpu;
        let mut voting = VotingLayer::new(3)?;
        let x = Tensor::rand(0f32, 1f32, (1, 4), &device)?;
        assert!(voting.forward_t(&x, true).is_err());
        Ok(())
    }
}
