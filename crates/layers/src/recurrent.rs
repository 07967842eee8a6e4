//! Recurrent containers feeding a module's previous output back into its
//! input. The feedback starts at zero: `y[-1] = 0`.

use candle_core::{Error, Result, Tensor};
use candle_nn::{Module, VarBuilder};
use stepmode::{functional, StepMode, StepModule};

fn expect_single_step_member(label: &str, module: &dyn StepModule) -> Result<()> {
    if module.step_mode() != StepMode::Single {
        return Err(Error::Msg(format!(
            "{label}: the contained module must be in single-step mode"
        )));
    }
    Ok(())
}

/// Element-wise recurrence: `i[t] = f(x[t], y[t-1])`, `y[t] = sub(i[t])`.
///
/// The combination function must preserve the shape; the contained module's
/// input and output shapes must match.
pub struct ElementWiseRecurrentContainer<F>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send,
{
    sub_module: Box<dyn StepModule>,
    element_wise: F,
    feedback: Option<Tensor>,
    step_mode: StepMode,
}

impl<F> ElementWiseRecurrentContainer<F>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send,
{
    pub fn new(sub_module: Box<dyn StepModule>, element_wise: F) -> Result<Self> {
        expect_single_step_member("element_wise_recurrent", sub_module.as_ref())?;
        Ok(Self {
            sub_module,
            element_wise,
            feedback: None,
            step_mode: StepMode::Single,
        })
    }

    fn single_step(&mut self, x: &Tensor, train: bool) -> Result<Tensor> {
        let feedback = match &self.feedback {
            Some(y) => y.clone(),
            None => x.zeros_like()?,
        };
        let input = (self.element_wise)(x, &feedback)?;
        let y = self.sub_module.forward_t(&input, train)?;
        self.feedback = Some(y.clone());
        Ok(y)
    }
}

impl<F> StepModule for ElementWiseRecurrentContainer<F>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send,
{
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.single_step(xs, train),
            StepMode::Multi => {
                functional::multi_step_forward(xs, |step| self.single_step(step, train))
            }
        }
    }

    fn reset(&mut self) {
        self.feedback = None;
        self.sub_module.reset();
    }
}

/// Linear recurrence: `i[t] = W [x[t]; y[t-1]] + b`, `y[t] = sub(i[t])`.
///
/// The recurrent projection maps `in_features + out_features` back to
/// `in_features`; `x[t]` is `[N, ..., in_features]` and `y[t]` is
/// `[N, ..., out_features]`.
pub struct LinearRecurrentContainer {
    sub_module: Box<dyn StepModule>,
    recurrent: candle_nn::Linear,
    out_features: usize,
    feedback: Option<Tensor>,
    step_mode: StepMode,
}

impl LinearRecurrentContainer {
    pub fn new(
        sub_module: Box<dyn StepModule>,
        in_features: usize,
        out_features: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        expect_single_step_member("linear_recurrent", sub_module.as_ref())?;
        let recurrent = if bias {
            candle_nn::linear(in_features + out_features, in_features, vb)?
        } else {
            candle_nn::linear_no_bias(in_features + out_features, in_features, vb)?
        };
        Ok(Self {
            sub_module,
            recurrent,
            out_features,
            feedback: None,
            step_mode: StepMode::Single,
        })
    }

    fn single_step(&mut self, x: &Tensor, train: bool) -> Result<Tensor> {
        let feedback = match &self.feedback {
            Some(y) => y.clone(),
            None => {
                let mut dims = x.dims().to_vec();
                let last = dims
                    .last_mut()
                    .ok_or_else(|| Error::Msg("input must have a feature axis".to_string()))?;
                *last = self.out_features;
                Tensor::zeros(dims, x.dtype(), x.device())?
            }
        };
        let joined = Tensor::cat(&[x, &feedback], candle_core::D::Minus1)?;
        let input = self.recurrent.forward(&joined)?;
        let y = self.sub_module.forward_t(&input, train)?;
        self.feedback = Some(y.clone());
        Ok(y)
    }
}

impl StepModule for LinearRecurrentContainer {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => self.single_step(xs, train),
            StepMode::Multi => {
                functional::multi_step_forward(xs, |step| self.single_step(step, train))
            }
        }
    }

    fn reset(&mut self) {
        self.feedback = None;
        self.sub_module.reset();
    }
}
