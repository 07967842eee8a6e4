//! Sequential containers that fix a multi-step execution strategy.
//!
//! All three wrap a chain of modules that themselves run in single-step mode.
//! [`SeqToAnnContainer`] folds the time axis away once for the whole chain and
//! is only correct for stateless members; [`MultiStepContainer`] drives the
//! chain timestep by timestep and also suits stateful members;
//! [`StepModeContainer`] picks between the two at dispatch time.

use candle_core::{Error, Result, Tensor};
use stepmode::{functional, StepMode, StepModule};

fn expect_single_step_members(label: &str, modules: &[Box<dyn StepModule>]) -> Result<()> {
    for (index, module) in modules.iter().enumerate() {
        if module.step_mode() != StepMode::Single {
            return Err(Error::Msg(format!(
                "{label}: contained module #{index} must be in single-step mode"
            )));
        }
    }
    Ok(())
}

fn chain_forward(
    modules: &mut [Box<dyn StepModule>],
    xs: &Tensor,
    train: bool,
) -> Result<Tensor> {
    let mut out = xs.clone();
    for module in modules.iter_mut() {
        out = module.forward_t(&out, train)?;
    }
    Ok(out)
}

/// Multi-step container that merges time into the batch axis, runs its
/// stateless members once, and splits the axes back.
pub struct SeqToAnnContainer {
    modules: Vec<Box<dyn StepModule>>,
}

impl SeqToAnnContainer {
    pub fn new(modules: Vec<Box<dyn StepModule>>) -> Result<Self> {
        expect_single_step_members("seq_to_ann_container", &modules)?;
        Ok(Self { modules })
    }
}

impl StepModule for SeqToAnnContainer {
    fn step_mode(&self) -> StepMode {
        StepMode::Multi
    }

    fn set_step_mode(&mut self, _mode: StepMode) {
        // multi-step only; members stay single-step
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (merged, t) = functional::flatten_time(xs)?;
        let out = chain_forward(&mut self.modules, &merged, train)?;
        functional::unflatten_time(&out, t)
    }

    fn reset(&mut self) {
        for module in self.modules.iter_mut() {
            module.reset();
        }
    }
}

/// Multi-step container that feeds its members one timestep at a time.
pub struct MultiStepContainer {
    modules: Vec<Box<dyn StepModule>>,
}

impl MultiStepContainer {
    pub fn new(modules: Vec<Box<dyn StepModule>>) -> Result<Self> {
        expect_single_step_members("multi_step_container", &modules)?;
        Ok(Self { modules })
    }
}

impl StepModule for MultiStepContainer {
    fn step_mode(&self) -> StepMode {
        StepMode::Multi
    }

    fn set_step_mode(&mut self, _mode: StepMode) {
        // multi-step only; members stay single-step
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let modules = &mut self.modules;
        functional::multi_step_forward(xs, |step| chain_forward(modules, step, train))
    }

    fn reset(&mut self) {
        for module in self.modules.iter_mut() {
            module.reset();
        }
    }
}

/// Container whose multi-step strategy depends on whether its members carry
/// state: stateful chains are stepped, stateless chains are folded.
pub struct StepModeContainer {
    stateful: bool,
    modules: Vec<Box<dyn StepModule>>,
    step_mode: StepMode,
}

impl StepModeContainer {
    pub fn new(stateful: bool, modules: Vec<Box<dyn StepModule>>) -> Result<Self> {
        expect_single_step_members("step_mode_container", &modules)?;
        Ok(Self {
            stateful,
            modules,
            step_mode: StepMode::Single,
        })
    }
}

impl StepModule for StepModeContainer {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => chain_forward(&mut self.modules, xs, train),
            StepMode::Multi if self.stateful => {
                let modules = &mut self.modules;
                functional::multi_step_forward(xs, |step| chain_forward(modules, step, train))
            }
            StepMode::Multi => {
                let (merged, t) = functional::flatten_time(xs)?;
                let out = chain_forward(&mut self.modules, &merged, train)?;
                functional::unflatten_time(&out, t)
            }
        }
    }

    fn reset(&mut self) {
        for module in self.modules.iter_mut() {
            module.reset();
        }
    }
}
