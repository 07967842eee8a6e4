//! Step-mode conventions shared by every spiking module.
//!
//! Discrete-time spiking networks run in one of two execution modes. In
//! single-step mode a module consumes one timestep per call and carries its
//! state across external calls. In multi-step mode a module consumes a whole
//! simulation at once; inputs and outputs gain a leading time axis, so an
//! image batch `[N, C, H, W]` becomes `[T, N, C, H, W]`. The [`StepModule`]
//! trait plus the reshaping helpers in [`functional`] let every layer switch
//! between the two without duplicating its forward logic.

pub mod checks;
pub mod functional;

use candle_core::{Result, Tensor};

/// Execution mode of a spiking module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// One call advances the simulation by a single timestep.
    #[default]
    Single,
    /// One call consumes a `[T, ...]` sequence covering the whole simulation.
    Multi,
}

impl std::fmt::Display for StepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepMode::Single => write!(f, "single-step"),
            StepMode::Multi => write!(f, "multi-step"),
        }
    }
}

/// Common interface of every spiking layer, neuron, container and model.
///
/// `forward_t` takes `&mut self` because memory-bearing modules update their
/// temporal state during the pass; the `train` flag mirrors
/// `candle_nn::ModuleT` and controls dropout and batch-norm statistics.
pub trait StepModule: Send {
    /// Current execution mode.
    fn step_mode(&self) -> StepMode;

    /// Switches the execution mode. State from a previous simulation is kept;
    /// callers normally [`reset`](StepModule::reset) around the switch.
    fn set_step_mode(&mut self, mode: StepMode);

    /// Runs the module on `xs` according to its step mode.
    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor>;

    /// Clears all temporal state (membrane potentials, frozen dropout masks,
    /// recurrent feedback). Parameters are untouched. Stateless modules keep
    /// the default no-op.
    fn reset(&mut self) {}
}

/// Resets every module in `modules`, ending the current simulation.
pub fn reset_all(modules: &mut [Box<dyn StepModule>]) {
    for module in modules.iter_mut() {
        module.reset();
    }
}

/// Switches every module in `modules` to `mode`.
pub fn set_step_mode_all(modules: &mut [Box<dyn StepModule>], mode: StepMode) {
    for module in modules.iter_mut() {
        module.set_step_mode(mode);
    }
}
