//! Spiking neuron models built on Candle primitives.
//!
//! A neuron integrates input current into a membrane potential, emits a
//! binary spike when the potential crosses its threshold, and resets. The
//! threshold crossing is a Heaviside step and has no useful gradient, so
//! firing goes through a surrogate function: the forward value stays binary
//! while the backward pass sees the derivative of a smooth primitive (see
//! [`surrogate`]).
//!
//! Every node implements [`stepmode::StepModule`]: in single-step mode one
//! call advances the simulation by one timestep and the membrane potential is
//! carried across calls; in multi-step mode the node consumes a `[T, N, ...]`
//! sequence and loops internally. `reset` discards the membrane state between
//! simulations.

pub mod nodes;
pub mod surrogate;

pub use nodes::{IfNode, LifNode, NeuronConfig, ParametricLifNode};
pub use surrogate::Surrogate;
