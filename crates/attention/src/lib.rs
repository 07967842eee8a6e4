//! Attention modules operating on spike sequences.
//!
//! The temporal-wise attention layer re-weights whole timesteps of a
//! `[T, N, ...]` sequence with a squeeze-and-excitation gate computed over
//! the time axis. It sits between a convolution stage and its neuron layer
//! and runs in multi-step mode only, since the gate needs the full sequence.

pub mod temporal;

pub use temporal::{FeatureLayout, TemporalWiseAttention};
