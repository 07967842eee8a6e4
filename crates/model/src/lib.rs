//! Spiking VGG image classifiers.
//!
//! The architecture follows the classical VGG stage tables with every ReLU
//! replaced by a spiking neuron layer. In multi-step mode the model consumes
//! `[T, N, C, H, W]` and yields per-step logits `[T, N, num_classes]`;
//! averaging those over the time axis gives the firing-rate prediction the
//! training driver feeds to the loss.

pub mod config;
pub mod vgg;

pub use config::{NeuronSettings, SpikingVggConfig, VggVariant};
pub use vgg::SpikingVgg;
