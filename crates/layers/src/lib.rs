//! Step-mode aware building blocks for spiking networks.
//!
//! Two families live here. Shape-adapting wrappers hold a Candle primitive
//! (convolution, normalization, pooling, projection) plus a
//! [`stepmode::StepMode`]; in single-step mode they apply the primitive
//! directly, in multi-step mode they fold the time axis into the batch axis
//! first. Memory-bearing modules (spiking dropout, NeuNorm, synapse filters,
//! recurrent containers) carry state across timesteps and must observe the
//! sequence in order.

pub mod container;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod neunorm;
pub mod norm;
pub mod pool;
pub mod recurrent;
pub mod shape;
pub mod synapse;

pub use container::{MultiStepContainer, SeqToAnnContainer, StepModeContainer};
pub use conv::{Conv2d, Conv2dConfig};
pub use dropout::{Dropout, Dropout2d};
pub use linear::Linear;
pub use neunorm::NeuNorm;
pub use norm::{BatchNorm2d, GroupNorm, ThresholdDependentBatchNorm2d};
pub use pool::{AdaptiveAvgPool2d, AvgPool2d, MaxPool2d};
pub use recurrent::{ElementWiseRecurrentContainer, LinearRecurrentContainer};
pub use shape::{Flatten, VotingLayer};
pub use synapse::SynapseFilter;
