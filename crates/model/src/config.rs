//! Model configuration and validation.

use candle_core::{DType, Device, Error, Result};
use neurons::{NeuronConfig, Surrogate};

/// Supported VGG stage tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VggVariant {
    Vgg11,
    Vgg13,
    Vgg16,
    Vgg19,
}

impl VggVariant {
    pub fn name(&self) -> &'static str {
        match self {
            VggVariant::Vgg11 => "vgg11",
            VggVariant::Vgg13 => "vgg13",
            VggVariant::Vgg16 => "vgg16",
            VggVariant::Vgg19 => "vgg19",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "vgg11" => Ok(VggVariant::Vgg11),
            "vgg13" => Ok(VggVariant::Vgg13),
            "vgg16" => Ok(VggVariant::Vgg16),
            "vgg19" => Ok(VggVariant::Vgg19),
            other => Err(Error::Msg(format!(
                "unknown VGG variant '{other}', expected one of vgg11/vgg13/vgg16/vgg19"
            ))),
        }
    }
}

/// Hyper-parameters of the spiking neuron layers inside the network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuronSettings {
    pub tau: f64,
    pub v_threshold: f64,
    /// `None` selects soft reset.
    pub v_reset: Option<f64>,
    pub surrogate: Surrogate,
    pub detach_reset: bool,
}

impl Default for NeuronSettings {
    fn default() -> Self {
        Self {
            tau: 2.0,
            v_threshold: 1.0,
            v_reset: Some(0.0),
            surrogate: Surrogate::default(),
            detach_reset: true,
        }
    }
}

impl NeuronSettings {
    pub fn firing(&self) -> NeuronConfig {
        NeuronConfig {
            v_threshold: self.v_threshold,
            v_reset: self.v_reset,
            surrogate: self.surrogate,
            detach_reset: self.detach_reset,
        }
    }
}

/// High-level configuration for assembling a spiking VGG.
#[derive(Debug, Clone)]
pub struct SpikingVggConfig {
    pub variant: VggVariant,
    pub batch_norm: bool,
    pub in_channels: usize,
    pub num_classes: usize,
    /// Spatial resolution the classifier head is pooled to.
    pub pool_size: (usize, usize),
    /// Width of the two hidden classifier projections.
    pub classifier_hidden: usize,
    pub dropout: f64,
    pub neuron: NeuronSettings,
    pub dtype: DType,
    pub device: Device,
}

impl SpikingVggConfig {
    pub fn new(variant: VggVariant, num_classes: usize, device: Device) -> Self {
        Self {
            variant,
            batch_norm: false,
            in_channels: 3,
            num_classes,
            pool_size: (7, 7),
            classifier_hidden: 4096,
            dropout: 0.5,
            neuron: NeuronSettings::default(),
            dtype: DType::F32,
            device,
        }
    }

    /// Validate structural invariants before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(Error::Msg("in_channels must be greater than zero".into()));
        }
        if self.num_classes == 0 {
            return Err(Error::Msg("num_classes must be greater than zero".into()));
        }
        if self.classifier_hidden == 0 {
            return Err(Error::Msg(
                "classifier_hidden must be greater than zero".into(),
            ));
        }
        if self.pool_size.0 == 0 || self.pool_size.1 == 0 {
            return Err(Error::Msg("pool_size must be non-zero".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Msg(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.neuron.tau <= 1.0 {
            return Err(Error::Msg(format!(
                "neuron tau must exceed 1.0, got {}",
                self.neuron.tau
            )));
        }
        if self.neuron.v_threshold <= 0.0 {
            return Err(Error::Msg(format!(
                "neuron v_threshold must be positive, got {}",
                self.neuron.v_threshold
            )));
        }
        Ok(())
    }
}
