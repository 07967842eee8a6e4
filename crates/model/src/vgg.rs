//! Spiking VGG assembly.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use layers::{
    AdaptiveAvgPool2d, BatchNorm2d, Conv2d, Conv2dConfig, Dropout, Flatten, Linear, MaxPool2d,
};
use neurons::LifNode;
use stepmode::{StepMode, StepModule};

use crate::config::{SpikingVggConfig, VggVariant};

#[derive(Debug, Clone, Copy)]
enum Stage {
    Conv(usize),
    Pool,
}

use Stage::{Conv, Pool};

fn stage_table(variant: VggVariant) -> &'static [Stage] {
    match variant {
        VggVariant::Vgg11 => &[
            Conv(64),
            Pool,
            Conv(128),
            Pool,
            Conv(256),
            Conv(256),
            Pool,
            Conv(512),
            Conv(512),
            Pool,
            Conv(512),
            Conv(512),
            Pool,
        ],
        VggVariant::Vgg13 => &[
            Conv(64),
            Conv(64),
            Pool,
            Conv(128),
            Conv(128),
            Pool,
            Conv(256),
            Conv(256),
            Pool,
            Conv(512),
            Conv(512),
            Pool,
            Conv(512),
            Conv(512),
            Pool,
        ],
        VggVariant::Vgg16 => &[
            Conv(64),
            Conv(64),
            Pool,
            Conv(128),
            Conv(128),
            Pool,
            Conv(256),
            Conv(256),
            Conv(256),
            Pool,
            Conv(512),
            Conv(512),
            Conv(512),
            Pool,
            Conv(512),
            Conv(512),
            Conv(512),
            Pool,
        ],
        VggVariant::Vgg19 => &[
            Conv(64),
            Conv(64),
            Pool,
            Conv(128),
            Conv(128),
            Pool,
            Conv(256),
            Conv(256),
            Conv(256),
            Conv(256),
            Pool,
            Conv(512),
            Conv(512),
            Conv(512),
            Conv(512),
            Pool,
            Conv(512),
            Conv(512),
            Conv(512),
            Conv(512),
            Pool,
        ],
    }
}

/// VGG backbone with spiking activations.
pub struct SpikingVgg {
    features: Vec<Box<dyn StepModule>>,
    avgpool: AdaptiveAvgPool2d,
    classifier: Vec<Box<dyn StepModule>>,
    step_mode: StepMode,
}

impl SpikingVgg {
    pub fn new(cfg: &SpikingVggConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let mut features: Vec<Box<dyn StepModule>> = Vec::new();
        let mut in_channels = cfg.in_channels;
        let features_vb = vb.pp("features");
        let mut layer_index = 0usize;
        for stage in stage_table(cfg.variant) {
            match stage {
                Conv(out_channels) => {
                    let mut conv_cfg = Conv2dConfig::new(in_channels, *out_channels, 3);
                    conv_cfg.padding = 1;
                    // batch norm makes the convolution bias redundant
                    conv_cfg.bias = !cfg.batch_norm;
                    features.push(Box::new(Conv2d::new(
                        &conv_cfg,
                        features_vb.pp(layer_index.to_string()),
                    )?));
                    layer_index += 1;
                    if cfg.batch_norm {
                        features.push(Box::new(BatchNorm2d::new(
                            *out_channels,
                            1e-5,
                            features_vb.pp(layer_index.to_string()),
                        )?));
                        layer_index += 1;
                    }
                    features.push(Box::new(LifNode::new(cfg.neuron.firing(), cfg.neuron.tau)?));
                    layer_index += 1;
                    in_channels = *out_channels;
                }
                Pool => {
                    features.push(Box::new(MaxPool2d::new(2, 2)));
                    layer_index += 1;
                }
            }
        }

        let avgpool = AdaptiveAvgPool2d::new(cfg.pool_size)?;

        let classifier_in = 512 * cfg.pool_size.0 * cfg.pool_size.1;
        let classifier_vb = vb.pp("classifier");
        let classifier: Vec<Box<dyn StepModule>> = vec![
            Box::new(Flatten::new()),
            Box::new(Linear::new(
                classifier_in,
                cfg.classifier_hidden,
                true,
                classifier_vb.pp("0"),
            )?),
            Box::new(LifNode::new(cfg.neuron.firing(), cfg.neuron.tau)?),
            Box::new(Dropout::new(cfg.dropout)?),
            Box::new(Linear::new(
                cfg.classifier_hidden,
                cfg.classifier_hidden,
                true,
                classifier_vb.pp("3"),
            )?),
            Box::new(LifNode::new(cfg.neuron.firing(), cfg.neuron.tau)?),
            Box::new(Dropout::new(cfg.dropout)?),
            Box::new(Linear::new(
                cfg.classifier_hidden,
                cfg.num_classes,
                true,
                classifier_vb.pp("6"),
            )?),
        ];

        Ok(Self {
            features,
            avgpool,
            classifier,
            step_mode: StepMode::Single,
        })
    }

    fn children_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn StepModule>> + '_ {
        self.features.iter_mut().chain(self.classifier.iter_mut())
    }
}

impl StepModule for SpikingVgg {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
        self.avgpool.set_step_mode(mode);
        for child in self.children_mut() {
            child.set_step_mode(mode);
        }
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut out = xs.clone();
        for module in self.features.iter_mut() {
            out = module.forward_t(&out, train)?;
        }
        out = self.avgpool.forward_t(&out, train)?;
        for module in self.classifier.iter_mut() {
            out = module.forward_t(&out, train)?;
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.avgpool.reset();
        for child in self.children_mut() {
            child.reset();
        }
    }
}
