//! Training configuration loading and validation.

use std::{
    fs,
    path::{Path, PathBuf},
};

use candle_core::{DType, Device};
use model::{NeuronSettings, SpikingVggConfig, VggVariant};
use neurons::Surrogate;
use serde::Deserialize;
use thiserror::Error;

/// Error taxonomy of the training crate.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration format error: {0}")]
    ConfigFormat(String),
    #[error("configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("initialization error: {0}")]
    Initialization(String),
    #[error("dataset error: {0}")]
    Dataset(#[from] vision_data::DatasetError),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        TrainingError::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        TrainingError::Runtime(message.into())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(err: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(err.to_string())
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(err: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(err.to_string())
    }
}

/// Maps `candle_core::Error` values into the runtime bucket.
pub fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::Runtime(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Cifar10,
    Cifar100,
    Mnist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurrogateKind {
    Sigmoid,
    Softsign,
    Erf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adamw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Constant,
    Cosine,
    Step,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub arch: String,
    pub batch_norm: bool,
    /// Simulation length `T`; inputs are replicated along a leading time axis.
    pub time_steps: usize,
    pub tau: f64,
    pub v_threshold: f64,
    /// Soft reset subtracts the threshold instead of snapping to `v_reset`.
    pub soft_reset: bool,
    pub detach_reset: bool,
    pub surrogate: SurrogateKind,
    pub surrogate_alpha: f64,
    pub dropout: f64,
    pub classifier_hidden: usize,
    pub pool_size: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            arch: "vgg11".to_string(),
            batch_norm: false,
            time_steps: 4,
            tau: 2.0,
            v_threshold: 1.0,
            soft_reset: false,
            detach_reset: true,
            surrogate: SurrogateKind::Sigmoid,
            surrogate_alpha: 4.0,
            dropout: 0.5,
            classifier_hidden: 4096,
            pool_size: 7,
        }
    }
}

impl ModelSection {
    fn surrogate(&self) -> Surrogate {
        let alpha = self.surrogate_alpha;
        match self.surrogate {
            SurrogateKind::Sigmoid => Surrogate::Sigmoid { alpha },
            SurrogateKind::Softsign => Surrogate::SoftSign { alpha },
            SurrogateKind::Erf => Surrogate::Erf { alpha },
        }
    }

    /// Resolves the section into a model configuration for a dataset with the
    /// given image channels and class count.
    pub fn resolve(
        &self,
        in_channels: usize,
        num_classes: usize,
        device: Device,
    ) -> Result<SpikingVggConfig, TrainingError> {
        let variant = VggVariant::from_name(&self.arch).map_err(to_runtime_error)?;
        Ok(SpikingVggConfig {
            variant,
            batch_norm: self.batch_norm,
            in_channels,
            num_classes,
            pool_size: (self.pool_size, self.pool_size),
            classifier_hidden: self.classifier_hidden,
            dropout: self.dropout,
            neuron: NeuronSettings {
                tau: self.tau,
                v_threshold: self.v_threshold,
                v_reset: if self.soft_reset { None } else { Some(0.0) },
                surrogate: self.surrogate(),
                detach_reset: self.detach_reset,
            },
            dtype: DType::F32,
            device,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSection {
    pub dataset: DatasetKind,
    pub root: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub augment: bool,
}

fn default_batch_size() -> usize {
    32
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerSection {
    pub algorithm: OptimizerKind,
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub clip_grad_norm: Option<f64>,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            algorithm: OptimizerKind::Sgd,
            learning_rate: 0.1,
            momentum: 0.9,
            weight_decay: 0.0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            clip_grad_norm: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub strategy: SchedulerKind,
    pub warmup_epochs: usize,
    pub min_lr: f64,
    pub step_size: usize,
    pub gamma: f64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            strategy: SchedulerKind::Cosine,
            warmup_epochs: 0,
            min_lr: 0.0,
            step_size: 30,
            gamma: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    pub directory: PathBuf,
    #[serde(default = "default_one")]
    pub every_n_epochs: usize,
    #[serde(default)]
    pub max_keep: Option<usize>,
}

fn default_one() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub enable_stdout: bool,
    pub tensorboard: Option<PathBuf>,
    pub tensorboard_flush_every_n: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            tensorboard: None,
            tensorboard_flush_every_n: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub seed: u64,
    pub epochs: usize,
    pub label_smoothing: f64,
    pub log_every_n_steps: usize,
    pub eval_every_n_epochs: usize,
    pub checkpoint: Option<CheckpointSection>,
    pub logging: LoggingSection,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 64,
            label_smoothing: 0.0,
            log_every_n_steps: 50,
            eval_every_n_epochs: 1,
            checkpoint: None,
            logging: LoggingSection::default(),
        }
    }
}

/// Root of the training configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub model: ModelSection,
    pub data: DataSection,
    #[serde(default)]
    pub optimizer: OptimizerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

impl TrainingConfig {
    /// Loads a TOML or JSON configuration, resolving relative paths against
    /// the file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )))
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_base_path(&mut self, base: &Path) {
        if self.data.root.is_relative() {
            self.data.root = base.join(&self.data.root);
        }
        if let Some(checkpoint) = self.runtime.checkpoint.as_mut() {
            if checkpoint.directory.is_relative() {
                checkpoint.directory = base.join(&checkpoint.directory);
            }
        }
        if let Some(tensorboard) = self.runtime.logging.tensorboard.as_mut() {
            if tensorboard.is_relative() {
                *tensorboard = base.join(&*tensorboard);
            }
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if VggVariant::from_name(&self.model.arch).is_err() {
            errors.push(format!("model.arch '{}' is not a known variant", self.model.arch));
        }
        if self.model.time_steps == 0 {
            errors.push("model.time_steps must be greater than 0".to_string());
        }
        if self.model.tau <= 1.0 {
            errors.push("model.tau must exceed 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            errors.push("model.dropout must be in [0, 1)".to_string());
        }
        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be greater than 0".to_string());
        }
        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }
        if let Some(clip) = self.optimizer.clip_grad_norm {
            if clip <= 0.0 {
                errors.push("optimizer.clip_grad_norm must be greater than 0".to_string());
            }
        }
        if self.scheduler.gamma <= 0.0 || self.scheduler.gamma > 1.0 {
            errors.push("scheduler.gamma must be in (0, 1]".to_string());
        }
        if self.scheduler.step_size == 0 {
            errors.push("scheduler.step_size must be greater than 0".to_string());
        }
        if self.runtime.epochs == 0 {
            errors.push("runtime.epochs must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.runtime.label_smoothing) {
            errors.push("runtime.label_smoothing must be in [0, 1)".to_string());
        }
        if let Some(checkpoint) = &self.runtime.checkpoint {
            if checkpoint.every_n_epochs == 0 {
                errors.push("runtime.checkpoint.every_n_epochs must be greater than 0".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrainingError::Validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [data]
        dataset = "cifar10"
        root = "data/cifar"
    "#;

    #[test]
    fn minimal_toml_fills_defaults() -> Result<(), TrainingError> {
        let config: TrainingConfig = toml::from_str(MINIMAL)?;
        assert_eq!(config.model.arch, "vgg11");
        assert_eq!(config.model.time_steps, 4);
        assert_eq!(config.data.batch_size, 32);
        assert!(matches!(config.optimizer.algorithm, OptimizerKind::Sgd));
        assert!(matches!(config.scheduler.strategy, SchedulerKind::Cosine));
        config.validate()
    }

    #[test]
    fn relative_paths_are_resolved_against_the_config_dir() -> Result<(), TrainingError> {
        let mut config: TrainingConfig = toml::from_str(MINIMAL)?;
        config.apply_base_path(Path::new("/etc/experiment"));
        assert_eq!(config.data.root, PathBuf::from("/etc/experiment/data/cifar"));
        Ok(())
    }

    #[test]
    fn validation_collects_every_failure() {
        let mut config: TrainingConfig = toml::from_str(MINIMAL).unwrap();
        config.model.arch = "vgg12".to_string();
        config.model.time_steps = 0;
        config.optimizer.learning_rate = 0.0;
        let err = config.validate().unwrap_err();
        match err {
            TrainingError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn model_section_resolves_soft_reset_and_surrogate() -> Result<(), TrainingError> {
        let mut config: TrainingConfig = toml::from_str(MINIMAL).unwrap();
        config.model.soft_reset = true;
        config.model.surrogate = SurrogateKind::Softsign;
        config.model.surrogate_alpha = 2.0;
        let resolved = config.model.resolve(3, 10, Device::Cpu)?;
        assert_eq!(resolved.neuron.v_reset, None);
        assert_eq!(
            resolved.neuron.surrogate,
            Surrogate::SoftSign { alpha: 2.0 }
        );
        Ok(())
    }
}
