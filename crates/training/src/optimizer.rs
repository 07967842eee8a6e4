//! Parameter updates over the model's `Var`s.
//!
//! The trainer owns the update loop instead of delegating to a framework
//! optimizer so gradient clipping, weight decay policy and checkpointable
//! state stay in one place. SGD with momentum is the default recipe for the
//! spiking classifiers; AdamW is available as the alternative.

use candle_core::{backprop::GradStore, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::config::{to_runtime_error, OptimizerKind, OptimizerSection, TrainingError};

#[derive(Debug, Clone, Copy)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AdamWConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, Copy)]
pub enum OptimizerConfig {
    Sgd(SgdConfig),
    AdamW(AdamWConfig),
}

impl TryFrom<&OptimizerSection> for OptimizerConfig {
    type Error = TrainingError;

    fn try_from(section: &OptimizerSection) -> Result<Self, Self::Error> {
        match section.algorithm {
            OptimizerKind::Sgd => Ok(OptimizerConfig::Sgd(SgdConfig {
                learning_rate: section.learning_rate,
                momentum: section.momentum,
                weight_decay: section.weight_decay,
            })),
            OptimizerKind::Adamw => Ok(OptimizerConfig::AdamW(AdamWConfig {
                learning_rate: section.learning_rate,
                beta1: section.beta1,
                beta2: section.beta2,
                epsilon: section.epsilon,
                weight_decay: section.weight_decay,
            })),
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Sgd { velocity: Tensor },
    AdamW { exp_avg: Tensor, exp_avg_sq: Tensor },
}

#[derive(Debug)]
struct ParameterSlot {
    name: String,
    param: Var,
    state: SlotState,
}

/// Serializable optimizer state for checkpoint resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: usize,
    pub learning_rate: f64,
    pub slots: Vec<SlotSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub name: String,
    #[serde(default)]
    pub velocity: Option<Vec<f32>>,
    #[serde(default)]
    pub exp_avg: Option<Vec<f32>>,
    #[serde(default)]
    pub exp_avg_sq: Option<Vec<f32>>,
}

/// Update loop over named parameters.
#[derive(Debug)]
pub struct TrainerOptimizer {
    config: OptimizerConfig,
    slots: Vec<ParameterSlot>,
    step: usize,
    learning_rate: f64,
    clip_grad_norm: Option<f64>,
}

impl TrainerOptimizer {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        config: OptimizerConfig,
        clip_grad_norm: Option<f64>,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }
        let learning_rate = match config {
            OptimizerConfig::Sgd(cfg) => cfg.learning_rate,
            OptimizerConfig::AdamW(cfg) => cfg.learning_rate,
        };
        let mut slots = Vec::with_capacity(named_parameters.len());
        for (name, param) in named_parameters {
            let tensor = param.as_tensor();
            if !tensor.dtype().is_float() {
                return Err(TrainingError::initialization(format!(
                    "optimizer received non-floating parameter '{name}'"
                )));
            }
            let zeros = tensor.zeros_like().map_err(to_runtime_error)?;
            let state = match config {
                OptimizerConfig::Sgd(_) => SlotState::Sgd { velocity: zeros },
                OptimizerConfig::AdamW(_) => SlotState::AdamW {
                    exp_avg: zeros.clone(),
                    exp_avg_sq: zeros,
                },
            };
            slots.push(ParameterSlot { name, param, state });
        }
        Ok(Self {
            config,
            slots,
            step: 0,
            learning_rate,
            clip_grad_norm,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn optimizer_step(&self) -> usize {
        self.step
    }

    /// Consumes the gradients of one backward pass and updates every
    /// parameter that received one. Returns the pre-clip global norm.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<f64, TrainingError> {
        let mut pulled: Vec<Option<Tensor>> = Vec::with_capacity(self.slots.len());
        let mut norm_sq = 0f64;
        for slot in &self.slots {
            let grad = grads.remove(slot.param.as_tensor());
            if let Some(grad) = &grad {
                let sq = grad
                    .sqr()
                    .and_then(|t| t.sum_all())
                    .and_then(|t| t.to_vec0::<f32>())
                    .map_err(to_runtime_error)?;
                norm_sq += sq as f64;
            }
            pulled.push(grad);
        }
        let grad_norm = norm_sq.sqrt();
        let scale = match self.clip_grad_norm {
            Some(clip) if grad_norm > clip => Some(clip / (grad_norm + 1e-6)),
            _ => None,
        };

        self.step += 1;
        let lr = self.learning_rate;
        for (slot, grad) in self.slots.iter_mut().zip(pulled) {
            let Some(mut grad) = grad else { continue };
            if let Some(scale) = scale {
                grad = (grad * scale).map_err(to_runtime_error)?;
            }
            match (&self.config, &mut slot.state) {
                (OptimizerConfig::Sgd(cfg), SlotState::Sgd { velocity }) => {
                    if cfg.weight_decay > 0.0 {
                        let decay =
                            (slot.param.as_tensor() * cfg.weight_decay).map_err(to_runtime_error)?;
                        grad = (grad + decay).map_err(to_runtime_error)?;
                    }
                    let next_velocity = ((&*velocity * cfg.momentum)
                        .and_then(|v| v + &grad))
                    .map_err(to_runtime_error)?;
                    let update = (&next_velocity * lr).map_err(to_runtime_error)?;
                    let next = (slot.param.as_tensor() - update).map_err(to_runtime_error)?;
                    slot.param.set(&next).map_err(to_runtime_error)?;
                    *velocity = next_velocity;
                }
                (
                    OptimizerConfig::AdamW(cfg),
                    SlotState::AdamW {
                        exp_avg,
                        exp_avg_sq,
                    },
                ) => {
                    let next_avg = ((&*exp_avg * cfg.beta1)
                        .and_then(|m| (&grad * (1.0 - cfg.beta1)).and_then(|g| m + g)))
                    .map_err(to_runtime_error)?;
                    let next_avg_sq = ((&*exp_avg_sq * cfg.beta2).and_then(|v| {
                        grad.sqr()
                            .and_then(|g2| (g2 * (1.0 - cfg.beta2)).and_then(|g2| v + g2))
                    }))
                    .map_err(to_runtime_error)?;

                    let bias1 = 1.0 - cfg.beta1.powi(self.step as i32);
                    let bias2 = 1.0 - cfg.beta2.powi(self.step as i32);
                    let update = ((&next_avg / bias1).and_then(|m_hat| {
                        (&next_avg_sq / bias2)
                            .and_then(|v_hat| v_hat.sqrt())
                            .and_then(|denom| denom + cfg.epsilon)
                            .and_then(|denom| m_hat / denom)
                            .and_then(|ratio| ratio * lr)
                    }))
                    .map_err(to_runtime_error)?;

                    let mut next = slot.param.as_tensor().clone();
                    if cfg.weight_decay > 0.0 {
                        next = (next * (1.0 - lr * cfg.weight_decay)).map_err(to_runtime_error)?;
                    }
                    let next = (next - update).map_err(to_runtime_error)?;
                    slot.param.set(&next).map_err(to_runtime_error)?;
                    *exp_avg = next_avg;
                    *exp_avg_sq = next_avg_sq;
                }
                _ => {
                    return Err(TrainingError::runtime(format!(
                        "optimizer state for '{}' does not match the configured algorithm",
                        slot.name
                    )))
                }
            }
        }
        Ok(grad_norm)
    }

    /// Snapshot for checkpointing.
    pub fn state(&self) -> Result<OptimizerState, TrainingError> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let snapshot = match &slot.state {
                SlotState::Sgd { velocity } => SlotSnapshot {
                    name: slot.name.clone(),
                    velocity: Some(flatten(velocity)?),
                    exp_avg: None,
                    exp_avg_sq: None,
                },
                SlotState::AdamW {
                    exp_avg,
                    exp_avg_sq,
                } => SlotSnapshot {
                    name: slot.name.clone(),
                    velocity: None,
                    exp_avg: Some(flatten(exp_avg)?),
                    exp_avg_sq: Some(flatten(exp_avg_sq)?),
                },
            };
            slots.push(snapshot);
        }
        Ok(OptimizerState {
            step: self.step,
            learning_rate: self.learning_rate,
            slots,
        })
    }

    /// Restores moments and step counter from a checkpoint snapshot.
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<(), TrainingError> {
        self.step = state.step;
        self.learning_rate = state.learning_rate;
        for slot in self.slots.iter_mut() {
            let snapshot = state
                .slots
                .iter()
                .find(|candidate| candidate.name == slot.name)
                .ok_or_else(|| {
                    TrainingError::initialization(format!(
                        "checkpoint is missing optimizer state for '{}'",
                        slot.name
                    ))
                })?;
            match &mut slot.state {
                SlotState::Sgd { velocity } => {
                    let data = snapshot.velocity.as_ref().ok_or_else(|| {
                        TrainingError::initialization(format!(
                            "checkpoint slot '{}' carries no SGD velocity",
                            slot.name
                        ))
                    })?;
                    *velocity = unflatten(data, velocity)?;
                }
                SlotState::AdamW {
                    exp_avg,
                    exp_avg_sq,
                } => {
                    let (avg, avg_sq) = match (&snapshot.exp_avg, &snapshot.exp_avg_sq) {
                        (Some(avg), Some(avg_sq)) => (avg, avg_sq),
                        _ => {
                            return Err(TrainingError::initialization(format!(
                                "checkpoint slot '{}' carries no AdamW moments",
                                slot.name
                            )))
                        }
                    };
                    *exp_avg = unflatten(avg, exp_avg)?;
                    *exp_avg_sq = unflatten(avg_sq, exp_avg_sq)?;
                }
            }
        }
        Ok(())
    }
}

fn flatten(tensor: &Tensor) -> Result<Vec<f32>, TrainingError> {
    tensor
        .flatten_all()
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(to_runtime_error)
}

fn unflatten(data: &[f32], like: &Tensor) -> Result<Tensor, TrainingError> {
    if data.len() != like.elem_count() {
        return Err(TrainingError::initialization(format!(
            "optimizer state length {} does not match parameter with {} elements",
            data.len(),
            like.elem_count()
        )));
    }
    Tensor::from_vec(data.to_vec(), like.dims(), like.device()).map_err(to_runtime_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn sgd(learning_rate: f64, momentum: f64) -> OptimizerConfig {
        OptimizerConfig::Sgd(SgdConfig {
            learning_rate,
            momentum,
            weight_decay: 0.0,
        })
    }

    fn quadratic_grads(var: &Var) -> candle_core::Result<GradStore> {
        // d/dx sum(x^2) = 2x
        var.as_tensor().sqr()?.sum_all()?.backward()
    }

    #[test]
    fn sgd_with_momentum_matches_the_manual_update() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let var = Var::new(&[1.0f32, -2.0], &device).map_err(to_runtime_error)?;
        let mut optimizer =
            TrainerOptimizer::new(vec![("w".to_string(), var.clone())], sgd(0.1, 0.9), None)?;

        let mut grads = quadratic_grads(&var).map_err(to_runtime_error)?;
        optimizer.step(&mut grads)?;
        // v = g = [2, -4]; w = w - 0.1 v
        let values = var.as_tensor().to_vec1::<f32>().map_err(to_runtime_error)?;
        assert!((values[0] - 0.8).abs() < 1e-6);
        assert!((values[1] + 1.6).abs() < 1e-6);

        let mut grads = quadratic_grads(&var).map_err(to_runtime_error)?;
        optimizer.step(&mut grads)?;
        // v = 0.9 * [2, -4] + [1.6, -3.2]; w -= 0.1 v
        let values = var.as_tensor().to_vec1::<f32>().map_err(to_runtime_error)?;
        assert!((values[0] - (0.8 - 0.1 * (1.8 + 1.6))).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn adamw_descends_a_quadratic() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let var = Var::new(&[3.0f32], &device).map_err(to_runtime_error)?;
        let config = OptimizerConfig::AdamW(AdamWConfig {
            learning_rate: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
        });
        let mut optimizer =
            TrainerOptimizer::new(vec![("w".to_string(), var.clone())], config, None)?;
        for _ in 0..50 {
            let mut grads = quadratic_grads(&var).map_err(to_runtime_error)?;
            optimizer.step(&mut grads)?;
        }
        let value = var.as_tensor().to_vec1::<f32>().map_err(to_runtime_error)?[0];
        assert!(value.abs() < 3.0 * 0.2, "expected descent, got {value}");
        Ok(())
    }

    #[test]
    fn clipping_reports_the_pre_clip_norm() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let var = Var::new(&[3.0f32, 4.0], &device).map_err(to_runtime_error)?;
        let mut optimizer =
            TrainerOptimizer::new(vec![("w".to_string(), var.clone())], sgd(1.0, 0.0), Some(1.0))?;
        let mut grads = quadratic_grads(&var).map_err(to_runtime_error)?;
        let norm = optimizer.step(&mut grads)?;
        // grad = [6, 8], norm 10, clipped to unit norm -> update [0.6, 0.8]
        assert!((norm - 10.0).abs() < 1e-5);
        let values = var.as_tensor().to_vec1::<f32>().map_err(to_runtime_error)?;
        assert!((values[0] - 2.4).abs() < 1e-4);
        assert!((values[1] - 3.2).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn state_round_trips_through_serde() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let var = Var::new(&[1.0f32, 2.0], &device).map_err(to_runtime_error)?;
        let mut optimizer =
            TrainerOptimizer::new(vec![("w".to_string(), var.clone())], sgd(0.1, 0.9), None)?;
        let mut grads = quadratic_grads(&var).map_err(to_runtime_error)?;
        optimizer.step(&mut grads)?;

        let state = optimizer.state()?;
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: OptimizerState = serde_json::from_str(&encoded).unwrap();

        let fresh_var = Var::new(&[1.0f32, 2.0], &device).map_err(to_runtime_error)?;
        let mut restored =
            TrainerOptimizer::new(vec![("w".to_string(), fresh_var)], sgd(0.1, 0.9), None)?;
        restored.load_state(&decoded)?;
        assert_eq!(restored.optimizer_step(), 1);
        Ok(())
    }

    #[test]
    fn integer_parameters_are_rejected() {
        let device = Device::Cpu;
        let var = Var::from_tensor(&Tensor::zeros((2,), DType::U32, &device).unwrap()).unwrap();
        let result = TrainerOptimizer::new(vec![("idx".to_string(), var)], sgd(0.1, 0.0), None);
        assert!(result.is_err());
    }
}
