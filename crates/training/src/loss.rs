//! Cross entropy over firing-rate logits, with optional label smoothing.

use candle_core::{DType, Tensor, D};
use candle_nn::ops;

use crate::config::{to_runtime_error, TrainingError};

/// Loss value still attached to the autograd graph plus its scalar reading.
#[derive(Debug)]
pub struct LossOutput {
    pub loss: Tensor,
    pub value: f64,
}

/// Cross entropy for `[N, num_classes]` logits and `[N]` class indices.
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    label_smoothing: f64,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self {
            label_smoothing: 0.0,
        }
    }

    pub fn with_label_smoothing(mut self, smoothing: f64) -> Result<Self, TrainingError> {
        if !(0.0..1.0).contains(&smoothing) {
            return Err(TrainingError::initialization(
                "label smoothing must be in [0, 1) for cross entropy",
            ));
        }
        self.label_smoothing = smoothing;
        Ok(self)
    }

    pub fn compute(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutput, TrainingError> {
        let dims = logits.dims();
        let (batch, classes) = match dims {
            [batch, classes] => (*batch, *classes),
            _ => {
                return Err(TrainingError::runtime(format!(
                    "cross entropy expects [N, num_classes] logits, got shape {dims:?}"
                )))
            }
        };
        if batch == 0 || classes == 0 {
            return Err(TrainingError::runtime(
                "cross entropy received an empty logits tensor",
            ));
        }
        if targets.dims() != [batch] {
            return Err(TrainingError::runtime(format!(
                "target shape {:?} does not match logits batch {batch}",
                targets.dims()
            )));
        }

        let log_probs = ops::log_softmax(logits, D::Minus1).map_err(to_runtime_error)?;
        let targets = targets
            .to_device(logits.device())
            .and_then(|t| t.to_dtype(DType::U32))
            .map_err(to_runtime_error)?;

        let picked = log_probs
            .gather(&targets.unsqueeze(1).map_err(to_runtime_error)?, 1)
            .and_then(|t| t.squeeze(1))
            .map_err(to_runtime_error)?;
        let nll = picked.neg().map_err(to_runtime_error)?;

        let loss = if self.label_smoothing > 0.0 {
            // uniform smoothing target: -(1-eps) log p_y - eps mean(log p)
            let uniform = log_probs
                .mean(D::Minus1)
                .and_then(|t| t.neg())
                .map_err(to_runtime_error)?;
            let hard = (nll * (1.0 - self.label_smoothing)).map_err(to_runtime_error)?;
            let soft = (uniform * self.label_smoothing).map_err(to_runtime_error)?;
            (hard + soft).map_err(to_runtime_error)?
        } else {
            nll
        };

        let loss = loss.mean_all().map_err(to_runtime_error)?;
        let value = loss
            .to_dtype(DType::F32)
            .and_then(|t| t.to_vec0::<f32>())
            .map_err(to_runtime_error)? as f64;
        Ok(LossOutput { loss, value })
    }
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn matches_manual_negative_log_likelihood() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(
            vec![2.0f32, 0.5, 0.1, 0.0, 3.0, 0.0],
            (2, 3),
            &device,
        )
        .map_err(to_runtime_error)?;
        let targets = Tensor::from_vec(vec![0u32, 1], (2,), &device).map_err(to_runtime_error)?;

        let output = CrossEntropyLoss::new().compute(&logits, &targets)?;

        let rows = logits.to_vec2::<f32>().map_err(to_runtime_error)?;
        let mut expected = 0.0f64;
        for (row, &target) in rows.iter().zip(&[0usize, 1]) {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let denom: f32 = row.iter().map(|v| (v - max).exp()).sum();
            expected += -((row[target] - max) as f64 - (denom.ln()) as f64);
        }
        expected /= 2.0;
        assert!((output.value - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn label_smoothing_raises_confident_loss() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![10.0f32, -10.0, 10.0, -10.0], (2, 2), &device)
            .map_err(to_runtime_error)?;
        let targets = Tensor::from_vec(vec![0u32, 0], (2,), &device).map_err(to_runtime_error)?;

        let plain = CrossEntropyLoss::new().compute(&logits, &targets)?;
        let smoothed = CrossEntropyLoss::new()
            .with_label_smoothing(0.1)?
            .compute(&logits, &targets)?;
        assert!(smoothed.value > plain.value);
        Ok(())
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        let targets = Tensor::zeros((3,), DType::U32, &device).unwrap();
        assert!(CrossEntropyLoss::new().compute(&logits, &targets).is_err());
        assert!(CrossEntropyLoss::new().with_label_smoothing(1.0).is_err());
    }
}
