//! Training and evaluation metrics.

use std::time::{Duration, Instant};

use candle_core::Tensor;

use crate::config::{to_runtime_error, TrainingError};

/// Counts predictions whose top-`k` logits contain the target class.
pub fn topk_correct(logits: &Tensor, targets: &Tensor, k: usize) -> Result<u64, TrainingError> {
    let rows = logits.to_vec2::<f32>().map_err(to_runtime_error)?;
    let labels = targets.to_vec1::<u32>().map_err(to_runtime_error)?;
    if rows.len() != labels.len() {
        return Err(TrainingError::runtime(format!(
            "top-k metrics: {} logit rows vs {} labels",
            rows.len(),
            labels.len()
        )));
    }
    let mut correct = 0u64;
    for (row, &label) in rows.iter().zip(labels.iter()) {
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
        if order.iter().take(k).any(|&index| index == label as usize) {
            correct += 1;
        }
    }
    Ok(correct)
}

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let value = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(value);
        value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Rolling view of the training loop: EMA loss, throughput, gradient norm.
#[derive(Debug)]
pub struct TrainingMetrics {
    step_timer: Instant,
    start_time: Instant,
    images_processed: u64,
    loss_ema: ExponentialMovingAverage,
    throughput_ema: ExponentialMovingAverage,
    grad_norm_ema: ExponentialMovingAverage,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            step_timer: now,
            start_time: now,
            images_processed: 0,
            loss_ema: ExponentialMovingAverage::new(0.1),
            throughput_ema: ExponentialMovingAverage::new(0.1),
            grad_norm_ema: ExponentialMovingAverage::new(0.1),
        }
    }

    pub fn record_step(&mut self, images: u64, loss: f64, grad_norm: f64) -> StepSnapshot {
        let now = Instant::now();
        let step_duration = now.duration_since(self.step_timer);
        self.step_timer = now;

        self.images_processed = self.images_processed.saturating_add(images);
        let step_images_per_sec = if step_duration > Duration::ZERO {
            images as f64 / step_duration.as_secs_f64()
        } else {
            0.0
        };

        StepSnapshot {
            loss: self.loss_ema.update(loss),
            step_loss: loss,
            images,
            step_images_per_sec,
            images_per_sec: self.throughput_ema.update(step_images_per_sec),
            grad_norm: self.grad_norm_ema.update(grad_norm),
            raw_grad_norm: grad_norm,
            total_images: self.images_processed,
            wall_time: now.duration_since(self.start_time),
        }
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StepSnapshot {
    pub loss: f64,
    pub step_loss: f64,
    pub images: u64,
    pub step_images_per_sec: f64,
    pub images_per_sec: f64,
    pub grad_norm: f64,
    pub raw_grad_norm: f64,
    pub total_images: u64,
    pub wall_time: Duration,
}

/// Accumulator for evaluation passes.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    loss_sum: f64,
    samples: u64,
    top1_correct: u64,
    top5_correct: u64,
}

impl EvaluationMetrics {
    pub fn update(&mut self, loss: f64, samples: u64, top1: u64, top5: u64) {
        self.loss_sum += loss * samples as f64;
        self.samples += samples;
        self.top1_correct += top1;
        self.top5_correct += top5;
    }

    pub fn finalize(self) -> Option<EvaluationSummary> {
        if self.samples == 0 {
            return None;
        }
        Some(EvaluationSummary {
            average_loss: self.loss_sum / self.samples as f64,
            top1_accuracy: self.top1_correct as f64 / self.samples as f64,
            top5_accuracy: self.top5_correct as f64 / self.samples as f64,
            samples: self.samples,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    pub average_loss: f64,
    pub top1_accuracy: f64,
    pub top5_accuracy: f64,
    pub samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn topk_counts_hits_at_both_depths() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(
            vec![
                0.1f32, 0.9, 0.0, 0.0, 0.0, // target 0 is rank 2
                0.9, 0.1, 0.0, 0.0, 0.0, // target 0 is rank 1
            ],
            (2, 5),
            &device,
        )
        .map_err(to_runtime_error)?;
        let targets =
            Tensor::from_vec(vec![0u32, 0], (2,), &device).map_err(to_runtime_error)?;
        assert_eq!(topk_correct(&logits, &targets, 1)?, 1);
        assert_eq!(topk_correct(&logits, &targets, 2)?, 2);
        Ok(())
    }

    #[test]
    fn ema_interpolates_towards_new_samples() {
        let mut ema = ExponentialMovingAverage::new(0.5);
        assert_eq!(ema.update(4.0), 4.0);
        assert_eq!(ema.update(0.0), 2.0);
        assert_eq!(ema.value(), Some(2.0));
    }

    #[test]
    fn evaluation_summary_averages_by_sample_count() {
        let mut metrics = EvaluationMetrics::default();
        metrics.update(1.0, 10, 5, 9);
        metrics.update(3.0, 10, 7, 10);
        let summary = metrics.finalize().unwrap();
        assert!((summary.average_loss - 2.0).abs() < 1e-9);
        assert!((summary.top1_accuracy - 0.6).abs() < 1e-9);
        assert!((summary.top5_accuracy - 0.95).abs() < 1e-9);
        assert!(EvaluationMetrics::default().finalize().is_none());
    }
}
