//! Per-epoch learning-rate schedules.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::{SchedulerKind, SchedulerSection, TrainingError};

/// Epoch-granular learning-rate schedule.
pub trait LRScheduler: Send {
    /// Learning rate to apply for `epoch` (0-based).
    fn learning_rate_at(&self, epoch: usize) -> f64;

    /// Advances the internal epoch counter and returns the new rate.
    fn step(&mut self) -> f64;

    fn learning_rate(&self) -> f64;

    fn state(&self) -> SchedulerState;

    fn load_state(&mut self, state: &SchedulerState);
}

/// Serializable scheduler position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerState {
    pub epochs_taken: usize,
    pub learning_rate: f64,
}

/// Builds the configured scheduler.
pub fn build(
    section: &SchedulerSection,
    base_lr: f64,
    total_epochs: usize,
) -> Result<Box<dyn LRScheduler>, TrainingError> {
    if total_epochs == 0 {
        return Err(TrainingError::initialization(
            "scheduler requires total_epochs greater than zero",
        ));
    }
    if section.warmup_epochs >= total_epochs && section.warmup_epochs > 0 {
        return Err(TrainingError::initialization(
            "warmup_epochs must be smaller than total_epochs",
        ));
    }
    let scheduler: Box<dyn LRScheduler> = match section.strategy {
        SchedulerKind::Constant => Box::new(WarmupSchedule::new(
            base_lr,
            section.warmup_epochs,
            ConstantTail,
        )),
        SchedulerKind::Cosine => Box::new(WarmupSchedule::new(
            base_lr,
            section.warmup_epochs,
            CosineTail {
                min_lr: section.min_lr,
                decay_epochs: total_epochs - section.warmup_epochs,
            },
        )),
        SchedulerKind::Step => Box::new(WarmupSchedule::new(
            base_lr,
            section.warmup_epochs,
            StepTail {
                step_size: section.step_size,
                gamma: section.gamma,
            },
        )),
    };
    Ok(scheduler)
}

trait TailSchedule: Send {
    /// Rate multiplier for `epoch` epochs past the warmup boundary.
    fn rate(&self, base_lr: f64, epoch: usize) -> f64;
}

struct ConstantTail;

impl TailSchedule for ConstantTail {
    fn rate(&self, base_lr: f64, _epoch: usize) -> f64 {
        base_lr
    }
}

struct CosineTail {
    min_lr: f64,
    decay_epochs: usize,
}

impl TailSchedule for CosineTail {
    fn rate(&self, base_lr: f64, epoch: usize) -> f64 {
        if self.decay_epochs == 0 {
            return self.min_lr;
        }
        let progress = (epoch as f64 / self.decay_epochs as f64).clamp(0.0, 1.0);
        self.min_lr + 0.5 * (base_lr - self.min_lr) * (1.0 + (PI * progress).cos())
    }
}

struct StepTail {
    step_size: usize,
    gamma: f64,
}

impl TailSchedule for StepTail {
    fn rate(&self, base_lr: f64, epoch: usize) -> f64 {
        base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

struct WarmupSchedule<T: TailSchedule> {
    base_lr: f64,
    warmup_epochs: usize,
    tail: T,
    epochs_taken: usize,
    learning_rate: f64,
}

impl<T: TailSchedule> WarmupSchedule<T> {
    fn new(base_lr: f64, warmup_epochs: usize, tail: T) -> Self {
        let mut scheduler = Self {
            base_lr,
            warmup_epochs,
            tail,
            epochs_taken: 0,
            learning_rate: base_lr,
        };
        scheduler.learning_rate = scheduler.learning_rate_at(0);
        scheduler
    }
}

impl<T: TailSchedule> LRScheduler for WarmupSchedule<T> {
    fn learning_rate_at(&self, epoch: usize) -> f64 {
        if epoch < self.warmup_epochs {
            // linear ramp from base_lr / (warmup + 1)
            self.base_lr * (epoch + 1) as f64 / (self.warmup_epochs + 1) as f64
        } else {
            self.tail.rate(self.base_lr, epoch - self.warmup_epochs)
        }
    }

    fn step(&mut self) -> f64 {
        self.epochs_taken += 1;
        self.learning_rate = self.learning_rate_at(self.epochs_taken);
        self.learning_rate
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn state(&self) -> SchedulerState {
        SchedulerState {
            epochs_taken: self.epochs_taken,
            learning_rate: self.learning_rate,
        }
    }

    fn load_state(&mut self, state: &SchedulerState) {
        self.epochs_taken = state.epochs_taken;
        self.learning_rate = self.learning_rate_at(self.epochs_taken);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(strategy: SchedulerKind) -> SchedulerSection {
        SchedulerSection {
            strategy,
            warmup_epochs: 0,
            min_lr: 0.0,
            step_size: 30,
            gamma: 0.1,
        }
    }

    #[test]
    fn cosine_anneals_from_base_to_min() -> Result<(), TrainingError> {
        let mut cfg = section(SchedulerKind::Cosine);
        cfg.min_lr = 0.001;
        let scheduler = build(&cfg, 0.1, 100)?;
        assert!((scheduler.learning_rate_at(0) - 0.1).abs() < 1e-9);
        assert!((scheduler.learning_rate_at(100) - 0.001).abs() < 1e-9);
        let mid = scheduler.learning_rate_at(50);
        assert!((mid - (0.001 + 0.5 * 0.099)).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn warmup_ramps_linearly_before_the_tail() -> Result<(), TrainingError> {
        let mut cfg = section(SchedulerKind::Constant);
        cfg.warmup_epochs = 4;
        let mut scheduler = build(&cfg, 0.5, 10)?;
        assert!((scheduler.learning_rate() - 0.1).abs() < 1e-9);
        let mut rates = vec![scheduler.learning_rate()];
        for _ in 0..4 {
            rates.push(scheduler.step());
        }
        assert!(rates.windows(2).all(|pair| pair[1] > pair[0] - 1e-12));
        assert!((rates[4] - 0.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn step_decay_drops_by_gamma() -> Result<(), TrainingError> {
        let cfg = section(SchedulerKind::Step);
        let scheduler = build(&cfg, 1.0, 100)?;
        assert!((scheduler.learning_rate_at(29) - 1.0).abs() < 1e-9);
        assert!((scheduler.learning_rate_at(30) - 0.1).abs() < 1e-9);
        assert!((scheduler.learning_rate_at(60) - 0.01).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn state_restores_the_epoch_position() -> Result<(), TrainingError> {
        let cfg = section(SchedulerKind::Step);
        let mut scheduler = build(&cfg, 1.0, 100)?;
        for _ in 0..31 {
            scheduler.step();
        }
        let state = scheduler.state();

        let mut restored = build(&cfg, 1.0, 100)?;
        restored.load_state(&state);
        assert!((restored.learning_rate() - scheduler.learning_rate()).abs() < 1e-12);
        Ok(())
    }
}
