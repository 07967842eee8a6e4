pub mod checkpoint;
pub mod config;
pub mod data;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use config::{TrainingConfig, TrainingError};
pub use loss::{CrossEntropyLoss, LossOutput};
pub use metrics::{EvaluationMetrics, EvaluationSummary, TrainingMetrics};
pub use optimizer::{OptimizerConfig, TrainerOptimizer};
pub use scheduler::LRScheduler;
pub use trainer::Trainer;
