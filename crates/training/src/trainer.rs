//! Classification training driver for spiking networks.
//!
//! The driver owns the three spiking-specific hooks that sit around an
//! otherwise ordinary supervised loop: inputs are replicated along a leading
//! time axis ([`replicate_time`]), per-step logits are averaged into a firing
//! rate before the loss ([`firing_rate`]), and the network state is cleared
//! after every forward pass so consecutive batches simulate independently.

use std::path::Path;

use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    Device, Tensor,
};
use candle_nn::{VarBuilder, VarMap};
use model::SpikingVgg;
use stepmode::{StepMode, StepModule};
use vision_data::BatchLoader;

use crate::{
    checkpoint::{self, SaveRequest, TrainingProgress},
    config::{to_runtime_error, TrainingConfig, TrainingError},
    data::{self, DatasetBundle},
    logging::{Logger, LoggingSettings},
    loss::CrossEntropyLoss,
    metrics::{topk_correct, EvaluationMetrics, EvaluationSummary, TrainingMetrics},
    optimizer::{OptimizerConfig, TrainerOptimizer},
    scheduler::{self, LRScheduler},
};

/// Replicates a `[N, C, H, W]` batch into a `[T, N, C, H, W]` sequence.
///
/// Static image datasets carry no temporal structure, so every timestep sees
/// the same frame and the network's own dynamics provide the variation.
pub fn replicate_time(images: &Tensor, time_steps: usize) -> Result<Tensor, TrainingError> {
    if time_steps == 0 {
        return Err(TrainingError::runtime("time_steps must be non-zero"));
    }
    images
        .unsqueeze(0)
        .and_then(|x| x.repeat((time_steps, 1, 1, 1, 1)))
        .map_err(to_runtime_error)
}

/// Collapses per-step logits `[T, N, K]` into firing-rate logits `[N, K]`.
pub fn firing_rate(logits_seq: &Tensor) -> Result<Tensor, TrainingError> {
    if logits_seq.dims().len() != 3 {
        return Err(TrainingError::runtime(format!(
            "expected [T, N, num_classes] logits, got shape {:?}",
            logits_seq.dims()
        )));
    }
    logits_seq.mean(0).map_err(to_runtime_error)
}

fn select_device() -> Device {
    let cuda_available = cuda_is_available();
    let metal_available = metal_is_available();
    if cuda_available {
        match Device::cuda_if_available(0) {
            Ok(device) => {
                println!("device: using CUDA GPU #0");
                return device;
            }
            Err(err) => {
                eprintln!("cuda reported available but initialization failed: {err}");
            }
        }
    }
    if metal_available {
        match Device::new_metal(0) {
            Ok(device) => {
                println!("device: using Metal GPU #0");
                return device;
            }
            Err(err) => {
                eprintln!("failed to initialize metal device, falling back to CPU: {err}");
            }
        }
    }
    println!("device: using CPU");
    Device::Cpu
}

pub struct Trainer {
    config: TrainingConfig,
    device: Device,
    datasets: DatasetBundle,
    varmap: VarMap,
    network: SpikingVgg,
    optimizer: TrainerOptimizer,
    scheduler: Box<dyn LRScheduler>,
    loss: CrossEntropyLoss,
    metrics: TrainingMetrics,
    logger: Logger,
    progress: TrainingProgress,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self, TrainingError> {
        config.validate()?;

        let device = select_device();
        if let Err(err) = device.set_seed(config.runtime.seed) {
            eprintln!("warning: failed to seed device RNG: {err}");
        }

        let datasets = data::load(&config.data)?;
        let (channels, _, _) = datasets.train.image_shape();
        let num_classes = datasets.train.classes();
        println!(
            "dataset '{}': {} train / {} test samples, {} classes",
            datasets.name,
            datasets.train.len(),
            datasets.test.len(),
            num_classes
        );

        let model_config = config.model.resolve(channels, num_classes, device.clone())?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, model_config.dtype, &device);
        let mut network = SpikingVgg::new(&model_config, vb).map_err(|err| {
            TrainingError::initialization(format!("failed to build model: {err}"))
        })?;
        network.set_step_mode(StepMode::Multi);

        let mut named_parameters: Vec<(String, candle_core::Var)> = varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named_parameters.sort_by(|a, b| a.0.cmp(&b.0));
        println!(
            "model '{}' ready, optimizer tracks {} tensor(s)",
            config.model.arch,
            named_parameters.len()
        );

        let optimizer_config = OptimizerConfig::try_from(&config.optimizer)?;
        let optimizer = TrainerOptimizer::new(
            named_parameters,
            optimizer_config,
            config.optimizer.clip_grad_norm,
        )?;

        let scheduler = scheduler::build(
            &config.scheduler,
            config.optimizer.learning_rate,
            config.runtime.epochs,
        )?;

        let loss = CrossEntropyLoss::new()
            .with_label_smoothing(config.runtime.label_smoothing)?;

        let logger = Logger::new(LoggingSettings {
            enable_stdout: config.runtime.logging.enable_stdout,
            tensorboard_dir: config.runtime.logging.tensorboard.clone(),
            flush_every_n: config.runtime.logging.tensorboard_flush_every_n,
        })?;

        Ok(Self {
            config,
            device,
            datasets,
            varmap,
            network,
            optimizer,
            scheduler,
            loss,
            metrics: TrainingMetrics::new(),
            logger,
            progress: TrainingProgress::default(),
        })
    }

    /// Restores weights, optimizer and scheduler state from a checkpoint
    /// directory.
    pub fn resume(&mut self, dir: &Path) -> Result<(), TrainingError> {
        let outcome = checkpoint::load_checkpoint(dir, &mut self.varmap)?;
        self.optimizer.load_state(&outcome.optimizer_state)?;
        self.scheduler.load_state(&outcome.scheduler_state);
        self.progress = outcome.manifest.progress;
        println!(
            "resumed from {} at epoch {} (global step {})",
            dir.display(),
            self.progress.epoch,
            self.progress.global_step
        );
        Ok(())
    }

    pub fn progress(&self) -> &TrainingProgress {
        &self.progress
    }

    /// Runs the configured number of epochs, evaluating and checkpointing on
    /// their cadences. Returns the last evaluation summary, if any.
    pub fn run(&mut self) -> Result<Option<EvaluationSummary>, TrainingError> {
        let mut last_summary = None;
        for epoch in self.progress.epoch..self.config.runtime.epochs {
            let lr = self.scheduler.learning_rate();
            self.optimizer.set_learning_rate(lr);
            self.train_one_epoch(epoch)?;
            self.scheduler.step();
            self.progress.epoch = epoch + 1;

            let eval_due = self.config.runtime.eval_every_n_epochs > 0
                && (epoch + 1) % self.config.runtime.eval_every_n_epochs == 0;
            if eval_due {
                let summary = self.evaluate()?;
                self.logger.log_evaluation(epoch + 1, &summary);
                let improved = self
                    .progress
                    .best_top1
                    .map_or(true, |best| summary.top1_accuracy > best);
                if improved {
                    self.progress.best_top1 = Some(summary.top1_accuracy);
                    if let Some(section) = self.config.runtime.checkpoint.clone() {
                        // the best/ directory only ever holds the newest winner
                        checkpoint::save_checkpoint(SaveRequest {
                            base_dir: &section.directory.join("best"),
                            varmap: &self.varmap,
                            optimizer_state: self.optimizer.state()?,
                            scheduler_state: self.scheduler.state(),
                            progress: self.progress.clone(),
                            max_keep: Some(1),
                        })?;
                    }
                }
                last_summary = Some(summary);
            }

            if let Some(section) = self.config.runtime.checkpoint.clone() {
                if (epoch + 1) % section.every_n_epochs == 0 {
                    let dir = checkpoint::save_checkpoint(SaveRequest {
                        base_dir: &section.directory,
                        varmap: &self.varmap,
                        optimizer_state: self.optimizer.state()?,
                        scheduler_state: self.scheduler.state(),
                        progress: self.progress.clone(),
                        max_keep: section.max_keep,
                    })?;
                    println!("checkpoint written to {}", dir.display());
                }
            }
        }
        self.logger.flush();
        Ok(last_summary)
    }

    fn train_one_epoch(&mut self, epoch: usize) -> Result<(), TrainingError> {
        let time_steps = self.config.model.time_steps;
        let log_every = self.config.runtime.log_every_n_steps.max(1);

        let mut loader = BatchLoader::new(
            &self.datasets.train,
            self.datasets.normalize.clone(),
            self.config.data.batch_size,
            self.device.clone(),
            self.config.runtime.seed,
            true,
        );
        if let Some(augment) = self.datasets.augment {
            loader = loader.with_augment(augment);
        }

        for batch in loader.epoch(epoch) {
            let batch = batch.map_err(to_runtime_error)?;
            let batch_size = batch.images.dims()[0];

            let x_seq = replicate_time(&batch.images, time_steps)?;
            let logits_seq = self
                .network
                .forward_t(&x_seq, true)
                .map_err(to_runtime_error)?;
            let logits = firing_rate(&logits_seq)?;
            let loss = self.loss.compute(&logits, &batch.labels)?;

            let mut grads = loss.loss.backward().map_err(to_runtime_error)?;
            let grad_norm = self.optimizer.step(&mut grads)?;
            // end of simulation: membrane potentials and dropout masks go
            self.network.reset();

            self.progress.global_step += 1;
            let snapshot = self
                .metrics
                .record_step(batch_size as u64, loss.value, grad_norm);
            if self.progress.global_step % log_every == 0 {
                self.logger.log_training_step(
                    epoch,
                    self.progress.global_step,
                    self.optimizer.learning_rate(),
                    &snapshot,
                );
            }
        }
        Ok(())
    }

    /// Full pass over the test split with the frozen network.
    pub fn evaluate(&mut self) -> Result<EvaluationSummary, TrainingError> {
        let time_steps = self.config.model.time_steps;
        let top5_depth = self.datasets.test.classes().min(5);
        let loader = BatchLoader::new(
            &self.datasets.test,
            self.datasets.normalize.clone(),
            self.config.data.batch_size,
            self.device.clone(),
            self.config.runtime.seed,
            false,
        );

        let mut metrics = EvaluationMetrics::default();
        for batch in loader.epoch(0) {
            let batch = batch.map_err(to_runtime_error)?;
            let batch_size = batch.images.dims()[0];

            let x_seq = replicate_time(&batch.images, time_steps)?;
            let logits_seq = self
                .network
                .forward_t(&x_seq, false)
                .map_err(to_runtime_error)?;
            self.network.reset();
            let logits = firing_rate(&logits_seq)?;

            let loss = self.loss.compute(&logits, &batch.labels)?;
            let top1 = topk_correct(&logits, &batch.labels, 1)?;
            let top5 = topk_correct(&logits, &batch.labels, top5_depth)?;
            metrics.update(loss.value, batch_size as u64, top1, top5);
        }
        metrics.finalize().ok_or_else(|| {
            TrainingError::runtime("evaluation produced no batches")
        })
    }
}
