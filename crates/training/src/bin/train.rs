use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use training::{Trainer, TrainingConfig};

/// Train or evaluate a spiking VGG classifier.
#[derive(Debug, Parser)]
#[command(name = "train", about = "Spiking network classification driver")]
struct Args {
    /// Path to the training configuration (TOML or JSON).
    config: PathBuf,

    /// Override the simulation length `T`.
    #[arg(long)]
    time_steps: Option<usize>,

    /// Override the number of training epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the mini-batch size.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Resume from a checkpoint directory.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Skip training and run a single evaluation pass.
    #[arg(long)]
    eval_only: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TrainingConfig::from_path(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if let Some(time_steps) = args.time_steps {
        config.model.time_steps = time_steps;
    }
    if let Some(epochs) = args.epochs {
        config.runtime.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    config.validate()?;

    let mut trainer = Trainer::new(config).context("initializing trainer")?;
    if let Some(resume) = &args.resume {
        trainer
            .resume(resume)
            .with_context(|| format!("resuming from {}", resume.display()))?;
    }

    if args.eval_only {
        let summary = trainer.evaluate().context("evaluation pass")?;
        println!(
            "eval loss={:.4} top1={:.2}% top5={:.2}% samples={}",
            summary.average_loss,
            summary.top1_accuracy * 100.0,
            summary.top5_accuracy * 100.0,
            summary.samples
        );
    } else {
        trainer.run().context("training run")?;
    }
    Ok(())
}
