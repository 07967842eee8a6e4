//! Stdout and TensorBoard logging.
//!
//! The TensorBoard writer emits the TFRecord framing directly: each protobuf
//! `Event` is prefixed by its little-endian length and a masked CRC32 of that
//! length, and followed by a masked CRC32 of the payload. Scalar-only
//! summaries keep the file format surface minimal.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::BytesMut;
use crc32fast::Hasher as Crc32;
use prost::Message;

use crate::{
    config::TrainingError,
    metrics::{EvaluationSummary, StepSnapshot},
};

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub enable_stdout: bool,
    pub tensorboard_dir: Option<PathBuf>,
    pub flush_every_n: usize,
}

pub struct Logger {
    settings: LoggingSettings,
    tensorboard: Option<EventWriter>,
}

impl Logger {
    pub fn new(settings: LoggingSettings) -> Result<Self, TrainingError> {
        let tensorboard = match settings.tensorboard_dir.as_ref() {
            Some(dir) => Some(EventWriter::create(dir, settings.flush_every_n)?),
            None => None,
        };
        Ok(Self {
            settings,
            tensorboard,
        })
    }

    pub fn log_training_step(
        &mut self,
        epoch: usize,
        global_step: usize,
        lr: f64,
        snapshot: &StepSnapshot,
    ) {
        if self.settings.enable_stdout {
            println!(
                "train epoch={} step={} loss={:.4} img/s={:.1} grad_norm={:.3} lr={:.5e}",
                epoch,
                global_step,
                snapshot.step_loss,
                snapshot.step_images_per_sec,
                snapshot.raw_grad_norm,
                lr
            );
        }
        if let Some(writer) = self.tensorboard.as_mut() {
            let step = global_step as i64;
            let _ = writer.write_scalar("train/loss", step, snapshot.step_loss);
            let _ = writer.write_scalar("train/loss_ema", step, snapshot.loss);
            let _ = writer.write_scalar("train/images_per_sec", step, snapshot.images_per_sec);
            let _ = writer.write_scalar("train/grad_norm", step, snapshot.raw_grad_norm);
            let _ = writer.write_scalar("train/learning_rate", step, lr);
        }
    }

    pub fn log_evaluation(&mut self, epoch: usize, summary: &EvaluationSummary) {
        if self.settings.enable_stdout {
            println!(
                "eval epoch={} loss={:.4} top1={:.2}% top5={:.2}% samples={}",
                epoch,
                summary.average_loss,
                summary.top1_accuracy * 100.0,
                summary.top5_accuracy * 100.0,
                summary.samples
            );
        }
        if let Some(writer) = self.tensorboard.as_mut() {
            let step = epoch as i64;
            let _ = writer.write_scalar("test/loss", step, summary.average_loss);
            let _ = writer.write_scalar("test/top1", step, summary.top1_accuracy);
            let _ = writer.write_scalar("test/top5", step, summary.top5_accuracy);
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.tensorboard.as_mut() {
            let _ = writer.flush();
        }
    }
}

struct EventWriter {
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl EventWriter {
    fn create(dir: &Path, flush_every: usize) -> Result<Self, TrainingError> {
        fs::create_dir_all(dir).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard directory {}: {err}",
                dir.display()
            ))
        })?;
        let filename = format!(
            "events.out.tfevents.{}.{}",
            unix_timestamp_secs(),
            hostname()
        );
        let path = dir.join(filename);
        let file = File::create(&path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<(), TrainingError> {
        let event = Event {
            wall_time: wall_time_secs(),
            step,
            summary: Some(Summary {
                value: vec![summary::Value {
                    tag: tag.to_string(),
                    simple_value: Some(value as f32),
                }],
            }),
        };
        self.write_event(&event)
    }

    fn write_event(&mut self, event: &Event) -> Result<(), TrainingError> {
        let mut buffer = BytesMut::with_capacity(128);
        event.encode(&mut buffer).map_err(|err| {
            TrainingError::runtime(format!("failed to encode tensorboard event: {err}"))
        })?;
        let payload = buffer.freeze();

        let len_bytes = (payload.len() as u64).to_le_bytes();
        let len_crc = masked_crc32(&len_bytes).to_le_bytes();
        let payload_crc = masked_crc32(payload.as_ref()).to_le_bytes();

        self.writer
            .write_all(&len_bytes)
            .and_then(|_| self.writer.write_all(&len_crc))
            .and_then(|_| self.writer.write_all(&payload))
            .and_then(|_| self.writer.write_all(&payload_crc))
            .map_err(|err| {
                TrainingError::runtime(format!("failed to write tensorboard event: {err}"))
            })?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainingError> {
        self.writer.flush().map_err(|err| {
            TrainingError::runtime(format!("failed to flush tensorboard file: {err}"))
        })?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn wall_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(message, optional, tag = "3")]
    summary: Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<summary::Value>,
}

mod summary {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "7")]
        pub tag: String,
        #[prost(float, optional, tag = "2")]
        pub simple_value: Option<f32>,
    }
}
