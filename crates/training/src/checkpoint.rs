//! Checkpoint layout and integrity.
//!
//! Each checkpoint is a directory `epoch_{NNNN}` holding the model weights
//! (`model.safetensors`, straight from the `VarMap`), optimizer and scheduler
//! state as JSON, and a manifest recording a SHA-256 digest and byte count
//! per file so a resume fails loudly on corruption.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::TrainingError,
    optimizer::OptimizerState,
    scheduler::SchedulerState,
};

pub const CHECKPOINT_VERSION: u32 = 1;
const MODEL_FILENAME: &str = "model.safetensors";
const OPTIMIZER_FILENAME: &str = "optimizer.json";
const SCHEDULER_FILENAME: &str = "scheduler.json";
const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Training position stored alongside the weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Epochs fully completed.
    pub epoch: usize,
    pub global_step: usize,
    pub best_top1: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub version: u32,
    pub created_unix_timestamp: u64,
    pub model: FileRecord,
    pub optimizer: FileRecord,
    pub scheduler: FileRecord,
    pub progress: TrainingProgress,
}

pub struct SaveRequest<'a> {
    pub base_dir: &'a Path,
    pub varmap: &'a VarMap,
    pub optimizer_state: OptimizerState,
    pub scheduler_state: SchedulerState,
    pub progress: TrainingProgress,
    pub max_keep: Option<usize>,
}

pub struct LoadOutcome {
    pub manifest: CheckpointManifest,
    pub optimizer_state: OptimizerState,
    pub scheduler_state: SchedulerState,
}

fn file_record(path: &Path) -> Result<FileRecord, TrainingError> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(FileRecord {
        filename: path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string(),
        sha256: hex::encode(digest),
        bytes: bytes.len() as u64,
    })
}

fn verify_record(dir: &Path, record: &FileRecord) -> Result<PathBuf, TrainingError> {
    let path = dir.join(&record.filename);
    let actual = file_record(&path)?;
    if actual.sha256 != record.sha256 || actual.bytes != record.bytes {
        return Err(TrainingError::initialization(format!(
            "checkpoint file {} failed integrity verification",
            path.display()
        )));
    }
    Ok(path)
}

/// Writes a checkpoint directory and prunes old ones past `max_keep`.
pub fn save_checkpoint(request: SaveRequest<'_>) -> Result<PathBuf, TrainingError> {
    fs::create_dir_all(request.base_dir)?;
    let dir = request
        .base_dir
        .join(format!("epoch_{:04}", request.progress.epoch));
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;

    let model_path = dir.join(MODEL_FILENAME);
    request
        .varmap
        .save(&model_path)
        .map_err(|err| TrainingError::runtime(format!("failed to save weights: {err}")))?;

    let optimizer_path = dir.join(OPTIMIZER_FILENAME);
    fs::write(
        &optimizer_path,
        serde_json::to_vec_pretty(&request.optimizer_state)?,
    )?;
    let scheduler_path = dir.join(SCHEDULER_FILENAME);
    fs::write(
        &scheduler_path,
        serde_json::to_vec_pretty(&request.scheduler_state)?,
    )?;

    let manifest = CheckpointManifest {
        version: CHECKPOINT_VERSION,
        created_unix_timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        model: file_record(&model_path)?,
        optimizer: file_record(&optimizer_path)?,
        scheduler: file_record(&scheduler_path)?,
        progress: request.progress,
    };
    fs::write(
        dir.join(MANIFEST_FILENAME),
        serde_json::to_vec_pretty(&manifest)?,
    )?;

    if let Some(max_keep) = request.max_keep {
        prune_checkpoints(request.base_dir, max_keep)?;
    }
    Ok(dir)
}

/// Restores weights into `varmap` and returns the saved states.
pub fn load_checkpoint(dir: &Path, varmap: &mut VarMap) -> Result<LoadOutcome, TrainingError> {
    let manifest_path = dir.join(MANIFEST_FILENAME);
    if !manifest_path.exists() {
        return Err(TrainingError::initialization(format!(
            "no checkpoint manifest at {}",
            manifest_path.display()
        )));
    }
    let manifest: CheckpointManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
    if manifest.version != CHECKPOINT_VERSION {
        return Err(TrainingError::initialization(format!(
            "unsupported checkpoint version {}",
            manifest.version
        )));
    }

    let model_path = verify_record(dir, &manifest.model)?;
    let optimizer_path = verify_record(dir, &manifest.optimizer)?;
    let scheduler_path = verify_record(dir, &manifest.scheduler)?;

    varmap
        .load(&model_path)
        .map_err(|err| TrainingError::initialization(format!("failed to load weights: {err}")))?;
    let optimizer_state: OptimizerState = serde_json::from_slice(&fs::read(optimizer_path)?)?;
    let scheduler_state: SchedulerState = serde_json::from_slice(&fs::read(scheduler_path)?)?;

    Ok(LoadOutcome {
        manifest,
        optimizer_state,
        scheduler_state,
    })
}

/// Most recent checkpoint directory under `base_dir`, by epoch number.
pub fn latest_checkpoint(base_dir: &Path) -> Option<PathBuf> {
    let mut checkpoints = list_checkpoints(base_dir);
    checkpoints.pop()
}

fn list_checkpoints(base_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(base_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("epoch_"))
        })
        .collect();
    dirs.sort();
    dirs
}

fn prune_checkpoints(base_dir: &Path, max_keep: usize) -> Result<(), TrainingError> {
    let checkpoints = list_checkpoints(base_dir);
    if checkpoints.len() <= max_keep {
        return Ok(());
    }
    for stale in &checkpoints[..checkpoints.len() - max_keep] {
        fs::remove_dir_all(stale)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{OptimizerConfig, SgdConfig, TrainerOptimizer};
    use crate::scheduler::SchedulerState;
    use candle_core::{DType, Device, Var};
    use candle_nn::VarBuilder;

    fn varmap_with_weight(device: &Device) -> (VarMap, Var) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let _ = vb
            .get_with_hints(4, "w", candle_nn::init::Init::Const(1.5))
            .unwrap();
        let var = varmap.all_vars().remove(0);
        (varmap, var)
    }

    fn optimizer_for(var: Var) -> TrainerOptimizer {
        TrainerOptimizer::new(
            vec![("w".to_string(), var)],
            OptimizerConfig::Sgd(SgdConfig {
                learning_rate: 0.1,
                momentum: 0.9,
                weight_decay: 0.0,
            }),
            None,
        )
        .unwrap()
    }

    #[test]
    fn save_and_load_round_trip() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let base = tempfile::tempdir()?;
        let (varmap, var) = varmap_with_weight(&device);
        let optimizer = optimizer_for(var.clone());

        let dir = save_checkpoint(SaveRequest {
            base_dir: base.path(),
            varmap: &varmap,
            optimizer_state: optimizer.state()?,
            scheduler_state: SchedulerState {
                epochs_taken: 3,
                learning_rate: 0.05,
            },
            progress: TrainingProgress {
                epoch: 3,
                global_step: 120,
                best_top1: Some(0.42),
            },
            max_keep: None,
        })?;
        assert!(dir.ends_with("epoch_0003"));

        // perturb the live weights, then restore
        var.set(&candle_core::Tensor::zeros((4,), DType::F32, &device).unwrap())
            .unwrap();
        let mut varmap = varmap;
        let outcome = load_checkpoint(&dir, &mut varmap)?;
        assert_eq!(outcome.manifest.progress.global_step, 120);
        assert_eq!(outcome.scheduler_state.epochs_taken, 3);
        let restored = var.as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(restored, vec![1.5; 4]);
        Ok(())
    }

    #[test]
    fn corruption_is_detected() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let base = tempfile::tempdir()?;
        let (varmap, var) = varmap_with_weight(&device);
        let optimizer = optimizer_for(var);

        let dir = save_checkpoint(SaveRequest {
            base_dir: base.path(),
            varmap: &varmap,
            optimizer_state: optimizer.state()?,
            scheduler_state: SchedulerState {
                epochs_taken: 0,
                learning_rate: 0.1,
            },
            progress: TrainingProgress::default(),
            max_keep: None,
        })?;

        fs::write(dir.join(OPTIMIZER_FILENAME), b"{}")?;
        let mut varmap = varmap;
        assert!(load_checkpoint(&dir, &mut varmap).is_err());
        Ok(())
    }

    #[test]
    fn pruning_keeps_the_newest_directories() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let base = tempfile::tempdir()?;
        let (varmap, var) = varmap_with_weight(&device);
        let optimizer = optimizer_for(var);

        for epoch in 0..4 {
            save_checkpoint(SaveRequest {
                base_dir: base.path(),
                varmap: &varmap,
                optimizer_state: optimizer.state()?,
                scheduler_state: SchedulerState {
                    epochs_taken: epoch,
                    learning_rate: 0.1,
                },
                progress: TrainingProgress {
                    epoch,
                    global_step: epoch * 10,
                    best_top1: None,
                },
                max_keep: Some(2),
            })?;
        }

        let kept = list_checkpoints(base.path());
        assert_eq!(kept.len(), 2);
        assert!(latest_checkpoint(base.path())
            .unwrap()
            .ends_with("epoch_0003"));
        Ok(())
    }
}
