//! Checkpoint Management - weight files, training state, rotation and export hook

use anyhow::{Context, Result};
use candle_nn::VarMap;
use fs2::FileExt;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use summa_engine::Seq2SeqConfig;
use tracing::{info, warn};

use crate::export::write_model_dir;
use crate::tokenizer::SummaryTokenizer;

pub const STATE_FILE: &str = "training_state.json";
pub const LATEST_CHECKPOINT: &str = "model-latest.safetensors";
pub const BEST_CHECKPOINT: &str = "model-best.safetensors";
pub const EXPORT_DIR: &str = "best_tfmr";
pub const KEEP_CHECKPOINTS: usize = 3;

/// Training state for serialization
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct TrainingState {
    /// Optimizer updates applied so far
    pub step: usize,
    /// Batches processed (scheduler position)
    pub batches: usize,
    pub epoch: usize,
    pub loss: f32,
    pub val_loss: Option<f32>,
    pub date: String,
    pub checkpoint: String,
}

/// Writes `varmap` to `path` while holding an exclusive `<path>.lock`.
pub fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let lock_path = PathBuf::from(format!("{}.lock", path.display()));
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    let _ = std::fs::remove_file(&lock_path);
    saved.with_context(|| format!("Failed to save weights to {:?}", path))
}

/// Saves `<dir>/<name>.json` and refreshes the generic `training_state.json`.
pub fn save_training_state(dir: &Path, name: &str, state: &TrainingState) -> Result<()> {
    let path = dir.join(format!("{}.json", name));
    let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, state)?;

    let generic = dir.join(STATE_FILE);
    let file = File::create(&generic).with_context(|| format!("Failed to create {:?}", generic))?;
    serde_json::to_writer_pretty(file, state)?;
    Ok(())
}

/// Reads `<dir>/training_state.json`, if present and well-formed.
pub fn load_training_state(dir: &Path) -> Option<TrainingState> {
    let path = dir.join(STATE_FILE);
    let file = File::open(&path).ok()?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("⚠️ Ignoring unreadable {:?}: {}", path, e);
            None
        }
    }
}

/// Keeps only the newest `keep` per-epoch checkpoint files.
pub struct CheckpointRotation {
    keep: usize,
    history: VecDeque<PathBuf>,
}

impl CheckpointRotation {
    pub fn new(keep: usize) -> Self {
        Self {
            keep: keep.max(1),
            history: VecDeque::new(),
        }
    }

    /// Records `path` and deletes whatever falls out of the window.
    pub fn push(&mut self, path: PathBuf) -> Vec<PathBuf> {
        self.history.push_back(path);
        let mut removed = Vec::new();
        while self.history.len() > self.keep {
            if let Some(old) = self.history.pop_front() {
                if old.exists() {
                    if let Err(e) = std::fs::remove_file(&old) {
                        warn!("⚠️ Failed to remove old checkpoint {:?}: {}", old, e);
                    }
                    let _ = std::fs::remove_file(old.with_extension("json"));
                }
                removed.push(old);
            }
        }
        removed
    }
}

/// Exports model + tokenizer to `<weights_dir>/best_tfmr` on every checkpoint,
/// when enabled and running as the primary writer.
pub struct CheckpointHook {
    export_enabled: bool,
    is_primary_writer: bool,
    export_dir: PathBuf,
}

impl CheckpointHook {
    pub fn new(export_enabled: bool, is_primary_writer: bool, weights_dir: &Path) -> Self {
        Self {
            export_enabled,
            is_primary_writer,
            export_dir: weights_dir.join(EXPORT_DIR),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Returns the export directory when something was written.
    pub fn on_save_checkpoint(
        &self,
        varmap: &VarMap,
        model_config: &Seq2SeqConfig,
        tokenizer: &SummaryTokenizer,
    ) -> Result<Option<PathBuf>> {
        if !(self.export_enabled && self.is_primary_writer) {
            return Ok(None);
        }
        write_model_dir(&self.export_dir, varmap, model_config, tokenizer)?;
        info!("📦 Exported model and tokenizer to {:?}", self.export_dir);
        Ok(Some(self.export_dir.clone()))
    }
}
