//! Summarizer Configuration
//!
//! One immutable value built from the command line and passed explicitly to
//! every stage. Serialized as `hparams.json` next to the training outputs.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::train::schedule::ScheduleKind;

pub const HPARAMS_FILE: &str = "hparams.json";

#[derive(Args, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SummarizerConfig {
    /// Tokenizer source: local directory, tokenizer.json file, or hub model id
    #[arg(long, default_value = "bert-base-uncased")]
    pub model_name_or_path: String,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    /// Validation batch size (defaults to --batch-size)
    #[arg(long)]
    pub val_batch_size: Option<usize>,

    /// Test batch size (defaults to --batch-size)
    #[arg(long)]
    pub test_batch_size: Option<usize>,

    /// Threads used to encode dataset splits (0 = current thread)
    #[arg(long, default_value_t = 3)]
    pub dataloader_num_workers: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 1e-8)]
    pub adam_epsilon: f64,

    #[arg(long, default_value_t = 0)]
    pub warmup_steps: usize,

    #[arg(long, value_enum, default_value_t = ScheduleKind::None)]
    pub use_scheduler: ScheduleKind,

    #[arg(long, default_value_t = 1e-2)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 1)]
    pub accumulate_grad_batches: usize,

    #[arg(long, default_value_t = 3)]
    pub max_epochs: usize,

    /// Cap on optimizer updates; overrides the epoch-derived total
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Fraction of every split to use (0 = all of it)
    #[arg(long, default_value_t = 0.0)]
    pub overfit_pct: f64,

    #[arg(long, default_value = "cnn_dailymail")]
    pub dataset: String,

    #[arg(long, default_value = "3.0.0")]
    pub dataset_version: String,

    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    #[arg(long, default_value = "article")]
    pub data_example_column: String,

    #[arg(long, default_value = "highlights")]
    pub data_summarized_column: String,

    /// Probability of keeping one example per test batch for inspection
    #[arg(long, default_value_t = 0.01)]
    pub save_percentage: f64,

    /// Export model + tokenizer to <weights_save_path>/best_tfmr on every checkpoint
    #[arg(long, action)]
    pub save_hg_transformer: bool,

    #[arg(long, default_value = ".")]
    pub default_root_dir: PathBuf,

    /// Checkpoint directory (defaults to <default_root_dir>/checkpoints)
    #[arg(long)]
    pub weights_save_path: Option<PathBuf>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Fixed width of every encoded source and target sequence
    #[arg(long, default_value_t = 512)]
    pub max_seq_len: usize,

    #[arg(long, default_value_t = 256)]
    pub hidden_dim: usize,

    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, action)]
    pub cpu: bool,
}

impl SummarizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_seq_len < 2 {
            anyhow::bail!(
                "max_seq_len must be at least 2 to hold the summary markers (got {})",
                self.max_seq_len
            );
        }
        if self.batch_size == 0 || self.val_batch_size() == 0 || self.test_batch_size() == 0 {
            anyhow::bail!("Batch sizes must be positive");
        }
        if self.accumulate_grad_batches == 0 {
            anyhow::bail!("accumulate_grad_batches must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.save_percentage) {
            anyhow::bail!(
                "save_percentage must lie in [0, 1] (got {})",
                self.save_percentage
            );
        }
        if !(0.0..=1.0).contains(&self.overfit_pct) {
            anyhow::bail!("overfit_pct must lie in [0, 1] (got {})", self.overfit_pct);
        }
        Ok(())
    }

    pub fn val_batch_size(&self) -> usize {
        self.val_batch_size.unwrap_or(self.batch_size)
    }

    pub fn test_batch_size(&self) -> usize {
        self.test_batch_size.unwrap_or(self.batch_size)
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.weights_save_path
            .clone()
            .unwrap_or_else(|| self.default_root_dir.join("checkpoints"))
    }

    /// Explicit step cap, treating 0 as "no cap".
    pub fn step_cap(&self) -> Option<usize> {
        self.max_steps.filter(|&s| s > 0)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(HPARAMS_FILE);
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: Self = serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }
}
