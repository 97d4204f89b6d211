//! Export - portable model directory (`model.safetensors`, `config.json`, `tokenizer.json`)

use anyhow::{Context, Result};
use candle_core::Device;
use candle_nn::VarMap;
use clap::Args;
use std::path::{Path, PathBuf};
use summa_engine::{EncoderDecoderModel, Seq2SeqConfig, CONFIG_FILE, WEIGHTS_FILE};
use tracing::info;

use crate::tokenizer::{SummaryTokenizer, TOKENIZER_FILE};
use crate::train::checkpoint::save_securely;

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Weights to export
    #[arg(long, default_value = "checkpoints/model-best.safetensors")]
    pub checkpoint: PathBuf,

    /// Model config written at training start
    #[arg(long, default_value = "checkpoints/config.json")]
    pub config: PathBuf,

    /// Tokenizer source: local directory, tokenizer.json file, or hub model id
    #[arg(long, default_value = "bert-base-uncased")]
    pub tokenizer: String,

    #[arg(long, default_value = "best_tfmr")]
    pub output: PathBuf,
}

fn write_metadata(dir: &Path, config: &Seq2SeqConfig, tokenizer: &SummaryTokenizer) -> Result<()> {
    config
        .save(dir.join(CONFIG_FILE))
        .with_context(|| format!("Failed to write {} to {:?}", CONFIG_FILE, dir))?;
    tokenizer.save(&dir.join(TOKENIZER_FILE))
}

/// Writes live weights plus metadata into `dir`.
pub fn write_model_dir(
    dir: &Path,
    varmap: &VarMap,
    config: &Seq2SeqConfig,
    tokenizer: &SummaryTokenizer,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    save_securely(varmap, &dir.join(WEIGHTS_FILE))?;
    write_metadata(dir, config, tokenizer)
}

/// Copies a saved checkpoint plus metadata into `dir`.
pub fn copy_model_dir(
    dir: &Path,
    checkpoint: &Path,
    config: &Seq2SeqConfig,
    tokenizer: &SummaryTokenizer,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::copy(checkpoint, dir.join(WEIGHTS_FILE))
        .with_context(|| format!("Failed to copy checkpoint {:?}", checkpoint))?;
    write_metadata(dir, config, tokenizer)
}

pub fn run(args: ExportArgs) -> Result<()> {
    info!("📦 Exporting {:?} into {:?}", args.checkpoint, args.output);
    let config = Seq2SeqConfig::load(&args.config)
        .with_context(|| format!("Failed to read model config {:?}", args.config))?;
    let tokenizer = SummaryTokenizer::load(&args.tokenizer)?;
    copy_model_dir(&args.output, &args.checkpoint, &config, &tokenizer)?;

    // Reload to verify the exported layout
    EncoderDecoderModel::load_dir(&args.output, &Device::Cpu)
        .with_context(|| format!("Exported directory {:?} does not load", args.output))?;
    info!("✅ Export complete: {:?}", args.output);
    Ok(())
}
