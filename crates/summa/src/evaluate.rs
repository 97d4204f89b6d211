use anyhow::{Context, Result};
use candle_core::Device;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use summa_engine::device_utils::select_device;
use summa_engine::{EncoderDecoderModel, Seq2SeqConfig, Seq2SeqModel};
use tracing::{info, warn};

use crate::config::SummarizerConfig;
use crate::data::batch::num_batches;
use crate::data::{BatchIter, EncodedSplit, Split};
use crate::tokenizer::SummaryTokenizer;
use crate::train::training_loop::{limit_batches, load_encoded_split};
use crate::train::{StepEngine, TestReport};

pub const RESULTS_FILE: &str = "test_results.json";

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    #[command(flatten)]
    pub config: SummarizerConfig,

    /// Exported model directory (config.json, model.safetensors, tokenizer.json)
    #[arg(long, default_value = "checkpoints/best_tfmr")]
    pub model_dir: PathBuf,

    /// Reuse a training run's hparams.json instead of the flags above
    #[arg(long)]
    pub hparams: Option<PathBuf>,
}

impl TestArgs {
    pub fn resolve_config(&self) -> Result<SummarizerConfig> {
        match &self.hparams {
            Some(path) => {
                info!("Using hyperparameters from {:?}", path);
                SummarizerConfig::load(path)
            }
            None => {
                self.config.validate()?;
                Ok(self.config.clone())
            }
        }
    }
}

/// Encoded width and generation length must fit the model's position table.
pub fn check_width(cfg: &SummarizerConfig, model_config: &Seq2SeqConfig) -> Result<()> {
    if cfg.max_seq_len > model_config.max_position_embeddings {
        anyhow::bail!(
            "--max-seq-len {} exceeds the model's {} positions; pass --max-seq-len {} or less",
            cfg.max_seq_len,
            model_config.max_position_embeddings,
            model_config.max_position_embeddings
        );
    }
    Ok(())
}

/// Generates, scores and aggregates the whole test split.
pub fn run_test_epoch<M: Seq2SeqModel + ?Sized>(
    model: &M,
    tokenizer: &SummaryTokenizer,
    cfg: &SummarizerConfig,
    split: &EncodedSplit,
    device: &Device,
) -> Result<TestReport> {
    let batch_size = cfg.test_batch_size();
    let limit = limit_batches(num_batches(split.len(), batch_size), cfg.overfit_pct);
    let mut engine = StepEngine::new(model, tokenizer, cfg)?;

    let pb = ProgressBar::new(limit as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")?
            .progress_chars("#>-"),
    );

    let mut outputs = Vec::with_capacity(limit);
    for batch in BatchIter::new(&split.examples, batch_size, device).take_batches(limit) {
        outputs.push(engine.test_step(&batch?)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    if outputs.is_empty() {
        warn!("No test batches processed.");
    }
    engine.test_epoch_end(&outputs, &cfg.default_root_dir)
}

pub fn run(args: TestArgs) -> Result<()> {
    let cfg = args.resolve_config()?;
    info!("--- Summa Evaluation (ROUGE) ---");
    info!("Model: {:?}", args.model_dir);

    let device = select_device(cfg.cpu);
    let model = EncoderDecoderModel::load_dir(&args.model_dir, &device).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load model from {:?}: {}\nEnsure directory contains config.json and model.safetensors.",
            args.model_dir,
            e
        )
    })?;
    let tokenizer = SummaryTokenizer::load(&args.model_dir.to_string_lossy())?;
    if tokenizer.vocab_size() != model.config.vocab_size {
        warn!(
            "⚠️ Tokenizer vocab ({}) differs from model vocab ({})",
            tokenizer.vocab_size(),
            model.config.vocab_size
        );
    }
    check_width(&cfg, &model.config)?;
    info!("Model loaded successfully on {:?}", device);

    let split = load_encoded_split(&cfg, &tokenizer, Split::Test)?;
    let report = run_test_epoch(&model, &tokenizer, &cfg, &split, &device)?;
    report.log();

    std::fs::create_dir_all(&cfg.default_root_dir)?;
    let path = cfg.default_root_dir.join(RESULTS_FILE);
    report
        .save(&path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Results written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: TestArgs,
    }

    fn parse(args: &[&str]) -> Result<TestArgs> {
        let mut argv = vec!["summa"];
        argv.extend_from_slice(args);
        Ok(Harness::try_parse_from(argv)?.args)
    }

    #[test]
    fn test_width_beyond_positions_is_rejected() -> Result<()> {
        let model = Seq2SeqConfig::new(21, 8, 1, 2, 512);
        assert!(check_width(&parse(&["--max-seq-len", "512"])?.config, &model).is_ok());
        let err = check_width(&parse(&["--max-seq-len", "1024"])?.config, &model)
            .expect_err("1024 > 512 positions");
        assert!(err.to_string().contains("512"));
        Ok(())
    }

    #[test]
    fn test_hparams_override_flags() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let trained = parse(&["--batch-size", "7", "--max-seq-len", "64"])?.config;
        let path = trained.save(dir.path())?;

        let args = parse(&["--hparams", path.to_str().unwrap_or_default()])?;
        assert_eq!(args.resolve_config()?, trained);
        assert_eq!(parse(&[])?.resolve_config()?.batch_size, 4);
        Ok(())
    }
}
