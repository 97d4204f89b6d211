use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use clap::Args;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use summa_engine::device_utils::select_device;
use summa_engine::EncoderDecoderModel;
use tracing::info;

use crate::data::framer::encode_sources;
use crate::data::trim_batch;
use crate::generate::GenerationAdapter;
use crate::tokenizer::SummaryTokenizer;

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    /// Exported model directory
    #[arg(short, long, default_value = "checkpoints/best_tfmr")]
    pub model_dir: PathBuf,

    /// Text(s) to summarize; reads stdin line by line when neither this nor --file is given
    #[arg(short, long)]
    pub text: Vec<String>,

    /// File with one document per line
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    #[arg(long, default_value_t = 512)]
    pub max_seq_len: usize,

    #[arg(long, action)]
    pub cpu: bool,
}

/// Loaded model + tokenizer pair for ad-hoc summarization.
pub struct Summarizer {
    model: EncoderDecoderModel,
    tokenizer: SummaryTokenizer,
    generator: GenerationAdapter,
    max_seq_len: usize,
}

impl Summarizer {
    pub fn new(model: EncoderDecoderModel, tokenizer: SummaryTokenizer, max_seq_len: usize) -> Self {
        let max_seq_len = max_seq_len.min(model.config.max_position_embeddings);
        Self {
            generator: GenerationAdapter::for_predict(tokenizer.ids(), max_seq_len),
            model,
            tokenizer,
            max_seq_len,
        }
    }

    pub fn load(dir: &std::path::Path, max_seq_len: usize, device: &Device) -> Result<Self> {
        let model = EncoderDecoderModel::load_dir(dir, device).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load model: {}\nEnsure directory contains config.json etc.",
                e
            )
        })?;
        let tokenizer = SummaryTokenizer::load(&dir.to_string_lossy())?;
        Ok(Self::new(model, tokenizer, max_seq_len))
    }

    /// One summary per input text, in order.
    pub fn summarize(&self, texts: &[String]) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encoded = encode_sources(&self.tokenizer, texts, self.max_seq_len)?;
        let (ids, mask): (Vec<Vec<u32>>, Vec<Vec<u32>>) = encoded.into_iter().unzip();
        let device = &self.model.device;
        let source_ids = Tensor::new(ids, device)?;
        let source_mask = Tensor::new(mask, device)?;

        let (source_ids, source_mask) =
            trim_batch(&source_ids, self.tokenizer.ids().pad, Some(&source_mask))?;
        let source_mask = source_mask.context("Sanitizer dropped the source mask")?;

        let (generated, secs) = self.generator.generate(&self.model, &source_ids, &source_mask)?;
        info!("Generated {} summaries in {:.2}s", generated.len(), secs);
        self.tokenizer.decode_clean(&generated)
    }
}

pub fn run(args: PredictArgs) -> Result<()> {
    println!("--- Summa Predict ---");
    println!("Loading model from: {:?}", args.model_dir);
    let device = select_device(args.cpu);
    let summarizer = Summarizer::load(&args.model_dir, args.max_seq_len, &device)?;
    println!("✅ Model Loaded!");

    let mut texts = args.text.clone();
    if let Some(path) = &args.file {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        texts.extend(content.lines().filter(|l| !l.trim().is_empty()).map(str::to_string));
    }

    if !texts.is_empty() {
        for summary in summarizer.summarize(&texts)? {
            println!("{}", summary);
        }
        return Ok(());
    }

    let stdin = io::stdin();
    loop {
        print!("\n> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        match summarizer.summarize(&[line.to_string()]) {
            Ok(summaries) => summaries.iter().for_each(|s| println!("{}", s)),
            Err(e) => println!("Error: {}", e),
        }
    }
    Ok(())
}
