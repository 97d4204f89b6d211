//! Step Engine - train / validate / test steps over one batch
//!
//! The engine owns the only random source used at evaluation time (seeded
//! from the configuration), so inspection sampling is reproducible.

use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use summa_engine::{Seq2SeqModel, IGNORE_INDEX};
use tracing::{debug, info};

use crate::config::SummarizerConfig;
use crate::data::{trim_batch, Batch};
use crate::generate::GenerationAdapter;
use crate::scoring::{BootstrapAggregator, RougeRecord, RougeScorer};
use crate::tokenizer::SummaryTokenizer;

pub const PREDICTIONS_FILE: &str = "test_predictions.txt";
pub const TARGETS_FILE: &str = "test_targets.txt";

/// Target ids as i64 with every pad position replaced by [`IGNORE_INDEX`].
pub fn make_labels(target_ids: &Tensor, pad_id: u32) -> candle_core::Result<Tensor> {
    let labels = target_ids.to_dtype(DType::I64)?;
    let ignore = Tensor::full(IGNORE_INDEX, labels.dims(), labels.device())?;
    target_ids.eq(pad_id)?.where_cond(&ignore, &labels)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedExample {
    pub prediction: String,
    pub target: String,
}

#[derive(Clone, Debug)]
pub struct TestStepOutput {
    pub loss: f32,
    pub generation_time: f64,
    pub rouge_scores: Vec<RougeRecord>,
    pub saved: Option<SavedExample>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TestReport {
    /// `<metric>-precision|recall|fmeasure` midpoints.
    pub scores: BTreeMap<String, f64>,
    pub avg_generation_time: f64,
    pub avg_test_loss: f32,
    pub num_examples: usize,
    pub num_saved: usize,
}

impl TestReport {
    pub fn fmeasure(&self, metric: &str) -> Option<f64> {
        self.scores.get(&format!("{}-fmeasure", metric)).copied()
    }

    pub fn log(&self) {
        info!("📊 Test results over {} examples", self.num_examples);
        for (name, value) in &self.scores {
            info!("   {:<20} {:.4}", name, value);
        }
        info!(
            "   avg_generation_time  {:.3}s | avg_test_loss {:.4} | saved {}",
            self.avg_generation_time, self.avg_test_loss, self.num_saved
        );
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Mean validation loss, `None` when no batch was evaluated.
pub fn validation_epoch_end(losses: &[f32]) -> Option<f32> {
    if losses.is_empty() {
        return None;
    }
    Some(losses.iter().sum::<f32>() / losses.len() as f32)
}

pub struct StepEngine<'a, M: Seq2SeqModel + ?Sized> {
    model: &'a M,
    tokenizer: &'a SummaryTokenizer,
    generator: GenerationAdapter,
    scorer: RougeScorer,
    rng: StdRng,
    save_percentage: f64,
    test_batch_size: usize,
    seed: u64,
}

impl<'a, M: Seq2SeqModel + ?Sized> StepEngine<'a, M> {
    pub fn new(model: &'a M, tokenizer: &'a SummaryTokenizer, config: &SummarizerConfig) -> Result<Self> {
        Ok(Self {
            model,
            tokenizer,
            generator: GenerationAdapter::for_test(tokenizer.ids(), config.max_seq_len),
            scorer: RougeScorer::standard()?,
            rng: StdRng::seed_from_u64(config.seed),
            save_percentage: config.save_percentage,
            test_batch_size: config.test_batch_size(),
            seed: config.seed,
        })
    }

    fn forward_loss(&self, batch: &Batch) -> Result<Tensor> {
        let labels = make_labels(&batch.target_ids, self.tokenizer.ids().pad)?;
        let (loss, _logits) = self.model.loss_and_logits(
            &batch.source_ids,
            &batch.source_mask,
            &batch.target_ids,
            &batch.target_mask,
            &labels,
        )?;
        Ok(loss)
    }

    /// Scalar loss tensor, still attached to the graph for backprop.
    pub fn training_step(&self, batch: &Batch) -> Result<Tensor> {
        self.forward_loss(batch)
    }

    pub fn validation_step(&self, batch: &Batch) -> Result<f32> {
        Ok(self.forward_loss(batch)?.to_scalar::<f32>()?)
    }

    pub fn test_step(&mut self, batch: &Batch) -> Result<TestStepOutput> {
        let pad = self.tokenizer.ids().pad;
        let (source_ids, source_mask) = trim_batch(&batch.source_ids, pad, Some(&batch.source_mask))?;
        let source_mask = source_mask.context("Sanitizer dropped the source mask")?;
        let (target_ids, _) = trim_batch(&batch.target_ids, pad, None)?;

        let (generated, generation_time) = self.generator.generate(self.model, &source_ids, &source_mask)?;
        let predictions = self.tokenizer.decode_clean(&generated)?;
        let targets = self.tokenizer.decode_clean(&target_ids.to_vec2::<u32>()?)?;

        let loss = self.forward_loss(batch)?.to_scalar::<f32>()?;
        debug!("Test batch loss: {:.4} (generation {:.3}s)", loss, generation_time);

        let rouge_scores = targets
            .iter()
            .zip(predictions.iter())
            .map(|(target, prediction)| self.scorer.score(target, prediction))
            .collect();

        let mut saved = None;
        if self.save_percentage > 0.0 && self.rng.gen::<f64>() < self.save_percentage {
            let upper = self.test_batch_size.min(predictions.len());
            if upper > 0 {
                let idx = self.rng.gen_range(0..upper);
                saved = Some(SavedExample {
                    prediction: predictions[idx].clone(),
                    target: targets[idx].clone(),
                });
            }
        }

        Ok(TestStepOutput {
            loss,
            generation_time,
            rouge_scores,
            saved,
        })
    }

    /// Aggregates every test batch and writes the inspection files under `root`.
    pub fn test_epoch_end(&self, outputs: &[TestStepOutput], root: &Path) -> Result<TestReport> {
        let batches = outputs.len().max(1) as f64;
        let avg_generation_time = outputs.iter().map(|o| o.generation_time).sum::<f64>() / batches;
        let avg_test_loss = (outputs.iter().map(|o| o.loss as f64).sum::<f64>() / batches) as f32;

        let mut aggregator = BootstrapAggregator::new(self.seed);
        let mut num_examples = 0;
        for record in outputs.iter().flat_map(|o| o.rouge_scores.iter()) {
            aggregator.add_scores(record);
            num_examples += 1;
        }
        let mut scores = BTreeMap::new();
        for (metric, agg) in aggregator.aggregate() {
            scores.insert(format!("{}-precision", metric), agg.mid.precision);
            scores.insert(format!("{}-recall", metric), agg.mid.recall);
            scores.insert(format!("{}-fmeasure", metric), agg.mid.fmeasure);
        }

        let saved: Vec<&SavedExample> = outputs.iter().filter_map(|o| o.saved.as_ref()).collect();
        let (predictions_path, targets_path) = write_inspection_files(root, &saved)?;
        if !saved.is_empty() {
            info!(
                "📝 Saved {} predictions to {:?} and targets to {:?}",
                saved.len(),
                predictions_path,
                targets_path
            );
        }

        Ok(TestReport {
            scores,
            avg_generation_time,
            avg_test_loss,
            num_examples,
            num_saved: saved.len(),
        })
    }
}

/// One line per example, order-aligned across both files. Both files are
/// always created.
pub fn write_inspection_files(root: &Path, saved: &[&SavedExample]) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(root)?;
    let predictions_path = root.join(PREDICTIONS_FILE);
    let targets_path = root.join(TARGETS_FILE);
    let mut predictions = BufWriter::new(File::create(&predictions_path)?);
    let mut targets = BufWriter::new(File::create(&targets_path)?);
    for example in saved {
        writeln!(predictions, "{}", single_line(&example.prediction))?;
        writeln!(targets, "{}", single_line(&example.target))?;
    }
    predictions.flush()?;
    targets.flush()?;
    Ok((predictions_path, targets_path))
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
