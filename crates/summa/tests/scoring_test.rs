mod common;

use anyhow::Result;
use candle_core::{Device, Tensor};
use summa::data::{encode_split, BatchIter, Example};
use summa::scoring::{BootstrapAggregator, RougeScorer};
use summa::train::step::{PREDICTIONS_FILE, TARGETS_FILE};
use summa::train::StepEngine;
use summa_engine::{GenerationParams, Seq2SeqModel};

/// Always "generates" the same summary and reports a constant loss.
struct FixedSummary(Vec<u32>);

impl Seq2SeqModel for FixedSummary {
    fn loss_and_logits(
        &self,
        source_ids: &Tensor,
        _source_mask: &Tensor,
        target_ids: &Tensor,
        _target_mask: &Tensor,
        _labels: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let (b, t) = target_ids.dims2()?;
        let loss = Tensor::new(1.5f32, source_ids.device())?;
        let logits = Tensor::zeros((b, t, 21), candle_core::DType::F32, source_ids.device())?;
        Ok((loss, logits))
    }

    fn generate(
        &self,
        source_ids: &Tensor,
        _source_mask: &Tensor,
        params: &GenerationParams,
    ) -> candle_core::Result<Vec<Vec<u32>>> {
        let rows = source_ids.dim(0)?;
        let mut out = vec![params.decoder_start_token_id];
        out.extend_from_slice(&self.0);
        out.push(params.eos_token_id);
        Ok(vec![out; rows])
    }
}

#[test]
fn test_rouge_scores_cat_and_dogs() -> Result<()> {
    let scorer = RougeScorer::standard()?;
    let scores = scorer.score("The cat sat on the mat.", "the cat sat");
    let r1 = scores["rouge1"];
    assert!((r1.precision - 1.0).abs() < 1e-9);
    assert!((r1.recall - 0.5).abs() < 1e-9);
    assert!((r1.fmeasure - 2.0 / 3.0).abs() < 1e-9);

    let exact = scorer.score("the cat sat", "the cat sat");
    assert_eq!(exact["rouge1"].fmeasure, 1.0);
    let close = scorer.score("dogs run fast", "dogs ran fast");
    assert!(close["rouge1"].fmeasure > 0.0 && close["rouge1"].fmeasure < 1.0);
    assert!((close["rougeL"].fmeasure - 2.0 / 3.0).abs() < 1e-9);

    let unrelated = scorer.score("dogs run", "the cat sat");
    assert_eq!(unrelated["rouge1"].fmeasure, 0.0);
    assert_eq!(unrelated["rougeL"].fmeasure, 0.0);

    let mut agg = BootstrapAggregator::new(42);
    agg.add_scores(&scores);
    agg.add_scores(&unrelated);
    let result = agg.aggregate();
    let mid = result["rouge1"].mid.fmeasure;
    assert!(mid > 0.0 && mid < 2.0 / 3.0 + 1e-9);
    Ok(())
}

#[test]
fn test_test_epoch_scores_and_inspection_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tok = common::word_level_tokenizer();
    // "the cat sat"
    let model = FixedSummary(vec![6, 7, 8]);
    let cfg = common::tiny_config(dir.path(), &["--save-percentage", "1.0"])?;

    let examples = vec![
        Example::new("the cat sat on the mat .", "the cat sat"),
        Example::new("dogs run fast .", "dogs run"),
        Example::new("a long story .", "the cat ran"),
    ];
    let split = encode_split(&tok, &examples, cfg.max_seq_len, 0)?;
    let mut engine = StepEngine::new(&model, &tok, &cfg)?;
    let mut outputs = Vec::new();
    for batch in BatchIter::new(&split.examples, cfg.test_batch_size(), &Device::Cpu) {
        outputs.push(engine.test_step(&batch?)?);
    }
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|o| o.saved.is_some()));

    let report = engine.test_epoch_end(&outputs, dir.path())?;
    assert_eq!(report.num_examples, 3);
    assert_eq!(report.num_saved, 2);
    assert!((report.avg_test_loss - 1.5).abs() < 1e-6);
    let f1 = report.fmeasure("rouge1").expect("rouge1 reported");
    assert!(f1 > 0.0 && f1 < 1.0);
    assert!(report.fmeasure("rouge2").is_some());
    assert!(report.fmeasure("rougeL").is_some());

    let predictions = std::fs::read_to_string(dir.path().join(PREDICTIONS_FILE))?;
    let targets = std::fs::read_to_string(dir.path().join(TARGETS_FILE))?;
    assert_eq!(predictions.lines().count(), 2);
    assert_eq!(targets.lines().count(), 2);
    assert!(predictions.lines().all(|l| l == "the cat sat"));
    Ok(())
}

#[test]
fn test_zero_save_percentage_writes_empty_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tok = common::word_level_tokenizer();
    let model = FixedSummary(vec![11, 12]);
    let cfg = common::tiny_config(dir.path(), &["--save-percentage", "0"])?;

    let split = encode_split(&tok, &common::examples(), cfg.max_seq_len, 0)?;
    let mut engine = StepEngine::new(&model, &tok, &cfg)?;
    let mut outputs = Vec::new();
    for batch in BatchIter::new(&split.examples, 2, &Device::Cpu) {
        outputs.push(engine.test_step(&batch?)?);
    }
    let report = engine.test_epoch_end(&outputs, dir.path())?;
    assert_eq!(report.num_saved, 0);
    assert_eq!(std::fs::read_to_string(dir.path().join(PREDICTIONS_FILE))?, "");
    assert_eq!(std::fs::read_to_string(dir.path().join(TARGETS_FILE))?, "");
    Ok(())
}
