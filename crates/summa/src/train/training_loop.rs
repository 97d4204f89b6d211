//! Training Loop - epochs, gradient accumulation, validation and checkpoints

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;
use summa_engine::device_utils::select_device;
use summa_engine::{EncoderDecoderModel, Seq2SeqConfig, CONFIG_FILE};
use tracing::{error, info, warn};

use super::args::TrainArgs;
use super::checkpoint::{
    load_training_state, save_securely, save_training_state, CheckpointHook, CheckpointRotation,
    TrainingState, BEST_CHECKPOINT, KEEP_CHECKPOINTS, LATEST_CHECKPOINT,
};
use super::optim::{split_param_groups, GradientAccumulator, GroupedAdamW};
use super::schedule::{total_steps, LrSchedule, Scheduler};
use super::step::{validation_epoch_end, StepEngine};
use crate::config::SummarizerConfig;
use crate::data::batch::num_batches;
use crate::data::cache::default_cache_dir;
use crate::data::{BatchIter, DatasetProvider, EncodedSplit, EncodedSplitCache, Split};
use crate::evaluate::run_test_epoch;
use crate::tokenizer::SummaryTokenizer;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static CTRL_C_COUNT: AtomicUsize = AtomicUsize::new(0);
static HANDLER: Once = Once::new();

/// First Ctrl+C finishes the current batch and saves; the second exits at once.
fn install_stop_handler() {
    HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            let count = CTRL_C_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
            if count == 1 {
                info!("\n\n🛑 Ctrl+C detected! Finishing current batch and saving...");
                info!("   (Press Ctrl+C again to force quit WITHOUT saving)");
                STOP_REQUESTED.store(true, Ordering::SeqCst);
            } else {
                error!("\n⚠️  Force quit! Exiting immediately without saving.");
                std::process::exit(1);
            }
        });
        if let Err(e) = installed {
            warn!("⚠️ Failed to install Ctrl+C handler: {}", e);
        }
    });
}

/// Batches per epoch after applying `overfit_pct` (0 keeps every batch).
pub fn limit_batches(batches: usize, overfit_pct: f64) -> usize {
    if overfit_pct > 0.0 {
        ((batches as f64 * overfit_pct) as usize).max(1).min(batches)
    } else {
        batches
    }
}

/// Shuffle source for `epoch`; a resumed run sees the same order as an uninterrupted one.
pub fn epoch_rng(seed: u64, epoch: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(epoch as u64))
}

/// Loads a split through the content-hash cache.
pub fn load_encoded_split(
    cfg: &SummarizerConfig,
    tokenizer: &SummaryTokenizer,
    split: Split,
) -> Result<EncodedSplit> {
    let provider = DatasetProvider::from_config(cfg);
    let cache = EncodedSplitCache::new(default_cache_dir(provider.root()));
    let examples = provider.load_split(split)?;
    info!("Loaded {} {} examples", examples.len(), split.as_str());
    cache.load_or_encode(
        tokenizer,
        &examples,
        provider.columns(),
        cfg.max_seq_len,
        cfg.dataloader_num_workers,
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct FitOutcome {
    /// Optimizer updates applied
    pub updates: usize,
    /// Batches processed (scheduler position)
    pub batches: usize,
    pub epochs_completed: usize,
    pub best_val_loss: Option<f32>,
    pub interrupted: bool,
}

pub struct Trained {
    pub varmap: VarMap,
    pub model: EncoderDecoderModel,
    pub model_config: Seq2SeqConfig,
    pub outcome: FitOutcome,
}

fn validate(
    engine: &StepEngine<'_, EncoderDecoderModel>,
    val: &EncodedSplit,
    cfg: &SummarizerConfig,
    device: &Device,
) -> Result<Option<f32>> {
    let limit = limit_batches(num_batches(val.len(), cfg.val_batch_size()), cfg.overfit_pct);
    let mut losses = Vec::with_capacity(limit);
    for batch in BatchIter::new(&val.examples, cfg.val_batch_size(), device).take_batches(limit) {
        losses.push(engine.validation_step(&batch?)?);
    }
    Ok(validation_epoch_end(&losses))
}

struct CheckpointWriter<'a> {
    dir: PathBuf,
    varmap: &'a VarMap,
    model_config: &'a Seq2SeqConfig,
    tokenizer: &'a SummaryTokenizer,
    hook: CheckpointHook,
    rotation: CheckpointRotation,
}

impl CheckpointWriter<'_> {
    fn write(&mut self, name: &str, state: &TrainingState, rotate: bool) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.safetensors", name));
        save_securely(self.varmap, &path)?;
        save_securely(self.varmap, &self.dir.join(LATEST_CHECKPOINT))?;
        save_training_state(&self.dir, name, state)?;
        if rotate {
            self.rotation.push(path.clone());
        }
        self.hook
            .on_save_checkpoint(self.varmap, self.model_config, self.tokenizer)?;
        Ok(path)
    }

    fn write_best(&self) -> Result<()> {
        save_securely(self.varmap, &self.dir.join(BEST_CHECKPOINT))
    }
}

fn apply_update(
    accumulator: &mut GradientAccumulator,
    optimizer: &mut GroupedAdamW,
) -> Result<bool> {
    match accumulator.take() {
        Some(grads) => {
            optimizer.step(&grads)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Trains a fresh (or `--load`ed) model on already-encoded splits.
pub fn fit(
    cfg: &SummarizerConfig,
    tokenizer: &SummaryTokenizer,
    train: &EncodedSplit,
    val: &EncodedSplit,
    device: &Device,
    load: Option<&Path>,
    log_interval: usize,
) -> Result<Trained> {
    if train.is_empty() {
        anyhow::bail!("❌ Training split is empty! Check the dataset files.");
    }
    let weights_dir = cfg.weights_dir();
    std::fs::create_dir_all(&weights_dir)
        .with_context(|| format!("Failed to create {:?}", weights_dir))?;

    let model_config = Seq2SeqConfig::new(
        tokenizer.vocab_size(),
        cfg.hidden_dim,
        cfg.num_layers,
        cfg.num_heads,
        cfg.max_seq_len,
    );
    model_config.save(weights_dir.join(CONFIG_FILE))?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = EncoderDecoderModel::load(model_config, vb)?;

    let mut resume = None;
    if let Some(path) = load {
        info!("Resuming from checkpoint: {:?}", path);
        varmap
            .load(path)
            .with_context(|| format!("❌ Failed to load requested checkpoint {:?}", path))?;
        info!("✅ Checkpoint loaded successfully.");
        resume = path.parent().and_then(load_training_state);
    }

    let groups = split_param_groups(&varmap)?;
    let param_count: usize = groups.all_vars().iter().map(|v| v.elem_count()).sum();
    info!(
        "📊 Model: {:.2}M params ({} decayed / {} exempt tensors)",
        param_count as f64 / 1e6,
        groups.decay.len(),
        groups.no_decay.len()
    );

    let accum = cfg.accumulate_grad_batches;
    let full_batches = num_batches(train.len(), cfg.batch_size);
    let epoch_batches = limit_batches(full_batches, cfg.overfit_pct);
    let t_total = total_steps(full_batches, cfg.max_epochs, accum, cfg.step_cap(), cfg.overfit_pct);
    let schedule = LrSchedule::new(cfg.use_scheduler, cfg.learning_rate, cfg.warmup_steps, accum, t_total);
    info!(
        "Schedule: {} | peak LR {} | warmup {} batches | total {} batches",
        cfg.use_scheduler, cfg.learning_rate, schedule.warmup, t_total
    );

    let (start_epoch, mut updates, resumed_batches, mut best_val_loss) = match &resume {
        Some(state) => {
            info!("Resuming from epoch {} (step {})", state.epoch + 1, state.step);
            (state.epoch + 1, state.step, state.batches, state.val_loss)
        }
        None => (0, 0, 0, None),
    };
    let mut scheduler = Scheduler::new(schedule).resume_at(resumed_batches);
    let mut optimizer = GroupedAdamW::new(&groups, cfg.learning_rate, cfg.adam_epsilon, cfg.weight_decay)?;
    let (decay, no_decay) = optimizer.weight_decays();
    info!("AdamW: eps {} | weight decay {} / {} (exempt)", cfg.adam_epsilon, decay, no_decay);
    let mut accumulator = GradientAccumulator::new(groups.all_vars(), accum);
    let engine = StepEngine::new(&model, tokenizer, cfg)?;
    let mut writer = CheckpointWriter {
        dir: weights_dir.clone(),
        varmap: &varmap,
        model_config: &model_config,
        tokenizer,
        hook: CheckpointHook::new(cfg.save_hg_transformer, true, &weights_dir),
        rotation: CheckpointRotation::new(KEEP_CHECKPOINTS),
    };

    install_stop_handler();
    STOP_REQUESTED.store(false, Ordering::SeqCst);

    let step_cap = cfg.step_cap();
    let mut epochs_completed = 0;
    let mut interrupted = false;
    let start_time = std::time::Instant::now();

    info!(
        "Starting training: {} epochs x {} batches (accumulate {})",
        cfg.max_epochs, epoch_batches, accum
    );

    'epochs: for epoch in start_epoch..cfg.max_epochs {
        let mut loss_sum = 0.0f32;
        let mut loss_count = 0usize;
        let mut cap_reached = false;

        let iter = BatchIter::new(&train.examples, cfg.batch_size, device)
            .shuffled(&mut epoch_rng(cfg.seed, epoch))
            .take_batches(epoch_batches);
        for (batch_idx, batch) in iter.enumerate() {
            let batch = batch?;
            optimizer.set_learning_rate(scheduler.current_lr());

            let loss = engine.training_step(&batch)?;
            let loss_value = loss.to_scalar::<f32>()?;
            if !loss_value.is_finite() {
                warn!("⚠️ Non-finite loss at epoch {} batch {}", epoch, batch_idx);
            }
            loss_sum += loss_value;
            loss_count += 1;

            accumulator.accumulate(&loss)?;
            if accumulator.is_ready() && apply_update(&mut accumulator, &mut optimizer)? {
                updates += 1;
            }
            scheduler.step();

            if log_interval > 0 && batch_idx % log_interval == 0 {
                let elapsed = start_time.elapsed().as_secs_f64().max(1e-9);
                info!(
                    "Epoch {} | Batch {:5} | Step {:5} | Loss: {:.4} | LR: {:.3e} | {:.2} batch/s",
                    epoch,
                    batch_idx,
                    updates,
                    loss_value,
                    optimizer.learning_rate(),
                    (scheduler.steps_taken() - resumed_batches) as f64 / elapsed
                );
            }

            if STOP_REQUESTED.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            if step_cap.is_some_and(|cap| updates >= cap) {
                cap_reached = true;
                break;
            }
        }

        // Leftover accumulated gradients still count as one update
        if accumulator.pending() > 0 && apply_update(&mut accumulator, &mut optimizer)? {
            updates += 1;
        }

        let train_loss = if loss_count > 0 { loss_sum / loss_count as f32 } else { 0.0 };
        // A resumed run starts after the interrupted epoch
        if interrupted {
            info!("[Shutdown] Saving checkpoint at step {}...", updates);
            let state = TrainingState {
                step: updates,
                batches: scheduler.steps_taken(),
                epoch,
                loss: train_loss,
                val_loss: best_val_loss,
                date: chrono::Local::now().to_rfc3339(),
                checkpoint: LATEST_CHECKPOINT.to_string(),
            };
            save_securely(&varmap, &weights_dir.join(LATEST_CHECKPOINT))?;
            save_training_state(&weights_dir, "model-latest", &state)?;
            info!("Exiting gracefully.");
            break 'epochs;
        }

        let val_loss = validate(&engine, val, cfg, device)?;
        match val_loss {
            Some(v) => info!("Epoch {} done | train loss {:.4} | val loss {:.4}", epoch, train_loss, v),
            None => info!("Epoch {} done | train loss {:.4} | no validation batches", epoch, train_loss),
        }

        let improved = match (val_loss, best_val_loss) {
            (Some(v), Some(best)) => v < best,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            best_val_loss = val_loss;
        }

        let name = format!("epoch-{}", epoch);
        let state = TrainingState {
            step: updates,
            batches: scheduler.steps_taken(),
            epoch,
            loss: train_loss,
            val_loss,
            date: chrono::Local::now().to_rfc3339(),
            checkpoint: format!("{}.safetensors", name),
        };
        writer.write(&name, &state, true)?;
        if improved {
            if let Some(best) = best_val_loss {
                info!("🌟 New Best Validation Loss: {:.4}", best);
            }
            writer.write_best()?;
        }
        epochs_completed += 1;

        if cap_reached {
            info!("Reached max_steps ({} updates).", updates);
            break 'epochs;
        }
    }

    let batches = scheduler.steps_taken();
    info!("Training complete. {} updates over {} batches.", updates, batches);
    drop(engine);
    drop(writer);
    Ok(Trained {
        varmap,
        model,
        model_config,
        outcome: FitOutcome {
            updates,
            batches,
            epochs_completed,
            best_val_loss,
            interrupted,
        },
    })
}

/// Main training function
pub fn run(args: TrainArgs) -> Result<()> {
    let cfg = args.config;
    cfg.validate()?;
    info!("--- Summa Training ---");
    info!(
        "Config: Hidden={}, Layers={}, Heads={}, Width={}, Batch={}",
        cfg.hidden_dim, cfg.num_layers, cfg.num_heads, cfg.max_seq_len, cfg.batch_size
    );
    info!(
        "Hyperparams: LR={}, Epochs={}, MaxSteps={:?}, Warmup={}, Accum={}",
        cfg.learning_rate, cfg.max_epochs, cfg.max_steps, cfg.warmup_steps, cfg.accumulate_grad_batches
    );

    let hparams = cfg.save(&cfg.default_root_dir)?;
    info!("📁 Hyperparameters saved to {:?}", hparams);

    let device = select_device(cfg.cpu);
    info!("Device initialized: {:?}", device);

    let tokenizer = SummaryTokenizer::load(&cfg.model_name_or_path)?;
    let train = load_encoded_split(&cfg, &tokenizer, Split::Train)?;
    let val = load_encoded_split(&cfg, &tokenizer, Split::Validation)?;

    let trained = fit(
        &cfg,
        &tokenizer,
        &train,
        &val,
        &device,
        args.load.as_deref(),
        args.log_interval,
    )?;

    if args.do_test && !trained.outcome.interrupted {
        let test = load_encoded_split(&cfg, &tokenizer, Split::Test)?;
        let report = run_test_epoch(&trained.model, &tokenizer, &cfg, &test, &device)?;
        report.log();
    }
    Ok(())
}
