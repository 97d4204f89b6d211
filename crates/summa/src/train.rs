//! Train Module - Training pipeline for the summarizer
//!
//! This module provides the training infrastructure:
//! - TrainArgs: CLI arguments for training
//! - schedule: total step count and learning-rate curves
//! - optim: decay/no-decay AdamW groups and gradient accumulation
//! - step: train / validate / test step engine
//! - checkpoint: weights, training state, rotation and export hook
//! - training_loop: epoch loop driving all of the above

pub mod args;
pub mod checkpoint;
pub mod optim;
pub mod schedule;
pub mod step;
pub mod training_loop;

pub use args::TrainArgs;
pub use checkpoint::{CheckpointHook, TrainingState};
pub use schedule::{LrSchedule, ScheduleKind, Scheduler};
pub use step::{StepEngine, TestReport};
pub use training_loop::{fit, run, FitOutcome};
