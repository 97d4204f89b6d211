//! Schedule Builder - total step count and learning-rate curves
//!
//! The schedule is stepped once per processed batch, so every length here is
//! counted in batches, not optimizer updates.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Constant learning rate
    None,
    /// Linear warmup, then linear decay to zero
    Linear,
    /// Cosine one-cycle
    #[value(name = "onecycle")]
    OneCycle,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleKind::None => "none",
            ScheduleKind::Linear => "linear",
            ScheduleKind::OneCycle => "onecycle",
        };
        f.write_str(name)
    }
}

impl FromStr for ScheduleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ScheduleKind::None),
            "linear" => Ok(ScheduleKind::Linear),
            "onecycle" => Ok(ScheduleKind::OneCycle),
            other => anyhow::bail!(
                "Unknown scheduler '{}' (expected one of: none, linear, onecycle)",
                other
            ),
        }
    }
}

/// Total schedule length in batches.
///
/// With a step cap the length is `cap * accumulation`; otherwise it is
/// `floor(batches * epochs / accumulation)`, scaled by `overfit_pct` when set.
pub fn total_steps(
    num_train_batches: usize,
    num_epochs: usize,
    accumulation: usize,
    step_cap: Option<usize>,
    overfit_pct: f64,
) -> usize {
    let accumulation = accumulation.max(1);
    if let Some(cap) = step_cap.filter(|&c| c > 0) {
        return cap * accumulation;
    }
    let total = num_train_batches * num_epochs / accumulation;
    if overfit_pct > 0.0 {
        (total as f64 * overfit_pct) as usize
    } else {
        total
    }
}

/// One-cycle constants (warm fraction, initial and final divisors).
const ONECYCLE_PCT_START: f64 = 0.3;
const ONECYCLE_DIV_FACTOR: f64 = 25.0;
const ONECYCLE_FINAL_DIV_FACTOR: f64 = 1e4;

#[derive(Clone, Debug, PartialEq)]
pub struct LrSchedule {
    pub kind: ScheduleKind,
    pub peak_lr: f64,
    /// Warmup length in batches (`warmup_steps * accumulation`).
    pub warmup: usize,
    pub total: usize,
}

impl LrSchedule {
    pub fn new(
        kind: ScheduleKind,
        peak_lr: f64,
        warmup_steps: usize,
        accumulation: usize,
        total: usize,
    ) -> Self {
        Self {
            kind,
            peak_lr,
            warmup: warmup_steps * accumulation.max(1),
            total,
        }
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        match self.kind {
            ScheduleKind::None => self.peak_lr,
            ScheduleKind::Linear => self.peak_lr * self.linear_factor(step),
            ScheduleKind::OneCycle => self.one_cycle(step),
        }
    }

    fn linear_factor(&self, step: usize) -> f64 {
        if step < self.warmup {
            return step as f64 / self.warmup.max(1) as f64;
        }
        let remaining = self.total.saturating_sub(step) as f64;
        let span = self.total.saturating_sub(self.warmup).max(1) as f64;
        (remaining / span).max(0.0)
    }

    fn one_cycle(&self, step: usize) -> f64 {
        let initial = self.peak_lr / ONECYCLE_DIV_FACTOR;
        let min_lr = initial / ONECYCLE_FINAL_DIV_FACTOR;
        let warm_end = ONECYCLE_PCT_START * self.total as f64 - 1.0;
        let last = self.total as f64 - 1.0;
        let s = step as f64;

        if s <= warm_end {
            let pct = if warm_end > 0.0 { s / warm_end } else { 1.0 };
            cosine_anneal(initial, self.peak_lr, pct)
        } else {
            let span = last - warm_end;
            let pct = if span > 0.0 {
                ((s - warm_end) / span).min(1.0)
            } else {
                1.0
            };
            cosine_anneal(self.peak_lr, min_lr, pct)
        }
    }
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// Stateful cursor over an [`LrSchedule`].
#[derive(Clone, Debug)]
pub struct Scheduler {
    schedule: LrSchedule,
    step: usize,
}

impl Scheduler {
    pub fn new(schedule: LrSchedule) -> Self {
        Self { schedule, step: 0 }
    }

    pub fn resume_at(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn current_lr(&self) -> f64 {
        self.schedule.lr_at(self.step)
    }

    /// Advances by one batch and returns the new rate.
    pub fn step(&mut self) -> f64 {
        self.step += 1;
        self.current_lr()
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_total_steps_with_cap() {
        assert_eq!(total_steps(1000, 3, 4, Some(100), 0.0), 400);
        // 0 means no cap
        assert_eq!(total_steps(1000, 3, 4, Some(0), 0.0), 750);
    }

    #[test]
    fn test_total_steps_from_epochs() {
        assert_eq!(total_steps(10, 3, 4, None, 0.0), 7);
        assert_eq!(total_steps(100, 2, 1, None, 0.25), 50);
    }

    #[test]
    fn test_linear_warmup_then_decay() {
        let s = LrSchedule::new(ScheduleKind::Linear, 1e-3, 5, 2, 110);
        assert_eq!(s.warmup, 10);
        assert!(close(s.lr_at(0), 0.0));
        assert!(close(s.lr_at(5), 5e-4));
        assert!(close(s.lr_at(10), 1e-3));
        assert!(close(s.lr_at(60), 5e-4));
        assert!(close(s.lr_at(110), 0.0));
        assert!(close(s.lr_at(500), 0.0));
    }

    #[test]
    fn test_linear_without_warmup_starts_at_peak() {
        let s = LrSchedule::new(ScheduleKind::Linear, 2.0, 0, 4, 8);
        assert!(close(s.lr_at(0), 2.0));
        assert!(close(s.lr_at(4), 1.0));
    }

    #[test]
    fn test_one_cycle_shape() {
        let s = LrSchedule::new(ScheduleKind::OneCycle, 1e-3, 0, 1, 100);
        assert!(close(s.lr_at(0), 1e-3 / 25.0));
        // Peak at the end of the 30% warm phase
        assert!(close(s.lr_at(29), 1e-3));
        assert!(s.lr_at(28) < s.lr_at(29));
        assert!(s.lr_at(30) < s.lr_at(29));
        assert!(close(s.lr_at(99), 1e-3 / 25.0 / 1e4));
        let peak_step = (0..100)
            .max_by(|&a, &b| s.lr_at(a).total_cmp(&s.lr_at(b)))
            .unwrap_or(0);
        assert_eq!(peak_step, 29);
    }

    #[test]
    fn test_constant_schedule() {
        let mut sched = Scheduler::new(LrSchedule::new(ScheduleKind::None, 5e-5, 3, 2, 10));
        for _ in 0..20 {
            assert!(close(sched.step(), 5e-5));
        }
        assert_eq!(sched.steps_taken(), 20);
    }

    #[test]
    fn test_from_str_fails_fast() {
        assert_eq!("OneCycle".parse::<ScheduleKind>().ok(), Some(ScheduleKind::OneCycle));
        assert!("cosine".parse::<ScheduleKind>().is_err());
        assert_eq!(ScheduleKind::Linear.to_string(), "linear");
    }
}
