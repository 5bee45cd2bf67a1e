// src/engine/hooks.rs

use std::time::{Duration, Instant};

use tracing::debug;

use crate::graph::OutputSize;

use super::TickReport;

/// Observer called around every tick and every executed stage.
pub trait ProcessHook: Send {
    fn before_tick(&mut self, _tick: u64) {}

    fn before_stage(&mut self, _stage: &str) {}

    fn after_stage(&mut self, _stage: &str, _succeeded: bool) {}

    fn after_tick(&mut self, _report: &TickReport) {}
}

/// Logs how long each stage and each tick took.
#[derive(Debug, Default)]
pub struct TimingHook {
    tick_started: Option<Instant>,
    stage_started: Option<Instant>,
    slowest: Option<(String, Duration)>,
}

impl TimingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slowest stage seen in the last tick.
    pub fn slowest(&self) -> Option<(&str, Duration)> {
        self.slowest.as_ref().map(|(name, d)| (name.as_str(), *d))
    }
}

impl ProcessHook for TimingHook {
    fn before_tick(&mut self, _tick: u64) {
        self.tick_started = Some(Instant::now());
        self.slowest = None;
    }

    fn before_stage(&mut self, _stage: &str) {
        self.stage_started = Some(Instant::now());
    }

    fn after_stage(&mut self, stage: &str, succeeded: bool) {
        let Some(started) = self.stage_started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        debug!(stage, elapsed_us = elapsed.as_micros() as u64, succeeded, "stage timing");

        let slower = self.slowest.as_ref().is_none_or(|(_, d)| elapsed > *d);
        if slower {
            self.slowest = Some((stage.to_string(), elapsed));
        }
    }

    fn after_tick(&mut self, report: &TickReport) {
        if let Some(started) = self.tick_started.take() {
            debug!(
                tick = report.tick,
                elapsed_us = started.elapsed().as_micros() as u64,
                executed = report.executed.len(),
                "tick timing"
            );
        }
    }
}

/// Target surface whose viewport follows the active output size.
pub trait RenderSurface: Send {
    fn set_viewport(&mut self, size: OutputSize);
}

/// Surface that only remembers the last viewport.
#[derive(Debug, Default)]
pub struct NullSurface {
    viewport: Option<OutputSize>,
}

impl NullSurface {
    pub fn viewport(&self) -> Option<OutputSize> {
        self.viewport
    }
}

impl RenderSurface for NullSurface {
    fn set_viewport(&mut self, size: OutputSize) {
        self.viewport = Some(size);
    }
}
