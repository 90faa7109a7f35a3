//! Run metrics and helpers.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Counters and timings for one SMC run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub rounds: usize,
    /// Total particle steps (tokens emitted) across the run.
    pub particle_steps: usize,
    pub resample_events: usize,
    pub step_time_ms: f64,
    pub resample_time_ms: f64,
    pub total_time_ms: f64,
    pub tokens_per_second: f64,
}

/// Simple profiler for timing labelled sections ("step", "resample").
#[derive(Debug, Default)]
pub struct Profiler {
    start_times: HashMap<String, Instant>,
    durations: HashMap<String, Duration>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, label: &str) {
        self.start_times.insert(label.to_string(), Instant::now());
    }

    pub fn end(&mut self, label: &str) {
        if let Some(start) = self.start_times.remove(label) {
            *self.durations.entry(label.to_string()).or_default() += start.elapsed();
        }
    }

    pub fn millis(&self, label: &str) -> f64 {
        self.durations
            .get(label)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

impl RunMetrics {
    pub fn finish(
        rounds: usize,
        particle_steps: usize,
        resample_events: usize,
        profiler: &Profiler,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            rounds,
            particle_steps,
            resample_events,
            step_time_ms: profiler.millis("step"),
            resample_time_ms: profiler.millis("resample"),
            total_time_ms: secs * 1000.0,
            tokens_per_second: if secs > 0.0 {
                particle_steps as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Effective sample size 1 / sum(w^2) of normalised weights.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}
