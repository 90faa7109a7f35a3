//! Utility functions and metrics.

pub mod metrics;

pub use metrics::{effective_sample_size, Profiler, RunMetrics};
