//! Step timing for scheduling calls
//!
//! Records named steps of a predicate or priority computation and logs them
//! when the whole call took longer than the configured threshold.

use std::time::{Duration, Instant};
use tracing::warn;

pub struct CallTrace {
    name: String,
    started: Instant,
    steps: Vec<(&'static str, Instant)>,
}

impl CallTrace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    /// Mark the start of a step
    pub fn step(&mut self, step: &'static str) {
        self.steps.push((step, Instant::now()));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Per-step durations, each measured to the next step or to now
    pub fn step_durations(&self) -> Vec<(&'static str, Duration)> {
        let now = Instant::now();
        self.steps
            .iter()
            .enumerate()
            .map(|(i, (step, at))| {
                let end = self.steps.get(i + 1).map(|(_, next)| *next).unwrap_or(now);
                (*step, end.duration_since(*at))
            })
            .collect()
    }

    /// Warn with the step breakdown if the call exceeded `threshold`
    pub fn log_if_long(&self, threshold: Duration) -> bool {
        let elapsed = self.elapsed();
        if elapsed <= threshold {
            return false;
        }
        let steps = self
            .step_durations()
            .into_iter()
            .map(|(step, d)| format!("{}={:?}", step, d))
            .collect::<Vec<_>>()
            .join(" ");
        warn!(
            "{} took {:?} (threshold {:?}): {}",
            self.name, elapsed, threshold, steps
        );
        true
    }
}
