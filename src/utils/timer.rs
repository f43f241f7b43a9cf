//! Wall-clock timing for batches and CLI runs

use std::time::{Duration, Instant};
use tracing::debug;

/// Labelled stopwatch that logs its reading when stopped
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Consume the timer, logging and returning the elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        debug!(timer = %self.label, elapsed_ms = elapsed.as_millis() as u64, "Timer stopped");
        elapsed
    }
}
