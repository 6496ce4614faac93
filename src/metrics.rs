use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Counters for one agent run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunMetrics {
    pub model_calls: usize,
    pub tool_calls: usize,
    pub tool_failures: usize,
    pub duration: Duration,
}

pub struct RunGuard {
    start: Instant,
    metrics: RunMetrics,
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::start()
    }
}

impl RunGuard {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            metrics: RunMetrics::default(),
        }
    }

    pub fn record_model_call(&mut self) {
        self.metrics.model_calls += 1;
    }

    pub fn record_tool_call(&mut self) {
        self.metrics.tool_calls += 1;
    }

    pub fn record_failure(&mut self) {
        self.metrics.tool_failures += 1;
    }

    pub fn tool_calls(&self) -> usize {
        self.metrics.tool_calls
    }

    pub fn finish(mut self) -> RunMetrics {
        self.metrics.duration = self.start.elapsed();
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_calls_and_failures() {
        let mut guard = RunGuard::start();
        guard.record_model_call();
        guard.record_model_call();
        guard.record_tool_call();
        guard.record_failure();
        assert_eq!(guard.tool_calls(), 1);
        let metrics = guard.finish();
        assert_eq!(metrics.model_calls, 2);
        assert_eq!(metrics.tool_failures, 1);
        assert!(metrics.duration >= Duration::from_millis(0));
    }
}
