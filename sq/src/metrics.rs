//! Queue metrics
//!
//! Tracks the live queue length, a bounded rolling window of wait times,
//! and success/failure counters for settled tasks.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of wait-time samples kept in the rolling window
pub const DEFAULT_WAIT_WINDOW: usize = 100;

/// How a task settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Reward fed to the value estimator for this outcome
    pub fn reward(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Failure => -1.0,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Point-in-time view of the metrics, safe to hand to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks currently tracked (pending + running)
    pub queue_length: usize,
    /// Mean of the wait-time window in ms, 0 if empty
    pub avg_wait_time_ms: f64,
    /// Tasks settled successfully
    pub completed: u64,
    /// Tasks settled with a failure
    pub failed: u64,
}

/// Metrics collector owned by a single scheduler
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    queue_length: usize,
    wait_times_ms: VecDeque<u64>,
    window: usize,
    completed: u64,
    failed: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_WINDOW)
    }
}

impl MetricsCollector {
    /// Create a collector keeping at most `window` wait-time samples
    pub fn new(window: usize) -> Self {
        debug!(window, "MetricsCollector::new: called");
        let window = window.max(1);
        Self {
            queue_length: 0,
            wait_times_ms: VecDeque::with_capacity(window),
            window,
            completed: 0,
            failed: 0,
        }
    }

    /// A task entered the registry
    pub fn enqueued(&mut self) {
        self.queue_length += 1;
        debug!(queue_length = self.queue_length, "MetricsCollector::enqueued: called");
    }

    /// A task left the registry
    pub fn dequeued(&mut self) {
        self.queue_length = self.queue_length.saturating_sub(1);
        debug!(queue_length = self.queue_length, "MetricsCollector::dequeued: called");
    }

    /// Record a settled task's wait time and outcome
    pub fn record(&mut self, wait_time_ms: u64, outcome: Outcome) {
        debug!(wait_time_ms, ?outcome, "MetricsCollector::record: called");
        self.wait_times_ms.push_back(wait_time_ms);
        while self.wait_times_ms.len() > self.window {
            self.wait_times_ms.pop_front();
        }

        match outcome {
            Outcome::Success => self.completed += 1,
            Outcome::Failure => self.failed += 1,
        }
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    /// Wait times currently in the window, oldest first
    pub fn wait_times(&self) -> impl Iterator<Item = u64> + '_ {
        self.wait_times_ms.iter().copied()
    }

    /// Mean of the wait-time window
    pub fn avg_wait_time_ms(&self) -> f64 {
        if self.wait_times_ms.is_empty() {
            0.0
        } else {
            self.wait_times_ms.iter().sum::<u64>() as f64 / self.wait_times_ms.len() as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_length: self.queue_length,
            avg_wait_time_ms: self.avg_wait_time_ms(),
            completed: self.completed,
            failed: self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsCollector::default();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.avg_wait_time_ms, 0.0);
    }

    #[test]
    fn test_record_success_and_failure() {
        let mut metrics = MetricsCollector::default();
        metrics.record(10, Outcome::Success);
        metrics.record(30, Outcome::Failure);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.avg_wait_time_ms, 20.0);
    }

    #[test]
    fn test_queue_length_never_underflows() {
        let mut metrics = MetricsCollector::default();
        metrics.enqueued();
        metrics.dequeued();
        metrics.dequeued();
        assert_eq!(metrics.queue_length(), 0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut metrics = MetricsCollector::default();
        for i in 0..150 {
            metrics.record(i, Outcome::Success);
        }
        let window: Vec<u64> = metrics.wait_times().collect();
        assert_eq!(window.len(), 100);
        assert_eq!(window.first(), Some(&50));
        assert_eq!(window.last(), Some(&149));
        assert_eq!(metrics.snapshot().completed, 150);
    }

    #[test]
    fn test_outcome_reward() {
        assert_eq!(Outcome::Success.reward(), 1.0);
        assert_eq!(Outcome::Failure.reward(), -1.0);
        assert!(Outcome::Success.is_success());
        assert!(!Outcome::Failure.is_success());
    }

    proptest! {
        #[test]
        fn prop_window_holds_most_recent(samples in proptest::collection::vec(0u64..10_000, 0..400)) {
            let mut metrics = MetricsCollector::default();
            for sample in &samples {
                metrics.record(*sample, Outcome::Success);
            }

            let window: Vec<u64> = metrics.wait_times().collect();
            let keep = samples.len().min(DEFAULT_WAIT_WINDOW);
            prop_assert!(window.len() <= DEFAULT_WAIT_WINDOW);
            prop_assert_eq!(&window[..], &samples[samples.len() - keep..]);
        }
    }
}
