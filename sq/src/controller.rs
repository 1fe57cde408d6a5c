//! Concurrency controller
//!
//! Treats the queue as a single-server system and nudges the concurrency
//! ceiling toward a target expected wait.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Arrival rate is derived from a per-minute count
const ARRIVAL_WINDOW_MS: f64 = 60_000.0;

/// Service rate is derived from a per-second count
// NOTE: mixing per-minute arrivals with per-second service is dimensionally
// inconsistent; kept so tuned thresholds behave as they always have.
const SERVICE_WINDOW_MS: f64 = 1_000.0;

/// Controller bounds and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Lowest ceiling the controller will shrink to
    #[serde(rename = "min-concurrency", default = "default_min_concurrency")]
    pub min_concurrency: usize,

    /// Highest ceiling the controller will grow to
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Estimated wait above which the ceiling shrinks
    #[serde(rename = "high-wait-ms", default = "default_high_wait_ms")]
    pub high_wait_ms: f64,

    /// Estimated wait below which the ceiling grows
    #[serde(rename = "low-wait-ms", default = "default_low_wait_ms")]
    pub low_wait_ms: f64,
}

fn default_min_concurrency() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    10
}

fn default_high_wait_ms() -> f64 {
    5_000.0
}

fn default_low_wait_ms() -> f64 {
    1_000.0
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 1,
            max_concurrency: 10,
            high_wait_ms: 5_000.0,
            low_wait_ms: 1_000.0,
        }
    }
}

/// Expected queueing delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitEstimate {
    /// Expected wait in milliseconds
    Millis(f64),
    /// Arrival rate meets or exceeds service rate
    Overloaded,
}

impl WaitEstimate {
    /// Milliseconds, with `Overloaded` mapped to infinity
    pub fn as_millis(&self) -> f64 {
        match self {
            Self::Millis(ms) => *ms,
            Self::Overloaded => f64::INFINITY,
        }
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::Overloaded)
    }
}

impl std::fmt::Display for WaitEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{:.2}ms", ms),
            Self::Overloaded => write!(f, "overloaded"),
        }
    }
}

/// What a single `adjust` call did to the ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increased { from: usize, to: usize },
    Decreased { from: usize, to: usize },
    Unchanged(usize),
}

impl Adjustment {
    /// Ceiling after the adjustment
    pub fn ceiling(&self) -> usize {
        match self {
            Self::Increased { to, .. } | Self::Decreased { to, .. } => *to,
            Self::Unchanged(ceiling) => *ceiling,
        }
    }
}

/// Owns the concurrency ceiling
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    ceiling: usize,
    config: ControllerConfig,
}

impl ConcurrencyController {
    /// Create a controller; an initial ceiling outside the bounds is clamped
    pub fn new(initial: usize, config: ControllerConfig) -> Self {
        debug!(initial, ?config, "ConcurrencyController::new: called");
        let min = config.min_concurrency.max(1);
        let max = config.max_concurrency.max(min);
        let ceiling = initial.clamp(min, max);
        if ceiling != initial {
            warn!(initial, ceiling, min, max, "Initial concurrency outside controller bounds, clamped");
        }
        Self {
            ceiling,
            config: ControllerConfig {
                min_concurrency: min,
                max_concurrency: max,
                ..config
            },
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// M/M/1 expected wait for the given number of tracked tasks
    pub fn estimate_wait_time(&self, queue_length: usize) -> WaitEstimate {
        let lambda = queue_length as f64 / ARRIVAL_WINDOW_MS;
        let mu = self.ceiling as f64 / SERVICE_WINDOW_MS;
        debug!(queue_length, lambda, mu, "ConcurrencyController::estimate_wait_time: called");

        if lambda >= mu {
            debug!("estimate_wait_time: arrival rate meets service rate, overloaded");
            return WaitEstimate::Overloaded;
        }

        WaitEstimate::Millis(lambda / (mu * (mu - lambda)) * 1000.0)
    }

    /// Move the ceiling one step based on the current wait estimate
    pub fn adjust(&mut self, queue_length: usize) -> Adjustment {
        let estimate = self.estimate_wait_time(queue_length);
        let wait_ms = estimate.as_millis();
        let from = self.ceiling;
        debug!(queue_length, %estimate, ceiling = from, "ConcurrencyController::adjust: called");

        let adjustment = if wait_ms > self.config.high_wait_ms && self.ceiling > self.config.min_concurrency {
            self.ceiling -= 1;
            Adjustment::Decreased { from, to: self.ceiling }
        } else if wait_ms < self.config.low_wait_ms && self.ceiling < self.config.max_concurrency {
            self.ceiling += 1;
            Adjustment::Increased { from, to: self.ceiling }
        } else {
            Adjustment::Unchanged(from)
        };

        if !matches!(adjustment, Adjustment::Unchanged(_)) {
            info!(?adjustment, %estimate, "Concurrency ceiling adjusted");
        }
        adjustment
    }
}
