//! Scheduler configuration

use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::metrics::DEFAULT_WAIT_WINDOW;
use crate::scorer::Weights;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial concurrency ceiling
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Score weights for urgency, spare resources and user context
    #[serde(default)]
    pub weights: Weights,

    /// TD learning rate (alpha)
    #[serde(rename = "learning-rate", default = "default_learning_rate")]
    pub learning_rate: f64,

    /// TD discount factor (gamma)
    #[serde(rename = "discount-factor", default = "default_discount_factor")]
    pub discount_factor: f64,

    /// Number of wait-time samples kept for the average
    #[serde(rename = "wait-window", default = "default_wait_window")]
    pub wait_window: usize,

    /// Concurrency controller bounds and thresholds
    #[serde(default)]
    pub controller: ControllerConfig,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_discount_factor() -> f64 {
    0.9
}

fn default_wait_window() -> usize {
    DEFAULT_WAIT_WINDOW
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            weights: Weights::default(),
            learning_rate: 0.1,
            discount_factor: 0.9,
            wait_window: DEFAULT_WAIT_WINDOW,
            controller: ControllerConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with a different initial ceiling
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Default::default()
        }
    }
}
