//! SmartQueue - in-process task scheduler with learned priorities
//!
//! SmartQueue accepts asynchronous tasks, ranks them by a state-dependent
//! score, and runs the best-ranked ones up to a concurrency ceiling that
//! adapts to observed queueing load.
//!
//! # Core Concepts
//!
//! - **Learned Priority**: score = learned value + weighted urgency, spare
//!   resources and user context
//! - **Burst Ranking**: dispatch is deferred so a burst of submissions is
//!   ranked together instead of admitted first-come first-served
//! - **Adaptive Ceiling**: an M/M/1 wait estimate nudges concurrency up or down
//! - **Failures Stay Local**: a failing task is recorded and penalized, never
//!   retried and never fatal to the scheduler
//!
//! # Modules
//!
//! - [`scheduler`] - Task registry, dispatch and settlement
//! - [`scorer`] - Value estimator used to rank pending tasks
//! - [`controller`] - Concurrency ceiling controller
//! - [`metrics`] - Queue length, wait times and outcome counters
//! - [`config`] - Configuration file loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod scorer;
pub mod simulate;

// Re-export commonly used types
pub use config::{Config, SimulationConfig};
pub use controller::{Adjustment, ConcurrencyController, ControllerConfig, WaitEstimate};
pub use error::QueueError;
pub use metrics::{MetricsCollector, MetricsSnapshot, Outcome};
pub use scheduler::{QueueState, Scheduler, SchedulerConfig, TaskHandle, TaskSnapshot, TaskSpec, TaskStatus};
pub use scorer::{Observation, Probe, Probes, StateKey, ValueEstimator, Weights};
pub use simulate::{SimulationReport, run_simulation};
