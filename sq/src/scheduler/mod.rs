//! Scheduler for submitted tasks
//!
//! Owns the task registry, ranks pending tasks with the value estimator,
//! and admits them up to the controller's concurrency ceiling.

mod config;
mod core;
mod queue;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use queue::{DEFAULT_URGENCY, QueueState, TaskHandle, TaskSnapshot, TaskSpec, TaskStatus};
