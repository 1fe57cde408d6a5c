//! Scheduler error types

use thiserror::Error;

/// Validation errors returned synchronously by [`Scheduler::submit`](crate::Scheduler::submit)
///
/// Execution failures of a submitted runnable are never reported here; they
/// surface through the task's terminal status and its handle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueueError {
    #[error("Task id must not be empty")]
    EmptyId,

    #[error("Task id already tracked: {0}")]
    DuplicateId(String),

    #[error("Task {0} has no runnable")]
    MissingRunnable(String),

    #[error("Task {id} has invalid urgency {urgency} (expected 0.0..=1.0)")]
    InvalidUrgency { id: String, urgency: f64 },

    #[error("No Tokio runtime available to schedule dispatch")]
    NoRuntime,
}

impl QueueError {
    /// Id of the offending task, when the error is about one
    pub fn task_id(&self) -> Option<&str> {
        match self {
            QueueError::DuplicateId(id) | QueueError::MissingRunnable(id) => Some(id),
            QueueError::InvalidUrgency { id, .. } => Some(id),
            QueueError::EmptyId | QueueError::NoRuntime => None,
        }
    }
}
