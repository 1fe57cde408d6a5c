//! Task types for the scheduler

use std::time::Instant;

use eyre::eyre;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::metrics::MetricsSnapshot;

/// Urgency given to tasks that don't specify one
pub const DEFAULT_URGENCY: f64 = 0.5;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks are removed from the registry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Runs after settlement bookkeeping to hand the result to the caller
pub(crate) type Delivery = Box<dyn FnOnce() + Send>;

/// Type-erased runnable: reports success/failure and defers result delivery
pub(crate) type Job = BoxFuture<'static, (Result<(), String>, Delivery)>;

/// Description of work to submit
pub struct TaskSpec<T> {
    pub(crate) id: String,
    pub(crate) urgency: f64,
    pub(crate) runnable: Option<BoxFuture<'static, eyre::Result<T>>>,
}

impl<T> TaskSpec<T> {
    /// New spec with default urgency and no runnable yet
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            urgency: DEFAULT_URGENCY,
            runnable: None,
        }
    }

    pub fn urgency(mut self, urgency: f64) -> Self {
        self.urgency = urgency;
        self
    }

    /// Attach the asynchronous operation to run once admitted
    pub fn run<F>(mut self, runnable: F) -> Self
    where
        F: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.runnable = Some(runnable.boxed());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> std::fmt::Debug for TaskSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("urgency", &self.urgency)
            .field("has_runnable", &self.runnable.is_some())
            .finish()
    }
}

/// Wrap a typed runnable so its result reaches `tx` only when delivered
pub(crate) fn erase<T: Send + 'static>(
    runnable: BoxFuture<'static, eyre::Result<T>>,
    tx: oneshot::Sender<eyre::Result<T>>,
) -> Job {
    async move {
        match runnable.await {
            Ok(value) => {
                let deliver: Delivery = Box::new(move || {
                    let _ = tx.send(Ok(value));
                });
                (Ok(()), deliver)
            }
            Err(err) => {
                let message = format!("{:#}", err);
                let deliver: Delivery = Box::new(move || {
                    let _ = tx.send(Err(err));
                });
                (Err(message), deliver)
            }
        }
    }
    .boxed()
}

/// Caller's view of a submitted task
///
/// The registry forgets a task as soon as it settles; the handle keeps
/// observing its status and receives its result.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: String,
    status: watch::Receiver<TaskStatus>,
    result: oneshot::Receiver<eyre::Result<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: String,
        status: watch::Receiver<TaskStatus>,
        result: oneshot::Receiver<eyre::Result<T>>,
    ) -> Self {
        Self { id, status, result }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest status, including terminal ones
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Wait until the task reaches a terminal status
    pub async fn settled(&mut self) -> TaskStatus {
        let settled = match self.status.wait_for(TaskStatus::is_terminal).await {
            Ok(status) => Some(*status),
            Err(_) => None,
        };
        // the sender is gone once the record is dropped; the last value stands
        settled.unwrap_or_else(|| *self.status.borrow())
    }

    /// Wait for the runnable's result
    ///
    /// Resolves after the scheduler has recorded the outcome, so metrics and
    /// learned values already reflect this task.
    pub async fn wait(self) -> eyre::Result<T> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(eyre!("Task {} settled without a result (runnable panicked)", self.id)),
        }
    }
}

/// Registry entry, owned by the scheduler until the task settles
pub(crate) struct TaskRecord {
    pub id: String,
    pub urgency: f64,
    /// Submission order, used to break score ties
    pub seq: u64,
    pub status: TaskStatus,
    pub enqueued_at: Instant,
    pub job: Option<Job>,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskRecord {
    pub fn new(id: String, urgency: f64, seq: u64, job: Job, status_tx: watch::Sender<TaskStatus>) -> Self {
        Self {
            id,
            urgency,
            seq,
            status: TaskStatus::Pending,
            enqueued_at: Instant::now(),
            job: Some(job),
            status_tx,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }
}

/// Read-only view of a tracked task for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub urgency: f64,
    pub status: TaskStatus,
    pub score: f64,
    /// Time since submission
    pub waited_ms: u64,
}

/// Queue summary for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub running: usize,
    pub pending: usize,
    pub ceiling: usize,
    pub metrics: MetricsSnapshot,
}
