//! Scheduler implementation

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::{Adjustment, ConcurrencyController, WaitEstimate};
use crate::error::QueueError;
use crate::metrics::{MetricsCollector, MetricsSnapshot, Outcome};
use crate::scorer::{Observation, Probes, ValueEstimator};

use super::config::SchedulerConfig;
use super::queue::{Job, QueueState, TaskHandle, TaskRecord, TaskSnapshot, TaskSpec, TaskStatus, erase};

/// Internal state protected by mutex
struct SchedulerState {
    /// Every tracked task (pending or running), keyed by id
    tasks: HashMap<String, TaskRecord>,

    /// Ids of tasks currently executing
    running: HashSet<String>,

    /// Next submission sequence number
    next_seq: u64,

    /// A dispatch pass has been spawned but hasn't run yet
    dispatch_scheduled: bool,

    scorer: ValueEstimator,
    controller: ConcurrencyController,
    metrics: MetricsCollector,
}

struct Shared {
    state: Mutex<SchedulerState>,
    idle: Notify,
    /// Sampled only while `state` is unlocked; probes may read the scheduler
    probes: Probes,
}

/// A validated submission that hasn't been registered yet
struct Prepared {
    id: String,
    urgency: f64,
    job: Job,
    status_tx: watch::Sender<TaskStatus>,
}

/// The Scheduler admits submitted tasks in descending score order, up to a
/// concurrency ceiling that the controller adapts over time.
///
/// Cloning is cheap; clones share the same registry, value table and
/// metrics. All state is serialized behind one lock that is never held
/// across an await point or while probes run.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with default probes
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_probes(config, Probes::default())
    }

    /// Create a scheduler with caller-supplied resource/context probes
    ///
    /// Probes may call back into the scheduler (e.g. derive load from
    /// [`Scheduler::running_count`]).
    pub fn with_probes(config: SchedulerConfig, probes: Probes) -> Self {
        debug!(?config, "Scheduler::with_probes: called");
        let state = SchedulerState {
            tasks: HashMap::new(),
            running: HashSet::new(),
            next_seq: 0,
            dispatch_scheduled: false,
            scorer: ValueEstimator::new(config.weights, config.learning_rate, config.discount_factor),
            controller: ConcurrencyController::new(config.max_concurrency, config.controller.clone()),
            metrics: MetricsCollector::new(config.wait_window),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                idle: Notify::new(),
                probes,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task and schedule a dispatch pass
    ///
    /// The pass runs on a spawned task, never inside this call. On a
    /// current-thread runtime a burst of submissions made without yielding is
    /// therefore ranked together. On a multi-thread runtime another worker
    /// may start the pass between two calls; use [`Scheduler::submit_batch`]
    /// when a burst must be ranked as a whole.
    pub fn submit<T>(&self, spec: TaskSpec<T>) -> Result<TaskHandle<T>, QueueError>
    where
        T: Send + 'static,
    {
        debug!(id = %spec.id, urgency = spec.urgency, "Scheduler::submit: called");
        let (prepared, handle) = prepare(spec)?;
        self.register(vec![prepared])?;
        Ok(handle)
    }

    /// Register a burst of tasks atomically and schedule one dispatch pass
    ///
    /// Every task is visible to the next pass regardless of runtime flavor.
    /// If any spec is invalid or any id is already tracked (or repeated in
    /// the batch), nothing is registered.
    pub fn submit_batch<T, I>(&self, specs: I) -> Result<Vec<TaskHandle<T>>, QueueError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = TaskSpec<T>>,
    {
        let (batch, handles): (Vec<Prepared>, Vec<TaskHandle<T>>) = specs
            .into_iter()
            .map(prepare)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();
        debug!(count = batch.len(), "Scheduler::submit_batch: called");

        if batch.is_empty() {
            return Ok(handles);
        }
        self.register(batch)?;
        Ok(handles)
    }

    /// Insert validated tasks under one lock acquisition
    fn register(&self, batch: Vec<Prepared>) -> Result<(), QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        {
            let mut state = self.state();
            let mut seen = HashSet::with_capacity(batch.len());
            for prepared in &batch {
                if state.tasks.contains_key(&prepared.id) || !seen.insert(prepared.id.as_str()) {
                    debug!(id = %prepared.id, "Scheduler::register: id already tracked, rejecting");
                    return Err(QueueError::DuplicateId(prepared.id.clone()));
                }
            }

            for Prepared {
                id,
                urgency,
                job,
                status_tx,
            } in batch
            {
                let seq = state.next_seq;
                state.next_seq += 1;
                state
                    .tasks
                    .insert(id.clone(), TaskRecord::new(id.clone(), urgency, seq, job, status_tx));
                state.metrics.enqueued();
                info!(%id, urgency, seq, queue_length = state.metrics.queue_length(), "Task submitted");
            }
        }

        self.request_dispatch(&runtime);
        Ok(())
    }

    /// Spawn a dispatch pass unless one is already waiting to run
    fn request_dispatch(&self, runtime: &Handle) {
        {
            let mut state = self.state();
            if state.dispatch_scheduled {
                debug!("Scheduler::request_dispatch: pass already scheduled");
                return;
            }
            state.dispatch_scheduled = true;
        }

        let scheduler = self.clone();
        runtime.spawn(async move {
            scheduler.dispatch();
        });
    }

    /// Run one dispatch pass now
    ///
    /// Scores every pending task, sorts by descending score (earlier
    /// submission wins ties) and admits as many as the ceiling allows.
    pub fn dispatch(&self) {
        debug!("Scheduler::dispatch: called");
        let Ok(runtime) = Handle::try_current() else {
            warn!("Dispatch requested outside a Tokio runtime, skipping");
            return;
        };

        let candidates: Vec<String> = {
            let mut state = self.state();
            state.dispatch_scheduled = false;

            let ceiling = state.controller.ceiling();
            if state.running.len() >= ceiling {
                debug!(running = state.running.len(), ceiling, "Scheduler::dispatch: at ceiling");
                return;
            }
            state
                .tasks
                .values()
                .filter(|r| r.status == TaskStatus::Pending)
                .map(|r| r.id.clone())
                .collect()
        };
        if candidates.is_empty() {
            debug!("Scheduler::dispatch: nothing pending");
            return;
        }

        // one probe sample per scored task, taken unlocked
        let observed: Vec<(String, Observation)> = candidates
            .into_iter()
            .map(|id| (id, self.shared.probes.observe()))
            .collect();

        let launches = {
            let mut guard = self.state();
            let state = &mut *guard;

            let ceiling = state.controller.ceiling();
            if state.running.len() >= ceiling {
                debug!(running = state.running.len(), ceiling, "Scheduler::dispatch: ceiling reached meanwhile");
                return;
            }

            let mut ranked: Vec<(f64, u64, String)> = Vec::with_capacity(observed.len());
            for (id, observation) in observed {
                let Some(record) = state.tasks.get(&id) else {
                    continue;
                };
                if record.status != TaskStatus::Pending {
                    continue;
                }
                let score = state.scorer.score(&id, record.urgency, observation);
                ranked.push((score, record.seq, id));
            }
            ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

            let slots = ceiling - state.running.len();
            let mut launches = Vec::with_capacity(slots.min(ranked.len()));
            for (score, _, id) in ranked.into_iter().take(slots) {
                let Some(record) = state.tasks.get_mut(&id) else {
                    continue;
                };
                let Some(job) = record.job.take() else {
                    warn!(%id, "Pending task has no runnable, skipping");
                    continue;
                };
                record.set_status(TaskStatus::Running);
                state.running.insert(id.clone());
                info!(%id, score, running = state.running.len(), ceiling, "Task admitted");
                launches.push((id, job));
            }
            launches
        };

        for (id, job) in launches {
            self.launch(&runtime, id, job);
        }
    }

    /// Execute an admitted task without blocking the dispatch pass
    fn launch(&self, runtime: &Handle, id: String, job: Job) {
        debug!(%id, "Scheduler::launch: called");
        let scheduler = self.clone();
        runtime.spawn(async move {
            let (result, deliver) = match AssertUnwindSafe(job).catch_unwind().await {
                Ok((result, deliver)) => (result, Some(deliver)),
                Err(payload) => (Err(panic_message(payload.as_ref())), None),
            };
            scheduler.settle(&id, result);
            if let Some(deliver) = deliver {
                deliver();
            }
        });
    }

    /// Record a running task's outcome, forget it, and dispatch again
    fn settle(&self, id: &str, result: Result<(), String>) {
        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
        debug!(%id, ?outcome, "Scheduler::settle: called");
        let observation = self.shared.probes.observe();

        let idle = {
            let mut guard = self.state();
            let state = &mut *guard;

            state.running.remove(id);
            let Some(mut record) = state.tasks.remove(id) else {
                warn!(%id, "Settled task was not tracked");
                return;
            };

            let wait_ms = record.enqueued_at.elapsed().as_millis() as u64;
            state.metrics.record(wait_ms, outcome);

            let others: Vec<&str> = state
                .tasks
                .values()
                .filter(|r| r.status == TaskStatus::Pending)
                .map(|r| r.id.as_str())
                .collect();
            let value = state
                .scorer
                .update(&record.id, record.urgency, observation, outcome.reward(), others);
            state.metrics.dequeued();

            match result {
                Ok(()) => {
                    info!(%id, wait_ms, value, "Task completed");
                    record.set_status(TaskStatus::Completed);
                }
                Err(message) => {
                    warn!(%id, wait_ms, value, error = %message, "Task failed");
                    record.set_status(TaskStatus::Failed);
                }
            }

            state.metrics.queue_length() == 0
        };

        if idle {
            debug!("Scheduler::settle: queue drained");
            self.shared.idle.notify_waiters();
        }

        self.dispatch();
    }

    /// Current metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state().metrics.snapshot()
    }

    /// Expected queueing delay at the current load and ceiling
    pub fn estimate_wait_time(&self) -> WaitEstimate {
        let state = self.state();
        state.controller.estimate_wait_time(state.metrics.queue_length())
    }

    /// Move the ceiling one step based on the estimated wait
    ///
    /// Callers invoke this periodically (see [`Scheduler::spawn_controller`]).
    /// Lowering the ceiling never preempts running tasks; raising it triggers
    /// a dispatch pass.
    pub fn adjust_concurrency(&self) -> Adjustment {
        debug!("Scheduler::adjust_concurrency: called");
        let adjustment = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.controller.adjust(state.metrics.queue_length())
        };

        if matches!(adjustment, Adjustment::Increased { .. })
            && let Ok(runtime) = Handle::try_current()
        {
            debug!("Scheduler::adjust_concurrency: ceiling raised, requesting dispatch");
            self.request_dispatch(&runtime);
        }
        adjustment
    }

    /// Call [`Scheduler::adjust_concurrency`] every `period` until the
    /// returned handle is aborted
    pub fn spawn_controller(&self, period: Duration) -> JoinHandle<()> {
        debug!(?period, "Scheduler::spawn_controller: called");
        let scheduler = self.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.adjust_concurrency();
            }
        })
    }

    pub fn ceiling(&self) -> usize {
        self.state().controller.ceiling()
    }

    pub fn running_count(&self) -> usize {
        self.state().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state()
            .tasks
            .values()
            .filter(|r| r.status == TaskStatus::Pending)
            .count()
    }

    /// True when no task is tracked
    pub fn is_idle(&self) -> bool {
        self.state().metrics.queue_length() == 0
    }

    /// Summary for status displays
    pub fn queue_state(&self) -> QueueState {
        let state = self.state();
        let running = state.running.len();
        QueueState {
            running,
            pending: state.tasks.len() - running,
            ceiling: state.controller.ceiling(),
            metrics: state.metrics.snapshot(),
        }
    }

    /// Snapshot of every tracked task, in submission order
    ///
    /// Scores are computed without creating value-table entries.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        debug!("Scheduler::tasks: called");
        let mut records: Vec<(u64, TaskSnapshot)> = {
            let state = self.state();
            let now = Instant::now();
            state.tasks.values().map(|r| (r.seq, unscored(r, now))).collect()
        };
        records.sort_by_key(|(seq, _)| *seq);
        self.scored(records.into_iter().map(|(_, snapshot)| snapshot).collect())
    }

    /// Snapshot of one tracked task; `None` once it has settled
    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        let snapshot = self.state().tasks.get(id).map(|r| unscored(r, Instant::now()))?;
        self.scored(vec![snapshot]).pop()
    }

    /// Fill in scores, sampling probes before taking the lock
    fn scored(&self, snapshots: Vec<TaskSnapshot>) -> Vec<TaskSnapshot> {
        let observed: Vec<(TaskSnapshot, Observation)> = snapshots
            .into_iter()
            .map(|snapshot| (snapshot, self.shared.probes.observe()))
            .collect();

        let state = self.state();
        observed
            .into_iter()
            .map(|(mut snapshot, observation)| {
                snapshot.score = state.scorer.peek_score(&snapshot.id, snapshot.urgency, observation);
                snapshot
            })
            .collect()
    }

    /// Learned value for `id` at the current state, 0 if never seen
    pub fn value_of(&self, id: &str, urgency: f64) -> f64 {
        let observation = self.shared.probes.observe();
        self.state().scorer.value_of(id, urgency, observation)
    }

    pub fn value_table_len(&self) -> usize {
        self.state().scorer.len()
    }

    /// Wait until no task is tracked
    pub async fn wait_idle(&self) {
        debug!("Scheduler::wait_idle: called");
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Validate a spec and split it into the registry entry and caller handle
fn prepare<T>(spec: TaskSpec<T>) -> Result<(Prepared, TaskHandle<T>), QueueError>
where
    T: Send + 'static,
{
    let TaskSpec { id, urgency, runnable } = spec;

    if id.is_empty() {
        debug!("prepare: empty id, rejecting");
        return Err(QueueError::EmptyId);
    }
    if !(0.0..=1.0).contains(&urgency) {
        debug!(%id, urgency, "prepare: urgency out of range, rejecting");
        return Err(QueueError::InvalidUrgency { id, urgency });
    }
    let Some(runnable) = runnable else {
        debug!(%id, "prepare: no runnable, rejecting");
        return Err(QueueError::MissingRunnable(id));
    };

    let (result_tx, result_rx) = oneshot::channel();
    let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
    let handle = TaskHandle::new(id.clone(), status_rx, result_rx);
    let prepared = Prepared {
        id,
        urgency,
        job: erase(runnable, result_tx),
        status_tx,
    };
    Ok((prepared, handle))
}

/// Snapshot with the score left at 0 until [`Scheduler::scored`] fills it
fn unscored(record: &TaskRecord, now: Instant) -> TaskSnapshot {
    TaskSnapshot {
        id: record.id.clone(),
        urgency: record.urgency,
        status: record.status,
        score: 0.0,
        waited_ms: now.duration_since(record.enqueued_at).as_millis() as u64,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("state", &self.queue_state()).finish()
    }
}
