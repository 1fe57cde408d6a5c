//! Synthetic workload runner behind `sq simulate`
//!
//! Submits a burst of tasks with random urgencies, durations and failures,
//! lets the controller tune the ceiling while they run, and reports what
//! happened. The resource probe reports live in-flight load so scores react
//! to how busy the scheduler is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use eyre::{Result, eyre};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::metrics::MetricsSnapshot;
use crate::scheduler::{Scheduler, SchedulerConfig, TaskSpec};
use crate::scorer::Probes;

/// Outcome of one simulated task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub urgency: f64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub submitted: usize,
    pub elapsed_ms: u64,
    pub final_ceiling: usize,
    pub value_table_entries: usize,
    /// Task ids in the order they started running
    pub admission_order: Vec<String>,
    pub metrics: MetricsSnapshot,
    pub tasks: Vec<TaskResult>,
}

fn validate(sim: &SimulationConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&sim.failure_rate) {
        return Err(eyre!("failure-rate must be within 0.0..=1.0, got {}", sim.failure_rate));
    }
    if sim.min_duration_ms > sim.max_duration_ms {
        return Err(eyre!(
            "min-duration-ms ({}) exceeds max-duration-ms ({})",
            sim.min_duration_ms,
            sim.max_duration_ms
        ));
    }
    Ok(())
}

/// Run the configured workload to completion
pub async fn run_simulation(scheduler_config: SchedulerConfig, sim: &SimulationConfig) -> Result<SimulationReport> {
    debug!(?scheduler_config, ?sim, "run_simulation: called");
    validate(sim)?;

    let mut rng = match sim.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let cap = scheduler_config.controller.max_concurrency.max(1) as f64;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let load = in_flight.clone();
    let probes = Probes::default().with_resource_load(move || load.load(Ordering::SeqCst) as f64 / cap);

    let scheduler = Scheduler::with_probes(scheduler_config, probes);
    let controller = scheduler.spawn_controller(Duration::from_millis(sim.adjust_interval_ms));
    let admissions = Arc::new(Mutex::new(Vec::with_capacity(sim.tasks)));
    let started = Instant::now();

    let mut urgencies = Vec::with_capacity(sim.tasks);
    let mut specs = Vec::with_capacity(sim.tasks);
    for i in 0..sim.tasks {
        let id = format!("task-{:03}", i);
        let urgency = (rng.random::<f64>() * 100.0).round() / 100.0;
        let duration = Duration::from_millis(rng.random_range(sim.min_duration_ms..=sim.max_duration_ms));
        let fails = rng.random_bool(sim.failure_rate);

        let task_id = id.clone();
        let in_flight = in_flight.clone();
        let admissions = admissions.clone();
        specs.push(TaskSpec::new(id).urgency(urgency).run(async move {
            admissions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task_id.clone());
            in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            if fails {
                Err(eyre!("simulated failure in {}", task_id))
            } else {
                Ok(duration)
            }
        }));
        urgencies.push(urgency);
    }
    let handles: Vec<_> = urgencies.into_iter().zip(scheduler.submit_batch(specs)?).collect();
    info!(submitted = handles.len(), "Simulation workload submitted");

    let mut tasks = Vec::with_capacity(handles.len());
    for (urgency, handle) in handles {
        let id = handle.id().to_string();
        let result = handle.wait().await;
        tasks.push(TaskResult {
            id,
            urgency,
            succeeded: result.is_ok(),
            error: result.err().map(|e| format!("{:#}", e)),
        });
    }

    scheduler.wait_idle().await;
    controller.abort();

    let admission_order = admissions.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let report = SimulationReport {
        submitted: tasks.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        final_ceiling: scheduler.ceiling(),
        value_table_entries: scheduler.value_table_len(),
        admission_order,
        metrics: scheduler.metrics(),
        tasks,
    };
    info!(
        completed = report.metrics.completed,
        failed = report.metrics.failed,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    Ok(report)
}
