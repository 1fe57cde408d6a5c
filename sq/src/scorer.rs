//! Value estimator
//!
//! Ranks pending tasks by a learned value plus a weighted sum of urgency,
//! spare resource capacity and user context. Values live in a table keyed
//! by `(discretized state, task id)` and are nudged after every settlement
//! with a single-step temporal-difference update.
//!
//! This is a best-effort heuristic. Task ids act as actions, so learned
//! values only carry over to later submissions that reuse the same id under
//! the same discretized state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Resource load assumed when no probe is supplied or the probe misbehaves
pub const NEUTRAL_RESOURCE_LOAD: f64 = 0.5;

/// User context assumed when no probe is supplied or the probe misbehaves
pub const NEUTRAL_USER_CONTEXT: f64 = 1.0;

/// Externally supplied signal sampled on every scoring call
pub type Probe = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Weights applied to the static score factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    #[serde(default = "default_urgency_weight")]
    pub urgency: f64,

    #[serde(default = "default_resource_weight")]
    pub resource: f64,

    #[serde(rename = "user-context", default = "default_user_context_weight")]
    pub user_context: f64,
}

fn default_urgency_weight() -> f64 {
    0.4
}

fn default_resource_weight() -> f64 {
    0.3
}

fn default_user_context_weight() -> f64 {
    0.3
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            urgency: 0.4,
            resource: 0.3,
            user_context: 0.3,
        }
    }
}

/// Probe functions for resource load and user context
#[derive(Clone)]
pub struct Probes {
    resource_load: Probe,
    user_context: Probe,
}

impl Default for Probes {
    fn default() -> Self {
        Self::constant(NEUTRAL_RESOURCE_LOAD, NEUTRAL_USER_CONTEXT)
    }
}

impl std::fmt::Debug for Probes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probes").finish_non_exhaustive()
    }
}

impl Probes {
    /// Probes that always report the same values
    pub fn constant(resource_load: f64, user_context: f64) -> Self {
        Self {
            resource_load: Arc::new(move || resource_load),
            user_context: Arc::new(move || user_context),
        }
    }

    /// Replace the resource load probe
    pub fn with_resource_load(mut self, probe: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.resource_load = Arc::new(probe);
        self
    }

    /// Replace the user context probe
    pub fn with_user_context(mut self, probe: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.user_context = Arc::new(probe);
        self
    }

    /// Sample both probes, replacing anomalous readings with neutral values
    pub fn observe(&self) -> Observation {
        let raw_load = (self.resource_load)();
        let resource_load = if raw_load.is_finite() {
            raw_load.clamp(0.0, 1.0)
        } else {
            warn!(raw_load, "Resource load probe returned a non-finite value, using neutral load");
            NEUTRAL_RESOURCE_LOAD
        };

        let raw_context = (self.user_context)();
        let user_context = if raw_context.is_finite() {
            raw_context
        } else {
            warn!(raw_context, "User context probe returned a non-finite value, using neutral context");
            NEUTRAL_USER_CONTEXT
        };

        Observation {
            resource_load,
            user_context,
        }
    }
}

/// One sample of the external signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub resource_load: f64,
    pub user_context: f64,
}

/// Discretized state, each component rounded to hundredths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    resource_load: i64,
    user_context: i64,
    urgency: i64,
}

impl StateKey {
    pub fn new(observation: Observation, urgency: f64) -> Self {
        Self {
            resource_load: hundredths(observation.resource_load),
            user_context: hundredths(observation.user_context),
            urgency: hundredths(urgency),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "load={:.2} ctx={:.2} urgency={:.2}",
            self.resource_load as f64 / 100.0,
            self.user_context as f64 / 100.0,
            self.urgency as f64 / 100.0
        )
    }
}

fn hundredths(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

/// Learned value table plus scoring weights
///
/// Probes are sampled by the caller with [`Probes::observe`] and passed in
/// as an [`Observation`].
#[derive(Debug)]
pub struct ValueEstimator {
    weights: Weights,
    learning_rate: f64,
    discount_factor: f64,
    table: HashMap<StateKey, HashMap<String, f64>>,
}

impl ValueEstimator {
    pub fn new(weights: Weights, learning_rate: f64, discount_factor: f64) -> Self {
        debug!(?weights, learning_rate, discount_factor, "ValueEstimator::new: called");
        Self {
            weights,
            learning_rate,
            discount_factor,
            table: HashMap::new(),
        }
    }

    /// Score a task, creating its value entry at 0 on first access
    pub fn score(&mut self, task_id: &str, urgency: f64, observation: Observation) -> f64 {
        let value = *self
            .table
            .entry(StateKey::new(observation, urgency))
            .or_default()
            .entry(task_id.to_string())
            .or_insert(0.0);
        let score = self.combine(value, urgency, observation);
        debug!(%task_id, urgency, value, score, "ValueEstimator::score: called");
        score
    }

    /// Score a task without touching the value table
    pub fn peek_score(&self, task_id: &str, urgency: f64, observation: Observation) -> f64 {
        let value = self.value_of(task_id, urgency, observation);
        self.combine(value, urgency, observation)
    }

    fn combine(&self, value: f64, urgency: f64, observation: Observation) -> f64 {
        value
            + self.weights.urgency * urgency
            + self.weights.resource * (1.0 - observation.resource_load)
            + self.weights.user_context * observation.user_context
    }

    fn lookup(&self, state: &StateKey, task_id: &str) -> f64 {
        self.table
            .get(state)
            .and_then(|values| values.get(task_id))
            .copied()
            .unwrap_or(0.0)
    }

    /// Apply one TD step for `task_id` and return the new value
    ///
    /// The next state is approximated by the current one, so the bootstrap
    /// term is the best value among `others` (the other pending tasks) at
    /// that same state, or 0 when there are none.
    pub fn update<'a>(
        &mut self,
        task_id: &str,
        urgency: f64,
        observation: Observation,
        reward: f64,
        others: impl IntoIterator<Item = &'a str>,
    ) -> f64 {
        let state = StateKey::new(observation, urgency);
        let current = self.lookup(&state, task_id);

        let max_next = others
            .into_iter()
            .filter(|other| *other != task_id)
            .map(|other| self.lookup(&state, other))
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
            .unwrap_or(0.0);

        let updated =
            (1.0 - self.learning_rate) * current + self.learning_rate * (reward + self.discount_factor * max_next);
        debug!(%task_id, %state, current, max_next, reward, updated, "ValueEstimator::update: called");

        self.table.entry(state).or_default().insert(task_id.to_string(), updated);
        updated
    }

    /// Learned value for a task in the observed state, 0 if never seen
    pub fn value_of(&self, task_id: &str, urgency: f64, observation: Observation) -> f64 {
        self.lookup(&StateKey::new(observation, urgency), task_id)
    }

    /// Number of entries in the value table
    pub fn len(&self) -> usize {
        self.table.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
