//! Per-run execution context and step status machine.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The state of one step within a saga run.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Done ──► Compensated
///                       └──► Failed
/// ```
/// Pending is implicit: steps never started are absent from the context's
/// status map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    /// Step has not started.
    #[default]
    Pending,

    /// Step's forward action is executing.
    Running,

    /// Forward action succeeded.
    Done,

    /// Forward action failed on every attempt.
    Failed,

    /// Step was rolled back after completing.
    Compensated,
}

impl StepStatus {
    /// Returns true once the forward action has finished, either way.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed | StepStatus::Compensated)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Done => "Done",
            StepStatus::Failed => "Failed",
            StepStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable state of one saga execution.
///
/// One instance exists per run and is never shared across concurrent runs.
/// The orchestrator and compensator mutate it on behalf of the run;
/// concurrent step tasks only ever see an immutable snapshot, so the
/// context itself needs no locking.
#[derive(Debug, Clone)]
pub struct SagaContext {
    correlation_id: CorrelationId,
    saga_name: String,
    headers: HashMap<String, Value>,
    variables: HashMap<String, Value>,
    started_at: DateTime<Utc>,
    step_results: HashMap<String, Value>,
    step_statuses: HashMap<String, StepStatus>,
    step_attempts: HashMap<String, u32>,
    step_latencies_ms: HashMap<String, u64>,
    step_started_at: HashMap<String, DateTime<Utc>>,
    step_errors: HashMap<String, String>,
    compensation_results: HashMap<String, Value>,
    compensation_errors: HashMap<String, String>,
    idempotency_keys: HashSet<String>,
    completed_steps: Vec<String>,
    topology_layers: Vec<Vec<String>>,
    dependency_map: HashMap<String, Vec<String>>,
}

impl SagaContext {
    /// Creates a fresh context for one execution, generating a correlation
    /// ID when none is supplied.
    pub fn new(
        saga_name: impl Into<String>,
        headers: HashMap<String, Value>,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_default(),
            saga_name: saga_name.into(),
            headers,
            variables: HashMap::new(),
            started_at: Utc::now(),
            step_results: HashMap::new(),
            step_statuses: HashMap::new(),
            step_attempts: HashMap::new(),
            step_latencies_ms: HashMap::new(),
            step_started_at: HashMap::new(),
            step_errors: HashMap::new(),
            compensation_results: HashMap::new(),
            compensation_errors: HashMap::new(),
            idempotency_keys: HashSet::new(),
            completed_steps: Vec::new(),
            topology_layers: Vec::new(),
            dependency_map: HashMap::new(),
        }
    }

    /// Correlation ID of this run.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Name of the saga being executed.
    pub fn saga_name(&self) -> &str {
        &self.saga_name
    }

    /// When this run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Immutable input headers.
    pub fn headers(&self) -> &HashMap<String, Value> {
        &self.headers
    }

    /// Looks up a single header.
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// Sets a run-scoped variable.
    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Looks up a run-scoped variable.
    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Records an idempotency key; returns false if it was already seen.
    pub fn add_idempotency_key(&mut self, key: impl Into<String>) -> bool {
        self.idempotency_keys.insert(key.into())
    }

    /// Returns true if the idempotency key was already recorded.
    pub fn has_idempotency_key(&self, key: &str) -> bool {
        self.idempotency_keys.contains(key)
    }

    /// Stores the computed topology for this run.
    pub fn set_topology(
        &mut self,
        layers: Vec<Vec<String>>,
        dependency_map: HashMap<String, Vec<String>>,
    ) {
        self.topology_layers = layers;
        self.dependency_map = dependency_map;
    }

    /// Topology layers computed for this run.
    pub fn topology_layers(&self) -> &[Vec<String>] {
        &self.topology_layers
    }

    /// Dependency map computed for this run.
    pub fn dependency_map(&self) -> &HashMap<String, Vec<String>> {
        &self.dependency_map
    }

    /// Marks a step as running and stamps its start time.
    pub fn mark_running(&mut self, step_id: &str) {
        self.step_statuses.insert(step_id.to_string(), StepStatus::Running);
        self.step_started_at.insert(step_id.to_string(), Utc::now());
    }

    /// Records a successful step and appends it to the completion order.
    pub fn record_success(&mut self, step_id: &str, result: Value, attempts: u32, latency_ms: u64) {
        self.step_statuses.insert(step_id.to_string(), StepStatus::Done);
        self.step_results.insert(step_id.to_string(), result);
        self.step_attempts.insert(step_id.to_string(), attempts);
        self.step_latencies_ms.insert(step_id.to_string(), latency_ms);
        self.completed_steps.push(step_id.to_string());
    }

    /// Records a step that failed on every attempt.
    pub fn record_failure(&mut self, step_id: &str, error: &str, attempts: u32, latency_ms: u64) {
        self.step_statuses.insert(step_id.to_string(), StepStatus::Failed);
        self.step_errors.insert(step_id.to_string(), error.to_string());
        self.step_attempts.insert(step_id.to_string(), attempts);
        self.step_latencies_ms.insert(step_id.to_string(), latency_ms);
    }

    /// Records a successful compensation, moving the step to Compensated.
    pub fn record_compensation_success(&mut self, step_id: &str, result: Value) {
        self.compensation_results.insert(step_id.to_string(), result);
        self.step_statuses.insert(step_id.to_string(), StepStatus::Compensated);
    }

    /// Records a failed compensation; the step keeps its Done status.
    pub fn record_compensation_failure(&mut self, step_id: &str, error: &str) {
        self.compensation_errors.insert(step_id.to_string(), error.to_string());
    }

    /// Status of a step, if it was ever started.
    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_statuses.get(step_id).copied()
    }

    /// Result of a step's forward action.
    pub fn result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    /// Attempts consumed by a step.
    pub fn attempts(&self, step_id: &str) -> u32 {
        self.step_attempts.get(step_id).copied().unwrap_or(0)
    }

    /// Latency of a step's forward execution in milliseconds.
    pub fn latency_ms(&self, step_id: &str) -> u64 {
        self.step_latencies_ms.get(step_id).copied().unwrap_or(0)
    }

    /// When a step first started, if it was ever started.
    pub fn step_started_at(&self, step_id: &str) -> Option<DateTime<Utc>> {
        self.step_started_at.get(step_id).copied()
    }

    /// Error recorded for a failed step.
    pub fn error(&self, step_id: &str) -> Option<&str> {
        self.step_errors.get(step_id).map(String::as_str)
    }

    /// Result of a step's compensating action.
    pub fn compensation_result(&self, step_id: &str) -> Option<&Value> {
        self.compensation_results.get(step_id)
    }

    /// Error recorded for a failed compensation.
    pub fn compensation_error(&self, step_id: &str) -> Option<&str> {
        self.compensation_errors.get(step_id).map(String::as_str)
    }

    /// All compensation errors keyed by step id.
    pub fn compensation_errors(&self) -> &HashMap<String, String> {
        &self.compensation_errors
    }

    /// Steps that reached Done, in completion order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Steps that were rolled back, in no particular order.
    pub fn compensated_steps(&self) -> Vec<String> {
        self.step_statuses
            .iter()
            .filter(|(_, status)| **status == StepStatus::Compensated)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
