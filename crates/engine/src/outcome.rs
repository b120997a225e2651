//! Immutable result snapshots assembled after a run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use definition::SagaDefinition;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{SagaContext, StepStatus};

/// Terminal snapshot of one step within a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Final status; Pending for steps never reached.
    pub status: StepStatus,
    /// Attempts consumed by the forward action.
    pub attempts: u32,
    /// Forward execution latency in milliseconds.
    pub latency_ms: u64,
    /// Forward result for steps that reached Done.
    pub result: Option<Value>,
    /// Error for steps that failed.
    pub error: Option<String>,
    /// Whether the step was rolled back.
    pub compensated: bool,
    /// When the forward action first started.
    pub started_at: Option<DateTime<Utc>>,
    /// Result of the compensating action, if it ran and succeeded.
    pub compensation_result: Option<Value>,
    /// Error of the compensating action, if it ran and failed.
    pub compensation_error: Option<String>,
}

/// Terminal snapshot of one saga execution.
///
/// Contains an outcome for every step the definition declares, including
/// those never reached. Business failures are expressed through
/// `success == false` and the per-step errors, never as panics or `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaResult {
    /// Name of the executed saga.
    pub saga_name: String,
    /// Correlation ID of the run.
    pub correlation_id: CorrelationId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal state.
    pub completed_at: DateTime<Utc>,
    /// Whether every step completed.
    pub success: bool,
    /// Top-level error for failed runs.
    pub error: Option<String>,
    /// Input headers the run was started with.
    pub headers: HashMap<String, Value>,
    /// Outcome per step, in declaration order.
    pub steps: IndexMap<String, StepOutcome>,
}

impl SagaResult {
    /// Assembles the result from the run's context, synthesizing a
    /// Pending outcome for every step that was never started.
    pub fn assemble(
        definition: &SagaDefinition,
        context: &SagaContext,
        success: bool,
        error: Option<String>,
    ) -> Self {
        let steps = definition
            .steps
            .keys()
            .map(|id| {
                let status = context.status(id).unwrap_or_default();
                let outcome = StepOutcome {
                    status,
                    attempts: context.attempts(id),
                    latency_ms: context.latency_ms(id),
                    result: context.result(id).cloned(),
                    error: context.error(id).map(str::to_string),
                    compensated: status == StepStatus::Compensated,
                    started_at: context.step_started_at(id),
                    compensation_result: context.compensation_result(id).cloned(),
                    compensation_error: context.compensation_error(id).map(str::to_string),
                };
                (id.clone(), outcome)
            })
            .collect();

        Self {
            saga_name: context.saga_name().to_string(),
            correlation_id: *context.correlation_id(),
            started_at: context.started_at(),
            completed_at: Utc::now(),
            success,
            error,
            headers: context.headers().clone(),
            steps,
        }
    }

    /// The recorded forward result of a step that reached Done (or was
    /// later compensated); None for steps that failed or never started.
    pub fn result_of(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id).and_then(|outcome| outcome.result.as_ref())
    }

    /// Ids of steps that failed, in declaration order.
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, o)| o.status == StepStatus::Failed)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Ids of steps that were rolled back, in declaration order.
    pub fn compensated_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, o)| o.compensated)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Immutable summary of a failed run, for audit and alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    /// Name of the failed saga.
    pub saga_name: String,
    /// Correlation ID of the run.
    pub correlation_id: CorrelationId,
    /// The step whose exhaustion failed the saga.
    pub failed_step_id: String,
    /// The causing error.
    pub error: String,
    /// Steps that had completed before the failure, in completion order.
    pub completed_steps: Vec<String>,
    /// Steps that were rolled back.
    pub compensated_steps: Vec<String>,
    /// Compensation errors keyed by step id.
    pub compensation_errors: HashMap<String, String>,
}

impl FailureReport {
    /// Builds the report from the run's context after compensation ran.
    pub fn from_context(context: &SagaContext, failed_step_id: &str, error: &str) -> Self {
        let mut compensated = context.compensated_steps();
        compensated.sort();
        Self {
            saga_name: context.saga_name().to_string(),
            correlation_id: *context.correlation_id(),
            failed_step_id: failed_step_id.to_string(),
            error: error.to_string(),
            completed_steps: context.completed_steps().to_vec(),
            compensated_steps: compensated,
            compensation_errors: context.compensation_errors().clone(),
        }
    }
}
