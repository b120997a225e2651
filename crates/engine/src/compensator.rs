//! Rollback of completed steps under five compensation policies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use definition::{SagaDefinition, StepDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::context::SagaContext;
use crate::error::{EngineError, Result};
use crate::events::SagaEventSink;
use crate::invoker::StepInvoker;
use crate::retry::BackoffPolicy;

/// Algorithm governing order, concurrency and error tolerance of rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    /// Reverse completion order, one at a time; the first error halts
    /// further compensation and propagates.
    #[default]
    StrictSequential,

    /// Reverse topology-layer order; each layer compensates concurrently
    /// and is awaited whole; a failure aborts the earlier layers.
    GroupedParallel,

    /// Reverse completion order; each compensation is retried with
    /// exponential backoff; exhaustion halts further compensation and
    /// propagates.
    RetryWithBackoff,

    /// Reverse completion order; after three consecutive failures the
    /// circuit opens and the remaining compensations are abandoned.
    CircuitBreaker,

    /// Every eligible step is compensated concurrently; failures are
    /// reported but never halt the sweep.
    BestEffortParallel,
}

impl CompensationPolicy {
    /// Returns the policy name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationPolicy::StrictSequential => "strict_sequential",
            CompensationPolicy::GroupedParallel => "grouped_parallel",
            CompensationPolicy::RetryWithBackoff => "retry_with_backoff",
            CompensationPolicy::CircuitBreaker => "circuit_breaker",
            CompensationPolicy::BestEffortParallel => "best_effort_parallel",
        }
    }
}

impl std::fmt::Display for CompensationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback invoked when a compensation fails under a reporting policy.
#[async_trait]
pub trait CompensationErrorHandler: Send + Sync {
    /// Reports one failed compensation.
    async fn handle(&self, saga_name: &str, step_id: &str, error: &str, context: &SagaContext);
}

/// Defaults applied when a step carries no compensation overrides.
#[derive(Debug, Clone)]
pub struct CompensationConfig {
    /// Attempts per compensation under RetryWithBackoff.
    pub default_retry: u32,
    /// Backoff base between compensation attempts.
    pub default_backoff_ms: u64,
    /// Consecutive failures that open the circuit.
    pub circuit_failure_threshold: u32,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            default_retry: 3,
            default_backoff_ms: 1_000,
            circuit_failure_threshold: 3,
        }
    }
}

/// Rolls back the completed portion of a failed run.
pub struct Compensator {
    invoker: Arc<dyn StepInvoker>,
    events: Arc<dyn SagaEventSink>,
    error_handler: Option<Arc<dyn CompensationErrorHandler>>,
    config: CompensationConfig,
}

impl Compensator {
    /// Creates a compensator over the given ports.
    pub fn new(
        invoker: Arc<dyn StepInvoker>,
        events: Arc<dyn SagaEventSink>,
        error_handler: Option<Arc<dyn CompensationErrorHandler>>,
        config: CompensationConfig,
    ) -> Self {
        Self {
            invoker,
            events,
            error_handler,
            config,
        }
    }

    /// Compensates the completed steps under the given policy.
    ///
    /// `completed` is the forward completion order; only steps that
    /// declare a compensating action are touched. Mutates the context with
    /// per-step compensation results and errors.
    #[tracing::instrument(skip_all, fields(saga = %definition.name, correlation_id = %context.correlation_id(), policy = %policy))]
    pub async fn compensate(
        &self,
        policy: CompensationPolicy,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        tracing::info!(steps = completed.len(), "starting compensation");
        metrics::counter!("saga_compensation_runs_total").increment(1);
        match policy {
            CompensationPolicy::StrictSequential => {
                self.strict_sequential(definition, completed, context).await
            }
            CompensationPolicy::GroupedParallel => {
                self.grouped_parallel(definition, completed, context).await
            }
            CompensationPolicy::RetryWithBackoff => {
                self.retry_with_backoff(definition, completed, context).await
            }
            CompensationPolicy::CircuitBreaker => {
                self.circuit_breaker(definition, completed, context).await
            }
            CompensationPolicy::BestEffortParallel => {
                self.best_effort_parallel(definition, completed, context).await
            }
        }
    }

    async fn strict_sequential(
        &self,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        for step_id in completed.iter().rev() {
            let step = &definition.steps[step_id.as_str()];
            if !step.has_compensation() {
                continue;
            }
            let outcome =
                invoke_compensation_once(&*self.invoker, step, &definition.handler, context).await;
            self.settle(context, step_id, &outcome).await;
            if let Err(message) = outcome {
                return Err(EngineError::CompensationFailed {
                    step: step_id.clone(),
                    message,
                });
            }
        }
        Ok(())
    }

    async fn grouped_parallel(
        &self,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        let completed_set: HashSet<&str> = completed.iter().map(String::as_str).collect();
        let layers = context.topology_layers().to_vec();

        for layer in layers.iter().rev() {
            let targets: Vec<String> = layer
                .iter()
                .filter(|id| {
                    completed_set.contains(id.as_str())
                        && definition.steps[id.as_str()].has_compensation()
                })
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }

            let snapshot = Arc::new(context.clone());
            let mut tasks: JoinSet<(String, std::result::Result<Value, String>)> = JoinSet::new();
            for step_id in targets {
                let step = definition.steps[step_id.as_str()].clone();
                let owner = definition.handler.clone();
                let invoker = Arc::clone(&self.invoker);
                let snapshot = Arc::clone(&snapshot);
                tasks.spawn(async move {
                    let outcome =
                        invoke_compensation_once(&*invoker, &step, &owner, &snapshot).await;
                    (step_id, outcome)
                });
            }

            let mut first_failure: Option<(String, String)> = None;
            while let Some(joined) = tasks.join_next().await {
                let Ok((step_id, outcome)) = joined else {
                    continue;
                };
                self.settle(context, &step_id, &outcome).await;
                if first_failure.is_none()
                    && let Err(message) = outcome
                {
                    first_failure = Some((step_id, message));
                }
            }

            if let Some((step, message)) = first_failure {
                tracing::warn!(step = %step, "layer compensation failed, aborting earlier layers");
                return Err(EngineError::CompensationFailed { step, message });
            }
        }
        Ok(())
    }

    async fn retry_with_backoff(
        &self,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        for step_id in completed.iter().rev() {
            let step = &definition.steps[step_id.as_str()];
            if !step.has_compensation() {
                continue;
            }

            let max_attempts = step
                .compensation_retry
                .unwrap_or(self.config.default_retry)
                .max(1);
            let backoff = BackoffPolicy::new(
                step.compensation_backoff_ms
                    .unwrap_or(self.config.default_backoff_ms),
            );

            let mut attempt: u32 = 1;
            let outcome = loop {
                match invoke_compensation_once(&*self.invoker, step, &definition.handler, context)
                    .await
                {
                    Ok(value) => break Ok(value),
                    Err(message) if attempt < max_attempts => {
                        tracing::warn!(
                            step = %step_id,
                            attempt,
                            max_attempts,
                            error = %message,
                            "compensation attempt failed, backing off"
                        );
                        sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    Err(message) => break Err(message),
                }
            };

            self.settle(context, step_id, &outcome).await;
            if let Err(message) = outcome {
                self.report(step_id, &message, context).await;
                return Err(EngineError::CompensationFailed {
                    step: step_id.clone(),
                    message,
                });
            }
        }
        Ok(())
    }

    async fn circuit_breaker(
        &self,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        let mut consecutive_failures: u32 = 0;
        let mut critical_failure: Option<(String, String)> = None;

        for step_id in completed.iter().rev() {
            let step = &definition.steps[step_id.as_str()];
            if !step.has_compensation() {
                continue;
            }

            let outcome =
                invoke_compensation_once(&*self.invoker, step, &definition.handler, context).await;
            self.settle(context, step_id, &outcome).await;

            match outcome {
                Ok(_) => consecutive_failures = 0,
                Err(message) => {
                    consecutive_failures += 1;
                    if step.critical && critical_failure.is_none() {
                        critical_failure = Some((step_id.clone(), message));
                    }
                    if consecutive_failures >= self.config.circuit_failure_threshold {
                        tracing::warn!(
                            failures = consecutive_failures,
                            "compensation circuit open, abandoning remaining compensations"
                        );
                        break;
                    }
                }
            }
        }

        if let Some((step, message)) = critical_failure {
            return Err(EngineError::CompensationFailed { step, message });
        }
        Ok(())
    }

    async fn best_effort_parallel(
        &self,
        definition: &SagaDefinition,
        completed: &[String],
        context: &mut SagaContext,
    ) -> Result<()> {
        let targets: Vec<String> = completed
            .iter()
            .filter(|id| definition.steps[id.as_str()].has_compensation())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let snapshot = Arc::new(context.clone());
        let mut tasks: JoinSet<(String, std::result::Result<Value, String>)> = JoinSet::new();
        for step_id in targets {
            let step = definition.steps[step_id.as_str()].clone();
            let owner = definition.handler.clone();
            let invoker = Arc::clone(&self.invoker);
            let snapshot = Arc::clone(&snapshot);
            tasks.spawn(async move {
                let outcome = invoke_compensation_once(&*invoker, &step, &owner, &snapshot).await;
                (step_id, outcome)
            });
        }

        let mut failures: Vec<(String, String)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((step_id, outcome)) = joined else {
                continue;
            };
            self.settle(context, &step_id, &outcome).await;
            if let Err(message) = outcome {
                failures.push((step_id, message));
            }
        }

        for (step_id, message) in &failures {
            self.report(step_id, message, context).await;
        }

        if let Some((step, message)) = failures
            .into_iter()
            .find(|(id, _)| definition.steps[id.as_str()].critical)
        {
            return Err(EngineError::CompensationFailed { step, message });
        }
        Ok(())
    }

    /// Applies one compensation outcome to the context and emits the
    /// compensated event with its error-or-none.
    async fn settle(
        &self,
        context: &mut SagaContext,
        step_id: &str,
        outcome: &std::result::Result<Value, String>,
    ) {
        let correlation_id = *context.correlation_id();
        let saga = context.saga_name().to_string();
        match outcome {
            Ok(value) => {
                context.record_compensation_success(step_id, value.clone());
                metrics::counter!("saga_compensations_total").increment(1);
            }
            Err(message) => {
                context.record_compensation_failure(step_id, message);
                metrics::counter!("saga_compensation_failures_total").increment(1);
            }
        }
        if let Err(e) = self
            .events
            .on_compensated(&saga, &correlation_id, step_id, outcome.as_ref().err().map(String::as_str))
            .await
        {
            tracing::warn!(step = %step_id, error = %e, "event sink failed");
        }
    }

    /// Routes one failed compensation to the configured error handler.
    async fn report(&self, step_id: &str, message: &str, context: &SagaContext) {
        if let Some(handler) = &self.error_handler {
            handler
                .handle(context.saga_name(), step_id, message, context)
                .await;
        }
    }
}

/// Invokes one compensating action, honoring the step's compensation
/// timeout override when present.
async fn invoke_compensation_once(
    invoker: &dyn StepInvoker,
    step: &StepDefinition,
    owner: &str,
    context: &SagaContext,
) -> std::result::Result<Value, String> {
    match step.compensation_timeout_ms {
        Some(timeout_ms) if timeout_ms > 0 => {
            match timeout(
                Duration::from_millis(timeout_ms),
                invoker.invoke_compensation(step, owner, context),
            )
            .await
            {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("compensation timed out after {timeout_ms} ms")),
            }
        }
        _ => invoker
            .invoke_compensation(step, owner, context)
            .await
            .map_err(|e| e.to_string()),
    }
}
