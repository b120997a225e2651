//! Layer-by-layer step execution with bounded concurrency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use definition::{SagaDefinition, StepDefinition};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::context::SagaContext;
use crate::error::{EngineError, Result};
use crate::events::SagaEventSink;
use crate::invoker::StepInvoker;
use crate::retry::BackoffPolicy;

/// Executes a saga's forward path.
///
/// Steps are grouped into topology layers; layers run strictly in order
/// while the steps of one layer run as concurrent tasks under a single
/// cancellation scope, optionally gated by the definition's
/// `layer_concurrency`. A step that exhausts its attempts aborts its
/// in-flight siblings and the remaining layers.
pub struct StepOrchestrator {
    invoker: Arc<dyn StepInvoker>,
    events: Arc<dyn SagaEventSink>,
}

/// Outcome of one step task.
struct StepRun {
    step_id: String,
    attempts: u32,
    latency_ms: u64,
    outcome: StepRunOutcome,
}

enum StepRunOutcome {
    Success(Value),
    Failed(String),
    TimedOut(u64),
}

/// Result of a single attempt, before retry bookkeeping.
enum Attempt {
    Ok(Value),
    Err(String),
    TimedOut,
}

impl StepOrchestrator {
    /// Creates an orchestrator over the given ports.
    pub fn new(invoker: Arc<dyn StepInvoker>, events: Arc<dyn SagaEventSink>) -> Self {
        Self { invoker, events }
    }

    /// Runs every layer of the definition, mutating the context as steps
    /// settle. Returns the ids that reached Done in completion order, or
    /// the causing error once a step exhausts its attempts.
    #[tracing::instrument(skip_all, fields(saga = %definition.name, correlation_id = %context.correlation_id()))]
    pub async fn execute(
        &self,
        definition: &SagaDefinition,
        context: &mut SagaContext,
        input: &Value,
    ) -> Result<Vec<String>> {
        context.set_topology(
            definition.topology_layers().to_vec(),
            definition.dependency_map(),
        );

        let saga = context.saga_name().to_string();
        let correlation_id = *context.correlation_id();
        let input = Arc::new(input.clone());

        for layer in definition.topology_layers() {
            let limiter = (definition.layer_concurrency > 0)
                .then(|| Arc::new(Semaphore::new(definition.layer_concurrency)));
            let snapshot = Arc::new(context.clone());
            let mut tasks: JoinSet<StepRun> = JoinSet::new();

            for step_id in layer {
                context.mark_running(step_id);
                let step = definition.steps[step_id.as_str()].clone();
                tasks.spawn(run_step(
                    step,
                    definition.handler.clone(),
                    Arc::clone(&self.invoker),
                    Arc::clone(&snapshot),
                    Arc::clone(&input),
                    limiter.clone(),
                ));
            }

            let mut failure: Option<EngineError> = None;
            while let Some(joined) = tasks.join_next().await {
                let run = match joined {
                    Ok(run) => run,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(EngineError::TaskAborted(e.to_string()));
                            tasks.abort_all();
                        }
                        continue;
                    }
                };

                match run.outcome {
                    StepRunOutcome::Success(value) => {
                        context.record_success(&run.step_id, value, run.attempts, run.latency_ms);
                        metrics::histogram!("saga_step_duration_seconds")
                            .record(run.latency_ms as f64 / 1000.0);
                        if let Err(e) = self
                            .events
                            .on_step_success(&saga, &correlation_id, &run.step_id)
                            .await
                        {
                            tracing::warn!(step = %run.step_id, error = %e, "event sink failed");
                        }
                    }
                    StepRunOutcome::Failed(message) => {
                        context.record_failure(&run.step_id, &message, run.attempts, run.latency_ms);
                        metrics::counter!("saga_step_failures_total").increment(1);
                        if let Err(e) = self
                            .events
                            .on_step_failed(&saga, &correlation_id, &run.step_id, &message)
                            .await
                        {
                            tracing::warn!(step = %run.step_id, error = %e, "event sink failed");
                        }
                        if failure.is_none() {
                            tracing::warn!(step = %run.step_id, attempts = run.attempts, error = %message, "step failed, aborting layer");
                            failure = Some(EngineError::StepFailed {
                                step: run.step_id,
                                attempts: run.attempts,
                                message,
                            });
                            tasks.abort_all();
                        }
                    }
                    StepRunOutcome::TimedOut(timeout_ms) => {
                        let message = format!("timed out after {timeout_ms} ms");
                        context.record_failure(&run.step_id, &message, run.attempts, run.latency_ms);
                        metrics::counter!("saga_step_failures_total").increment(1);
                        if let Err(e) = self
                            .events
                            .on_step_failed(&saga, &correlation_id, &run.step_id, &message)
                            .await
                        {
                            tracing::warn!(step = %run.step_id, error = %e, "event sink failed");
                        }
                        if failure.is_none() {
                            tracing::warn!(step = %run.step_id, timeout_ms, "step timed out, aborting layer");
                            failure = Some(EngineError::StepTimeout {
                                step: run.step_id,
                                timeout_ms,
                                attempts: run.attempts,
                            });
                            tasks.abort_all();
                        }
                    }
                }
            }

            if let Some(err) = failure {
                return Err(err);
            }
        }

        Ok(context.completed_steps().to_vec())
    }
}

/// Runs one step to settlement: attempts with timeout and backoff until
/// success or exhaustion. Latency spans all attempts of this step.
async fn run_step(
    step: StepDefinition,
    owner: String,
    invoker: Arc<dyn StepInvoker>,
    context: Arc<SagaContext>,
    input: Arc<Value>,
    limiter: Option<Arc<Semaphore>>,
) -> StepRun {
    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    let started = Instant::now();
    let backoff = BackoffPolicy::from_step(&step);
    let max_attempts = step.retry.saturating_add(1);
    let mut attempt: u32 = 1;

    loop {
        let attempt_result = if step.timeout_ms > 0 {
            match timeout(
                Duration::from_millis(step.timeout_ms),
                invoker.invoke_step(&step, &owner, &context, &input),
            )
            .await
            {
                Ok(Ok(value)) => Attempt::Ok(value),
                Ok(Err(e)) => Attempt::Err(e.to_string()),
                Err(_) => Attempt::TimedOut,
            }
        } else {
            match invoker.invoke_step(&step, &owner, &context, &input).await {
                Ok(value) => Attempt::Ok(value),
                Err(e) => Attempt::Err(e.to_string()),
            }
        };

        let outcome = match attempt_result {
            Attempt::Ok(value) => {
                return StepRun {
                    step_id: step.id,
                    attempts: attempt,
                    latency_ms: started.elapsed().as_millis() as u64,
                    outcome: StepRunOutcome::Success(value),
                };
            }
            Attempt::Err(message) => StepRunOutcome::Failed(message),
            Attempt::TimedOut => StepRunOutcome::TimedOut(step.timeout_ms),
        };

        if attempt < max_attempts {
            tracing::debug!(step = %step.id, attempt, "attempt failed, backing off");
            sleep(backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
            continue;
        }

        return StepRun {
            step_id: step.id,
            attempts: attempt,
            latency_ms: started.elapsed().as_millis() as u64,
            outcome,
        };
    }
}
