//! Top-level saga engine facade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use common::CorrelationId;
use definition::SagaRegistry;
use persistence::{SagaStateRecord, SagaStateStore};
use serde_json::Value;

use crate::compensator::{
    CompensationConfig, CompensationErrorHandler, CompensationPolicy, Compensator,
};
use crate::context::SagaContext;
use crate::error::{EngineError, Result};
use crate::events::{LoggingEventSink, SagaEventSink};
use crate::invoker::StepInvoker;
use crate::orchestrator::StepOrchestrator;
use crate::outcome::{FailureReport, SagaResult};

/// Executes registered sagas end to end.
///
/// The engine resolves the definition, drives the orchestrator, rolls back
/// through the compensator on failure, and keeps the persistence and event
/// ports in sync with the run's lifecycle. It is cheap to share behind an
/// `Arc` and safe to call from concurrent tasks; every execution gets its
/// own context.
pub struct SagaEngine {
    registry: Arc<SagaRegistry>,
    invoker: Arc<dyn StepInvoker>,
    events: Arc<dyn SagaEventSink>,
    store: Option<Arc<dyn SagaStateStore>>,
    error_handler: Option<Arc<dyn CompensationErrorHandler>>,
    compensation_config: CompensationConfig,
}

impl SagaEngine {
    /// Creates an engine over the registry and invoker, logging events
    /// through tracing until a sink is configured.
    pub fn new(registry: Arc<SagaRegistry>, invoker: Arc<dyn StepInvoker>) -> Self {
        Self {
            registry,
            invoker,
            events: Arc::new(LoggingEventSink),
            store: None,
            error_handler: None,
            compensation_config: CompensationConfig::default(),
        }
    }

    /// Replaces the event sink.
    pub fn with_events(mut self, events: Arc<dyn SagaEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Configures a persistence port for crash-recovery snapshots.
    pub fn with_state_store(mut self, store: Arc<dyn SagaStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Configures the compensation error handler.
    pub fn with_error_handler(mut self, handler: Arc<dyn CompensationErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Overrides the compensation defaults.
    pub fn with_compensation_config(mut self, config: CompensationConfig) -> Self {
        self.compensation_config = config;
        self
    }

    /// Executes a saga by name.
    ///
    /// Step-level business failures do not surface as `Err`; the returned
    /// [`SagaResult`] carries `success == false` and the per-step errors.
    /// `Err` is reserved for an unknown saga name, state-store failures and
    /// compensation errors the chosen policy propagates; even then the
    /// terminal state is persisted and the completed event emitted first.
    #[tracing::instrument(skip(self, input, headers, correlation_id), fields(saga = %saga_name))]
    pub async fn execute(
        &self,
        saga_name: &str,
        input: Value,
        headers: HashMap<String, Value>,
        correlation_id: Option<CorrelationId>,
        policy: CompensationPolicy,
    ) -> Result<SagaResult> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let definition = self
            .registry
            .get(saga_name)
            .ok_or_else(|| EngineError::NotRegistered(saga_name.to_string()))?;

        let mut context = SagaContext::new(saga_name, headers, correlation_id);
        let correlation_id = *context.correlation_id();
        tracing::info!(%correlation_id, "saga execution started");

        if let Err(e) = self.events.on_start(saga_name, &correlation_id).await {
            tracing::warn!(%correlation_id, error = %e, "event sink failed on start");
        }
        if let Some(store) = &self.store {
            store
                .persist_state(SagaStateRecord::in_flight(correlation_id, saga_name))
                .await?;
        }

        let orchestrator = StepOrchestrator::new(self.invoker.clone(), self.events.clone());
        let run = orchestrator.execute(&definition, &mut context, &input).await;

        match run {
            Ok(completed) => {
                self.finalize(saga_name, &correlation_id, true).await;
                metrics::counter!("saga_completed").increment(1);
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                tracing::info!(%correlation_id, steps = completed.len(), "saga completed successfully");
                Ok(SagaResult::assemble(&definition, &context, true, None))
            }
            Err(cause) => {
                let completed = context.completed_steps().to_vec();
                let failed_step = cause.failed_step().unwrap_or_default().to_string();
                tracing::warn!(
                    %correlation_id,
                    failed_step,
                    completed = completed.len(),
                    error = %cause,
                    "saga failed, compensating"
                );

                let compensator = Compensator::new(
                    self.invoker.clone(),
                    self.events.clone(),
                    self.error_handler.clone(),
                    self.compensation_config.clone(),
                );
                let compensation = compensator
                    .compensate(policy, &definition, &completed, &mut context)
                    .await;

                let report = FailureReport::from_context(&context, &failed_step, &cause.to_string());
                tracing::warn!(
                    %correlation_id,
                    report = %serde_json::to_string(&report).unwrap_or_default(),
                    "saga failure report"
                );

                self.finalize(saga_name, &correlation_id, false).await;
                metrics::counter!("saga_failed").increment(1);
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());

                compensation?;
                Ok(SagaResult::assemble(
                    &definition,
                    &context,
                    false,
                    Some(cause.to_string()),
                ))
            }
        }
    }

    /// Persists the terminal state and emits the completed event.
    ///
    /// Runs on every exit path; failures here are logged, never allowed to
    /// mask the saga outcome.
    async fn finalize(&self, saga_name: &str, correlation_id: &CorrelationId, successful: bool) {
        if let Some(store) = &self.store
            && let Err(e) = store.mark_completed(correlation_id, successful).await
        {
            tracing::error!(%correlation_id, error = %e, "failed to persist terminal saga state");
        }
        if let Err(e) = self
            .events
            .on_completed(saga_name, correlation_id, successful)
            .await
        {
            tracing::warn!(%correlation_id, error = %e, "event sink failed on completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::FunctionStepInvoker;
    use definition::{SagaDefinition, StepDefinition};
    use persistence::{InMemorySagaStateStore, SagaExecutionStatus};
    use serde_json::json;

    fn registry_with_linear_saga() -> Arc<SagaRegistry> {
        let registry = SagaRegistry::new();
        registry
            .register(
                SagaDefinition::builder("order", "OrderHandler")
                    .step(StepDefinition::builder("reserve", "reserve_action").build())
                    .step(
                        StepDefinition::builder("charge", "charge_action")
                            .depends_on("reserve")
                            .build(),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn happy_invoker() -> Arc<FunctionStepInvoker> {
        let invoker = Arc::new(FunctionStepInvoker::new());
        invoker.register_action("reserve_action", |_ctx, _input| {
            Box::pin(async { Ok(json!("RES-1")) })
        });
        invoker.register_action("charge_action", |_ctx, _input| {
            Box::pin(async { Ok(json!("PAY-1")) })
        });
        invoker
    }

    #[tokio::test]
    async fn unknown_saga_fails_fast_without_state() {
        let store = InMemorySagaStateStore::new();
        let engine = SagaEngine::new(registry_with_linear_saga(), happy_invoker())
            .with_state_store(Arc::new(store.clone()));

        let err = engine
            .execute("ghost", Value::Null, HashMap::new(), None, CompensationPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NotRegistered(name) if name == "ghost"));
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn successful_run_persists_completed_state() {
        let store = InMemorySagaStateStore::new();
        let engine = SagaEngine::new(registry_with_linear_saga(), happy_invoker())
            .with_state_store(Arc::new(store.clone()));

        let result = engine
            .execute("order", json!({"sku": 7}), HashMap::new(), None, CompensationPolicy::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.result_of("reserve"), Some(&json!("RES-1")));
        assert_eq!(result.result_of("charge"), Some(&json!("PAY-1")));

        let record = store.get_state(&result.correlation_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaExecutionStatus::Completed);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn supplied_correlation_id_is_preserved() {
        let engine = SagaEngine::new(registry_with_linear_saga(), happy_invoker());
        let id = CorrelationId::new();

        let result = engine
            .execute("order", Value::Null, HashMap::new(), Some(id), CompensationPolicy::default())
            .await
            .unwrap();
        assert_eq!(result.correlation_id, id);
    }
}
