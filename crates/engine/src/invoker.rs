//! Step invoker port and the function-registry reference adapter.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use definition::StepDefinition;
use serde_json::Value;
use thiserror::Error;

use crate::context::SagaContext;

/// Business failure raised by a step's forward or compensating action.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StepInvokeError(pub String);

impl StepInvokeError {
    /// Creates an invocation error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of one step invocation.
pub type InvokeResult = std::result::Result<Value, StepInvokeError>;

/// Boxed future returned by step handlers.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = InvokeResult> + Send + 'a>>;

/// Invokes the step bodies behind a saga.
///
/// The invoker owns argument resolution and dispatch to whatever declared
/// the steps; the engine only hands it the step definition, the owning
/// handler reference, the run context and the saga input.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    /// Runs the step's forward action.
    async fn invoke_step(
        &self,
        step: &StepDefinition,
        owner: &str,
        context: &SagaContext,
        input: &Value,
    ) -> InvokeResult;

    /// Runs the step's compensating action.
    async fn invoke_compensation(
        &self,
        step: &StepDefinition,
        owner: &str,
        context: &SagaContext,
    ) -> InvokeResult;
}

type ActionFn = Arc<dyn for<'a> Fn(&'a SagaContext, &'a Value) -> StepFuture<'a> + Send + Sync>;
type CompensationFn = Arc<dyn for<'a> Fn(&'a SagaContext) -> StepFuture<'a> + Send + Sync>;

/// Reference invoker: a registry of action name → async handler.
///
/// Stands in for the out-of-scope declaration layer; handlers are plain
/// closures keyed by the action names the definitions carry. The owner
/// reference is ignored: without the declaration layer there is nothing
/// to scope handlers to.
#[derive(Clone, Default)]
pub struct FunctionStepInvoker {
    actions: Arc<RwLock<HashMap<String, ActionFn>>>,
    compensations: Arc<RwLock<HashMap<String, CompensationFn>>>,
}

impl FunctionStepInvoker {
    /// Creates an empty invoker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a forward action handler.
    pub fn register_action<F>(&self, name: impl Into<String>, action: F)
    where
        F: for<'a> Fn(&'a SagaContext, &'a Value) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.actions.write().unwrap().insert(name.into(), Arc::new(action));
    }

    /// Registers a compensating action handler.
    pub fn register_compensation<F>(&self, name: impl Into<String>, compensation: F)
    where
        F: for<'a> Fn(&'a SagaContext) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.compensations.write().unwrap().insert(name.into(), Arc::new(compensation));
    }

    fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.read().unwrap().get(name).cloned()
    }

    fn compensation(&self, name: &str) -> Option<CompensationFn> {
        self.compensations.read().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl StepInvoker for FunctionStepInvoker {
    async fn invoke_step(
        &self,
        step: &StepDefinition,
        _owner: &str,
        context: &SagaContext,
        input: &Value,
    ) -> InvokeResult {
        let action = self
            .action(&step.action)
            .ok_or_else(|| StepInvokeError::new(format!("No action registered as '{}'", step.action)))?;
        action(context, input).await
    }

    async fn invoke_compensation(
        &self,
        step: &StepDefinition,
        _owner: &str,
        context: &SagaContext,
    ) -> InvokeResult {
        let name = step
            .compensation
            .as_deref()
            .ok_or_else(|| StepInvokeError::new(format!("Step '{}' has no compensation", step.id)))?;
        let compensation = self
            .compensation(name)
            .ok_or_else(|| StepInvokeError::new(format!("No compensation registered as '{name}'")))?;
        compensation(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> SagaContext {
        SagaContext::new("order", HashMap::new(), None)
    }

    #[tokio::test]
    async fn invokes_registered_action() {
        let invoker = FunctionStepInvoker::new();
        invoker.register_action("double", |_ctx, input| {
            Box::pin(async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            })
        });

        let step = StepDefinition::builder("calc", "double").build();
        let result = invoker
            .invoke_step(&step, "Handler", &context(), &json!(21))
            .await
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn action_sees_prior_step_results() {
        let invoker = FunctionStepInvoker::new();
        invoker.register_action("read_prior", |ctx, _input| {
            Box::pin(async move {
                ctx.result("reserve")
                    .cloned()
                    .ok_or_else(|| StepInvokeError::new("no reservation yet"))
            })
        });

        let mut ctx = context();
        ctx.mark_running("reserve");
        ctx.record_success("reserve", json!("RES-1"), 1, 3);

        let step = StepDefinition::builder("charge", "read_prior").build();
        let result = invoker
            .invoke_step(&step, "Handler", &ctx, &Value::Null)
            .await
            .unwrap();
        assert_eq!(result, json!("RES-1"));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let invoker = FunctionStepInvoker::new();
        let step = StepDefinition::builder("calc", "missing").build();

        let err = invoker
            .invoke_step(&step, "Handler", &context(), &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn invokes_registered_compensation() {
        let invoker = FunctionStepInvoker::new();
        invoker.register_compensation("release", |_ctx| Box::pin(async { Ok(json!("released")) }));

        let step = StepDefinition::builder("reserve", "reserve_action")
            .compensation("release")
            .build();
        let result = invoker
            .invoke_compensation(&step, "Handler", &context())
            .await
            .unwrap();
        assert_eq!(result, json!("released"));
    }

    #[tokio::test]
    async fn compensation_without_declaration_is_an_error() {
        let invoker = FunctionStepInvoker::new();
        let step = StepDefinition::builder("reserve", "reserve_action").build();

        let err = invoker
            .invoke_compensation(&step, "Handler", &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no compensation"));
    }
}
