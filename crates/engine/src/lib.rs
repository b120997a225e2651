//! Saga execution and compensation engine.
//!
//! This crate runs registered saga definitions: it layers steps by their
//! dependencies, executes each layer with bounded concurrency, retries
//! failed attempts with exponential backoff, enforces per-attempt
//! timeouts, and, when a step fails for good, rolls the completed steps
//! back under one of five compensation policies.
//!
//! The engine performs no I/O of its own. Step bodies are invoked through
//! the [`StepInvoker`] port, execution state is snapshotted through the
//! persistence port, and lifecycle events flow through the
//! [`SagaEventSink`] port. Business failures never escape
//! [`SagaEngine::execute`] as errors; callers inspect the returned
//! [`SagaResult`].

pub mod args;
pub mod compensator;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod invoker;
pub mod orchestrator;
pub mod outcome;
pub mod recovery;
pub mod retry;

pub use common::CorrelationId;

pub use args::{ArgResolveError, ArgSource, ArgSpec, resolve_args};
pub use compensator::{
    CompensationConfig, CompensationErrorHandler, CompensationPolicy, Compensator,
};
pub use context::{SagaContext, StepStatus};
pub use engine::SagaEngine;
pub use error::{EngineError, Result};
pub use events::{
    CompositeEventSink, EventSinkError, LoggingEventSink, RecordedEvent, RecordingEventSink,
    SagaEventSink,
};
pub use invoker::{FunctionStepInvoker, StepInvokeError, StepInvoker};
pub use orchestrator::StepOrchestrator;
pub use outcome::{FailureReport, SagaResult, StepOutcome};
pub use recovery::RecoveryService;
pub use retry::BackoffPolicy;
