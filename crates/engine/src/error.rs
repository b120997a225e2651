//! Engine error types.

use definition::DefinitionError;
use persistence::StateStoreError;
use thiserror::Error;

/// Errors that can occur during saga execution.
///
/// Step-level business failures are retried inside the orchestrator and,
/// once exhausted, drive compensation; they surface to callers as
/// `SagaResult.success == false`. Only setup errors (unknown saga, bad
/// graph), state-store failures and non-absorbed compensation failures
/// escape [`crate::SagaEngine::execute`] as `Err`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No saga with this name is registered.
    #[error("Saga '{0}' is not registered")]
    NotRegistered(String),

    /// The definition graph failed validation.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A step's forward action failed on every attempt.
    #[error("Step '{step}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    /// A step's final attempt exceeded its deadline.
    #[error("Step '{step}' timed out after {timeout_ms} ms (attempt {attempts})")]
    StepTimeout {
        step: String,
        timeout_ms: u64,
        attempts: u32,
    },

    /// A compensating action failed under a policy that propagates.
    #[error("Compensation for step '{step}' failed: {message}")]
    CompensationFailed { step: String, message: String },

    /// The state store rejected an operation.
    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),

    /// A spawned step task aborted abnormally.
    #[error("Step task aborted: {0}")]
    TaskAborted(String),
}

impl EngineError {
    /// The step id that caused a step-level failure, if any.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            EngineError::StepFailed { step, .. } | EngineError::StepTimeout { step, .. } => {
                Some(step)
            }
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
