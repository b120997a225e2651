//! Argument descriptors resolved against the run context.
//!
//! Handlers describe each parameter as a name plus a source, and the
//! resolver pulls the concrete values out of the context and saga input
//! at call time. The descriptor is a plain tagged union, no reflection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::SagaContext;

/// Where one handler parameter comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArgSource {
    /// The saga's input payload.
    Input,
    /// The recorded result of a prior step.
    StepResult { step_id: String },
    /// An input header.
    Header { key: String },
    /// A run-scoped variable.
    Variable { key: String },
    /// The compensation error recorded for a step.
    CompensationError { step_id: String },
}

/// One parameter of a handler signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Parameter name, for diagnostics.
    pub name: String,
    /// Where the value comes from.
    pub source: ArgSource,
}

impl ArgSpec {
    /// Creates a parameter descriptor.
    pub fn new(name: impl Into<String>, source: ArgSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Errors raised while resolving handler arguments.
#[derive(Debug, Error)]
pub enum ArgResolveError {
    /// The referenced step has no recorded result.
    #[error("Argument '{name}': no result recorded for step '{step_id}'")]
    MissingStepResult { name: String, step_id: String },

    /// The referenced header is absent.
    #[error("Argument '{name}': no header '{key}'")]
    MissingHeader { name: String, key: String },

    /// The referenced variable is absent.
    #[error("Argument '{name}': no variable '{key}'")]
    MissingVariable { name: String, key: String },

    /// The referenced step has no recorded compensation error.
    #[error("Argument '{name}': no compensation error recorded for step '{step_id}'")]
    MissingCompensationError { name: String, step_id: String },
}

/// Resolves a signature descriptor into concrete argument values.
pub fn resolve_args(
    specs: &[ArgSpec],
    context: &SagaContext,
    input: &Value,
) -> std::result::Result<Vec<Value>, ArgResolveError> {
    specs
        .iter()
        .map(|spec| match &spec.source {
            ArgSource::Input => Ok(input.clone()),
            ArgSource::StepResult { step_id } => context.result(step_id).cloned().ok_or_else(|| {
                ArgResolveError::MissingStepResult {
                    name: spec.name.clone(),
                    step_id: step_id.clone(),
                }
            }),
            ArgSource::Header { key } => {
                context
                    .header(key)
                    .cloned()
                    .ok_or_else(|| ArgResolveError::MissingHeader {
                        name: spec.name.clone(),
                        key: key.clone(),
                    })
            }
            ArgSource::Variable { key } => {
                context
                    .variable(key)
                    .cloned()
                    .ok_or_else(|| ArgResolveError::MissingVariable {
                        name: spec.name.clone(),
                        key: key.clone(),
                    })
            }
            ArgSource::CompensationError { step_id } => context
                .compensation_error(step_id)
                .map(|e| Value::String(e.to_string()))
                .ok_or_else(|| ArgResolveError::MissingCompensationError {
                    name: spec.name.clone(),
                    step_id: step_id.clone(),
                }),
        })
        .collect()
}
