//! Definition validation errors.

use thiserror::Error;

/// Errors raised while building or registering saga definitions.
///
/// These are programmer errors: a definition that fails validation is
/// rejected at build time, before any execution state exists.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The saga declares no steps.
    #[error("Saga '{saga}' has no steps")]
    EmptySaga { saga: String },

    /// Two steps share the same id.
    #[error("Saga '{saga}' declares step '{step}' more than once")]
    DuplicateStep { saga: String, step: String },

    /// A step depends on an id that is not part of the saga.
    #[error("Step '{step}' in saga '{saga}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        saga: String,
        step: String,
        dependency: String,
    },

    /// The dependency graph contains a cycle (self-dependencies included).
    #[error("Saga '{saga}' has a dependency cycle involving steps {steps:?}")]
    CycleDetected { saga: String, steps: Vec<String> },

    /// A saga with this name is already registered.
    #[error("Saga '{0}' is already registered")]
    DuplicateSaga(String),
}

/// Result type for definition operations.
pub type Result<T> = std::result::Result<T, DefinitionError>;
