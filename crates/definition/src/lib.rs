//! Immutable saga definition graphs.
//!
//! A saga is declared once at startup as a graph of steps with forward
//! actions, optional compensating actions and explicit dependencies. The
//! builders in this crate validate the graph (no duplicates, no dangling
//! dependencies, no cycles) and produce plain value types the runtime
//! engine consumes without ever inspecting declarative metadata.

pub mod error;
pub mod registry;
pub mod saga;
pub mod step;

pub use error::{DefinitionError, Result};
pub use registry::SagaRegistry;
pub use saga::{SagaDefinition, SagaDefinitionBuilder};
pub use step::{ExecutionAffinity, StepDefinition, StepDefinitionBuilder};
