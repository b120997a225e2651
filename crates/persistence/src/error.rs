use common::CorrelationId;
use thiserror::Error;

/// Errors that can occur when interacting with the state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// No state is persisted for the given correlation ID.
    #[error("No saga state found for correlation id {0}")]
    NotFound(CorrelationId),

    /// An adapter-specific backend failure.
    #[error("State store backend error: {0}")]
    Backend(String),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StateStoreError>;
