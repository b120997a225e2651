//! Persistence port for saga execution state.
//!
//! The engine snapshots each execution as a [`SagaStateRecord`] so that a
//! crashed process can be detected and recovered after restart. Storage
//! durability is an adapter concern; this crate defines the
//! [`SagaStateStore`] port and ships a non-durable in-memory reference
//! adapter.

pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use common::CorrelationId;
pub use error::{Result, StateStoreError};
pub use memory::InMemorySagaStateStore;
pub use record::{SagaExecutionStatus, SagaStateRecord};
pub use store::SagaStateStore;
