use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;

use crate::error::Result;
use crate::record::SagaStateRecord;

/// Core trait for saga state store implementations.
///
/// A state store persists per-execution snapshots so stale executions can
/// be detected after a crash. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Persists (inserts or replaces) the state record for an execution.
    async fn persist_state(&self, record: SagaStateRecord) -> Result<()>;

    /// Transitions an execution to its terminal status.
    ///
    /// Fails with `NotFound` if nothing is persisted for the ID.
    async fn mark_completed(
        &self,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> Result<()>;

    /// Retrieves the state record for an execution, if any.
    async fn get_state(&self, correlation_id: &CorrelationId) -> Result<Option<SagaStateRecord>>;

    /// Retrieves every record still in flight.
    async fn get_in_flight(&self) -> Result<Vec<SagaStateRecord>>;

    /// Retrieves in-flight records that started before the cutoff.
    async fn get_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SagaStateRecord>>;

    /// Deletes terminal records completed before the cutoff.
    ///
    /// In-flight records are never removed. Returns the number deleted.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// Reports whether the backing store is reachable.
    async fn is_healthy(&self) -> bool;
}
