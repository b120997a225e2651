use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use tokio::sync::RwLock;

use crate::error::{Result, StateStoreError};
use crate::record::SagaStateRecord;
use crate::store::SagaStateStore;

/// In-memory state store implementation for testing.
///
/// Non-durable: state lives for the lifetime of the process. Provides the
/// same interface a durable adapter would.
#[derive(Clone, Default)]
pub struct InMemorySagaStateStore {
    records: Arc<RwLock<HashMap<CorrelationId, SagaStateRecord>>>,
}

impl InMemorySagaStateStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStateStore {
    async fn persist_state(&self, record: SagaStateRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.correlation_id, record);
        Ok(())
    }

    async fn mark_completed(
        &self,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(correlation_id)
            .ok_or(StateStoreError::NotFound(*correlation_id))?;
        record.complete(successful);
        Ok(())
    }

    async fn get_state(&self, correlation_id: &CorrelationId) -> Result<Option<SagaStateRecord>> {
        let records = self.records.read().await;
        Ok(records.get(correlation_id).cloned())
    }

    async fn get_in_flight(&self) -> Result<Vec<SagaStateRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SagaStateRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| !r.status.is_terminal() && r.started_at < cutoff)
            .cloned()
            .collect())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            !(r.status.is_terminal() && r.completed_at.is_some_and(|at| at < older_than))
        });
        Ok(before - records.len())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
