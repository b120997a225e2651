//! Detection and cleanup of sagas stranded by a crashed process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use persistence::SagaStateStore;

use crate::error::Result;
use crate::events::SagaEventSink;

/// Sweeps persisted saga state after restarts.
///
/// A saga whose process died leaves an IN_FLIGHT record behind. The
/// recovery service marks such records failed once they exceed a staleness
/// threshold, and prunes terminal records past their retention window.
pub struct RecoveryService {
    store: Arc<dyn SagaStateStore>,
    events: Arc<dyn SagaEventSink>,
}

impl RecoveryService {
    /// Creates a recovery service over the given ports.
    pub fn new(store: Arc<dyn SagaStateStore>, events: Arc<dyn SagaEventSink>) -> Self {
        Self { store, events }
    }

    /// Marks every in-flight saga older than the threshold as failed.
    ///
    /// Emits one completed(false) event per recovered saga and returns the
    /// number recovered. Recent in-flight and terminal records are left
    /// untouched.
    #[tracing::instrument(skip(self))]
    pub async fn recover_stale(&self, threshold: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(threshold.as_millis() as i64);
        let stale = self.store.get_stale(cutoff).await?;

        let mut recovered = 0;
        for record in stale {
            self.store
                .mark_completed(&record.correlation_id, false)
                .await?;
            if let Err(e) = self
                .events
                .on_completed(&record.saga_name, &record.correlation_id, false)
                .await
            {
                tracing::warn!(correlation_id = %record.correlation_id, error = %e, "event sink failed");
            }
            tracing::warn!(
                correlation_id = %record.correlation_id,
                saga = %record.saga_name,
                started_at = %record.started_at,
                "recovered stale saga as failed"
            );
            recovered += 1;
        }

        metrics::counter!("saga_recovered_total").increment(recovered as u64);
        Ok(recovered)
    }

    /// Deletes terminal records whose completion predates the cutoff.
    ///
    /// In-flight and recent terminal records survive. Returns the number
    /// removed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let removed = self.store.cleanup(cutoff).await?;
        tracing::info!(removed, "cleaned up terminal saga state");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordedEvent, RecordingEventSink};
    use common::CorrelationId;
    use persistence::{InMemorySagaStateStore, SagaExecutionStatus, SagaStateRecord};

    fn stale_record(saga: &str, age: chrono::Duration) -> SagaStateRecord {
        let mut record = SagaStateRecord::in_flight(CorrelationId::new(), saga);
        record.started_at = Utc::now() - age;
        record
    }

    #[tokio::test]
    async fn recovers_only_stale_in_flight_sagas() {
        let store = InMemorySagaStateStore::new();
        let events = RecordingEventSink::new();
        let service = RecoveryService::new(
            Arc::new(store.clone()),
            Arc::new(events.clone()),
        );

        let stale = stale_record("stale", chrono::Duration::minutes(30));
        let stale_id = stale.correlation_id;
        store.persist_state(stale).await.unwrap();

        let fresh = SagaStateRecord::in_flight(CorrelationId::new(), "fresh");
        let fresh_id = fresh.correlation_id;
        store.persist_state(fresh).await.unwrap();

        let terminal = stale_record("terminal", chrono::Duration::minutes(30));
        let terminal_id = terminal.correlation_id;
        store.persist_state(terminal).await.unwrap();
        store.mark_completed(&terminal_id, true).await.unwrap();

        let recovered = service.recover_stale(Duration::from_secs(600)).await.unwrap();
        assert_eq!(recovered, 1);

        let stale_state = store.get_state(&stale_id).await.unwrap().unwrap();
        assert_eq!(stale_state.status, SagaExecutionStatus::Failed);

        let fresh_state = store.get_state(&fresh_id).await.unwrap().unwrap();
        assert_eq!(fresh_state.status, SagaExecutionStatus::InFlight);

        let terminal_state = store.get_state(&terminal_id).await.unwrap().unwrap();
        assert_eq!(terminal_state.status, SagaExecutionStatus::Completed);

        let completions: Vec<_> = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, RecordedEvent::Completed { successful: false, .. }))
            .collect();
        assert_eq!(completions.len(), 1);
    }

    #[tokio::test]
    async fn recover_stale_with_nothing_to_do() {
        let store = InMemorySagaStateStore::new();
        let events = RecordingEventSink::new();
        let service = RecoveryService::new(
            Arc::new(store.clone()),
            Arc::new(events.clone()),
        );

        let recovered = service.recover_stale(Duration::from_secs(600)).await.unwrap();
        assert_eq!(recovered, 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn cleanup_prunes_old_terminal_records() {
        let store = InMemorySagaStateStore::new();
        let service = RecoveryService::new(
            Arc::new(store.clone()),
            Arc::new(RecordingEventSink::new()),
        );

        let mut old_done = stale_record("old_done", chrono::Duration::hours(48));
        old_done.complete(false);
        old_done.completed_at = Some(Utc::now() - chrono::Duration::hours(47));
        store.persist_state(old_done).await.unwrap();

        let mut recent_done = SagaStateRecord::in_flight(CorrelationId::new(), "recent_done");
        recent_done.complete(true);
        store.persist_state(recent_done).await.unwrap();

        store
            .persist_state(SagaStateRecord::in_flight(CorrelationId::new(), "live"))
            .await
            .unwrap();

        let removed = service
            .cleanup(Duration::from_secs(24 * 60 * 60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.record_count().await, 2);
    }
}
