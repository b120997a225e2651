//! Persisted saga state records.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a persisted saga execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaExecutionStatus {
    /// The saga is (or was last seen) executing.
    InFlight,
    /// The saga finished successfully (terminal).
    Completed,
    /// The saga finished unsuccessfully (terminal).
    Failed,
}

impl SagaExecutionStatus {
    /// Returns true for terminal statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaExecutionStatus::Completed | SagaExecutionStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaExecutionStatus::InFlight => "InFlight",
            SagaExecutionStatus::Completed => "Completed",
            SagaExecutionStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One persisted snapshot of a saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStateRecord {
    /// Correlation ID of the execution.
    pub correlation_id: CorrelationId,
    /// Name of the saga definition being executed.
    pub saga_name: String,
    /// Current lifecycle status.
    pub status: SagaExecutionStatus,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Top-level error for failed executions.
    pub error: Option<String>,
}

impl SagaStateRecord {
    /// Creates an in-flight record for a freshly started execution.
    pub fn in_flight(correlation_id: CorrelationId, saga_name: impl Into<String>) -> Self {
        Self {
            correlation_id,
            saga_name: saga_name.into(),
            status: SagaExecutionStatus::InFlight,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Transitions the record to a terminal status.
    pub fn complete(&mut self, successful: bool) {
        self.status = if successful {
            SagaExecutionStatus::Completed
        } else {
            SagaExecutionStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_record_has_no_completion() {
        let record = SagaStateRecord::in_flight(CorrelationId::new(), "order");
        assert_eq!(record.status, SagaExecutionStatus::InFlight);
        assert!(!record.status.is_terminal());
        assert!(record.completed_at.is_none());
        assert!(record.error.is_none());
    }

    #[test]
    fn complete_marks_terminal_status() {
        let mut record = SagaStateRecord::in_flight(CorrelationId::new(), "order");

        record.complete(true);
        assert_eq!(record.status, SagaExecutionStatus::Completed);
        assert!(record.status.is_terminal());
        assert!(record.completed_at.is_some());

        let mut record = SagaStateRecord::in_flight(CorrelationId::new(), "order");
        record.complete(false);
        assert_eq!(record.status, SagaExecutionStatus::Failed);
    }

    #[test]
    fn status_display() {
        assert_eq!(SagaExecutionStatus::InFlight.to_string(), "InFlight");
        assert_eq!(SagaExecutionStatus::Completed.to_string(), "Completed");
        assert_eq!(SagaExecutionStatus::Failed.to_string(), "Failed");
    }

    #[test]
    fn record_serialization_roundtrip() {
        let record = SagaStateRecord::in_flight(CorrelationId::new(), "order");
        let json = serde_json::to_string(&record).unwrap();
        let back: SagaStateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.correlation_id, record.correlation_id);
        assert_eq!(back.status, record.status);
    }
}
