//! Events port and reference sinks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::CorrelationId;
use thiserror::Error;

/// Error raised by an event sink.
#[derive(Debug, Error)]
#[error("Event sink error: {0}")]
pub struct EventSinkError(pub String);

/// Result type for sink deliveries.
pub type SinkResult = std::result::Result<(), EventSinkError>;

/// Receives saga lifecycle events.
///
/// Sinks observe execution; they must never influence it. A failing sink
/// is logged and ignored by the engine and by [`CompositeEventSink`].
#[async_trait]
pub trait SagaEventSink: Send + Sync {
    /// A saga execution started.
    async fn on_start(&self, saga: &str, correlation_id: &CorrelationId) -> SinkResult;

    /// A step's forward action succeeded.
    async fn on_step_success(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
    ) -> SinkResult;

    /// A step failed on every attempt.
    async fn on_step_failed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: &str,
    ) -> SinkResult;

    /// A step's compensation was attempted; `error` is None on success.
    async fn on_compensated(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: Option<&str>,
    ) -> SinkResult;

    /// A saga execution reached its terminal state.
    async fn on_completed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> SinkResult;
}

/// Sink that logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

#[async_trait]
impl SagaEventSink for LoggingEventSink {
    async fn on_start(&self, saga: &str, correlation_id: &CorrelationId) -> SinkResult {
        tracing::info!(saga, %correlation_id, "saga started");
        Ok(())
    }

    async fn on_step_success(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
    ) -> SinkResult {
        tracing::info!(saga, %correlation_id, step, "step succeeded");
        Ok(())
    }

    async fn on_step_failed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: &str,
    ) -> SinkResult {
        tracing::warn!(saga, %correlation_id, step, error, "step failed");
        Ok(())
    }

    async fn on_compensated(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: Option<&str>,
    ) -> SinkResult {
        match error {
            None => tracing::info!(saga, %correlation_id, step, "step compensated"),
            Some(error) => {
                tracing::warn!(saga, %correlation_id, step, error, "step compensation failed")
            }
        }
        Ok(())
    }

    async fn on_completed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> SinkResult {
        tracing::info!(saga, %correlation_id, successful, "saga completed");
        Ok(())
    }
}

/// Fans events out to several sinks.
///
/// Each delivery failure is caught and logged so one broken sink cannot
/// break saga execution or starve the remaining sinks.
#[derive(Clone, Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn SagaEventSink>>,
}

impl CompositeEventSink {
    /// Creates an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink to the fan-out.
    pub fn with_sink(mut self, sink: Arc<dyn SagaEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl SagaEventSink for CompositeEventSink {
    async fn on_start(&self, saga: &str, correlation_id: &CorrelationId) -> SinkResult {
        for sink in &self.sinks {
            if let Err(e) = sink.on_start(saga, correlation_id).await {
                tracing::warn!(saga, %correlation_id, error = %e, "event sink failed on start");
            }
        }
        Ok(())
    }

    async fn on_step_success(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
    ) -> SinkResult {
        for sink in &self.sinks {
            if let Err(e) = sink.on_step_success(saga, correlation_id, step).await {
                tracing::warn!(saga, %correlation_id, step, error = %e, "event sink failed on step success");
            }
        }
        Ok(())
    }

    async fn on_step_failed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: &str,
    ) -> SinkResult {
        for sink in &self.sinks {
            if let Err(e) = sink.on_step_failed(saga, correlation_id, step, error).await {
                tracing::warn!(saga, %correlation_id, step, error = %e, "event sink failed on step failure");
            }
        }
        Ok(())
    }

    async fn on_compensated(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: Option<&str>,
    ) -> SinkResult {
        for sink in &self.sinks {
            if let Err(e) = sink.on_compensated(saga, correlation_id, step, error).await {
                tracing::warn!(saga, %correlation_id, step, error = %e, "event sink failed on compensation");
            }
        }
        Ok(())
    }

    async fn on_completed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> SinkResult {
        for sink in &self.sinks {
            if let Err(e) = sink.on_completed(saga, correlation_id, successful).await {
                tracing::warn!(saga, %correlation_id, error = %e, "event sink failed on completion");
            }
        }
        Ok(())
    }
}

/// One recorded lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Started {
        saga: String,
        correlation_id: CorrelationId,
    },
    StepSucceeded {
        saga: String,
        correlation_id: CorrelationId,
        step: String,
    },
    StepFailed {
        saga: String,
        correlation_id: CorrelationId,
        step: String,
        error: String,
    },
    Compensated {
        saga: String,
        correlation_id: CorrelationId,
        step: String,
        error: Option<String>,
    },
    Completed {
        saga: String,
        correlation_id: CorrelationId,
        successful: bool,
    },
}

/// In-memory sink for tests: records every event in arrival order.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventSink {
    /// Creates a new empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns the recorded compensation events in arrival order.
    pub fn compensations(&self) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, RecordedEvent::Compensated { .. }))
            .collect()
    }
}

#[async_trait]
impl SagaEventSink for RecordingEventSink {
    async fn on_start(&self, saga: &str, correlation_id: &CorrelationId) -> SinkResult {
        self.events.lock().unwrap().push(RecordedEvent::Started {
            saga: saga.to_string(),
            correlation_id: *correlation_id,
        });
        Ok(())
    }

    async fn on_step_success(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
    ) -> SinkResult {
        self.events.lock().unwrap().push(RecordedEvent::StepSucceeded {
            saga: saga.to_string(),
            correlation_id: *correlation_id,
            step: step.to_string(),
        });
        Ok(())
    }

    async fn on_step_failed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: &str,
    ) -> SinkResult {
        self.events.lock().unwrap().push(RecordedEvent::StepFailed {
            saga: saga.to_string(),
            correlation_id: *correlation_id,
            step: step.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }

    async fn on_compensated(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        step: &str,
        error: Option<&str>,
    ) -> SinkResult {
        self.events.lock().unwrap().push(RecordedEvent::Compensated {
            saga: saga.to_string(),
            correlation_id: *correlation_id,
            step: step.to_string(),
            error: error.map(str::to_string),
        });
        Ok(())
    }

    async fn on_completed(
        &self,
        saga: &str,
        correlation_id: &CorrelationId,
        successful: bool,
    ) -> SinkResult {
        self.events.lock().unwrap().push(RecordedEvent::Completed {
            saga: saga.to_string(),
            correlation_id: *correlation_id,
            successful,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that fails every delivery.
    struct BrokenSink;

    #[async_trait]
    impl SagaEventSink for BrokenSink {
        async fn on_start(&self, _: &str, _: &CorrelationId) -> SinkResult {
            Err(EventSinkError("start pipe burst".into()))
        }

        async fn on_step_success(&self, _: &str, _: &CorrelationId, _: &str) -> SinkResult {
            Err(EventSinkError("success pipe burst".into()))
        }

        async fn on_step_failed(&self, _: &str, _: &CorrelationId, _: &str, _: &str) -> SinkResult {
            Err(EventSinkError("failure pipe burst".into()))
        }

        async fn on_compensated(
            &self,
            _: &str,
            _: &CorrelationId,
            _: &str,
            _: Option<&str>,
        ) -> SinkResult {
            Err(EventSinkError("compensation pipe burst".into()))
        }

        async fn on_completed(&self, _: &str, _: &CorrelationId, _: bool) -> SinkResult {
            Err(EventSinkError("completion pipe burst".into()))
        }
    }

    #[tokio::test]
    async fn recording_sink_captures_order() {
        let sink = RecordingEventSink::new();
        let id = CorrelationId::new();

        sink.on_start("order", &id).await.unwrap();
        sink.on_step_success("order", &id, "reserve").await.unwrap();
        sink.on_step_failed("order", &id, "charge", "declined").await.unwrap();
        sink.on_compensated("order", &id, "reserve", None).await.unwrap();
        sink.on_completed("order", &id, false).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], RecordedEvent::Started { .. }));
        assert!(matches!(
            &events[4],
            RecordedEvent::Completed { successful: false, .. }
        ));
        assert_eq!(sink.compensations().len(), 1);
    }

    #[tokio::test]
    async fn composite_survives_broken_sink() {
        let recording = RecordingEventSink::new();
        let composite = CompositeEventSink::new()
            .with_sink(Arc::new(BrokenSink))
            .with_sink(Arc::new(recording.clone()));
        let id = CorrelationId::new();

        composite.on_start("order", &id).await.unwrap();
        composite.on_step_success("order", &id, "reserve").await.unwrap();
        composite.on_completed("order", &id, true).await.unwrap();

        // The healthy sink saw everything despite the broken sibling.
        assert_eq!(recording.events().len(), 3);
    }

    #[tokio::test]
    async fn logging_sink_never_fails() {
        let sink = LoggingEventSink;
        let id = CorrelationId::new();
        assert!(sink.on_start("order", &id).await.is_ok());
        assert!(sink.on_compensated("order", &id, "reserve", Some("boom")).await.is_ok());
    }
}
