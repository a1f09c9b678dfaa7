//! Event aggregation for the controller and its collaborators
//!
//! The EventAggregator turns what the controller observes (layer transitions,
//! rotations, verification outcomes, budget alerts) into a single broadcast
//! stream, so embedders can watch the system without polling `status()`.

use ebb_types::{EbbEvent, EbbEventEnvelope, EventSeverity, EventSource};
use tokio::sync::broadcast;

/// Channel capacity for the unified event stream
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Unified event stream
pub struct EventAggregator {
    tx: broadcast::Sender<EbbEventEnvelope>,
}

impl EventAggregator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EbbEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn emit(
        &self,
        event: EbbEvent,
        source: EventSource,
        severity: EventSeverity,
        correlation_id: Option<String>,
    ) {
        let envelope = EbbEventEnvelope {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity,
            correlation_id,
            event,
        };
        // No subscribers is fine
        let _ = self.tx.send(envelope);
    }

    pub fn emit_info(&self, event: EbbEvent, source: EventSource) {
        self.emit(event, source, EventSeverity::Info, None);
    }

    pub fn emit_warning(&self, event: EbbEvent, source: EventSource) {
        self.emit(event, source, EventSeverity::Warning, None);
    }

    pub fn emit_error(&self, event: EbbEvent, source: EventSource) {
        self.emit(event, source, EventSeverity::Error, None);
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventAggregator {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_types::{LayerKind, LayerOperation, Phase};
    use tokio::time::{timeout, Duration};

    fn transitioned() -> EbbEvent {
        EbbEvent::LayerTransitioned {
            layer: LayerKind::Data,
            operation: LayerOperation::Deploy,
            from: Phase::Absent,
            to: Phase::Deploying,
        }
    }

    #[tokio::test]
    async fn test_event_emission() {
        let aggregator = EventAggregator::new();
        let mut rx = aggregator.subscribe();

        aggregator.emit_info(transitioned(), EventSource::Controller);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("receive error");
        assert_eq!(received.source, EventSource::Controller);
        assert_eq!(received.severity, EventSeverity::Info);
        assert!(matches!(received.event, EbbEvent::LayerTransitioned { .. }));
    }

    #[test]
    fn test_warning_severity() {
        let aggregator = EventAggregator::new();
        // Emitting without subscribers is fine
        aggregator.emit_error(transitioned(), EventSource::Controller);

        let mut rx = aggregator.subscribe();

        aggregator.emit_warning(transitioned(), EventSource::Validator);
        match rx.try_recv() {
            Ok(envelope) => assert_eq!(envelope.severity, EventSeverity::Warning),
            Err(_) => panic!("Expected to receive event"),
        }
    }
}
