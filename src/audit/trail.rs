//! In-memory audit sink.

use parking_lot::Mutex;

use super::AuditEvent;
use crate::sink::{AuditSink, SinkError, SinkErrorKind};

/// Records events in memory, in the order they are written.
///
/// With a capacity set, writes beyond it fail with `SinkErrorKind::Full`.
///
/// # Example
///
/// ```
/// use sync_core::audit::{AuditEvent, AuditEventKind, AuditOutcome, CefSignature, MemorySink};
/// use sync_core::AuditSink;
///
/// let sink = MemorySink::new();
/// sink.write(&AuditEvent::new(
///     "req-123",
///     AuditEventKind::Request,
///     AuditOutcome::Success,
///     CefSignature::RequestCompleted,
/// ))
/// .unwrap();
///
/// assert_eq!(sink.events().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
    capacity: Option<usize>,
}

impl MemorySink {
    /// Creates a new, unbounded sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that refuses events past `capacity`.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    /// Returns a snapshot of all recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for one request.
    pub fn events_for(&self, request_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.request_id() == request_id)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<AuditEvent> {
        self.events.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemorySink {
    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut events = self.events.lock();
        if self.capacity.is_some_and(|cap| events.len() >= cap) {
            return Err(SinkError::new(SinkErrorKind::Full));
        }
        events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventKind, AuditOutcome, CefSignature};

    fn event(id: &str) -> AuditEvent {
        AuditEvent::new(
            id,
            AuditEventKind::Request,
            AuditOutcome::Success,
            CefSignature::RequestCompleted,
        )
    }

    #[test]
    fn starts_empty() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        assert!(sink.last().is_none());
    }

    #[test]
    fn records_in_order() {
        let sink = MemorySink::new();
        sink.write(&event("req-1")).unwrap();
        sink.write(&event("req-2")).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].request_id(), "req-1");
        assert_eq!(events[1].request_id(), "req-2");
        assert_eq!(sink.events_for("req-2").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn bounded_sink_reports_full() {
        let sink = MemorySink::bounded(1);
        sink.write(&event("req-1")).unwrap();
        let err = sink.write(&event("req-2")).unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::Full);
        assert_eq!(sink.len(), 1);
    }
}
