//! Best-effort audit event dispatch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::AuditEvent;
use crate::sink::AuditSink;

/// Fans audit events out to every configured sink.
///
/// `emit` never fails. A sink that returns an error (or panics) bumps the
/// degraded counter and the remaining sinks still receive the event.
#[derive(Default)]
pub struct AuditLogger {
    sinks: Vec<Arc<dyn AuditSink>>,
    emitted: AtomicU64,
    degraded: AtomicU64,
}

impl AuditLogger {
    /// A logger with no sinks; events are counted and dropped.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, event: AuditEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        for sink in &self.sinks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.write(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        target: "sync_core::audit",
                        request_id = %event.request_id(),
                        error = %err,
                        "audit sink rejected event"
                    );
                }
                Err(_) => {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        target: "sync_core::audit",
                        request_id = %event.request_id(),
                        "audit sink panicked"
                    );
                }
            }
        }
    }

    /// Number of sink writes that failed.
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Number of events handed to `emit`.
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sinks", &self.sinks.len())
            .field("emitted", &self.emitted_count())
            .field("degraded", &self.degraded_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventKind, AuditOutcome, CefSignature, MemorySink};
    use crate::sink::{SinkError, SinkErrorKind};

    struct Offline;

    impl AuditSink for Offline {
        fn write(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            Err(SinkError::with_message(SinkErrorKind::Unavailable, "collector down"))
        }
    }

    struct Exploding;

    impl AuditSink for Exploding {
        fn write(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            panic!("sink bug");
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::new(
            "req-1",
            AuditEventKind::Request,
            AuditOutcome::Success,
            CefSignature::RequestCompleted,
        )
    }

    #[test]
    fn delivers_to_every_sink() {
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        let logger = AuditLogger::new()
            .with_sink(first.clone())
            .with_sink(second.clone());

        logger.emit(event());

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(logger.emitted_count(), 1);
        assert_eq!(logger.degraded_count(), 0);
    }

    #[test]
    fn failing_sink_is_counted_not_raised() {
        let trail = Arc::new(MemorySink::new());
        let logger = AuditLogger::new()
            .with_sink(Arc::new(Offline))
            .with_sink(trail.clone());

        logger.emit(event());
        logger.emit(event());

        assert_eq!(logger.degraded_count(), 2);
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let trail = Arc::new(MemorySink::new());
        let logger = AuditLogger::new()
            .with_sink(Arc::new(Exploding))
            .with_sink(trail.clone());

        logger.emit(event());

        assert_eq!(logger.degraded_count(), 1);
        assert_eq!(trail.len(), 1);
    }
}
