use thiserror::Error;

use crate::audit::cef::{render, CefConfig};
use crate::audit::AuditEvent;

/// Error returned when an audit sink cannot take an event.
///
/// # Examples
///
/// ```
/// use sync_core::{SinkError, SinkErrorKind};
///
/// let error = SinkError::new(SinkErrorKind::Full);
/// assert_eq!(error.kind(), SinkErrorKind::Full);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sink error ({kind}){}", detail(.message))]
pub struct SinkError {
    kind: SinkErrorKind,
    message: Option<String>,
}

fn detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl SinkError {
    /// Creates a new sink error with the specified kind.
    pub fn new(kind: SinkErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a new sink error with a custom message.
    pub fn with_message(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SinkErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Kind of sink error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkErrorKind {
    /// The transport is down.
    #[error("unavailable")]
    Unavailable,
    /// I/O error occurred while writing.
    #[error("I/O error")]
    Io,
    /// Sink is full or has reached capacity.
    #[error("sink full")]
    Full,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self::with_message(SinkErrorKind::Io, err.to_string())
    }
}

/// Destination of audit events.
///
/// Sinks receive events in emission order. A failing sink never fails the
/// request that produced the event; the [`AuditLogger`](crate::audit::AuditLogger)
/// counts the failure instead.
pub trait AuditSink: Send + Sync {
    /// Writes one event.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the event could not be written.
    fn write(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Writes every event as a CEF line on the `cef` tracing target.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    config: CefConfig,
}

impl TracingSink {
    pub fn new(config: CefConfig) -> Self {
        Self { config }
    }
}

impl AuditSink for TracingSink {
    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let line = render(event, &self.config);
        if event.severity() >= 5 {
            tracing::warn!(target: "cef", "{line}");
        } else {
            tracing::info!(target: "cef", "{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventKind, AuditOutcome, CefSignature};

    #[test]
    fn sink_error_display() {
        let error = SinkError::with_message(SinkErrorKind::Unavailable, "syslog socket closed");
        assert_eq!(
            error.to_string(),
            "sink error (unavailable): syslog socket closed"
        );
        assert_eq!(SinkError::new(SinkErrorKind::Full).to_string(), "sink error (sink full)");
    }

    #[test]
    fn io_errors_convert() {
        let error: SinkError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(error.kind(), SinkErrorKind::Io);
        assert_eq!(error.message(), Some("pipe closed"));
    }

    #[test]
    fn tracing_sink_accepts_events() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sink = TracingSink::default();
        let event = AuditEvent::new(
            "req-1",
            AuditEventKind::Authentication,
            AuditOutcome::Denied,
            CefSignature::AuthFail,
        );
        assert!(sink.write(&event).is_ok());
    }
}
