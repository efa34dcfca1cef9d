use std::fmt;

/// Request-scoped logger.
///
/// Every record is stamped with the request id and written to the
/// `sync_core::pipeline` target. Secret values are redacted by their own
/// `Debug` and `Display` implementations.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog<'a> {
    request_id: &'a str,
}

impl<'a> RequestLog<'a> {
    pub fn new(request_id: &'a str) -> Self {
        Self { request_id }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Logs an info-level message with request ID.
    ///
    /// ```
    /// # use sync_core::{RequestLog, Secret};
    /// let log = RequestLog::new("req-1");
    /// let password = Secret::new("hunter22".to_string());
    /// log.info(format_args!("verifying {:?}", password));
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "sync_core::pipeline", request_id = %self.request_id, "{}", args);
    }

    /// Logs a warning-level message with request ID.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "sync_core::pipeline", request_id = %self.request_id, "{}", args);
    }

    /// Logs an error-level message with request ID.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "sync_core::pipeline", request_id = %self.request_id, "{}", args);
    }

    /// Logs a debug-level message with request ID.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "sync_core::pipeline", request_id = %self.request_id, "{}", args);
    }
}
