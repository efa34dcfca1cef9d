//! Audit events for security-relevant request outcomes.
//!
//! This module provides:
//! - `AuditEvent`: immutable event in a fixed schema
//! - `AuditLogger`: best-effort fan-out to sinks
//! - `MemorySink`: in-memory ordered trail
//! - CEF rendering for the tracing sink
//!
//! Events never carry secrets: credential-like context values are redacted
//! when the event is built.

pub mod cef;
mod event;
mod logger;
mod trail;

pub use cef::CefConfig;
pub use event::{AuditEvent, AuditEventKind, AuditOutcome, CefSignature, ANONYMOUS, REDACTED};
pub use logger::AuditLogger;
pub use trail::MemorySink;
