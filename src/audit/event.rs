//! Audit event schema and types.
//!
//! Events are immutable once built and carry only safe metadata: context
//! entries whose key names a credential are redacted on insertion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Kind of audit event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEventKind {
    /// Credential check (success or failure)
    Authentication,
    /// Access decision for an authenticated principal
    Authorization,
    /// Completion of a request
    Request,
    /// Account maintenance (password reset, deletion)
    AdminAction,
    /// Lockouts and other security events
    SecurityEvent,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::Authentication => write!(f, "authentication"),
            AuditEventKind::Authorization => write!(f, "authorization"),
            AuditEventKind::Request => write!(f, "request"),
            AuditEventKind::AdminAction => write!(f, "admin_action"),
            AuditEventKind::SecurityEvent => write!(f, "security_event"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditOutcome {
    /// Operation succeeded
    Success,
    /// Operation was refused
    Denied,
    /// A backend could not be reached
    Unavailable,
    /// Operation failed due to error
    Error,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Denied => write!(f, "denied"),
            AuditOutcome::Unavailable => write!(f, "unavailable"),
            AuditOutcome::Error => write!(f, "error"),
        }
    }
}

/// CEF signature identifying the type of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CefSignature {
    AuthFail,
    CaptchaFail,
    AccountLockout,
    UsernameMismatch,
    BackendUnavailable,
    RequestFailed,
    RequestCompleted,
}

impl CefSignature {
    /// Severity used unless the event overrides it.
    pub fn default_severity(self) -> u8 {
        match self {
            CefSignature::RequestCompleted => 1,
            CefSignature::RequestFailed => 4,
            CefSignature::AuthFail | CefSignature::CaptchaFail => 5,
            CefSignature::BackendUnavailable => 6,
            CefSignature::AccountLockout | CefSignature::UsernameMismatch => 7,
        }
    }

    /// Human-readable event name.
    pub fn description(self) -> &'static str {
        match self {
            CefSignature::AuthFail => "Authentication failed",
            CefSignature::CaptchaFail => "Captcha check failed",
            CefSignature::AccountLockout => "Account locked after repeated failures",
            CefSignature::UsernameMismatch => "Username does not match URL",
            CefSignature::BackendUnavailable => "Backend unavailable",
            CefSignature::RequestFailed => "Request failed",
            CefSignature::RequestCompleted => "Request completed",
        }
    }
}

impl fmt::Display for CefSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CefSignature::AuthFail => "AuthFail",
            CefSignature::CaptchaFail => "CaptchaFail",
            CefSignature::AccountLockout => "AccountLockout",
            CefSignature::UsernameMismatch => "UsernameMismatch",
            CefSignature::BackendUnavailable => "BackendUnavailable",
            CefSignature::RequestFailed => "RequestFailed",
            CefSignature::RequestCompleted => "RequestCompleted",
        };
        f.write_str(name)
    }
}

/// Marker recorded instead of a principal for unauthenticated requests.
pub const ANONYMOUS: &str = "anonymous";

/// Replacement value for redacted context entries.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: [&str; 5] = ["password", "secret", "token", "key", "authorization"];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// A structured audit event containing only safe, non-sensitive metadata.
///
/// # Example
///
/// ```
/// use sync_core::audit::{AuditEvent, AuditEventKind, AuditOutcome, CefSignature};
///
/// let event = AuditEvent::new(
///     "req-123",
///     AuditEventKind::Authentication,
///     AuditOutcome::Denied,
///     CefSignature::AuthFail,
/// )
/// .with_principal("alice")
/// .with_context("password", "hunter22");
///
/// assert_eq!(event.principal(), "alice");
/// assert_eq!(event.context().get("password").map(String::as_str), Some("[REDACTED]"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    timestamp: DateTime<Utc>,
    request_id: String,
    source: String,
    /// None for unauthenticated events
    principal: Option<String>,
    kind: AuditEventKind,
    outcome: AuditOutcome,
    signature: CefSignature,
    severity: u8,
    name: String,
    /// Wire error code, when the event ends in an error response
    code: Option<u16>,
    method: Option<String>,
    path: Option<String>,
    remote_addr: Option<String>,
    host: Option<String>,
    context: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Creates a new audit event with required fields.
    pub fn new(
        request_id: impl Into<String>,
        kind: AuditEventKind,
        outcome: AuditOutcome,
        signature: CefSignature,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            source: "pipeline".to_string(),
            principal: None,
            kind,
            outcome,
            signature,
            severity: signature.default_severity(),
            name: signature.description().to_string(),
            code: None,
            method: None,
            path: None,
            remote_addr: None,
            host: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the principal. An empty name keeps the anonymous marker.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        let principal = principal.into();
        self.principal = (!principal.is_empty()).then_some(principal);
        self
    }

    /// Sets the emitting component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the CEF severity, clamped to 0..=10.
    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity.min(10);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the wire error code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the request path (no query string).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Adds a context entry. Values of credential-like keys are redacted.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = if is_sensitive(&key) {
            REDACTED.to_string()
        } else {
            value.into()
        };
        self.context.insert(key, value);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the principal, or the anonymous marker.
    pub fn principal(&self) -> &str {
        self.principal.as_deref().unwrap_or(ANONYMOUS)
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none()
    }

    pub fn kind(&self) -> AuditEventKind {
        self.kind
    }

    pub fn outcome(&self) -> AuditOutcome {
        self.outcome
    }

    pub fn signature(&self) -> CefSignature {
        self.signature
    }

    pub fn severity(&self) -> u8 {
        self.severity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent[kind={}, outcome={}, signature={}, request_id={}, principal={}",
            self.kind,
            self.outcome,
            self.signature,
            self.request_id,
            self.principal()
        )?;

        if let Some(code) = self.code {
            write!(f, ", code={}", code)?;
        }
        if let Some(method) = &self.method {
            write!(f, ", method={}", method)?;
        }
        if let Some(path) = &self.path {
            write!(f, ", path={}", path)?;
        }

        write!(f, "]")
    }
}
