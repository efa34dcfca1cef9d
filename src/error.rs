//! Service-wide error taxonomy.
//!
//! Every internal failure is classified into one [`ErrorKind`]. Each kind maps
//! to exactly one wire code, HTTP status and canonical message; that mapping is
//! the only thing that crosses the wire. Errors the taxonomy does not
//! recognise fail closed to [`ErrorKind::Internal`].

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::registry::RegistryError;

/// Boxed error type returned by request handlers.
pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for pipeline-level operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// The broad classes of failure the service distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Configuration could not be loaded or read.
    ConfigError,
    /// A capability could not be registered or resolved.
    RegistryError,
    /// A credential or user-record operation was refused.
    AuthError,
    /// A backend could not be reached; retrying may succeed.
    BackendUnavailable,
    /// The request itself is invalid.
    ValidationError,
    /// The caller exceeded a quota or attempt limit.
    QuotaExceeded,
    /// Anything else.
    InternalError,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::ConfigError => "config_error",
            ErrorClass::RegistryError => "registry_error",
            ErrorClass::AuthError => "auth_error",
            ErrorClass::BackendUnavailable => "backend_unavailable",
            ErrorClass::ValidationError => "validation_error",
            ErrorClass::QuotaExceeded => "quota_exceeded",
            ErrorClass::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// Closed set of internal error kinds.
///
/// Adding a variant requires adding its row to [`code`](Self::code),
/// [`status`](Self::status), [`message`](Self::message) and
/// [`class`](Self::class); the compiler enforces all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unclassified failure.
    Internal,
    /// Configuration failure.
    Config,
    /// Registry or wiring failure.
    Registry,
    /// Credentials were checked and rejected.
    InvalidCredentials,
    /// The endpoint requires credentials and none were supplied.
    MissingCredentials,
    /// The user does not exist.
    UserNotFound,
    /// The user already exists.
    AlreadyExists,
    /// A backend is unreachable or timed out.
    BackendUnavailable,
    /// The request is malformed.
    InvalidRequest,
    /// The HTTP method is not supported for this path.
    UnsupportedMethod,
    /// No route matches the path.
    NotFound,
    /// The captcha solution was wrong or missing.
    InvalidCaptcha,
    /// The new password is too weak.
    WeakPassword,
    /// The password reset code is wrong or expired.
    InvalidResetCode,
    /// A storage quota was exceeded.
    QuotaExceeded,
    /// Too many failed attempts; the identifier is temporarily locked.
    TooManyAttempts,
}

impl ErrorKind {
    /// Every kind, in wire-code order.
    pub const ALL: [ErrorKind; 16] = [
        ErrorKind::Internal,
        ErrorKind::Config,
        ErrorKind::Registry,
        ErrorKind::InvalidCredentials,
        ErrorKind::MissingCredentials,
        ErrorKind::UserNotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::BackendUnavailable,
        ErrorKind::InvalidRequest,
        ErrorKind::UnsupportedMethod,
        ErrorKind::NotFound,
        ErrorKind::InvalidCaptcha,
        ErrorKind::WeakPassword,
        ErrorKind::InvalidResetCode,
        ErrorKind::QuotaExceeded,
        ErrorKind::TooManyAttempts,
    ];

    /// Stable wire code returned to clients.
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Config => 2,
            ErrorKind::Registry => 3,
            ErrorKind::InvalidCredentials => 4,
            ErrorKind::MissingCredentials => 5,
            ErrorKind::UserNotFound => 6,
            ErrorKind::AlreadyExists => 7,
            ErrorKind::BackendUnavailable => 8,
            ErrorKind::InvalidRequest => 9,
            ErrorKind::UnsupportedMethod => 10,
            ErrorKind::NotFound => 11,
            ErrorKind::InvalidCaptcha => 12,
            ErrorKind::WeakPassword => 13,
            ErrorKind::InvalidResetCode => 14,
            ErrorKind::QuotaExceeded => 15,
            ErrorKind::TooManyAttempts => 16,
        }
    }

    /// HTTP status used on the wire.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Internal | ErrorKind::Config | ErrorKind::Registry => 500,
            ErrorKind::InvalidCredentials | ErrorKind::MissingCredentials => 401,
            ErrorKind::UserNotFound | ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::BackendUnavailable => 503,
            ErrorKind::InvalidRequest
            | ErrorKind::InvalidCaptcha
            | ErrorKind::WeakPassword
            | ErrorKind::InvalidResetCode => 400,
            ErrorKind::UnsupportedMethod => 405,
            ErrorKind::QuotaExceeded => 403,
            ErrorKind::TooManyAttempts => 429,
        }
    }

    /// Canonical client-facing message.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal server error",
            ErrorKind::Config => "Server configuration error",
            ErrorKind::Registry => "Server backend configuration error",
            ErrorKind::InvalidCredentials => "Invalid credentials",
            ErrorKind::MissingCredentials => "Authentication required",
            ErrorKind::UserNotFound => "User not found",
            ErrorKind::AlreadyExists => "User already exists",
            ErrorKind::BackendUnavailable => "Service temporarily unavailable",
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::UnsupportedMethod => "Method not supported",
            ErrorKind::NotFound => "Not found",
            ErrorKind::InvalidCaptcha => "Invalid captcha",
            ErrorKind::WeakPassword => "Password is too weak",
            ErrorKind::InvalidResetCode => "Invalid reset code",
            ErrorKind::QuotaExceeded => "Quota exceeded",
            ErrorKind::TooManyAttempts => "Too many attempts",
        }
    }

    /// The class this kind belongs to.
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::Internal => ErrorClass::InternalError,
            ErrorKind::Config => ErrorClass::ConfigError,
            ErrorKind::Registry => ErrorClass::RegistryError,
            ErrorKind::InvalidCredentials
            | ErrorKind::MissingCredentials
            | ErrorKind::UserNotFound
            | ErrorKind::AlreadyExists => ErrorClass::AuthError,
            ErrorKind::BackendUnavailable => ErrorClass::BackendUnavailable,
            ErrorKind::InvalidRequest
            | ErrorKind::UnsupportedMethod
            | ErrorKind::NotFound
            | ErrorKind::InvalidCaptcha
            | ErrorKind::WeakPassword
            | ErrorKind::InvalidResetCode => ErrorClass::ValidationError,
            ErrorKind::QuotaExceeded | ErrorKind::TooManyAttempts => ErrorClass::QuotaExceeded,
        }
    }

    /// Builds the wire payload for this kind.
    pub fn to_wire(self) -> WireError {
        WireError {
            code: self.code(),
            message: self.message().to_string(),
        }
    }

    /// Classifies an arbitrary error, failing closed to `Internal`.
    pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
        if let Some(e) = err.downcast_ref::<ServiceError>() {
            return e.kind();
        }
        if let Some(e) = err.downcast_ref::<AuthError>() {
            return e.kind();
        }
        if let Some(e) = err.downcast_ref::<CacheError>() {
            return e.kind();
        }
        if err.downcast_ref::<ConfigError>().is_some() {
            return ErrorKind::Config;
        }
        if err.downcast_ref::<RegistryError>().is_some() {
            return ErrorKind::Registry;
        }
        ErrorKind::Internal
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// The `{"code", "message"}` payload of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable wire code.
    pub code: u16,
    /// Canonical message for the code.
    pub message: String,
}

/// Error propagated through the request pipeline.
///
/// The `message` is for operators (logs only); clients only ever see the
/// kind's code and canonical message.
#[derive(Debug)]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    source: Option<HandlerError>,
}

impl ServiceError {
    /// Creates a new service error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<HandlerError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Shorthand for an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Converts a handler error, keeping it as the cause when it is not
    /// already a `ServiceError`.
    pub fn from_handler(err: HandlerError) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(service) => *service,
            Err(other) => {
                let kind = ErrorKind::classify(other.as_ref());
                Self {
                    kind,
                    message: other.to_string(),
                    source: Some(other),
                }
            }
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the operator-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the wire payload.
    pub fn to_wire(&self) -> WireError {
        self.kind.to_wire()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.class(), self.message)
    }
}

impl StdError for ServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        let kind = err.kind();
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        let kind = err.kind();
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config, err.to_string()).with_source(err)
    }
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        Self::new(ErrorKind::Registry, err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn wire_codes_are_unique() {
        let codes: HashSet<u16> = ErrorKind::ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), ErrorKind::ALL.len());
    }

    #[test]
    fn invalid_credentials_and_unavailable_are_distinct() {
        assert_ne!(
            ErrorKind::InvalidCredentials.code(),
            ErrorKind::BackendUnavailable.code()
        );
        assert_eq!(ErrorKind::BackendUnavailable.status(), 503);
        assert_eq!(ErrorKind::InvalidCredentials.status(), 401);
    }

    #[test]
    fn every_class_is_reachable() {
        let classes: HashSet<ErrorClass> = ErrorKind::ALL.iter().map(|k| k.class()).collect();
        assert_eq!(classes.len(), 7);
    }

    #[test]
    fn unknown_errors_fail_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "db password=hunter2 rejected");
        assert_eq!(ErrorKind::classify(&io), ErrorKind::Internal);

        let service = ServiceError::from_handler(Box::new(io));
        assert_eq!(service.kind(), ErrorKind::Internal);
        let wire = service.to_wire();
        assert_eq!(wire.code, 1);
        assert!(!wire.message.contains("hunter2"));
    }

    #[test]
    fn auth_errors_keep_their_kind_through_boxing() {
        let boxed: HandlerError = Box::new(AuthError::UserNotFound("bob".into()));
        let service = ServiceError::from_handler(boxed);
        assert_eq!(service.kind(), ErrorKind::UserNotFound);
        assert!(service.source().is_some());
    }

    #[test]
    fn service_errors_pass_through_unchanged() {
        let boxed: HandlerError = Box::new(ServiceError::new(ErrorKind::QuotaExceeded, "over"));
        let service = ServiceError::from_handler(boxed);
        assert_eq!(service.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(service.message(), "over");
    }

    #[test]
    fn wire_error_serializes_code_and_message() {
        let json = serde_json::to_string(&ErrorKind::WeakPassword.to_wire()).unwrap();
        assert_eq!(json, r#"{"code":13,"message":"Password is too weak"}"#);
    }
}
