//! Authentication capability.
//!
//! Every variant implements [`AuthBackend`]. The pipeline only ever calls
//! [`AuthBackend::decide`], which turns the error-based contract into an
//! explicit [`AuthDecision`] so that a denial and an outage can never be
//! confused.

mod cached;
mod directory;
pub mod password;
mod reset_codes;
mod sql;

use std::fmt;

use thiserror::Error;

pub use cached::{CachedAuth, CachedAuthConfig};
pub use directory::{
    ConnectionPool, DirectoryAuth, DirectoryAuthConfig, DirectoryConnection, DirectoryConnector,
    DirectoryEntry, DirectoryError, Filter, InMemoryDirectory, PoolConfig, PooledConnection, Scope,
};
pub use reset_codes::ResetCodes;
pub use sql::{SqlAuth, SqlAuthConfig, SqlLocation};

use crate::error::ErrorKind;
use crate::request::{Attributes, Principal, UserRecord};
use crate::secret::Secret;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised by authentication backends.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user, wrong secret or disabled account.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    AlreadyExists(String),

    #[error("password does not meet the strength requirements")]
    WeakPassword,

    #[error("invalid or expired reset code")]
    InvalidResetCode,

    /// The backend could not be reached or timed out.
    #[error("authentication backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::UserNotFound(_) => ErrorKind::UserNotFound,
            AuthError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AuthError::WeakPassword => ErrorKind::WeakPassword,
            AuthError::InvalidResetCode => ErrorKind::InvalidResetCode,
            AuthError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, AuthError::BackendUnavailable(_))
    }
}

/// Why a request was not authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    InvalidCredentials,
    MissingCredentials,
    /// The user name in the URL is not the authenticated user.
    UsernameMismatch,
    /// Too many failed attempts for this identifier.
    AccountLocked,
}

impl DenialReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            DenialReason::InvalidCredentials | DenialReason::UsernameMismatch => {
                ErrorKind::InvalidCredentials
            }
            DenialReason::MissingCredentials => ErrorKind::MissingCredentials,
            DenialReason::AccountLocked => ErrorKind::TooManyAttempts,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenialReason::InvalidCredentials => "invalid_credentials",
            DenialReason::MissingCredentials => "missing_credentials",
            DenialReason::UsernameMismatch => "username_mismatch",
            DenialReason::AccountLocked => "account_locked",
        })
    }
}

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized(Principal),
    Denied(DenialReason),
    /// The backend could not answer; the string is the operator-facing cause.
    Unavailable(String),
}

impl AuthDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthDecision::Authorized(_))
    }
}

/// Operation contract of the authentication capability.
pub trait AuthBackend: Send + Sync {
    /// Implementation identifier.
    fn name(&self) -> &'static str;

    /// Checks a user name and secret.
    ///
    /// Unknown users, wrong secrets and disabled accounts all fail with
    /// `InvalidCredentials`; only an outage may return `BackendUnavailable`.
    fn verify_credentials(&self, identifier: &str, secret: &Secret<String>) -> AuthResult<Principal>;

    fn get_user(&self, identifier: &str) -> AuthResult<UserRecord>;

    fn create_user(
        &self,
        identifier: &str,
        secret: &Secret<String>,
        attributes: Attributes,
    ) -> AuthResult<UserRecord>;

    /// Changes a password after re-checking the old one.
    fn update_password(
        &self,
        identifier: &str,
        old_secret: &Secret<String>,
        new_secret: &Secret<String>,
    ) -> AuthResult<()>;

    /// Sets a new password without the old one. Callers must have checked a
    /// reset code first.
    fn reset_password(&self, identifier: &str, new_secret: &Secret<String>) -> AuthResult<()>;

    fn delete_user(&self, identifier: &str) -> AuthResult<()>;

    /// Enables or disables an account. A disabled account fails
    /// verification like a wrong secret.
    fn set_enabled(&self, identifier: &str, enabled: bool) -> AuthResult<()>;

    /// Runs [`verify_credentials`](Self::verify_credentials) and classifies the result.
    fn decide(&self, identifier: &str, secret: &Secret<String>) -> AuthDecision {
        match self.verify_credentials(identifier, secret) {
            Ok(principal) => AuthDecision::Authorized(principal),
            Err(AuthError::BackendUnavailable(cause)) => AuthDecision::Unavailable(cause),
            Err(_) => AuthDecision::Denied(DenialReason::InvalidCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outage;

    impl AuthBackend for Outage {
        fn name(&self) -> &'static str {
            "outage"
        }

        fn verify_credentials(&self, _: &str, _: &Secret<String>) -> AuthResult<Principal> {
            Err(AuthError::BackendUnavailable("connection refused".into()))
        }

        fn get_user(&self, identifier: &str) -> AuthResult<UserRecord> {
            Err(AuthError::UserNotFound(identifier.into()))
        }

        fn create_user(&self, _: &str, _: &Secret<String>, _: Attributes) -> AuthResult<UserRecord> {
            Err(AuthError::BackendUnavailable("connection refused".into()))
        }

        fn update_password(&self, _: &str, _: &Secret<String>, _: &Secret<String>) -> AuthResult<()> {
            Err(AuthError::InvalidCredentials)
        }

        fn reset_password(&self, _: &str, _: &Secret<String>) -> AuthResult<()> {
            Err(AuthError::InvalidCredentials)
        }

        fn delete_user(&self, identifier: &str) -> AuthResult<()> {
            Err(AuthError::UserNotFound(identifier.into()))
        }

        fn set_enabled(&self, _: &str, _: bool) -> AuthResult<()> {
            Err(AuthError::BackendUnavailable("connection refused".into()))
        }
    }

    #[test]
    fn outage_is_not_a_denial() {
        let decision = Outage.decide("bob", &Secret::from("password1"));
        assert_eq!(
            decision,
            AuthDecision::Unavailable("connection refused".into())
        );
        assert!(!decision.is_authorized());
    }

    #[test]
    fn error_kinds_follow_the_taxonomy() {
        assert_eq!(AuthError::InvalidCredentials.kind(), ErrorKind::InvalidCredentials);
        assert_eq!(
            AuthError::BackendUnavailable(String::new()).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(DenialReason::AccountLocked.kind(), ErrorKind::TooManyAttempts);
        assert_eq!(DenialReason::MissingCredentials.kind(), ErrorKind::MissingCredentials);
    }
}
