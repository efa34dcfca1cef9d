//! HTTP Basic credential extraction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::http::Headers;
use crate::secret::Secret;

/// A user name and password taken from the `Authorization` header.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

/// The `Authorization` header is present but unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("only Basic authorization is supported")]
    UnsupportedScheme,
    #[error("malformed Basic authorization token")]
    Malformed,
}

/// Reads Basic credentials. `Ok(None)` means no `Authorization` header.
pub fn extract(headers: &Headers) -> Result<Option<Credentials>, CredentialsError> {
    let Some(header) = headers.get("authorization") else {
        return Ok(None);
    };
    let token = header
        .strip_prefix("Basic ")
        .ok_or(CredentialsError::UnsupportedScheme)?
        .trim();
    let decoded = STANDARD
        .decode(token)
        .map_err(|_| CredentialsError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialsError::Malformed)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(CredentialsError::Malformed)?;
    if username.is_empty() {
        return Err(CredentialsError::Malformed);
    }
    Ok(Some(Credentials {
        username: username.to_string(),
        password: Secret::new(password.to_string()),
    }))
}

/// Builds an `Authorization` header value.
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
