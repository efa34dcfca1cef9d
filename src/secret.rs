use std::fmt;

use subtle::ConstantTimeEq;

/// A credential that must never appear in logs, audit events or error messages.
///
/// Passwords travel through the pipeline and every authentication backend
/// wrapped in `Secret<String>`. The only way to read the value is the
/// explicit [`expose_secret`](Self::expose_secret) call.
///
/// # Security Properties
///
/// - Does NOT implement `Deref`, `AsRef`, `Borrow`, `Clone`, `Copy` or `Serialize`
/// - Debug and Display output is always `[REDACTED]`
/// - No type information is leaked in formatted output
///
/// # Examples
///
/// ```
/// use sync_core::Secret;
///
/// let password = Secret::new("hunter2hunter2".to_string());
///
/// assert_eq!(format!("{:?}", password), "[REDACTED]");
/// assert_eq!(format!("{}", password), "[REDACTED]");
/// assert_eq!(password.expose_secret(), "hunter2hunter2");
/// ```
// BREAKING CHANGE WARNING: Do NOT add Clone, Copy, Default or Serialize derives.
// Each one lets a password be duplicated or written out without an explicit expose_secret().
pub struct Secret<T> {
    // BREAKING CHANGE WARNING: This field MUST remain private.
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the secret value.
    ///
    /// # Security Warning
    ///
    /// The caller is responsible for not logging, displaying or persisting
    /// the returned reference in clear text.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl Secret<String> {
    /// Returns the length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Compares two secrets in constant time.
    pub fn ct_matches(&self, other: &Secret<String>) -> bool {
        bool::from(self.inner.as_bytes().ct_eq(other.inner.as_bytes()))
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl<T> fmt::Debug for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]" (CWE-532).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]" (CWE-532).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
