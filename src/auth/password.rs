//! Salted password hashes.
//!
//! New hashes are `{SSHA-256}` + base64(sha256(password || salt) || salt),
//! with an 8-character alphanumeric salt. Legacy `{SSHA}` hashes (the same
//! layout over SHA-1) are still accepted when verifying.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{AuthError, AuthResult};
use crate::secret::Secret;

pub const SSHA256_PREFIX: &str = "{SSHA-256}";
pub const SSHA_PREFIX: &str = "{SSHA}";
pub const SALT_LEN: usize = 8;
pub const MIN_PASSWORD_LEN: usize = 8;

const DIGEST_LEN: usize = 32;
const LEGACY_DIGEST_LEN: usize = 20;

fn gen_salt() -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .collect()
}

fn digest(password: &[u8], salt: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.finalize().into()
}

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &Secret<String>) -> String {
    hash_with_salt(password, &gen_salt())
}

/// Hashes a password with the given salt.
pub fn hash_with_salt(password: &Secret<String>, salt: &[u8]) -> String {
    let mut raw = digest(password.expose_secret().as_bytes(), salt).to_vec();
    raw.extend_from_slice(salt);
    format!("{SSHA256_PREFIX}{}", STANDARD.encode(raw))
}

/// Checks `password` against a stored hash.
///
/// Accepts `{SSHA-256}` and legacy `{SSHA}` hashes. Anything else fails
/// closed.
pub fn verify_password(password: &Secret<String>, stored: &str) -> bool {
    if let Some(encoded) = stored.strip_prefix(SSHA256_PREFIX) {
        return verify_salted::<Sha256>(password, encoded, DIGEST_LEN);
    }
    if let Some(encoded) = stored.strip_prefix(SSHA_PREFIX) {
        return verify_salted::<Sha1>(password, encoded, LEGACY_DIGEST_LEN);
    }
    false
}

fn verify_salted<D: Digest>(password: &Secret<String>, encoded: &str, digest_len: usize) -> bool {
    let Ok(raw) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    if raw.len() != digest_len + SALT_LEN {
        return false;
    }
    let (expected, salt) = raw.split_at(digest_len);
    let mut hasher = D::new();
    hasher.update(password.expose_secret().as_bytes());
    hasher.update(salt);
    bool::from(hasher.finalize().as_slice().ct_eq(expected))
}

/// Rejects passwords shorter than [`MIN_PASSWORD_LEN`] or equal to the user name.
pub fn check_strength(username: &str, password: &Secret<String>) -> AuthResult<()> {
    let candidate = password.expose_secret();
    if candidate.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    if candidate.trim().to_lowercase() == username.trim().to_lowercase() {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}
