//! Password reset codes kept in the key-value cache.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use subtle::ConstantTimeEq;

use super::{AuthBackend, AuthError, AuthResult};
use crate::cache::{CacheError, KeyValueCache};
use crate::secret::Secret;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GROUPS: usize = 4;
const GROUP_LEN: usize = 4;

fn unavailable(err: CacheError) -> AuthError {
    AuthError::BackendUnavailable(err.to_string())
}

/// Issues and checks `XXXX-XXXX-XXXX-XXXX` reset codes.
pub struct ResetCodes {
    cache: Arc<dyn KeyValueCache>,
    lifetime: Duration,
}

impl ResetCodes {
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(6 * 60 * 60);

    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self::with_lifetime(cache, Self::DEFAULT_LIFETIME)
    }

    pub fn with_lifetime(cache: Arc<dyn KeyValueCache>, lifetime: Duration) -> Self {
        Self { cache, lifetime }
    }

    /// Whether `code` has the reset code shape.
    pub fn is_well_formed(code: &str) -> bool {
        let groups: Vec<&str> = code.split('-').collect();
        groups.len() == GROUPS
            && groups.iter().all(|group| {
                group.len() == GROUP_LEN
                    && group
                        .bytes()
                        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            })
    }

    fn random_code() -> String {
        let mut rng = rand::thread_rng();
        (0..GROUPS)
            .map(|_| {
                (0..GROUP_LEN)
                    .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("-")
    }

    fn key(identifier: &str) -> String {
        format!("reset:{identifier}")
    }

    /// Returns a reset code for `identifier`.
    ///
    /// An unexpired code is reused unless `overwrite` is set.
    pub fn generate(&self, identifier: &str, overwrite: bool) -> AuthResult<String> {
        let key = Self::key(identifier);
        if !overwrite {
            if let Some(existing) = self.cache.get(&key).map_err(unavailable)? {
                return Ok(existing);
            }
        }
        let code = Self::random_code();
        self.cache
            .set(&key, &code, Some(self.lifetime))
            .map_err(unavailable)?;
        tracing::debug!(target: "sync_core::auth", user = identifier, "reset code issued");
        Ok(code)
    }

    /// Checks a code; fails with `InvalidResetCode` when it is malformed,
    /// wrong or expired.
    pub fn verify(&self, identifier: &str, code: &str) -> AuthResult<()> {
        if !Self::is_well_formed(code) {
            return Err(AuthError::InvalidResetCode);
        }
        let stored = self
            .cache
            .get(&Self::key(identifier))
            .map_err(unavailable)?
            .ok_or(AuthError::InvalidResetCode)?;
        if bool::from(stored.as_bytes().ct_eq(code.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidResetCode)
        }
    }

    pub fn clear(&self, identifier: &str) -> AuthResult<()> {
        self.cache
            .delete(&Self::key(identifier))
            .map(|_| ())
            .map_err(unavailable)
    }

    /// Verifies the code, sets the new password and burns the code.
    pub fn redeem(
        &self,
        backend: &dyn AuthBackend,
        identifier: &str,
        code: &str,
        new_secret: &Secret<String>,
    ) -> AuthResult<()> {
        self.verify(identifier, code)?;
        backend.reset_password(identifier, new_secret)?;
        self.clear(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SqlAuth, SqlAuthConfig};
    use crate::cache::MemoryCache;
    use crate::request::Attributes;

    fn codes() -> ResetCodes {
        ResetCodes::new(Arc::new(MemoryCache::default()))
    }

    #[test]
    fn generated_codes_are_well_formed() {
        let codes = codes();
        let code = codes.generate("alice", false).unwrap();
        assert!(ResetCodes::is_well_formed(&code), "{code}");
        assert_eq!(code.len(), 19);
    }

    #[test]
    fn shape_check() {
        assert!(ResetCodes::is_well_formed("AB12-CD34-EF56-GH78"));
        assert!(!ResetCodes::is_well_formed("ab12-CD34-EF56-GH78"));
        assert!(!ResetCodes::is_well_formed("AB12-CD34-EF56"));
        assert!(!ResetCodes::is_well_formed("AB12-CD34-EF56-GH789"));
    }

    #[test]
    fn codes_are_reused_unless_overwritten() {
        let codes = codes();
        let first = codes.generate("alice", false).unwrap();
        assert_eq!(codes.generate("alice", false).unwrap(), first);
        let second = codes.generate("alice", true).unwrap();
        assert!(codes.verify("alice", &second).is_ok());
        if second != first {
            assert!(codes.verify("alice", &first).is_err());
        }
    }

    #[test]
    fn codes_expire() {
        let codes = ResetCodes::with_lifetime(
            Arc::new(MemoryCache::default()),
            Duration::from_millis(20),
        );
        let code = codes.generate("alice", false).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(
            codes.verify("alice", &code),
            Err(AuthError::InvalidResetCode)
        ));
    }

    #[test]
    fn redeem_resets_password_once() {
        let codes = codes();
        let backend = SqlAuth::open(&SqlAuthConfig::default()).unwrap();
        backend
            .create_user("alice", &Secret::from("forgotten-password"), Attributes::new())
            .unwrap();

        let code = codes.generate("alice", false).unwrap();
        codes
            .redeem(&backend, "alice", &code, &Secret::from("brand-new-password"))
            .unwrap();
        assert!(backend
            .verify_credentials("alice", &Secret::from("brand-new-password"))
            .is_ok());
        assert!(matches!(
            codes.redeem(&backend, "alice", &code, &Secret::from("another-password")),
            Err(AuthError::InvalidResetCode)
        ));
    }
}
