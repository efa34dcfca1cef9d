//! Session cache in front of another authentication backend.
//!
//! Successful verifications are remembered under a session token derived
//! from the identifier and secret, for at most `session_ttl`. Every write
//! path invalidates the identifier's sessions before returning. While a
//! verification is running, a per-identifier epoch keeps it from putting a
//! stale session back after a concurrent write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use moka::sync::Cache;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;

use super::{AuthBackend, AuthResult};
use crate::config::{ConfigError, Params};
use crate::request::{Attributes, Principal, UserRecord};
use crate::secret::Secret;

type HmacSha256 = Hmac<Sha256>;

/// Settings of the `cached` variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAuthConfig {
    pub session_ttl: Duration,
    pub max_sessions: usize,
}

impl CachedAuthConfig {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            session_ttl: params.get_typed_or("session_ttl", defaults.session_ttl)?,
            max_sessions: params.get_typed_or("max_sessions", defaults.max_sessions)?,
        })
    }
}

impl Default for CachedAuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(300),
            max_sessions: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    identifier: String,
    principal: Principal,
}

/// Verifications of one identifier currently running against `inner`.
#[derive(Debug, Default)]
struct InFlight {
    running: usize,
    epoch: u64,
}

/// Authentication backend that caches successful verifications of `inner`.
pub struct CachedAuth {
    inner: Arc<dyn AuthBackend>,
    key: [u8; 32],
    sessions: Cache<String, Session>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl CachedAuth {
    pub fn new(inner: Arc<dyn AuthBackend>, config: CachedAuthConfig) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let sessions = Cache::builder()
            .time_to_live(config.session_ttl)
            .max_capacity(config.max_sessions as u64)
            .support_invalidation_closures()
            .build();
        Self {
            inner,
            key,
            sessions,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &Arc<dyn AuthBackend> {
        &self.inner
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.run_pending_tasks();
        usize::try_from(self.sessions.entry_count()).unwrap_or(usize::MAX)
    }

    /// Drops every session of `identifier`.
    pub fn invalidate(&self, identifier: &str) {
        let mut in_flight = self.in_flight.lock();
        if let Some(pending) = in_flight.get_mut(identifier) {
            pending.epoch += 1;
        }
        let owner = identifier.to_string();
        if let Err(err) = self
            .sessions
            .invalidate_entries_if(move |_, session| session.identifier == owner)
        {
            tracing::warn!(target: "sync_core::auth", error = %err, "session predicate rejected, flushing all sessions");
            self.sessions.invalidate_all();
        }
        tracing::debug!(target: "sync_core::auth", user = identifier, "sessions invalidated");
    }

    fn token(&self, identifier: &str, secret: &Secret<String>) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(identifier.as_bytes());
        mac.update(&[0]);
        mac.update(secret.expose_secret().as_bytes());
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn lookup(&self, token: &str, identifier: &str) -> Option<Principal> {
        let session = self.sessions.get(token)?;
        (session.identifier == identifier).then_some(session.principal)
    }

    /// Registers a verification of `identifier` and returns the epoch it started in.
    fn begin(&self, identifier: &str) -> u64 {
        let mut in_flight = self.in_flight.lock();
        let pending = in_flight.entry(identifier.to_string()).or_default();
        pending.running += 1;
        pending.epoch
    }

    /// Ends a verification started with [`begin`](Self::begin), caching the
    /// principal unless a write to `identifier` happened in between.
    fn finish(&self, token: String, identifier: &str, principal: Option<&Principal>, epoch: u64) {
        let mut in_flight = self.in_flight.lock();
        let Some(pending) = in_flight.get_mut(identifier) else {
            return;
        };
        if let Some(principal) = principal {
            if pending.epoch == epoch {
                self.sessions.insert(
                    token,
                    Session {
                        identifier: identifier.to_string(),
                        principal: principal.clone(),
                    },
                );
            }
        }
        pending.running -= 1;
        if pending.running == 0 {
            in_flight.remove(identifier);
        }
    }
}

impl AuthBackend for CachedAuth {
    fn name(&self) -> &'static str {
        "cached"
    }

    fn verify_credentials(&self, identifier: &str, secret: &Secret<String>) -> AuthResult<Principal> {
        let Some(token) = self.token(identifier, secret) else {
            return self.inner.verify_credentials(identifier, secret);
        };
        if let Some(principal) = self.lookup(&token, identifier) {
            return Ok(principal);
        }

        let epoch = self.begin(identifier);
        let result = self.inner.verify_credentials(identifier, secret);
        self.finish(token, identifier, result.as_ref().ok(), epoch);
        result
    }

    fn get_user(&self, identifier: &str) -> AuthResult<UserRecord> {
        self.inner.get_user(identifier)
    }

    fn create_user(
        &self,
        identifier: &str,
        secret: &Secret<String>,
        attributes: Attributes,
    ) -> AuthResult<UserRecord> {
        self.inner.create_user(identifier, secret, attributes)
    }

    fn update_password(
        &self,
        identifier: &str,
        old_secret: &Secret<String>,
        new_secret: &Secret<String>,
    ) -> AuthResult<()> {
        self.inner.update_password(identifier, old_secret, new_secret)?;
        self.invalidate(identifier);
        Ok(())
    }

    fn reset_password(&self, identifier: &str, new_secret: &Secret<String>) -> AuthResult<()> {
        self.inner.reset_password(identifier, new_secret)?;
        self.invalidate(identifier);
        Ok(())
    }

    fn delete_user(&self, identifier: &str) -> AuthResult<()> {
        let result = self.inner.delete_user(identifier);
        self.invalidate(identifier);
        result
    }

    fn set_enabled(&self, identifier: &str, enabled: bool) -> AuthResult<()> {
        self.inner.set_enabled(identifier, enabled)?;
        self.invalidate(identifier);
        Ok(())
    }
}
