//! Directory-backed authentication.
//!
//! Users live at `uid=<name>,<users_root>`. Credential checks bind as the
//! user; lookups bind as the configured bind account; writes bind as the
//! admin account. Every transport failure surfaces as
//! `AuthError::BackendUnavailable`.

mod memory;
mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

pub use memory::InMemoryDirectory;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};

use super::password::{check_strength, hash_password};
use super::{AuthBackend, AuthError, AuthResult};
use crate::config::{ConfigError, Params};
use crate::request::{Attributes, Principal, UserRecord};
use crate::secret::Secret;

/// Errors raised by directory connections.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("directory operation timed out: {0}")]
    Timeout(String),

    #[error("directory server down: {0}")]
    ServerDown(String),

    #[error("no free directory connection for {0}")]
    PoolExhausted(String),

    #[error("directory error: {0}")]
    Other(String),
}

impl DirectoryError {
    /// Whether the error means the directory could not answer at all.
    pub fn is_outage(&self) -> bool {
        matches!(
            self,
            DirectoryError::Timeout(_)
                | DirectoryError::ServerDown(_)
                | DirectoryError::PoolExhausted(_)
                | DirectoryError::Other(_)
        )
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    Subtree,
}

/// Search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Present(String),
    Eq(String, String),
}

impl Filter {
    pub fn present(attribute: &str) -> Self {
        Filter::Present(attribute.to_string())
    }

    pub fn eq(attribute: &str, value: &str) -> Self {
        Filter::Eq(attribute.to_string(), value.to_string())
    }

    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::All => true,
            Filter::Present(attribute) => entry.attributes.contains_key(attribute),
            Filter::Eq(attribute, value) => entry
                .attributes
                .get(attribute)
                .is_some_and(|values| values.iter().any(|v| v == value)),
        }
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, attribute: &str, values: Vec<String>) {
        self.attributes.insert(attribute.to_string(), values);
    }

    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// An open connection to a directory server.
pub trait DirectoryConnection: Send {
    fn bind(&mut self, dn: &str, password: &Secret<String>) -> Result<(), DirectoryError>;

    fn unbind(&mut self);

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    fn add(&mut self, entry: DirectoryEntry) -> Result<(), DirectoryError>;

    /// Replaces all values of one attribute.
    fn modify(&mut self, dn: &str, attribute: &str, values: Vec<String>) -> Result<(), DirectoryError>;

    fn delete(&mut self, dn: &str) -> Result<(), DirectoryError>;
}

/// Opens connections to a directory server.
pub trait DirectoryConnector: Send + Sync {
    fn connect(
        &self,
        uri: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;
}

const ATTR_UID: &str = "uid";
const ATTR_UID_NUMBER: &str = "uidNumber";
const ATTR_PASSWORD: &str = "userPassword";
const ATTR_ENABLED: &str = "account-enabled";
const ATTR_OBJECT_CLASS: &str = "objectClass";

// never copied into principal attributes
const INTERNAL_ATTRS: [&str; 5] = [
    ATTR_UID,
    ATTR_UID_NUMBER,
    ATTR_PASSWORD,
    ATTR_ENABLED,
    ATTR_OBJECT_CLASS,
];

/// Settings of the `ldap` variant, read from the `auth` section.
#[derive(Debug)]
pub struct DirectoryAuthConfig {
    pub pool: PoolConfig,
    pub bind_user: String,
    pub bind_password: Secret<String>,
    pub admin_user: String,
    pub admin_password: Secret<String>,
    pub users_root: String,
    pub check_account_state: bool,
}

impl DirectoryAuthConfig {
    pub fn new(ldapuri: impl Into<String>) -> Self {
        Self {
            pool: PoolConfig::new(ldapuri),
            bind_user: "binduser".to_string(),
            bind_password: Secret::from("binduser"),
            admin_user: "adminuser".to_string(),
            admin_password: Secret::from("adminuser"),
            users_root: "ou=users,dc=mozilla".to_string(),
            check_account_state: true,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let mut config = Self::new(params.get_typed::<String>("ldapuri")?);

        config.pool.size = params.get_typed_or("ldap_pool_size", config.pool.size)?;
        config.pool.retry_max = params.get_typed_or("ldap_retry_max", config.pool.retry_max)?;
        if let Some(ms) = params.get_opt::<u64>("ldap_retry_delay_ms")? {
            config.pool.retry_delay = Duration::from_millis(ms);
        }
        // negative means no timeout
        let timeout: i64 = params.get_typed_or("ldap_timeout", -1)?;
        config.pool.timeout = u64::try_from(timeout).ok().map(Duration::from_secs);

        config.bind_user = params.get_typed_or("bind_user", config.bind_user)?;
        if let Some(password) = params.get_opt::<String>("bind_password")? {
            config.bind_password = Secret::new(password);
        }
        config.admin_user = params.get_typed_or("admin_user", config.admin_user)?;
        if let Some(password) = params.get_opt::<String>("admin_password")? {
            config.admin_password = Secret::new(password);
        }
        config.users_root = params.get_typed_or("users_root", config.users_root)?;
        config.check_account_state =
            params.get_typed_or("check_account_state", config.check_account_state)?;
        Ok(config)
    }

    /// Whether the URI names the built-in in-memory directory.
    pub fn is_in_memory(&self) -> bool {
        self.pool.uri.starts_with("memory:")
    }
}

fn directory_error(identifier: &str, err: DirectoryError) -> AuthError {
    match err {
        DirectoryError::InvalidCredentials | DirectoryError::NoSuchObject(_) => {
            AuthError::InvalidCredentials
        }
        DirectoryError::AlreadyExists(_) => AuthError::AlreadyExists(identifier.to_string()),
        outage => {
            tracing::warn!(target: "sync_core::auth", error = %outage, "directory unavailable");
            AuthError::BackendUnavailable(outage.to_string())
        }
    }
}

/// Authentication against a directory server.
pub struct DirectoryAuth {
    pool: ConnectionPool,
    config: DirectoryAuthConfig,
    // serializes uidNumber allocation
    allocation: Mutex<()>,
}

impl DirectoryAuth {
    pub fn new(connector: Arc<dyn DirectoryConnector>, config: DirectoryAuthConfig) -> Self {
        Self {
            pool: ConnectionPool::new(connector, config.pool.clone()),
            config,
            allocation: Mutex::new(()),
        }
    }

    /// Builds a backend over a fresh in-memory directory that already knows
    /// the bind and admin accounts. Returns the directory handle too.
    pub fn in_memory(config: DirectoryAuthConfig) -> (Self, InMemoryDirectory) {
        let directory = InMemoryDirectory::new();
        directory.add_service_account(&config.bind_user, &config.bind_password);
        directory.add_service_account(&config.admin_user, &config.admin_password);
        let auth = Self::new(Arc::new(directory.clone()), config);
        (auth, directory)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn dn(&self, identifier: &str) -> String {
        format!("uid={identifier},{}", self.config.users_root)
    }

    fn as_bind_user(&self) -> Result<PooledConnection<'_>, DirectoryError> {
        self.pool
            .connection(&self.config.bind_user, &self.config.bind_password)
    }

    fn as_admin(&self) -> Result<PooledConnection<'_>, DirectoryError> {
        self.pool
            .connection(&self.config.admin_user, &self.config.admin_password)
    }

    fn record_from(&self, entry: &DirectoryEntry) -> UserRecord {
        let attributes: Attributes = entry
            .attributes
            .iter()
            .filter(|(name, _)| !INTERNAL_ATTRS.contains(&name.as_str()))
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect();
        let enabled = !self.config.check_account_state || entry.first(ATTR_ENABLED) == Some("Yes");
        UserRecord {
            user_id: entry
                .first(ATTR_UID_NUMBER)
                .and_then(|n| n.parse().ok())
                .unwrap_or_default(),
            username: entry.first(ATTR_UID).unwrap_or_default().to_string(),
            enabled,
            attributes,
        }
    }

    fn next_uid_number(&self, conn: &mut PooledConnection<'_>) -> Result<u64, DirectoryError> {
        let entries = conn.search(
            &self.config.users_root,
            Scope::Subtree,
            &Filter::present(ATTR_UID_NUMBER),
        )?;
        let max = entries
            .iter()
            .filter_map(|e| e.first(ATTR_UID_NUMBER))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn replace_attribute(
        &self,
        conn: &mut PooledConnection<'_>,
        identifier: &str,
        attribute: &str,
        values: Vec<String>,
    ) -> AuthResult<()> {
        conn.modify(&self.dn(identifier), attribute, values)
            .map_err(|e| match e {
                DirectoryError::NoSuchObject(_) => AuthError::UserNotFound(identifier.to_string()),
                other => {
                    if other.is_outage() {
                        conn.mark_broken();
                    }
                    directory_error(identifier, other)
                }
            })
    }
}

impl AuthBackend for DirectoryAuth {
    fn name(&self) -> &'static str {
        "ldap"
    }

    fn verify_credentials(&self, identifier: &str, secret: &Secret<String>) -> AuthResult<Principal> {
        // An empty password binds anonymously and succeeds on most servers.
        if secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let dn = self.dn(identifier);
        let mut conn = self
            .pool
            .connection(&dn, secret)
            .map_err(|e| directory_error(identifier, e))?;
        let entries = conn
            .search(&dn, Scope::Base, &Filter::All)
            .map_err(|e| directory_error(identifier, e))?;
        let entry = entries.first().ok_or(AuthError::InvalidCredentials)?;

        let record = self.record_from(entry);
        if !record.enabled {
            tracing::debug!(target: "sync_core::auth", user = identifier, "disabled account");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(record.to_principal())
    }

    fn get_user(&self, identifier: &str) -> AuthResult<UserRecord> {
        let mut conn = self.as_bind_user().map_err(|e| directory_error(identifier, e))?;
        let entries = conn
            .search(
                &self.config.users_root,
                Scope::Subtree,
                &Filter::eq(ATTR_UID, identifier),
            )
            .map_err(|e| match e {
                DirectoryError::NoSuchObject(_) => AuthError::UserNotFound(identifier.to_string()),
                other => directory_error(identifier, other),
            })?;
        entries
            .first()
            .map(|entry| self.record_from(entry))
            .ok_or_else(|| AuthError::UserNotFound(identifier.to_string()))
    }

    fn create_user(
        &self,
        identifier: &str,
        secret: &Secret<String>,
        attributes: Attributes,
    ) -> AuthResult<UserRecord> {
        check_strength(identifier, secret)?;
        let _allocation = self.allocation.lock();
        let mut conn = self.as_admin().map_err(|e| directory_error(identifier, e))?;
        let uid_number = self
            .next_uid_number(&mut conn)
            .map_err(|e| directory_error(identifier, e))?;

        let mut entry = DirectoryEntry::new(self.dn(identifier));
        for (name, value) in &attributes {
            entry.set(name, vec![value.clone()]);
        }
        entry.set(ATTR_UID, vec![identifier.to_string()]);
        entry.set(ATTR_UID_NUMBER, vec![uid_number.to_string()]);
        entry.set(ATTR_PASSWORD, vec![hash_password(secret)]);
        entry.set(ATTR_ENABLED, vec!["Yes".to_string()]);
        entry.set(
            ATTR_OBJECT_CLASS,
            vec!["dataStore".to_string(), "inetOrgPerson".to_string()],
        );
        conn.add(entry).map_err(|e| directory_error(identifier, e))?;

        tracing::info!(target: "sync_core::auth", user = identifier, uid_number, "user created");
        Ok(UserRecord {
            user_id: uid_number,
            username: identifier.to_string(),
            enabled: true,
            attributes,
        })
    }

    fn update_password(
        &self,
        identifier: &str,
        old_secret: &Secret<String>,
        new_secret: &Secret<String>,
    ) -> AuthResult<()> {
        if old_secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let mut conn = self
            .pool
            .connection(&self.dn(identifier), old_secret)
            .map_err(|e| directory_error(identifier, e))?;
        check_strength(identifier, new_secret)?;
        self.replace_attribute(&mut conn, identifier, ATTR_PASSWORD, vec![hash_password(new_secret)])
    }

    fn reset_password(&self, identifier: &str, new_secret: &Secret<String>) -> AuthResult<()> {
        check_strength(identifier, new_secret)?;
        let mut conn = self.as_admin().map_err(|e| directory_error(identifier, e))?;
        self.replace_attribute(&mut conn, identifier, ATTR_PASSWORD, vec![hash_password(new_secret)])
    }

    fn delete_user(&self, identifier: &str) -> AuthResult<()> {
        let mut conn = self.as_admin().map_err(|e| directory_error(identifier, e))?;
        conn.delete(&self.dn(identifier)).map_err(|e| match e {
            DirectoryError::NoSuchObject(_) => AuthError::UserNotFound(identifier.to_string()),
            other => directory_error(identifier, other),
        })?;
        tracing::info!(target: "sync_core::auth", user = identifier, "user deleted");
        Ok(())
    }

    fn set_enabled(&self, identifier: &str, enabled: bool) -> AuthResult<()> {
        let mut conn = self.as_admin().map_err(|e| directory_error(identifier, e))?;
        let flag = if enabled { "Yes" } else { "No" };
        self.replace_attribute(&mut conn, identifier, ATTR_ENABLED, vec![flag.to_string()])
    }
}
