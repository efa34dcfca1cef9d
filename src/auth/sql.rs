//! Relational authentication backend on SQLite.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::password::{check_strength, hash_password, verify_password};
use super::{AuthBackend, AuthError, AuthResult};
use crate::config::{ConfigError, Params};
use crate::request::{Attributes, Principal, UserRecord};
use crate::secret::Secret;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    status        INTEGER NOT NULL DEFAULT 1,
    attributes    TEXT NOT NULL DEFAULT '{}'
);
";

const STATUS_ENABLED: i64 = 1;
const STATUS_DISABLED: i64 = 0;

/// Checked on a lookup miss so unknown users cost the same hash as known ones.
const MISS_HASH: &str = "{SSHA-256}mVCmI7LzutC7FOZafsJSnYxlHlD4enwQcQ+3H0LsAhhuT3RBdVNlUg==";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlLocation {
    Memory,
    File(PathBuf),
}

/// Settings of the `sql` variant, read from the `auth` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAuthConfig {
    pub location: SqlLocation,
    pub create_tables: bool,
    pub timeout: Duration,
}

impl SqlAuthConfig {
    pub const DEFAULT_SQLURI: &'static str = "sqlite::memory:";

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let sqluri: String = params.get_typed_or("sqluri", Self::DEFAULT_SQLURI.to_string())?;
        let location = if sqluri == Self::DEFAULT_SQLURI {
            SqlLocation::Memory
        } else if let Some(path) = sqluri.strip_prefix("sqlite://") {
            SqlLocation::File(PathBuf::from(path))
        } else {
            return Err(ConfigError::Parse {
                origin: format!("{}.sqluri", params.section()),
                reason: format!("unsupported database uri {sqluri}"),
            });
        };

        Ok(Self {
            location,
            create_tables: params.get_typed_or("create_tables", true)?,
            timeout: Duration::from_millis(params.get_typed_or("timeout_ms", 5_000u64)?),
        })
    }
}

impl Default for SqlAuthConfig {
    fn default() -> Self {
        Self {
            location: SqlLocation::Memory,
            create_tables: true,
            timeout: Duration::from_secs(5),
        }
    }
}

struct StoredUser {
    id: i64,
    username: String,
    password_hash: String,
    status: i64,
    attributes: String,
}

impl StoredUser {
    fn into_record(self) -> AuthResult<UserRecord> {
        let attributes: Attributes = serde_json::from_str(&self.attributes).map_err(|e| {
            AuthError::BackendUnavailable(format!("corrupt attributes for {}: {e}", self.username))
        })?;
        Ok(UserRecord {
            user_id: u64::try_from(self.id).unwrap_or_default(),
            username: self.username,
            enabled: self.status == STATUS_ENABLED,
            attributes,
        })
    }
}

/// Users stored with salted SHA-256 password hashes.
pub struct SqlAuth {
    conn: Mutex<Connection>,
}

impl SqlAuth {
    /// Opens the database and creates the schema when configured to.
    pub fn open(config: &SqlAuthConfig) -> AuthResult<Self> {
        let conn = match &config.location {
            SqlLocation::Memory => Connection::open_in_memory(),
            SqlLocation::File(path) => Connection::open(path),
        }
        .map_err(|e| driver_error("", e))?;

        conn.busy_timeout(config.timeout)
            .map_err(|e| driver_error("", e))?;
        if config.create_tables {
            conn.execute_batch(SCHEMA).map_err(|e| driver_error("", e))?;
        }

        tracing::debug!(
            target: "sync_core::auth",
            location = ?config.location,
            "sql authentication backend ready"
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch(&self, identifier: &str) -> AuthResult<Option<StoredUser>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, username, password_hash, status, attributes
                 FROM users WHERE username = ?1",
                params![identifier],
                |row| {
                    Ok(StoredUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        status: row.get(3)?,
                        attributes: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| driver_error(identifier, e))
    }

    fn store_hash(&self, identifier: &str, secret: &Secret<String>) -> AuthResult<()> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![hash_password(secret), identifier],
            )
            .map_err(|e| driver_error(identifier, e))?;
        if changed == 0 {
            return Err(AuthError::UserNotFound(identifier.to_string()));
        }
        Ok(())
    }
}

fn driver_error(identifier: &str, err: rusqlite::Error) -> AuthError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            AuthError::AlreadyExists(identifier.to_string())
        }
        _ => {
            tracing::warn!(target: "sync_core::auth", error = %err, "sql backend failure");
            AuthError::BackendUnavailable(err.to_string())
        }
    }
}

impl AuthBackend for SqlAuth {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn verify_credentials(&self, identifier: &str, secret: &Secret<String>) -> AuthResult<Principal> {
        let Some(user) = self.fetch(identifier)? else {
            verify_password(secret, MISS_HASH);
            return Err(AuthError::InvalidCredentials);
        };
        if user.status != STATUS_ENABLED {
            tracing::debug!(target: "sync_core::auth", user = identifier, "disabled account");
            return Err(AuthError::InvalidCredentials);
        }
        if !verify_password(secret, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user.into_record()?.to_principal())
    }

    fn get_user(&self, identifier: &str) -> AuthResult<UserRecord> {
        self.fetch(identifier)?
            .ok_or_else(|| AuthError::UserNotFound(identifier.to_string()))?
            .into_record()
    }

    fn create_user(
        &self,
        identifier: &str,
        secret: &Secret<String>,
        attributes: Attributes,
    ) -> AuthResult<UserRecord> {
        check_strength(identifier, secret)?;
        let encoded = serde_json::to_string(&attributes)
            .map_err(|e| AuthError::BackendUnavailable(e.to_string()))?;

        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO users (username, password_hash, status, attributes)
                 VALUES (?1, ?2, ?3, ?4)",
                params![identifier, hash_password(secret), STATUS_ENABLED, encoded],
            )
            .map_err(|e| driver_error(identifier, e))?;
            conn.last_insert_rowid()
        };

        tracing::info!(target: "sync_core::auth", user = identifier, "user created");
        Ok(UserRecord {
            user_id: u64::try_from(id).unwrap_or_default(),
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
        self.verify_credentials(identifier, old_secret)?;
        check_strength(identifier, new_secret)?;
        self.store_hash(identifier, new_secret)
    }

    fn reset_password(&self, identifier: &str, new_secret: &Secret<String>) -> AuthResult<()> {
        check_strength(identifier, new_secret)?;
        self.store_hash(identifier, new_secret)
    }

    fn delete_user(&self, identifier: &str) -> AuthResult<()> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM users WHERE username = ?1", params![identifier])
            .map_err(|e| driver_error(identifier, e))?;
        if changed == 0 {
            return Err(AuthError::UserNotFound(identifier.to_string()));
        }
        tracing::info!(target: "sync_core::auth", user = identifier, "user deleted");
        Ok(())
    }

    fn set_enabled(&self, identifier: &str, enabled: bool) -> AuthResult<()> {
        let status = if enabled { STATUS_ENABLED } else { STATUS_DISABLED };
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE users SET status = ?1 WHERE username = ?2",
                params![status, identifier],
            )
            .map_err(|e| driver_error(identifier, e))?;
        if changed == 0 {
            return Err(AuthError::UserNotFound(identifier.to_string()));
        }
        tracing::info!(target: "sync_core::auth", user = identifier, enabled, "account state changed");
        Ok(())
    }
}
