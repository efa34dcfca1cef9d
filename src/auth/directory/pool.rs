//! Bounded pool of directory connections.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{DirectoryConnection, DirectoryConnector, DirectoryError};
use crate::secret::Secret;

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub uri: String,
    /// Maximum number of open connections.
    pub size: usize,
    /// Attempts for a bind on a server that is down, and for a checkout on a
    /// full pool.
    pub retry_max: u32,
    pub retry_delay: Duration,
    /// Per-operation timeout handed to the connector.
    pub timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            size: 10,
            retry_max: 3,
            retry_delay: Duration::from_millis(100),
            timeout: None,
        }
    }
}

struct PoolState {
    idle: Vec<Box<dyn DirectoryConnection>>,
    open: usize,
}

pub struct ConnectionPool {
    connector: Arc<dyn DirectoryConnector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn DirectoryConnector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of open connections, idle or checked out.
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Checks out a connection bound as `dn`.
    ///
    /// The connection is unbound and returned to the pool when the guard is
    /// dropped.
    pub fn connection(
        &self,
        dn: &str,
        password: &Secret<String>,
    ) -> Result<PooledConnection<'_>, DirectoryError> {
        let mut guard = PooledConnection {
            pool: self,
            conn: Some(self.checkout()?),
            broken: false,
        };

        let mut tries = 0;
        loop {
            match guard.bind(dn, password) {
                Ok(()) => return Ok(guard),
                Err(DirectoryError::ServerDown(reason)) => {
                    tries += 1;
                    tracing::debug!(
                        target: "sync_core::auth",
                        uri = %self.config.uri,
                        attempt = tries,
                        reason = %reason,
                        "directory server down, retrying bind"
                    );
                    if tries >= self.config.retry_max {
                        guard.mark_broken();
                        return Err(DirectoryError::ServerDown(reason));
                    }
                    std::thread::sleep(self.config.retry_delay);
                    let fresh = self.connector.connect(&self.config.uri, self.config.timeout);
                    match fresh {
                        Ok(conn) => guard.conn = Some(conn),
                        Err(e) => {
                            guard.mark_broken();
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    if e.is_outage() {
                        guard.mark_broken();
                    }
                    return Err(e);
                }
            }
        }
    }

    fn checkout(&self) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        let mut tries = 0;
        loop {
            {
                let mut state = self.state.lock();
                if let Some(conn) = state.idle.pop() {
                    return Ok(conn);
                }
                if state.open < self.config.size {
                    state.open += 1;
                    drop(state);
                    return self
                        .connector
                        .connect(&self.config.uri, self.config.timeout)
                        .map_err(|e| {
                            self.state.lock().open -= 1;
                            e
                        });
                }
            }
            tries += 1;
            if tries >= self.config.retry_max.max(1) {
                return Err(DirectoryError::PoolExhausted(self.config.uri.clone()));
            }
            std::thread::sleep(self.config.retry_delay);
        }
    }

    fn release(&self, mut conn: Box<dyn DirectoryConnection>, broken: bool) {
        conn.unbind();
        let mut state = self.state.lock();
        if broken {
            state.open = state.open.saturating_sub(1);
        } else {
            state.idle.push(conn);
        }
    }
}

/// A checked-out connection.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Box<dyn DirectoryConnection>>,
    broken: bool,
}

impl PooledConnection<'_> {
    /// Drops the connection instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = dyn DirectoryConnection;

    fn deref(&self) -> &Self::Target {
        // always Some until drop
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::directory::InMemoryDirectory;

    fn pool(directory: &InMemoryDirectory, size: usize) -> ConnectionPool {
        let mut config = PoolConfig::new("memory://test");
        config.size = size;
        config.retry_max = 2;
        config.retry_delay = Duration::from_millis(1);
        ConnectionPool::new(Arc::new(directory.clone()), config)
    }

    #[test]
    fn connections_are_reused() {
        let directory = InMemoryDirectory::new();
        directory.add_service_account("cn=bind", &Secret::from("bind-password"));
        let pool = pool(&directory, 2);

        for _ in 0..5 {
            let conn = pool
                .connection("cn=bind", &Secret::from("bind-password"))
                .unwrap();
            drop(conn);
        }
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn full_pool_is_reported() {
        let directory = InMemoryDirectory::new();
        directory.add_service_account("cn=bind", &Secret::from("bind-password"));
        let pool = pool(&directory, 1);

        let _held = pool
            .connection("cn=bind", &Secret::from("bind-password"))
            .unwrap();
        let err = pool
            .connection("cn=bind", &Secret::from("bind-password"))
            .err()
            .unwrap();
        assert!(matches!(err, DirectoryError::PoolExhausted(_)));
    }

    #[test]
    fn failed_binds_return_the_connection() {
        let directory = InMemoryDirectory::new();
        let pool = pool(&directory, 1);

        let err = pool
            .connection("cn=nobody", &Secret::from("whatever"))
            .err()
            .unwrap();
        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn outages_drop_connections() {
        let directory = InMemoryDirectory::new();
        directory.add_service_account("cn=bind", &Secret::from("bind-password"));
        let pool = pool(&directory, 2);
        drop(pool.connection("cn=bind", &Secret::from("bind-password")).unwrap());

        directory.set_online(false);
        let err = pool
            .connection("cn=bind", &Secret::from("bind-password"))
            .err()
            .unwrap();
        assert!(err.is_outage());
        assert_eq!(pool.open_connections(), 0);
    }
}
