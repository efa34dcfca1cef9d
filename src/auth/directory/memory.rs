//! In-process directory server for development and tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{DirectoryConnection, DirectoryConnector, DirectoryEntry, DirectoryError, Filter, Scope};
use crate::auth::password::{hash_password, verify_password};
use crate::secret::Secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Online,
    Offline,
    Slow,
}

#[derive(Debug)]
struct State {
    // keyed by lower-cased dn
    entries: BTreeMap<String, DirectoryEntry>,
    health: Health,
}

/// A directory held in memory, shared by every connection made from it.
///
/// Cloning yields another handle to the same directory.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<State>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                entries: BTreeMap::new(),
                health: Health::Online,
            })),
        }
    }

    /// Adds an account that can bind but is not a user (bind or admin DN).
    pub fn add_service_account(&self, dn: &str, password: &Secret<String>) {
        let mut entry = DirectoryEntry::new(dn);
        entry.set("userPassword", vec![hash_password(password)]);
        self.state.write().entries.insert(dn.to_lowercase(), entry);
    }

    /// Switches the simulated server on or off.
    pub fn set_online(&self, online: bool) {
        self.state.write().health = if online { Health::Online } else { Health::Offline };
    }

    /// Makes every operation time out.
    pub fn simulate_timeouts(&self) {
        self.state.write().health = Health::Slow;
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_health(&self) -> Result<(), DirectoryError> {
        match self.state.read().health {
            Health::Online => Ok(()),
            Health::Offline => Err(DirectoryError::ServerDown("memory directory offline".into())),
            Health::Slow => Err(DirectoryError::Timeout("memory directory timed out".into())),
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryConnector for InMemoryDirectory {
    fn connect(
        &self,
        _uri: &str,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        self.check_health()?;
        Ok(Box::new(MemoryConnection {
            directory: self.clone(),
            bound: None,
        }))
    }
}

struct MemoryConnection {
    directory: InMemoryDirectory,
    bound: Option<String>,
}

impl MemoryConnection {
    fn require_bound(&self) -> Result<(), DirectoryError> {
        self.directory.check_health()?;
        match self.bound {
            Some(_) => Ok(()),
            None => Err(DirectoryError::InvalidCredentials),
        }
    }
}

fn in_scope(entry_dn: &str, base: &str, scope: Scope) -> bool {
    match scope {
        Scope::Base => entry_dn == base,
        Scope::Subtree => entry_dn == base || entry_dn.ends_with(&format!(",{base}")),
    }
}

impl DirectoryConnection for MemoryConnection {
    fn bind(&mut self, dn: &str, password: &Secret<String>) -> Result<(), DirectoryError> {
        self.directory.check_health()?;
        let state = self.directory.state.read();
        let stored = state
            .entries
            .get(&dn.to_lowercase())
            .and_then(|entry| entry.first("userPassword"));
        match stored {
            Some(hash) if verify_password(password, hash) => {
                self.bound = Some(dn.to_lowercase());
                Ok(())
            }
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.require_bound()?;
        let base = base.to_lowercase();
        let state = self.directory.state.read();
        if scope == Scope::Base && !state.entries.contains_key(&base) {
            return Err(DirectoryError::NoSuchObject(base));
        }
        Ok(state
            .entries
            .iter()
            .filter(|(dn, entry)| in_scope(dn, &base, scope) && filter.matches(entry))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn add(&mut self, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        self.require_bound()?;
        let key = entry.dn.to_lowercase();
        let mut state = self.directory.state.write();
        if state.entries.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists(entry.dn));
        }
        state.entries.insert(key, entry);
        Ok(())
    }

    fn modify(&mut self, dn: &str, attribute: &str, values: Vec<String>) -> Result<(), DirectoryError> {
        self.require_bound()?;
        let mut state = self.directory.state.write();
        let entry = state
            .entries
            .get_mut(&dn.to_lowercase())
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
        entry.set(attribute, values);
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> Result<(), DirectoryError> {
        self.require_bound()?;
        self.directory
            .state
            .write()
            .entries
            .remove(&dn.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))
    }
}
