//! Backend registry.
//!
//! Maps each [`Capability`] to exactly one implementation chosen by a string
//! identifier at startup. The instance is built on first resolution, at most
//! once even under concurrent first use, and shared for the life of the
//! registry. Registering again replaces the descriptor and drops the
//! instance.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use thiserror::Error;

use crate::auth::{
    AuthBackend, CachedAuth, CachedAuthConfig, DirectoryAuth, DirectoryAuthConfig,
    DirectoryConnector, SqlAuth, SqlAuthConfig,
};
use crate::cache::{KeyValueCache, MemoryCache, NullCache};
use crate::captcha::{CaptchaBackend, DisabledCaptcha, LocalCaptcha};
use crate::config::{ConfigSet, Params};

/// Errors raised while registering or resolving backends.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown capability {0}")]
    UnknownCapability(String),

    #[error("unknown {capability} implementation {implementation}")]
    UnknownImplementation {
        capability: Capability,
        implementation: String,
    },

    #[error("no implementation registered for {0}")]
    CapabilityUnbound(Capability),

    #[error("cannot construct {capability} backend {implementation}")]
    Construction {
        capability: Capability,
        implementation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// A named operation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Authentication,
    Cache,
    Captcha,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Authentication,
        Capability::Cache,
        Capability::Captcha,
    ];

    /// Configuration section holding the capability's settings.
    pub fn section(self) -> &'static str {
        match self {
            Capability::Authentication => "auth",
            Capability::Cache => "cache",
            Capability::Captcha => "captcha",
        }
    }

    /// Implementation used when the section names none.
    fn default_implementation(self) -> Option<&'static str> {
        match self {
            Capability::Authentication => None,
            Capability::Cache => Some("memory"),
            Capability::Captcha => Some("disabled"),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Authentication => "authentication",
            Capability::Cache => "cache",
            Capability::Captcha => "captcha",
        })
    }
}

impl FromStr for Capability {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth" | "authentication" => Ok(Capability::Authentication),
            "cache" => Ok(Capability::Cache),
            "captcha" => Ok(Capability::Captcha),
            other => Err(RegistryError::UnknownCapability(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVariant {
    Sql,
    Directory,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheVariant {
    Memory,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaVariant {
    Disabled,
    Local,
}

/// A known implementation of one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implementation {
    Auth(AuthVariant),
    Cache(CacheVariant),
    Captcha(CaptchaVariant),
}

impl Implementation {
    /// Parses an implementation identifier for `capability`.
    pub fn parse(capability: Capability, id: &str) -> Result<Self, RegistryError> {
        let normalized = id.trim().to_ascii_lowercase();
        let found = match (capability, normalized.as_str()) {
            (Capability::Authentication, "sql") => Some(Implementation::Auth(AuthVariant::Sql)),
            (Capability::Authentication, "ldap" | "directory") => {
                Some(Implementation::Auth(AuthVariant::Directory))
            }
            (Capability::Authentication, "cached" | "session") => {
                Some(Implementation::Auth(AuthVariant::Cached))
            }
            (Capability::Cache, "memory") => Some(Implementation::Cache(CacheVariant::Memory)),
            (Capability::Cache, "null") => Some(Implementation::Cache(CacheVariant::Null)),
            (Capability::Captcha, "disabled") => {
                Some(Implementation::Captcha(CaptchaVariant::Disabled))
            }
            (Capability::Captcha, "local") => Some(Implementation::Captcha(CaptchaVariant::Local)),
            _ => None,
        };
        found.ok_or_else(|| RegistryError::UnknownImplementation {
            capability,
            implementation: id.to_string(),
        })
    }

    pub fn capability(self) -> Capability {
        match self {
            Implementation::Auth(_) => Capability::Authentication,
            Implementation::Cache(_) => Capability::Cache,
            Implementation::Captcha(_) => Capability::Captcha,
        }
    }

    /// Canonical identifier.
    pub fn id(self) -> &'static str {
        match self {
            Implementation::Auth(AuthVariant::Sql) => "sql",
            Implementation::Auth(AuthVariant::Directory) => "ldap",
            Implementation::Auth(AuthVariant::Cached) => "cached",
            Implementation::Cache(CacheVariant::Memory) => "memory",
            Implementation::Cache(CacheVariant::Null) => "null",
            Implementation::Captcha(CaptchaVariant::Disabled) => "disabled",
            Implementation::Captcha(CaptchaVariant::Local) => "local",
        }
    }
}

/// What to build for a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub implementation: Implementation,
    pub params: Params,
}

impl BackendDescriptor {
    pub fn capability(&self) -> Capability {
        self.implementation.capability()
    }
}

/// A live backend. Cloning shares the same instance.
#[derive(Clone)]
pub enum BackendInstance {
    Authentication(Arc<dyn AuthBackend>),
    Cache(Arc<dyn KeyValueCache>),
    Captcha(Arc<dyn CaptchaBackend>),
}

impl BackendInstance {
    pub fn capability(&self) -> Capability {
        match self {
            BackendInstance::Authentication(_) => Capability::Authentication,
            BackendInstance::Cache(_) => Capability::Cache,
            BackendInstance::Captcha(_) => Capability::Captcha,
        }
    }

    /// Implementation identifier reported by the backend itself.
    pub fn name(&self) -> &'static str {
        match self {
            BackendInstance::Authentication(b) => b.name(),
            BackendInstance::Cache(b) => b.name(),
            BackendInstance::Captcha(b) => b.name(),
        }
    }

    /// Whether both handles point at the same instance.
    pub fn same_instance(&self, other: &BackendInstance) -> bool {
        match (self, other) {
            (BackendInstance::Authentication(a), BackendInstance::Authentication(b)) => {
                Arc::ptr_eq(a, b)
            }
            (BackendInstance::Cache(a), BackendInstance::Cache(b)) => Arc::ptr_eq(a, b),
            (BackendInstance::Captcha(a), BackendInstance::Captcha(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInstance")
            .field("capability", &self.capability())
            .field("name", &self.name())
            .finish()
    }
}

struct Slot {
    descriptor: BackendDescriptor,
    instance: RwLock<Option<BackendInstance>>,
}

/// Owner of every backend instance of a process.
pub struct BackendRegistry {
    slots: RwLock<HashMap<Capability, Arc<Slot>>>,
    directory_connector: Option<Arc<dyn DirectoryConnector>>,
    constructions: AtomicUsize,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            directory_connector: None,
            constructions: AtomicUsize::new(0),
        }
    }

    /// Connector used by the directory variant. Without one, only
    /// `memory:` URIs can be served.
    pub fn with_directory_connector(mut self, connector: Arc<dyn DirectoryConnector>) -> Self {
        self.directory_connector = Some(connector);
        self
    }

    /// Registers every capability configured in `config`.
    ///
    /// `auth` is registered only when `auth.backend` is set; `cache` and
    /// `captcha` fall back to `memory` and `disabled`.
    pub fn load_config(self, config: &ConfigSet) -> Result<Self, RegistryError> {
        for capability in Capability::ALL {
            let section = capability.section();
            let configured = config.get(section, "backend").ok().map(|v| v.to_string());
            let Some(id) = configured.or(capability.default_implementation().map(String::from))
            else {
                continue;
            };
            self.register(capability, &id, Params::from_section(config, section))?;
        }
        Ok(self)
    }

    /// Shorthand for `BackendRegistry::new().load_config(config)`.
    pub fn from_config(config: &ConfigSet) -> Result<Self, RegistryError> {
        Self::new().load_config(config)
    }

    /// Binds `capability` to the implementation named `implementation`.
    pub fn register(
        &self,
        capability: Capability,
        implementation: &str,
        params: Params,
    ) -> Result<(), RegistryError> {
        let implementation = Implementation::parse(capability, implementation)?;
        let slot = Arc::new(Slot {
            descriptor: BackendDescriptor {
                implementation,
                params,
            },
            instance: RwLock::new(None),
        });
        let replaced = self.slots.write().insert(capability, slot).is_some();
        tracing::info!(
            target: "sync_core::registry",
            %capability,
            implementation = implementation.id(),
            replaced,
            "backend registered"
        );
        Ok(())
    }

    pub fn is_registered(&self, capability: Capability) -> bool {
        self.slots.read().contains_key(&capability)
    }

    pub fn descriptor(&self, capability: Capability) -> Option<BackendDescriptor> {
        self.slots
            .read()
            .get(&capability)
            .map(|slot| slot.descriptor.clone())
    }

    /// Number of backend constructions performed so far.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Returns the instance for `capability`, building it on first use.
    pub fn resolve(&self, capability: Capability) -> Result<BackendInstance, RegistryError> {
        let slot = self
            .slots
            .read()
            .get(&capability)
            .cloned()
            .ok_or(RegistryError::CapabilityUnbound(capability))?;

        if let Some(instance) = slot.instance.read().as_ref() {
            return Ok(instance.clone());
        }

        let guard = slot.instance.upgradable_read();
        if let Some(instance) = guard.as_ref() {
            return Ok(instance.clone());
        }
        let built = self.construct(&slot.descriptor)?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = Some(built.clone());
        Ok(built)
    }

    /// Resolves a capability given by name.
    pub fn resolve_named(&self, capability: &str) -> Result<BackendInstance, RegistryError> {
        self.resolve(capability.parse()?)
    }

    pub fn authentication(&self) -> Result<Arc<dyn AuthBackend>, RegistryError> {
        match self.resolve(Capability::Authentication)? {
            BackendInstance::Authentication(backend) => Ok(backend),
            _ => Err(RegistryError::CapabilityUnbound(Capability::Authentication)),
        }
    }

    pub fn cache(&self) -> Result<Arc<dyn KeyValueCache>, RegistryError> {
        match self.resolve(Capability::Cache)? {
            BackendInstance::Cache(backend) => Ok(backend),
            _ => Err(RegistryError::CapabilityUnbound(Capability::Cache)),
        }
    }

    pub fn captcha(&self) -> Result<Arc<dyn CaptchaBackend>, RegistryError> {
        match self.resolve(Capability::Captcha)? {
            BackendInstance::Captcha(backend) => Ok(backend),
            _ => Err(RegistryError::CapabilityUnbound(Capability::Captcha)),
        }
    }

    /// Resolves every registered capability, failing on the first error.
    pub fn warm_up(&self) -> Result<(), RegistryError> {
        let registered: Vec<Capability> = self.slots.read().keys().copied().collect();
        for capability in registered {
            self.resolve(capability)?;
        }
        Ok(())
    }

    fn construct(&self, descriptor: &BackendDescriptor) -> Result<BackendInstance, RegistryError> {
        let capability = descriptor.capability();
        let implementation = descriptor.implementation.id();
        let fail = |source: Box<dyn StdError + Send + Sync>| {
            tracing::error!(
                target: "sync_core::registry",
                %capability,
                implementation,
                error = %source,
                "backend construction failed"
            );
            RegistryError::Construction {
                capability,
                implementation,
                source,
            }
        };

        let instance = match descriptor.implementation {
            Implementation::Auth(variant) => BackendInstance::Authentication(
                self.build_auth(variant, &descriptor.params).map_err(fail)?,
            ),
            Implementation::Cache(CacheVariant::Memory) => BackendInstance::Cache(Arc::new(
                MemoryCache::from_params(&descriptor.params).map_err(|e| fail(Box::new(e)))?,
            )),
            Implementation::Cache(CacheVariant::Null) => BackendInstance::Cache(Arc::new(NullCache)),
            Implementation::Captcha(CaptchaVariant::Disabled) => {
                BackendInstance::Captcha(Arc::new(DisabledCaptcha))
            }
            Implementation::Captcha(CaptchaVariant::Local) => BackendInstance::Captcha(Arc::new(
                LocalCaptcha::from_params(&descriptor.params).map_err(|e| fail(Box::new(e)))?,
            )),
        };

        self.constructions.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            target: "sync_core::registry",
            %capability,
            implementation,
            "backend constructed"
        );
        Ok(instance)
    }

    fn build_auth(
        &self,
        variant: AuthVariant,
        params: &Params,
    ) -> Result<Arc<dyn AuthBackend>, Box<dyn StdError + Send + Sync>> {
        match variant {
            AuthVariant::Sql => {
                let config = SqlAuthConfig::from_params(params)?;
                Ok(Arc::new(SqlAuth::open(&config)?))
            }
            AuthVariant::Directory => {
                let config = DirectoryAuthConfig::from_params(params)?;
                match (&self.directory_connector, config.is_in_memory()) {
                    (Some(connector), _) => Ok(Arc::new(DirectoryAuth::new(connector.clone(), config))),
                    (None, true) => Ok(Arc::new(DirectoryAuth::in_memory(config).0)),
                    (None, false) => Err(format!(
                        "no directory connector available for {}",
                        config.pool.uri
                    )
                    .into()),
                }
            }
            AuthVariant::Cached => {
                let inner_id: String = params.get_typed_or("inner", "sql".to_string())?;
                let inner = match Implementation::parse(Capability::Authentication, &inner_id)? {
                    Implementation::Auth(AuthVariant::Cached) => {
                        return Err("a cached backend cannot wrap another cached backend".into())
                    }
                    Implementation::Auth(inner) => self.build_auth(inner, params)?,
                    _ => return Err(format!("{inner_id} is not an authentication backend").into()),
                };
                let config = CachedAuthConfig::from_params(params)?;
                Ok(Arc::new(CachedAuth::new(inner, config)))
            }
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        let mut registered: Vec<(String, &'static str)> = slots
            .iter()
            .map(|(c, s)| (c.to_string(), s.descriptor.implementation.id()))
            .collect();
        registered.sort();
        f.debug_struct("BackendRegistry")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;

    fn config(entries: &[(&str, &str, &str)]) -> ConfigSet {
        ConfigSet::load(&[ConfigSource::inline(entries.iter().copied())]).unwrap()
    }

    #[test]
    fn capability_names_and_aliases() {
        assert_eq!("auth".parse::<Capability>().unwrap(), Capability::Authentication);
        assert_eq!(
            "Authentication".parse::<Capability>().unwrap(),
            Capability::Authentication
        );
        assert!(matches!(
            "storage".parse::<Capability>(),
            Err(RegistryError::UnknownCapability(_))
        ));
    }

    #[test]
    fn unknown_implementation_is_rejected() {
        let registry = BackendRegistry::new();
        let err = registry
            .register(Capability::Authentication, "kerberos", Params::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownImplementation { .. }));
        assert!(!registry.is_registered(Capability::Authentication));

        let err = registry
            .register(Capability::Cache, "sql", Params::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownImplementation { .. }));
    }

    #[test]
    fn resolve_is_identity_stable() {
        let registry = BackendRegistry::from_config(&config(&[("auth", "backend", "sql")])).unwrap();
        let first = registry.resolve(Capability::Authentication).unwrap();
        let second = registry.resolve(Capability::Authentication).unwrap();
        assert!(first.same_instance(&second));
        assert_eq!(first.name(), "sql");
        assert_eq!(registry.constructions(), 1);
    }

    #[test]
    fn defaults_for_cache_and_captcha() {
        let registry = BackendRegistry::from_config(&ConfigSet::default()).unwrap();
        assert_eq!(registry.cache().unwrap().name(), "memory");
        assert_eq!(registry.captcha().unwrap().name(), "disabled");
        assert!(matches!(
            registry.authentication().err(),
            Some(RegistryError::CapabilityUnbound(Capability::Authentication))
        ));
    }

    #[test]
    fn unbound_stays_unbound_after_other_resolutions() {
        let registry = BackendRegistry::new();
        registry
            .register(Capability::Cache, "null", Params::default())
            .unwrap();
        registry.resolve(Capability::Cache).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                registry.resolve(Capability::Captcha),
                Err(RegistryError::CapabilityUnbound(Capability::Captcha))
            ));
        }
    }

    #[test]
    fn re_registration_replaces_the_instance() {
        let registry = BackendRegistry::new();
        registry
            .register(Capability::Cache, "memory", Params::default())
            .unwrap();
        let before = registry.resolve(Capability::Cache).unwrap();
        registry
            .register(Capability::Cache, "null", Params::default())
            .unwrap();
        let after = registry.resolve(Capability::Cache).unwrap();
        assert!(!before.same_instance(&after));
        assert_eq!(after.name(), "null");
    }

    #[test]
    fn concurrent_first_use_constructs_once() {
        let registry = BackendRegistry::from_config(&config(&[("auth", "backend", "sql")])).unwrap();
        let resolved: Vec<BackendInstance> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.resolve(Capability::Authentication).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(registry.constructions(), 1);
        assert!(resolved.windows(2).all(|w| w[0].same_instance(&w[1])));
    }

    #[test]
    fn directory_variant_needs_a_connector_for_remote_uris() {
        let registry = BackendRegistry::from_config(&config(&[
            ("auth", "backend", "ldap"),
            ("auth", "ldapuri", "ldap://ldap.example.com"),
        ]))
        .unwrap();
        assert!(matches!(
            registry.authentication().err(),
            Some(RegistryError::Construction { .. })
        ));
    }

    #[test]
    fn cached_variant_wraps_its_inner_backend() {
        let registry = BackendRegistry::from_config(&config(&[
            ("auth", "backend", "session"),
            ("auth", "inner", "ldap"),
            ("auth", "ldapuri", "memory://"),
            ("auth", "session_ttl", "60"),
        ]))
        .unwrap();
        assert_eq!(registry.authentication().unwrap().name(), "cached");

        registry
            .register(
                Capability::Authentication,
                "cached",
                Params::from_section(&config(&[("auth", "inner", "cached")]), "auth"),
            )
            .unwrap();
        assert!(matches!(
            registry.authentication().err(),
            Some(RegistryError::Construction { .. })
        ));
    }

    #[test]
    fn bad_parameters_fail_at_resolution() {
        let registry = BackendRegistry::from_config(&config(&[
            ("cache", "backend", "memory"),
            ("cache", "max_entries", "plenty"),
        ]))
        .unwrap();
        assert!(registry.warm_up().is_err());
    }
}
