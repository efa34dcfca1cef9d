//! Layered service configuration.
//!
//! A [`ConfigSet`] is loaded once from an ordered list of [`ConfigSource`]s
//! and never changes afterwards. Later sources override earlier ones for the
//! same `(section, key)`; environment sources are applied after every other
//! source, wherever they appear in the list.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Prefix of sections that override keys for a single virtual host.
pub const HOST_SECTION_PREFIX: &str = "host:";

/// Errors raised while loading or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key is absent and the caller declared no default.
    #[error("missing configuration key {section}.{key}")]
    MissingKey { section: String, key: String },

    /// The value exists but cannot be read as the requested type.
    #[error("configuration key {section}.{key} is not a valid {expected}")]
    TypeMismatch {
        section: String,
        key: String,
        expected: &'static str,
    },

    /// A configuration file could not be read.
    #[error("cannot read configuration file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration source is malformed.
    #[error("malformed configuration in {origin}: {reason}")]
    Parse { origin: String, reason: String },
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl Value {
    /// Interprets a raw scalar the way configuration files are read:
    /// `true`/`false` become booleans, integers become ints, anything else
    /// stays a string.
    pub fn coerce(raw: &str) -> Value {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::String(raw.to_string()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Result<Value, String> {
        match value {
            serde_json::Value::String(s) => Ok(Value::coerce(s)),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::String(n.to_string()),
            }),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s.clone()),
                    serde_json::Value::Number(n) => Ok(n.to_string()),
                    serde_json::Value::Bool(b) => Ok(b.to_string()),
                    other => Err(format!("unsupported list element {other}")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Null => Err("null values are not allowed".to_string()),
            serde_json::Value::Object(_) => Err("nested tables are not allowed".to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Keys and values of one section.
pub type Section = BTreeMap<String, Value>;

/// Types a [`Value`] can be read as.
pub trait FromValue: Sized {
    /// Name used in `TypeMismatch` errors.
    const EXPECTED: &'static str;

    /// Converts the value, or returns `None` if it has the wrong shape.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

macro_rules! unsigned_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                const EXPECTED: &'static str = "non-negative integer";

                fn from_value(value: &Value) -> Option<Self> {
                    i64::from_value(value).and_then(|n| <$ty>::try_from(n).ok())
                }
            }
        )*
    };
}

unsigned_from_value!(u64, u32, usize);

impl FromValue for Vec<String> {
    const EXPECTED: &'static str = "list";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => Some(items.clone()),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Value::Int(_) | Value::Bool(_) => Some(vec![value.to_string()]),
        }
    }
}

impl FromValue for Duration {
    const EXPECTED: &'static str = "duration in seconds";

    fn from_value(value: &Value) -> Option<Self> {
        u64::from_value(value).map(Duration::from_secs)
    }
}

/// One origin of configuration values.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Values supplied directly by the embedding process.
    Inline(BTreeMap<String, Section>),
    /// A JSON document of the shape `{"section": {"key": value}}`.
    Json { origin: String, text: String },
    /// A JSON file on disk.
    File(PathBuf),
    /// The process environment, restricted to names starting with `prefix`.
    Env { prefix: String },
    /// An explicit set of environment-style variables.
    EnvVars {
        prefix: String,
        vars: Vec<(String, String)>,
    },
}

impl ConfigSource {
    /// Builds an inline source from `(section, key, raw value)` triples.
    /// Raw values are coerced with [`Value::coerce`].
    pub fn inline<I, S, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, K, V)>,
        S: Into<String>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut sections: BTreeMap<String, Section> = BTreeMap::new();
        for (section, key, value) in entries {
            sections
                .entry(section.into())
                .or_default()
                .insert(key.into(), Value::coerce(value.as_ref()));
        }
        ConfigSource::Inline(sections)
    }

    /// A JSON file source.
    pub fn file(path: impl AsRef<Path>) -> Self {
        ConfigSource::File(path.as_ref().to_path_buf())
    }

    /// An in-memory JSON source.
    pub fn json(origin: impl Into<String>, text: impl Into<String>) -> Self {
        ConfigSource::Json {
            origin: origin.into(),
            text: text.into(),
        }
    }

    /// The process environment under `prefix`.
    pub fn env(prefix: impl Into<String>) -> Self {
        ConfigSource::Env {
            prefix: prefix.into(),
        }
    }

    /// Explicit variables under `prefix`, read like the process environment.
    pub fn env_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ConfigSource::EnvVars {
            prefix: prefix.into(),
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn is_env(&self) -> bool {
        matches!(self, ConfigSource::Env { .. } | ConfigSource::EnvVars { .. })
    }
}

/// Immutable, layered configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
    sections: BTreeMap<String, Section>,
}

impl ConfigSet {
    /// Loads configuration from `sources`.
    ///
    /// Non-environment sources are applied in list order, then environment
    /// sources in list order.
    pub fn load(sources: &[ConfigSource]) -> Result<ConfigSet, ConfigError> {
        let mut set = ConfigSet::default();
        let ordered = sources
            .iter()
            .filter(|s| !s.is_env())
            .chain(sources.iter().filter(|s| s.is_env()));

        for source in ordered {
            match source {
                ConfigSource::Inline(sections) => {
                    for (name, section) in sections {
                        set.merge_section(name, section.clone());
                    }
                }
                ConfigSource::Json { origin, text } => set.merge_json(origin, text)?,
                ConfigSource::File(path) => {
                    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    set.merge_json(&path.display().to_string(), &text)?;
                }
                ConfigSource::Env { prefix } => set.merge_env(prefix, std::env::vars()),
                ConfigSource::EnvVars { prefix, vars } => {
                    set.merge_env(prefix, vars.iter().cloned())
                }
            }
        }

        tracing::debug!(
            target: "sync_core::config",
            sections = set.sections.len(),
            "configuration loaded"
        );
        Ok(set)
    }

    fn merge_section(&mut self, name: &str, section: Section) {
        self.sections.entry(name.to_string()).or_default().extend(section);
    }

    fn merge_json(&mut self, origin: &str, text: &str) -> Result<(), ConfigError> {
        let parse_error = |reason: String| ConfigError::Parse {
            origin: origin.to_string(),
            reason,
        };
        let document: serde_json::Value =
            serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?;
        let tables = document
            .as_object()
            .ok_or_else(|| parse_error("top level must be a table of sections".to_string()))?;

        for (name, table) in tables {
            let entries = table
                .as_object()
                .ok_or_else(|| parse_error(format!("section {name} must be a table")))?;
            let mut section = Section::new();
            for (key, raw) in entries {
                let value = Value::from_json(raw)
                    .map_err(|reason| parse_error(format!("{name}.{key}: {reason}")))?;
                section.insert(key.clone(), value);
            }
            self.merge_section(name, section);
        }
        Ok(())
    }

    fn merge_env(&mut self, prefix: &str, vars: impl Iterator<Item = (String, String)>) {
        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(prefix) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }
            self.sections
                .entry(section.to_ascii_lowercase())
                .or_default()
                .insert(key.to_ascii_lowercase(), Value::coerce(&raw));
        }
    }

    /// Returns the raw value, failing with `MissingKey` when absent.
    pub fn get(&self, section: &str, key: &str) -> Result<&Value, ConfigError> {
        self.lookup(section, key).ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    /// Returns the raw value or `default` when absent.
    pub fn get_or(&self, section: &str, key: &str, default: impl Into<Value>) -> Value {
        self.lookup(section, key)
            .cloned()
            .unwrap_or_else(|| default.into())
    }

    /// Returns the value read as `T`.
    pub fn get_typed<T: FromValue>(&self, section: &str, key: &str) -> Result<T, ConfigError> {
        let value = self.get(section, key)?;
        Self::coerce_typed(section, key, value)
    }

    /// Returns the value read as `T`, or `default` when the key is absent.
    ///
    /// A present value of the wrong type is still an error.
    pub fn get_typed_or<T: FromValue>(
        &self,
        section: &str,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.lookup(section, key) {
            Some(value) => Self::coerce_typed(section, key, value),
            None => Ok(default),
        }
    }

    fn coerce_typed<T: FromValue>(section: &str, key: &str, value: &Value) -> Result<T, ConfigError> {
        T::from_value(value).ok_or_else(|| ConfigError::TypeMismatch {
            section: section.to_string(),
            key: key.to_string(),
            expected: T::EXPECTED,
        })
    }

    fn lookup(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    /// Returns a whole section.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Returns `true` if a section with this name was loaded.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Names of all loaded sections.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Returns the configuration as seen by requests addressed to `host`.
    ///
    /// Entries of the `host:<host>` section are dotted `section.key` names
    /// that override the base values. The result is `None` when no overlay
    /// exists for the host.
    pub fn host_view(&self, host: &str) -> Option<ConfigSet> {
        let overlay = self.sections.get(&format!("{HOST_SECTION_PREFIX}{host}"))?;
        let mut view = self.clone();
        for (dotted, value) in overlay {
            if let Some((section, key)) = dotted.split_once('.') {
                view.sections
                    .entry(section.to_string())
                    .or_default()
                    .insert(key.to_string(), value.clone());
            }
        }
        Some(view)
    }
}

/// Constructor parameters of one backend: its section minus the `backend` key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    section: String,
    values: Section,
}

impl Params {
    pub fn new(section: impl Into<String>, values: Section) -> Self {
        Self {
            section: section.into(),
            values,
        }
    }

    /// Takes the parameters of `section` from `config`, dropping `backend`.
    pub fn from_section(config: &ConfigSet, section: &str) -> Self {
        let mut values = config.section(section).cloned().unwrap_or_default();
        values.remove("backend");
        Self::new(section, values)
    }

    /// Name of the section these parameters came from.
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn values(&self) -> &Section {
        &self.values
    }

    pub fn get_typed<T: FromValue>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.values.get(key).ok_or_else(|| ConfigError::MissingKey {
            section: self.section.clone(),
            key: key.to_string(),
        })?;
        ConfigSet::coerce_typed(&self.section, key, value)
    }

    pub fn get_typed_or<T: FromValue>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.values.get(key) {
            Some(value) => ConfigSet::coerce_typed(&self.section, key, value),
            None => Ok(default),
        }
    }

    pub fn get_opt<T: FromValue>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.values
            .get(key)
            .map(|value| ConfigSet::coerce_typed(&self.section, key, value))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn params_drop_backend_key() {
        let config = ConfigSet::load(&[ConfigSource::inline([
            ("auth", "backend", "sql"),
            ("auth", "sqluri", "sqlite::memory:"),
        ])])
        .unwrap();

        let params = Params::from_section(&config, "auth");
        assert!(params.values().get("backend").is_none());
        assert_eq!(params.get_typed::<String>("sqluri").unwrap(), "sqlite::memory:");
        assert_eq!(params.get_opt::<u32>("timeout_ms").unwrap(), None);
        assert!(matches!(
            params.get_typed::<String>("absent"),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn coerces_scalars_like_config_files() {
        assert_eq!(Value::coerce("true"), Value::Bool(true));
        assert_eq!(Value::coerce("False"), Value::Bool(false));
        assert_eq!(Value::coerce("42"), Value::Int(42));
        assert_eq!(Value::coerce("-7"), Value::Int(-7));
        assert_eq!(Value::coerce("sqlite::memory:"), Value::from("sqlite::memory:"));
    }

    #[test]
    fn missing_key_is_an_error_without_default() {
        let config = ConfigSet::default();
        let err = config.get("auth", "backend").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
        assert_eq!(config.get_or("auth", "backend", "sql"), Value::from("sql"));
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let config = ConfigSet::load(&[
            ConfigSource::inline([("auth", "backend", "sql"), ("auth", "pool_size", "5")]),
            ConfigSource::json("second", r#"{"auth": {"backend": "ldap"}}"#),
        ])
        .unwrap();

        assert_eq!(config.get("auth", "backend").unwrap(), &Value::from("ldap"));
        assert_eq!(config.get_typed::<u32>("auth", "pool_size").unwrap(), 5);
    }

    #[test]
    fn environment_wins_regardless_of_position() {
        let config = ConfigSet::load(&[
            ConfigSource::env_vars("", [("AUTH_BACKEND", "ldap")]),
            ConfigSource::json("file", r#"{"auth": {"backend": "sql"}}"#),
        ])
        .unwrap();

        assert_eq!(config.get_typed::<String>("auth", "backend").unwrap(), "ldap");
    }

    #[test]
    fn environment_prefix_and_key_split() {
        let config = ConfigSet::load(&[ConfigSource::env_vars(
            "SYNC_",
            [
                ("SYNC_PIPELINE_MAX_AUTH_FAILURES", "3"),
                ("SYNC_NOSPLIT", "x"),
                ("OTHER_AUTH_BACKEND", "sql"),
            ],
        )])
        .unwrap();

        assert_eq!(
            config.get_typed::<u32>("pipeline", "max_auth_failures").unwrap(),
            3
        );
        assert!(config.section("auth").is_none());
        assert!(config.section("nosplit").is_none());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let config = ConfigSet::load(&[ConfigSource::inline([("cache", "max_entries", "lots")])])
            .unwrap();
        let err = config.get_typed::<u64>("cache", "max_entries").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TypeMismatch { expected: "non-negative integer", .. }
        ));
        let err = config
            .get_typed_or::<u64>("cache", "max_entries", 10)
            .unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
        assert_eq!(config.get_typed_or::<u64>("cache", "absent", 10).unwrap(), 10);
    }

    #[test]
    fn lists_and_durations() {
        let config = ConfigSet::load(&[ConfigSource::json(
            "inline",
            r#"{"pipeline": {"hosts": "a.example, b.example", "ttl": 30, "tags": ["x", 1]}}"#,
        )])
        .unwrap();

        assert_eq!(
            config.get_typed::<Vec<String>>("pipeline", "hosts").unwrap(),
            vec!["a.example".to_string(), "b.example".to_string()]
        );
        assert_eq!(
            config.get_typed::<Vec<String>>("pipeline", "tags").unwrap(),
            vec!["x".to_string(), "1".to_string()]
        );
        assert_eq!(
            config.get_typed::<Duration>("pipeline", "ttl").unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn reads_json_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cef": {{"vendor": "mozilla", "use": true}}}}"#).unwrap();

        let config = ConfigSet::load(&[ConfigSource::file(file.path())]).unwrap();
        assert!(config.get_typed::<bool>("cef", "use").unwrap());
        assert_eq!(config.get_typed::<String>("cef", "vendor").unwrap(), "mozilla");
    }

    #[test]
    fn unreadable_and_malformed_sources_fail() {
        let err = ConfigSet::load(&[ConfigSource::file("/nonexistent/sync.json")]).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let err = ConfigSet::load(&[ConfigSource::json("bad", r#"{"auth": 3}"#)]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = ConfigSet::load(&[ConfigSource::json("bad", r#"{"auth": {"x": null}}"#)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn host_overlay_overrides_dotted_keys() {
        let config = ConfigSet::load(&[ConfigSource::json(
            "inline",
            r#"{
                "pipeline": {"realm": "Sync"},
                "host:eu.example.com": {"pipeline.realm": "Sync EU", "auth.backend": "ldap"}
            }"#,
        )])
        .unwrap();

        let view = config.host_view("eu.example.com").unwrap();
        assert_eq!(view.get_typed::<String>("pipeline", "realm").unwrap(), "Sync EU");
        assert_eq!(view.get_typed::<String>("auth", "backend").unwrap(), "ldap");
        assert_eq!(config.get_typed::<String>("pipeline", "realm").unwrap(), "Sync");
        assert!(config.host_view("us.example.com").is_none());
    }
}
