//! ArcSight Common Event Format rendering.

use crate::config::{ConfigError, ConfigSet};

use super::AuditEvent;

/// Header fields of every CEF line, from the `cef` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CefConfig {
    pub version: String,
    pub vendor: String,
    pub product: String,
    pub device_version: String,
    /// Host name written before the CEF header.
    pub hostname: String,
}

impl CefConfig {
    pub fn from_config(config: &ConfigSet) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            version: config.get_typed_or("cef", "version", defaults.version)?,
            vendor: config.get_typed_or("cef", "vendor", defaults.vendor)?,
            product: config.get_typed_or("cef", "product", defaults.product)?,
            device_version: config.get_typed_or("cef", "device_version", defaults.device_version)?,
            hostname: config.get_typed_or("cef", "hostname", defaults.hostname)?,
        })
    }
}

impl Default for CefConfig {
    fn default() -> Self {
        Self {
            version: "0".to_string(),
            vendor: "mozilla".to_string(),
            product: "sync".to_string(),
            device_version: "1.0".to_string(),
            hostname: "localhost".to_string(),
        }
    }
}

/// Escapes `|`, `\` and `=` with a backslash.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '|' | '\\' | '=') {
            out.push('\\');
        }
        // line breaks would split the record
        match c {
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// Extension keys cannot be escaped; offending characters become `?`.
fn extension_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '|' | '\\' | '=' | ' ' => '?',
            other => other,
        })
        .collect()
}

/// Renders one event as a CEF line.
pub fn render(event: &AuditEvent, config: &CefConfig) -> String {
    let mut line = format!(
        "{date} {host} CEF:{version}|{vendor}|{product}|{device_version}|{signature}|{name}|{severity}|",
        date = event.timestamp().format("%b %d %H:%M:%S"),
        host = config.hostname,
        version = escape(&config.version),
        vendor = escape(&config.vendor),
        product = escape(&config.product),
        device_version = escape(&config.device_version),
        signature = event.signature(),
        name = escape(event.name()),
        severity = event.severity(),
    );

    let mut extensions: Vec<(String, String)> = vec![
        ("rt".into(), event.timestamp().timestamp_millis().to_string()),
        ("requestMethod".into(), event.method().unwrap_or("none").to_string()),
        ("request".into(), event.path().unwrap_or("none").to_string()),
        ("src".into(), event.remote_addr().unwrap_or("none").to_string()),
        ("dest".into(), event.host().unwrap_or("none").to_string()),
        ("suser".into(), event.principal().to_string()),
        ("outcome".into(), event.outcome().to_string()),
        ("cs1Label".into(), "requestId".into()),
        ("cs1".into(), event.request_id().to_string()),
    ];
    if let Some(code) = event.code() {
        extensions.push(("cn1Label".into(), "wireCode".into()));
        extensions.push(("cn1".into(), code.to_string()));
    }
    for (key, value) in event.context() {
        extensions.push((extension_key(key), value.clone()));
    }

    let rendered: Vec<String> = extensions
        .iter()
        .map(|(key, value)| format!("{key}={}", escape(value)))
        .collect();
    line.push_str(&rendered.join(" "));
    line
}
