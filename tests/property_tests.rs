//! Property tests for cross-module invariants.

use std::collections::HashSet;

use sync_core::audit::{
    cef, AuditEvent, AuditEventKind, AuditOutcome, CefConfig, CefSignature, REDACTED,
};
use sync_core::auth::password::{hash_password, verify_password};
use sync_core::config::Params;
use sync_core::http::Headers;
use sync_core::pipeline::{basic_header, extract_credentials, normalize_path, PathPattern};
use sync_core::{ConfigSet, ConfigSource, ErrorKind, HandlerError, Secret, ServiceError};
use proptest::prelude::*;

fn arb_segment() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_.-]{1,12}").unwrap()
}

fn arb_kind() -> impl Strategy<Value = ErrorKind> {
    (0..ErrorKind::ALL.len()).prop_map(|i| ErrorKind::ALL[i])
}

fn unescape(value: &str) -> String {
    let mut out = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[test]
fn wire_codes_are_unique() {
    let codes: HashSet<u16> = ErrorKind::ALL.iter().map(|k| k.code()).collect();
    assert_eq!(codes.len(), ErrorKind::ALL.len());
}

proptest! {
    /// Escaping never leaves a bare separator and is reversible.
    #[test]
    fn cef_escape_is_reversible(value in "[^\r\n]{0,40}") {
        let escaped = cef::escape(&value);
        prop_assert_eq!(unescape(&escaped), value.clone());

        let mut previous_backslash = false;
        for c in escaped.chars() {
            if matches!(c, '|' | '=') {
                prop_assert!(previous_backslash);
            }
            previous_backslash = c == '\\' && !previous_backslash;
        }
    }

    /// Rendered CEF lines are single records with a fixed header shape.
    #[test]
    fn cef_lines_have_eight_header_fields(
        principal in "[^\r\n]{0,20}",
        path in "[^\r\n]{0,30}",
    ) {
        let event = AuditEvent::new(
            "req-1",
            AuditEventKind::Request,
            AuditOutcome::Success,
            CefSignature::RequestCompleted,
        )
        .with_principal(principal)
        .with_path(path);
        let line = cef::render(&event, &CefConfig::default());

        prop_assert!(!line.contains('\n'));
        let header = line.split_once("CEF:").unwrap().1;
        let unescaped_pipes = header
            .char_indices()
            .filter(|(i, c)| *c == '|' && !header[..*i].ends_with('\\'))
            .count();
        prop_assert!(unescaped_pipes >= 7);
    }

    /// Context values under credential-like keys never reach the event.
    #[test]
    fn sensitive_context_is_redacted(
        prefix in "[a-z_]{0,6}",
        suffix in "[a-z_]{0,6}",
        secret in "[a-zA-Z0-9]{12,24}",
    ) {
        let key = format!("{prefix}password{suffix}");
        let event = AuditEvent::new(
            "req-2",
            AuditEventKind::Authentication,
            AuditOutcome::Denied,
            CefSignature::AuthFail,
        )
        .with_context(key.clone(), secret.clone());

        prop_assert_eq!(event.context()[&key].as_str(), REDACTED);
        let line = cef::render(&event, &CefConfig::default());
        prop_assert!(!line.contains(&secret));
    }

    /// Unknown errors classify as Internal and expose only the canonical message.
    #[test]
    fn unknown_errors_fail_closed(message in ".{1,60}") {
        let err: HandlerError = message.clone().into();
        let service = ServiceError::from_handler(err);
        prop_assert_eq!(service.kind(), ErrorKind::Internal);
        prop_assert_eq!(service.to_wire(), ErrorKind::Internal.to_wire());
    }

    /// Every kind keeps its code and class through a service error.
    #[test]
    fn service_errors_keep_their_kind(kind in arb_kind(), message in ".{0,30}") {
        let err: HandlerError = Box::new(ServiceError::new(kind, message));
        let service = ServiceError::from_handler(err);
        prop_assert_eq!(service.kind(), kind);
        prop_assert_eq!(service.to_wire().code, kind.code());
        prop_assert!(kind.status() >= 400);
    }

    #[test]
    fn password_hashes_verify_only_their_password(
        password in "[ -~]{8,32}",
        other in "[ -~]{8,32}",
    ) {
        let stored = hash_password(&Secret::new(password.clone()));
        prop_assert!(verify_password(&Secret::new(password.clone()), &stored));
        prop_assert!(!stored.contains(&password));
        if other != password {
            prop_assert!(!verify_password(&Secret::new(other), &stored));
        }
    }

    /// Basic credentials survive encoding, including colons in the password.
    #[test]
    fn basic_credentials_round_trip(
        username in "[a-z0-9._-]{1,16}",
        password in "[ -~]{0,24}",
    ) {
        let mut headers = Headers::new();
        headers.insert("Authorization", basic_header(&username, &password));
        let credentials = extract_credentials(&headers).unwrap().unwrap();
        prop_assert_eq!(credentials.username, username);
        prop_assert_eq!(credentials.password.expose_secret(), &password);
    }

    /// Patterns capture exactly the parameter segments.
    #[test]
    fn path_patterns_capture_parameters(
        version in arb_segment(),
        user in arb_segment(),
        collection in arb_segment(),
    ) {
        let pattern = PathPattern::parse("/{version}/{username}/storage/{collection}");
        let path = format!("/{version}/{user}/storage/{collection}");
        let params = pattern.matches(&path).unwrap();
        prop_assert_eq!(params.get("username"), Some(&user));
        prop_assert_eq!(params.get("collection"), Some(&collection));
        let extra = format!("{path}/extra");
        prop_assert!(pattern.matches(&extra).is_none());
    }

    #[test]
    fn normalize_path_is_idempotent(path in "/[a-z0-9/]{0,30}") {
        let once = normalize_path(&path);
        prop_assert_eq!(normalize_path(once), once);
        prop_assert!(once == "/" || !once.ends_with('/'));
    }

    /// Integer-looking values are read back as integers from any source.
    #[test]
    fn integer_values_coerce(n in any::<i64>()) {
        let raw = n.to_string();
        let config = ConfigSet::load(&[
            ConfigSource::inline([("storage", "quota", raw.as_str())]),
            ConfigSource::env_vars("SYNC_", [("SYNC_CACHE_TTL", raw.clone())]),
        ])
        .unwrap();
        prop_assert_eq!(config.get_typed::<i64>("storage", "quota").unwrap(), n);
        prop_assert_eq!(config.get_typed::<i64>("cache", "ttl").unwrap(), n);

        let params = Params::from_section(&config, "storage");
        prop_assert_eq!(params.get_typed::<i64>("quota").unwrap(), n);
    }
}
