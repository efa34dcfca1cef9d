use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form user attributes (quota, storage node assignment, e-mail, ...).
pub type Attributes = BTreeMap<String, String>;

/// Metadata about the request currently being served.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Unique identifier for this request
    pub request_id: String,
    /// Host the request was addressed to, without port
    pub host: Option<String>,
    /// Resolved principal
    pub principal: Principal,
}

/// How the principal of a request was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Anonymous,
    Authenticated,
    Denied,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthStatus::Anonymous => "anonymous",
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::Denied => "denied",
        })
    }
}

/// The identity resolved for a single request.
///
/// Created by an authentication backend, owned by the request, never stored
/// by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable numeric user identifier (0 for anonymous)
    pub user_id: u64,
    /// Login name
    pub username: String,
    /// Authentication status
    pub status: AuthStatus,
    /// User attributes
    pub attributes: Attributes,
}

impl Principal {
    /// Marker used in logs and audit events for unauthenticated requests.
    pub const ANONYMOUS: &'static str = "anonymous";

    /// An authenticated principal.
    pub fn authenticated(user_id: u64, username: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            user_id,
            username: username.into(),
            status: AuthStatus::Authenticated,
            attributes,
        }
    }

    /// The principal of a request that carried no credentials.
    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            username: String::new(),
            status: AuthStatus::Anonymous,
            attributes: Attributes::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    /// Identifier used in audit records.
    pub fn audit_name(&self) -> &str {
        if self.username.is_empty() {
            Self::ANONYMOUS
        } else {
            &self.username
        }
    }
}

/// A stored user, as returned by the user-record operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub username: String,
    pub enabled: bool,
    pub attributes: Attributes,
}

impl UserRecord {
    /// Builds the principal for a successful verification of this user.
    pub fn to_principal(&self) -> Principal {
        Principal::authenticated(self.user_id, self.username.clone(), self.attributes.clone())
    }
}
