//! Shared core of the sync services.
//!
//! This crate provides the machinery that sits between an HTTP front end
//! and the storage and identity backends:
//! - **Config**: layered, typed configuration with environment overrides
//! - **Backend registry**: one lazily built implementation per capability
//! - **Authentication**: SQL, directory and cached-session variants
//! - **Audit**: fixed-schema events rendered as CEF
//! - **Pipeline**: the per-request lifecycle with a closed wire error space
//!
//! # Core Types
//!
//! - [`Secret<T>`]: Wrapper that redacts sensitive values in logs/output
//! - [`ConfigSet`]: Immutable configuration built once at startup
//! - [`BackendRegistry`]: Owner of every backend instance
//! - [`AuthBackend`]: Operation contract of the authentication capability
//! - [`Application`]: The request pipeline
//!
//! # Examples
//!
//! ```
//! use sync_core::{Application, ConfigSet, ConfigSource, Secret};
//! use sync_core::http::{Method, Request, Response};
//! use sync_core::pipeline::{basic_header, Route};
//!
//! let config = ConfigSet::load(&[ConfigSource::inline([("auth", "backend", "sql")])]).unwrap();
//! let app = Application::builder(config)
//!     .route(Route::get("/1.0/{username}/info"), |_, ctx| {
//!         Ok(Response::ok().with_body(ctx.principal().username.clone()))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let auth = app.registry().authentication().unwrap();
//! auth.create_user("alice", &Secret::from("correct horse"), Default::default())
//!     .unwrap();
//!
//! let response = app.handle(
//!     Request::new(Method::Get, "/1.0/alice/info")
//!         .with_header("Authorization", basic_header("alice", "correct horse")),
//! );
//! assert_eq!(response.status, 200);
//!
//! let response = app.handle(
//!     Request::new(Method::Get, "/1.0/alice/info")
//!         .with_header("Authorization", basic_header("alice", "wrong password")),
//! );
//! assert_eq!(response.status, 401);
//! println!("{:?}", Secret::new("api-key".to_string())); // Prints: [REDACTED]
//! ```

#![forbid(unsafe_code)]

pub mod audit;
pub mod auth;
pub mod cache;
pub mod captcha;
pub mod config;
mod error;
pub mod http;
mod logging;
pub mod pipeline;
pub mod registry;
mod request;
mod secret;
mod sink;

pub use auth::{AuthBackend, AuthDecision, AuthError, DenialReason};
pub use config::{ConfigError, ConfigSet, ConfigSource, Value};
pub use error::{ErrorClass, ErrorKind, HandlerError, ServiceError, ServiceResult, WireError};
pub use logging::RequestLog;
pub use pipeline::Application;
pub use registry::{BackendRegistry, Capability, RegistryError};
pub use request::{Attributes, AuthStatus, Principal, RequestMeta, UserRecord};
pub use secret::Secret;
pub use sink::{AuditSink, SinkError, SinkErrorKind, TracingSink};
