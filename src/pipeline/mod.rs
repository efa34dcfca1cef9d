//! Request pipeline.
//!
//! [`Application::handle`] runs every request through the same lifecycle:
//!
//! ```text
//! Received -> Authenticating -> Authorized | Denied -> Dispatching -> Completed | Failed
//! ```
//!
//! Routes that allow anonymous access go `Received -> Denied -> Dispatching`
//! with an anonymous principal. Every request ends in exactly one audit
//! event, and every failure answers with the wire payload of its
//! [`ErrorKind`].

mod credentials;
mod handler;
mod router;
mod state;
mod throttle;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

pub use credentials::{basic_header, extract as extract_credentials, Credentials, CredentialsError};
pub use handler::{Handler, RequestContext};
pub use router::{normalize_path, Access, PathParams, PathPattern, Route, RouteError, Router};
pub use state::{InvalidTransition, Lifecycle, RequestState};
pub use throttle::Throttle;

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger, AuditOutcome, CefConfig, CefSignature};
use crate::auth::{AuthBackend, AuthDecision, DenialReason};
use crate::captcha::ChallengeId;
use crate::config::{ConfigError, ConfigSet};
use crate::error::{ErrorClass, ErrorKind, HandlerError, ServiceError, ServiceResult};
use crate::http::{Method, Request, Response};
use crate::logging::RequestLog;
use crate::registry::BackendRegistry;
use crate::request::{Principal, RequestMeta};
use crate::sink::TracingSink;

/// Path of the built-in liveness endpoint.
pub const HEARTBEAT_PATH: &str = "/__heartbeat__";

/// Settings of the `pipeline` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Realm announced in `WWW-Authenticate`.
    pub realm: String,
    /// Seconds announced in `Retry-After` on outages.
    pub retry_after: u64,
    /// Extra verification attempts after an `Unavailable` decision.
    pub auth_retries: u32,
    /// Failed verifications before an identifier is locked; 0 disables.
    pub max_auth_failures: u32,
    /// How long failures are counted and a lock lasts.
    pub lockout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            realm: "Sync".to_string(),
            retry_after: 120,
            auth_retries: 0,
            max_auth_failures: 0,
            lockout: Duration::from_secs(300),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &ConfigSet) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            realm: config.get_typed_or("pipeline", "realm", defaults.realm)?,
            retry_after: config.get_typed_or("pipeline", "retry_after", defaults.retry_after)?,
            auth_retries: config.get_typed_or("pipeline", "auth_retries", defaults.auth_retries)?,
            max_auth_failures: config.get_typed_or(
                "pipeline",
                "max_auth_failures",
                defaults.max_auth_failures,
            )?,
            lockout: config.get_typed_or("pipeline", "lockout_seconds", defaults.lockout)?,
        })
    }
}

/// How the principal of a finished request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthTrail {
    NotAttempted,
    Anonymous,
    Authenticated,
    Denied,
    Unavailable,
}

impl AuthTrail {
    fn as_str(self) -> &'static str {
        match self {
            AuthTrail::NotAttempted => "none",
            AuthTrail::Anonymous => "anonymous",
            AuthTrail::Authenticated => "authenticated",
            AuthTrail::Denied => "denied",
            AuthTrail::Unavailable => "unavailable",
        }
    }
}

/// Why a request ended in `Failed`, and how to audit it.
#[derive(Debug)]
struct Failure {
    error: ServiceError,
    signature: CefSignature,
    outcome: AuditOutcome,
    reason: Option<DenialReason>,
}

impl Failure {
    fn denied(reason: DenialReason) -> Self {
        let signature = match reason {
            DenialReason::InvalidCredentials | DenialReason::MissingCredentials => {
                CefSignature::AuthFail
            }
            DenialReason::UsernameMismatch => CefSignature::UsernameMismatch,
            DenialReason::AccountLocked => CefSignature::AccountLockout,
        };
        Self {
            error: ServiceError::new(reason.kind(), reason.to_string()),
            signature,
            outcome: AuditOutcome::Denied,
            reason: Some(reason),
        }
    }

    fn unavailable(cause: String) -> Self {
        Self {
            error: ServiceError::new(ErrorKind::BackendUnavailable, cause),
            signature: CefSignature::BackendUnavailable,
            outcome: AuditOutcome::Unavailable,
            reason: None,
        }
    }

    fn captcha() -> Self {
        Self {
            error: ServiceError::new(ErrorKind::InvalidCaptcha, "captcha solution rejected"),
            signature: CefSignature::CaptchaFail,
            outcome: AuditOutcome::Denied,
            reason: None,
        }
    }

    fn error(error: ServiceError) -> Self {
        let (signature, outcome) = match error.kind().class() {
            ErrorClass::BackendUnavailable => {
                (CefSignature::BackendUnavailable, AuditOutcome::Unavailable)
            }
            ErrorClass::AuthError => (CefSignature::RequestFailed, AuditOutcome::Denied),
            _ => (CefSignature::RequestFailed, AuditOutcome::Error),
        };
        Self {
            error,
            signature,
            outcome,
            reason: None,
        }
    }

    fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    fn audit_kind(&self) -> AuditEventKind {
        match self.signature {
            CefSignature::AuthFail | CefSignature::UsernameMismatch => {
                AuditEventKind::Authentication
            }
            CefSignature::AccountLockout | CefSignature::CaptchaFail => {
                AuditEventKind::SecurityEvent
            }
            _ => AuditEventKind::Request,
        }
    }
}

impl From<InvalidTransition> for Failure {
    fn from(err: InvalidTransition) -> Self {
        Failure::error(ServiceError::internal(err.to_string()))
    }
}

/// Per-request bookkeeping.
struct Exchange {
    request_id: String,
    lifecycle: Lifecycle,
    auth: AuthTrail,
    principal: Principal,
    claimed: Option<String>,
}

impl Exchange {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            lifecycle: Lifecycle::new(),
            auth: AuthTrail::NotAttempted,
            principal: Principal::anonymous(),
            claimed: None,
        }
    }

    fn advance(&mut self, next: RequestState) -> Result<(), Failure> {
        self.lifecycle.advance(next).map_err(Failure::from)
    }

    fn log(&self) -> RequestLog<'_> {
        RequestLog::new(&self.request_id)
    }
}

type BoxedHandler = Arc<dyn Handler>;

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    config: Arc<ConfigSet>,
    registry: Option<Arc<BackendRegistry>>,
    audit: Option<Arc<AuditLogger>>,
    routes: Vec<(Route, BoxedHandler)>,
}

impl ApplicationBuilder {
    /// Uses an existing registry instead of building one from the config.
    pub fn registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `audit` instead of a logger writing CEF lines through tracing.
    pub fn audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Adds a route served by a function or closure.
    pub fn route<F>(self, route: Route, handler: F) -> Self
    where
        F: Fn(&Request, &RequestContext<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.route_handler(route, handler)
    }

    /// Adds a route served by any [`Handler`].
    pub fn route_handler(mut self, route: Route, handler: impl Handler + 'static) -> Self {
        self.routes.push((route, Arc::new(handler)));
        self
    }

    /// Builds the application.
    ///
    /// # Errors
    ///
    /// Fails with a `Config` error when the `pipeline` or `cef` section is
    /// malformed, and with a `Registry` error when the backends cannot be
    /// registered or the throttle cache cannot be resolved.
    pub fn build(self) -> ServiceResult<Application> {
        let settings = PipelineSettings::from_config(&self.config)?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(BackendRegistry::from_config(&self.config)?),
        };
        let audit = match self.audit {
            Some(audit) => audit,
            None => {
                let cef = CefConfig::from_config(&self.config)?;
                Arc::new(AuditLogger::new().with_sink(Arc::new(TracingSink::new(cef))))
            }
        };
        let throttle = if settings.max_auth_failures > 0 {
            Some(Throttle::new(
                registry.cache()?,
                settings.max_auth_failures,
                settings.lockout,
            ))
        } else {
            None
        };

        let mut router = Router::new();
        let heartbeat: BoxedHandler = Arc::new(heartbeat);
        router.add(Route::get(HEARTBEAT_PATH).anonymous(), heartbeat);
        for (route, handler) in self.routes {
            router.add(route, handler);
        }

        tracing::info!(
            target: "sync_core::pipeline",
            routes = router.len(),
            throttled = throttle.is_some(),
            auth_retries = settings.auth_retries,
            "application ready"
        );

        Ok(Application {
            config: self.config,
            settings,
            registry,
            audit,
            router,
            throttle,
            host_views: RwLock::new(HashMap::new()),
        })
    }
}

fn heartbeat(_: &Request, _: &RequestContext<'_>) -> Result<Response, HandlerError> {
    Ok(Response::ok())
}

/// The base application every service composes against.
///
/// # Examples
///
/// ```
/// use sync_core::config::{ConfigSet, ConfigSource};
/// use sync_core::http::{Method, Request, Response};
/// use sync_core::pipeline::{Application, Route};
///
/// let config = ConfigSet::load(&[ConfigSource::inline([("auth", "backend", "sql")])]).unwrap();
/// let app = Application::builder(config)
///     .route(Route::get("/hello").anonymous(), |_, _| Ok(Response::ok().with_body("hi")))
///     .build()
///     .unwrap();
///
/// let response = app.handle(Request::new(Method::Get, "/hello/"));
/// assert_eq!(response.status, 200);
/// assert!(response.headers.contains("X-Request-Id"));
/// ```
pub struct Application {
    config: Arc<ConfigSet>,
    settings: PipelineSettings,
    registry: Arc<BackendRegistry>,
    audit: Arc<AuditLogger>,
    router: Router<BoxedHandler>,
    throttle: Option<Throttle>,
    host_views: RwLock<HashMap<String, Arc<ConfigSet>>>,
}

impl Application {
    pub fn builder(config: impl Into<Arc<ConfigSet>>) -> ApplicationBuilder {
        ApplicationBuilder {
            config: config.into(),
            registry: None,
            audit: None,
            routes: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn config(&self) -> &Arc<ConfigSet> {
        &self.config
    }

    /// Configuration as seen by requests for `host`, computed once per host.
    pub fn config_for(&self, host: Option<&str>) -> Arc<ConfigSet> {
        let Some(host) = host else {
            return Arc::clone(&self.config);
        };
        if let Some(view) = self.host_views.read().get(host) {
            return Arc::clone(view);
        }
        let view = self
            .config
            .host_view(host)
            .map(Arc::new)
            .unwrap_or_else(|| Arc::clone(&self.config));
        self.host_views
            .write()
            .entry(host.to_string())
            .or_insert(view)
            .clone()
    }

    /// Serves one request. Never panics and never fails: every error path
    /// produces a wire error response.
    pub fn handle(&self, request: Request) -> Response {
        let request_id = request
            .headers
            .get("x-request-id")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut exchange = Exchange::new(request_id);

        let result = self.process(&request, &mut exchange);
        let terminal = match &result {
            Ok(_) => RequestState::Completed,
            Err(_) => RequestState::Failed,
        };
        if let Err(err) = exchange.lifecycle.advance(terminal) {
            exchange.log().error(format_args!("{err}"));
        }

        let (mut response, failure) = match result {
            Ok(response) => (response, None),
            Err(failure) => (self.error_response(&failure, &exchange), Some(failure)),
        };
        self.record(&request, &exchange, &response, failure.as_ref());

        response.headers.insert(
            "X-Timestamp",
            format!("{:.2}", Utc::now().timestamp_millis() as f64 / 1000.0),
        );
        response.headers.insert("X-Request-Id", exchange.request_id.clone());
        response
    }

    fn process(&self, request: &Request, exchange: &mut Exchange) -> Result<Response, Failure> {
        if request.method == Method::Head {
            return Err(Failure::error(ServiceError::new(
                ErrorKind::UnsupportedMethod,
                "HEAD not supported",
            )));
        }

        let path = normalize_path(&request.path);
        let (route, handler, params) = self
            .router
            .find(request.method, path)
            .map_err(|err| Failure::error(ServiceError::new(err.kind(), format!("{err}: {path}"))))?;

        match route.access() {
            Access::Anonymous => {
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Anonymous;
            }
            Access::Authenticated => {
                exchange.principal = self.authenticate(request, &params, exchange)?;
            }
        }

        if route.requires_captcha() {
            self.check_captcha(request, exchange)?;
        }

        exchange.advance(RequestState::Dispatching)?;
        let host = request.host_name();
        let ctx = RequestContext::new(
            RequestMeta {
                request_id: exchange.request_id.clone(),
                host: host.map(str::to_string),
                principal: exchange.principal.clone(),
            },
            params,
            self.config_for(host),
            &self.registry,
        );

        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(request, &ctx))) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(Failure::error(ServiceError::from_handler(err))),
            Err(_) => Err(Failure::error(ServiceError::internal("handler panicked"))),
        }
    }

    fn authenticate(
        &self,
        request: &Request,
        params: &PathParams,
        exchange: &mut Exchange,
    ) -> Result<Principal, Failure> {
        let credentials = match extract_credentials(&request.headers) {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Denied;
                return Err(Failure::denied(DenialReason::MissingCredentials));
            }
            Err(err) => {
                exchange.advance(RequestState::Authenticating)?;
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Denied;
                exchange.log().info(format_args!("rejected credentials: {err}"));
                return Err(Failure::denied(DenialReason::InvalidCredentials));
            }
        };

        exchange.advance(RequestState::Authenticating)?;
        exchange.claimed = Some(credentials.username.clone());

        if let Some(owner) = params.get("username") {
            if owner != &credentials.username {
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Denied;
                return Err(Failure::denied(DenialReason::UsernameMismatch));
            }
        }

        if self.is_locked(&credentials.username, exchange) {
            exchange.advance(RequestState::Denied)?;
            exchange.auth = AuthTrail::Denied;
            return Err(Failure::denied(DenialReason::AccountLocked));
        }

        let backend = self
            .registry
            .authentication()
            .map_err(|err| Failure::error(err.into()))?;

        match self.decide(backend.as_ref(), &credentials, exchange) {
            AuthDecision::Authorized(principal) => {
                exchange.advance(RequestState::Authorized)?;
                exchange.auth = AuthTrail::Authenticated;
                self.clear_failures(&credentials.username, exchange);
                Ok(principal)
            }
            AuthDecision::Denied(reason) => {
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Denied;
                self.record_failure(&credentials.username, exchange);
                Err(Failure::denied(reason))
            }
            AuthDecision::Unavailable(cause) => {
                exchange.advance(RequestState::Denied)?;
                exchange.auth = AuthTrail::Unavailable;
                exchange
                    .log()
                    .warn(format_args!("authentication backend unavailable: {cause}"));
                Err(Failure::unavailable(cause))
            }
        }
    }

    fn decide(
        &self,
        backend: &dyn AuthBackend,
        credentials: &Credentials,
        exchange: &Exchange,
    ) -> AuthDecision {
        let mut decision = backend.decide(&credentials.username, &credentials.password);
        let mut attempt = 0;
        while matches!(decision, AuthDecision::Unavailable(_)) && attempt < self.settings.auth_retries {
            attempt += 1;
            exchange.log().debug(format_args!(
                "retrying authentication ({attempt}/{})",
                self.settings.auth_retries
            ));
            decision = backend.decide(&credentials.username, &credentials.password);
        }
        decision
    }

    // Throttle storage failures never block a login.
    fn is_locked(&self, identifier: &str, exchange: &Exchange) -> bool {
        let Some(throttle) = &self.throttle else {
            return false;
        };
        throttle.is_locked(identifier).unwrap_or_else(|err| {
            exchange.log().warn(format_args!("throttle lookup failed: {err}"));
            false
        })
    }

    fn record_failure(&self, identifier: &str, exchange: &Exchange) {
        let Some(throttle) = &self.throttle else {
            return;
        };
        match throttle.record_failure(identifier) {
            Ok(true) => exchange.log().warn(format_args!(
                "{identifier} locked after {} failed attempts",
                throttle.max_failures()
            )),
            Ok(false) => {}
            Err(err) => exchange.log().warn(format_args!("throttle update failed: {err}")),
        }
    }

    fn clear_failures(&self, identifier: &str, exchange: &Exchange) {
        if let Some(throttle) = &self.throttle {
            if let Err(err) = throttle.reset(identifier) {
                exchange.log().warn(format_args!("throttle reset failed: {err}"));
            }
        }
    }

    fn check_captcha(&self, request: &Request, exchange: &Exchange) -> Result<(), Failure> {
        let captcha = self
            .registry
            .captcha()
            .map_err(|err| Failure::error(err.into()))?;
        if !captcha.is_enabled() {
            return Ok(());
        }
        let challenge = request.query_param("captcha_challenge");
        let solution = request.query_param("captcha_solution");
        match (challenge, solution) {
            (Some(challenge), Some(solution))
                if captcha.verify(&ChallengeId::new(challenge), solution) =>
            {
                Ok(())
            }
            _ => {
                exchange.log().info(format_args!("captcha check failed"));
                Err(Failure::captcha())
            }
        }
    }

    fn error_response(&self, failure: &Failure, exchange: &Exchange) -> Response {
        let kind = failure.kind();
        let log = exchange.log();
        if kind.status() >= 500 {
            log.error(format_args!("{}", failure.error));
        } else {
            log.info(format_args!("{}", failure.error));
        }

        let mut response = Response::error(kind);
        match kind.status() {
            401 => response.headers.insert(
                "WWW-Authenticate",
                format!("Basic realm=\"{}\"", self.settings.realm),
            ),
            503 => response
                .headers
                .insert("Retry-After", self.settings.retry_after.to_string()),
            _ => {}
        }
        response
    }

    fn record(
        &self,
        request: &Request,
        exchange: &Exchange,
        response: &Response,
        failure: Option<&Failure>,
    ) {
        let mut event = match failure {
            None => AuditEvent::new(
                &exchange.request_id,
                AuditEventKind::Request,
                AuditOutcome::Success,
                CefSignature::RequestCompleted,
            ),
            Some(failure) => AuditEvent::new(
                &exchange.request_id,
                failure.audit_kind(),
                failure.outcome,
                failure.signature,
            )
            .with_code(failure.kind().code()),
        };

        event = event
            .with_principal(exchange.principal.username.clone())
            .with_method(request.method.as_str())
            .with_path(normalize_path(&request.path))
            .with_context("auth", exchange.auth.as_str())
            .with_context("state", exchange.lifecycle.state().to_string())
            .with_context("status", response.status.to_string());
        if let Some(claimed) = &exchange.claimed {
            if !exchange.principal.is_authenticated() {
                event = event.with_context("claimed_user", claimed.clone());
            }
        }
        if let Some(reason) = failure.and_then(|f| f.reason) {
            event = event.with_context("reason", reason.to_string());
        }
        if let Some(addr) = &request.remote_addr {
            event = event.with_remote_addr(addr.clone());
        }
        if let Some(host) = request.host_name() {
            event = event.with_host(host);
        }
        self.audit.emit(event);
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.settings)
            .field("routes", &self.router.len())
            .field("throttle", &self.throttle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::ConfigSource;
    use crate::registry::Capability;

    fn app_with(entries: &[(&str, &str, &str)]) -> (Application, Arc<MemorySink>) {
        let config = ConfigSet::load(&[ConfigSource::inline(entries.iter().copied())]).unwrap();
        let trail = Arc::new(MemorySink::new());
        let app = Application::builder(config)
            .audit(Arc::new(AuditLogger::new().with_sink(trail.clone())))
            .route(Route::get("/1.0/{username}/info"), |_, ctx| {
                Ok(Response::ok().with_body(ctx.principal().username.clone()))
            })
            .route(Route::get("/public").anonymous(), |_, ctx| {
                assert!(!ctx.principal().is_authenticated());
                Ok(Response::ok())
            })
            .route(Route::get("/boom").anonymous(), |_, _| panic!("handler bug"))
            .build()
            .unwrap();
        (app, trail)
    }

    fn create_user(app: &Application, name: &str, password: &str) {
        app.registry()
            .authentication()
            .unwrap()
            .create_user(name, &password.into(), Default::default())
            .unwrap();
    }

    #[test]
    fn settings_defaults_and_overrides() {
        let config = ConfigSet::load(&[ConfigSource::inline([
            ("pipeline", "realm", "Test"),
            ("pipeline", "lockout_seconds", "60"),
        ])])
        .unwrap();
        let settings = PipelineSettings::from_config(&config).unwrap();
        assert_eq!(settings.realm, "Test");
        assert_eq!(settings.lockout, Duration::from_secs(60));
        assert_eq!(settings.retry_after, 120);
        assert_eq!(settings.auth_retries, 0);
    }

    #[test]
    fn heartbeat_is_anonymous() {
        let (app, trail) = app_with(&[]);
        let response = app.handle(Request::new(Method::Get, "/__heartbeat__"));
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(trail.len(), 1);
        assert_eq!(trail.events()[0].context()["auth"], "anonymous");
    }

    #[test]
    fn head_is_rejected() {
        let (app, _) = app_with(&[]);
        let response = app.handle(Request::new(Method::Head, "/__heartbeat__"));
        assert_eq!(response.status, 405);
        assert_eq!(
            response.wire_error().unwrap().code,
            ErrorKind::UnsupportedMethod.code()
        );
    }

    #[test]
    fn authenticated_route_without_auth_backend_fails_closed() {
        let (app, trail) = app_with(&[]);
        assert!(!app.registry().is_registered(Capability::Authentication));
        let response = app.handle(
            Request::new(Method::Get, "/1.0/alice/info")
                .with_header("Authorization", basic_header("alice", "password1")),
        );
        assert_eq!(response.status, 500);
        assert_eq!(response.wire_error().unwrap().code, ErrorKind::Registry.code());
        assert_eq!(trail.last().unwrap().outcome(), AuditOutcome::Error);
    }

    #[test]
    fn authenticated_request_reaches_handler() {
        let (app, trail) = app_with(&[("auth", "backend", "sql")]);
        create_user(&app, "alice", "password1");

        let response = app.handle(
            Request::new(Method::Get, "/1.0/alice/info/")
                .with_header("Authorization", basic_header("alice", "password1"))
                .with_header("X-Request-Id", "req-abc"),
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "alice");
        assert_eq!(response.headers.get("x-request-id"), Some("req-abc"));

        let event = trail.last().unwrap();
        assert_eq!(event.request_id(), "req-abc");
        assert_eq!(event.principal(), "alice");
        assert_eq!(event.outcome(), AuditOutcome::Success);
        assert_eq!(event.context()["auth"], "authenticated");
        assert_eq!(event.context()["state"], "completed");
    }

    #[test]
    fn handler_panic_maps_to_internal() {
        let (app, trail) = app_with(&[]);
        let response = app.handle(Request::new(Method::Get, "/boom"));
        assert_eq!(response.status, 500);
        assert_eq!(
            response.wire_error().unwrap(),
            ErrorKind::Internal.to_wire()
        );
        assert_eq!(trail.last().unwrap().code(), Some(ErrorKind::Internal.code()));
    }

    #[test]
    fn host_views_are_cached() {
        let (app, _) = app_with(&[("host:a.example.com", "storage.quota", "10")]);
        let first = app.config_for(Some("a.example.com"));
        let second = app.config_for(Some("a.example.com"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get_typed::<i64>("storage", "quota").unwrap(), 10);
        assert!(Arc::ptr_eq(&app.config_for(None), app.config()));
        assert!(Arc::ptr_eq(&app.config_for(Some("b.example.com")), app.config()));
    }
}
