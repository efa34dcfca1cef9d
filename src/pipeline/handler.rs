//! Handler contract.

use std::sync::Arc;

use crate::config::ConfigSet;
use crate::error::HandlerError;
use crate::http::{Request, Response};
use crate::logging::RequestLog;
use crate::registry::BackendRegistry;
use crate::request::{Principal, RequestMeta};

use super::router::PathParams;

/// Everything a handler may use besides the request itself.
pub struct RequestContext<'a> {
    meta: RequestMeta,
    params: PathParams,
    config: Arc<ConfigSet>,
    registry: &'a BackendRegistry,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        meta: RequestMeta,
        params: PathParams,
        config: Arc<ConfigSet>,
        registry: &'a BackendRegistry,
    ) -> Self {
        Self {
            meta,
            params,
            config,
            registry,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.meta.request_id
    }

    pub fn host(&self) -> Option<&str> {
        self.meta.host.as_deref()
    }

    pub fn principal(&self) -> &Principal {
        &self.meta.principal
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// A captured `{name}` path segment.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Configuration as seen by the request's host.
    pub fn config(&self) -> &ConfigSet {
        &self.config
    }

    pub fn registry(&self) -> &'a BackendRegistry {
        self.registry
    }

    pub fn log(&self) -> RequestLog<'_> {
        RequestLog::new(&self.meta.request_id)
    }
}

/// A service endpoint.
///
/// Errors are returned, never answered directly: the pipeline maps them to
/// wire codes. Implemented for every matching closure.
pub trait Handler: Send + Sync {
    fn call(&self, request: &Request, ctx: &RequestContext<'_>) -> Result<Response, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Request, &RequestContext<'_>) -> Result<Response, HandlerError> + Send + Sync,
{
    fn call(&self, request: &Request, ctx: &RequestContext<'_>) -> Result<Response, HandlerError> {
        self(request, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::http::Method;
    use crate::request::Attributes;

    fn context(registry: &BackendRegistry) -> RequestContext<'_> {
        let mut params = PathParams::new();
        params.insert("username".into(), "alice".into());
        let config = ConfigSet::load(&[ConfigSource::inline([("storage", "quota", "5000")])]).unwrap();
        RequestContext::new(
            RequestMeta {
                request_id: "req-7".into(),
                host: Some("sync.example.com".into()),
                principal: Principal::authenticated(3, "alice", Attributes::new()),
            },
            params,
            Arc::new(config),
            registry,
        )
    }

    fn whoami(_: &Request, ctx: &RequestContext<'_>) -> Result<Response, HandlerError> {
        let quota: i64 = ctx.config().get_typed("storage", "quota")?;
        Ok(Response::ok().with_body(format!("{}:{quota}", ctx.principal().username)))
    }

    #[test]
    fn functions_are_handlers() {
        let registry = BackendRegistry::new();
        let ctx = context(&registry);
        let response = Handler::call(&whoami, &Request::new(Method::Get, "/"), &ctx).unwrap();
        assert_eq!(response.body_text(), "alice:5000");
    }

    #[test]
    fn exposes_request_metadata() {
        let registry = BackendRegistry::new();
        let ctx = context(&registry);
        assert_eq!(ctx.request_id(), "req-7");
        assert_eq!(ctx.host(), Some("sync.example.com"));
        assert_eq!(ctx.param("username"), Some("alice"));
        assert_eq!(ctx.param("missing"), None);
        assert_eq!(ctx.log().request_id(), "req-7");
    }
}
