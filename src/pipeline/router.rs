//! Path routing.
//!
//! Patterns are `/`-separated; a `{name}` segment captures one path segment.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ErrorKind;
use crate::http::Method;

/// Captured `{param}` segments.
pub type PathParams = BTreeMap<String, String>;

/// Whether a route needs an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Served without credentials; any credentials sent are ignored.
    Anonymous,
    #[default]
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed path pattern such as `/1.0/{username}/info/collections`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern.trim_end_matches('/');
        let segments = split(trimmed)
            .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the captured segments, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches a normalized path, returning the captured segments.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = split(path);
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        parts.next().is_none().then_some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    let root = path.is_empty() || path == "/";
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .filter(move |_| !root)
}

/// Strips trailing slashes; the root path stays `/`.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Declaration of one endpoint.
///
/// # Examples
///
/// ```
/// use sync_core::pipeline::{Access, Route};
/// use sync_core::http::Method;
///
/// let route = Route::get("/1.0/{username}/info/collections");
/// assert_eq!(route.access(), Access::Authenticated);
/// assert!(route.allows(Method::Get));
///
/// let register = Route::put("/user/1.0/{username}").anonymous().with_captcha();
/// assert!(register.requires_captcha());
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    methods: Vec<Method>,
    pattern: PathPattern,
    access: Access,
    captcha: bool,
}

impl Route {
    pub fn new(methods: impl IntoIterator<Item = Method>, pattern: &str) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            pattern: PathPattern::parse(pattern),
            access: Access::default(),
            captcha: false,
        }
    }

    pub fn get(pattern: &str) -> Self {
        Self::new([Method::Get], pattern)
    }

    pub fn post(pattern: &str) -> Self {
        Self::new([Method::Post], pattern)
    }

    pub fn put(pattern: &str) -> Self {
        Self::new([Method::Put], pattern)
    }

    pub fn delete(pattern: &str) -> Self {
        Self::new([Method::Delete], pattern)
    }

    pub fn anonymous(mut self) -> Self {
        self.access = Access::Anonymous;
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.access = Access::Authenticated;
        self
    }

    /// Requires a solved captcha (`captcha_challenge`, `captcha_solution`
    /// query parameters) when the captcha backend is enabled.
    pub fn with_captcha(mut self) -> Self {
        self.captcha = true;
        self
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn requires_captcha(&self) -> bool {
        self.captcha
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }
}

/// Why no route was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route for path")]
    NotFound,
    #[error("method not allowed for path")]
    MethodNotAllowed,
}

impl RouteError {
    pub fn kind(self) -> ErrorKind {
        match self {
            RouteError::NotFound => ErrorKind::NotFound,
            RouteError::MethodNotAllowed => ErrorKind::UnsupportedMethod,
        }
    }
}

/// Routes in registration order, each paired with its target.
#[derive(Debug)]
pub struct Router<T> {
    routes: Vec<(Route, T)>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: Route, target: T) {
        self.routes.push((route, target));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route whose pattern and method match.
    ///
    /// A path matched only by routes for other methods is
    /// `MethodNotAllowed`.
    pub fn find(&self, method: Method, path: &str) -> Result<(&Route, &T, PathParams), RouteError> {
        let mut path_known = false;
        for (route, target) in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if route.allows(method) {
                    return Ok((route, target, params));
                }
                path_known = true;
            }
        }
        Err(if path_known {
            RouteError::MethodNotAllowed
        } else {
            RouteError::NotFound
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_param_segments() {
        let pattern = PathPattern::parse("/1.0/{username}/info/collections");
        let params = pattern.matches("/1.0/alice/info/collections").unwrap();
        assert_eq!(params["username"], "alice");
        assert!(pattern.matches("/1.0/alice/info").is_none());
        assert!(pattern.matches("/1.0/alice/info/collections/extra").is_none());
        assert!(pattern.matches("/1.1/alice/info/collections").is_none());
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["username"]);
    }

    #[test]
    fn empty_segments_do_not_fill_params() {
        let pattern = PathPattern::parse("/user/{username}");
        assert!(pattern.matches("/user/").is_none());
        assert!(pattern.matches("/user//").is_none());
    }

    #[test]
    fn root_pattern() {
        let pattern = PathPattern::parse("/");
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("/x").is_none());
    }

    #[test]
    fn normalizes_trailing_slashes() {
        assert_eq!(normalize_path("/1.0/alice/"), "/1.0/alice");
        assert_eq!(normalize_path("/1.0/alice//"), "/1.0/alice");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn distinguishes_unknown_path_from_wrong_method() {
        let mut router = Router::new();
        router.add(Route::get("/a/{id}"), 1);
        router.add(Route::put("/a/{id}"), 2);

        let (_, target, params) = router.find(Method::Put, "/a/7").unwrap();
        assert_eq!(*target, 2);
        assert_eq!(params["id"], "7");

        assert_eq!(
            router.find(Method::Delete, "/a/7").unwrap_err(),
            RouteError::MethodNotAllowed
        );
        assert_eq!(router.find(Method::Get, "/b").unwrap_err(), RouteError::NotFound);
        assert_eq!(RouteError::NotFound.kind(), ErrorKind::NotFound);
    }
}
