//! Route matching for intercepted network requests.
//!
//! A [`RouteTable`] maps URL globs to handlers. Each handler inspects an
//! [`InterceptedRequest`] and returns a [`RouteDecision`]: answer now (or after
//! a delay), hold the request open, let it through, or abort it.
//!
//! Resolution is **first registered wins**: among the routes whose glob matches
//! the URL, the earliest registered route whose predicate accepts the request
//! handles it. Exactly one handler runs per request.

use crate::fixture::FixtureResponse;
use crate::result::{FreezeError, FreezeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// HTTP methods for request matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// DELETE request
    Delete,
    /// PATCH request
    Patch,
    /// HEAD request
    Head,
    /// OPTIONS request
    Options,
    /// Anything else the browser sends
    Other,
}

impl HttpMethod {
    /// Parse from the wire representation
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => Self::Other,
        }
    }

    /// Convert to string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL glob compiled to an anchored regular expression.
///
/// `**` matches anything (including `/`), `*` matches anything except `/`,
/// `?` matches a single non-`/` character. The glob must cover the whole URL.
#[derive(Debug, Clone)]
pub struct UrlGlob {
    pattern: String,
    regex: Regex,
}

impl UrlGlob {
    /// Compile a glob
    pub fn new(pattern: &str) -> FreezeResult<Self> {
        if pattern.trim().is_empty() {
            return Err(FreezeError::RouteConfig {
                pattern: pattern.to_string(),
                message: "URL glob must not be empty".to_string(),
            });
        }

        let mut expr = String::with_capacity(pattern.len() * 2 + 2);
        expr.push('^');
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    expr.push_str(".*");
                }
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| FreezeError::RouteConfig {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Check if a URL matches this glob
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    /// The original glob text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for UrlGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Identifier the browser's network layer assigned to a paused request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outgoing request paused by the browser, waiting for a decision.
///
/// Not `Clone`: whoever owns it is the only party allowed to answer it.
#[derive(Debug, PartialEq, Eq)]
pub struct InterceptedRequest {
    /// Transport-level id used to answer the request
    pub id: RequestId,
    /// HTTP method
    pub method: HttpMethod,
    /// Full request URL
    pub url: String,
    /// Request body, if any
    pub body: Option<String>,
}

impl InterceptedRequest {
    /// Create a request without a body
    #[must_use]
    pub fn new(id: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: RequestId(id.into()),
            method,
            url: url.into(),
            body: None,
        }
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether a non-empty body was sent
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }

    /// Parse the body as JSON
    pub fn body_json<T: for<'de> Deserialize<'de>>(&self) -> FreezeResult<T> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| FreezeError::assertion(self.to_string(), "a request body", "none"))?;
        Ok(serde_json::from_str(body)?)
    }
}

impl fmt::Display for InterceptedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

type PredicateFn = dyn Fn(&InterceptedRequest) -> bool + Send + Sync;

/// Test a request for method, body presence, or custom criteria
#[derive(Clone)]
pub enum RequestPredicate {
    /// Accept every request
    Any,
    /// Accept a single HTTP method
    Method(HttpMethod),
    /// Accept requests that carry a non-empty body
    HasBody,
    /// Accept requests that carry no body
    NoBody,
    /// Arbitrary check with a description for diagnostics
    Custom {
        /// Shown in logs and errors
        description: String,
        /// The check itself
        check: Arc<PredicateFn>,
    },
}

impl RequestPredicate {
    /// Build a custom predicate
    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&InterceptedRequest) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Evaluate against a request
    #[must_use]
    pub fn accepts(&self, request: &InterceptedRequest) -> bool {
        match self {
            Self::Any => true,
            Self::Method(method) => request.method == *method,
            Self::HasBody => request.has_body(),
            Self::NoBody => !request.has_body(),
            Self::Custom { check, .. } => check(request),
        }
    }
}

impl fmt::Debug for RequestPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for RequestPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any request"),
            Self::Method(m) => write!(f, "method {m}"),
            Self::HasBody => f.write_str("request with body"),
            Self::NoBody => f.write_str("request without body"),
            Self::Custom { description, .. } => f.write_str(description),
        }
    }
}

/// What to do with a matched request
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Answer with a fixture (after its delay)
    Fulfill(FixtureResponse),
    /// Keep the request open until the driver fulfils it
    Hold,
    /// Let the request reach the real network
    Continue,
    /// Fail the request with a network error
    Abort,
}

type HandlerFn = dyn Fn(&InterceptedRequest) -> RouteDecision + Send + Sync;

/// Callback deciding the fate of a matched request
#[derive(Clone)]
pub struct RouteHandler {
    label: String,
    func: Arc<HandlerFn>,
}

impl RouteHandler {
    /// Wrap an arbitrary callback
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&InterceptedRequest) -> RouteDecision + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// Always answer with the same fixture
    #[must_use]
    pub fn respond(response: FixtureResponse) -> Self {
        let label = format!("respond {}", response.status());
        Self::new(label, move |_| RouteDecision::Fulfill(response.clone()))
    }

    /// Always hold the request open
    #[must_use]
    pub fn hold() -> Self {
        Self::new("hold", |_| RouteDecision::Hold)
    }

    /// Always pass the request through
    #[must_use]
    pub fn pass_through() -> Self {
        Self::new("continue", |_| RouteDecision::Continue)
    }

    /// Always abort the request
    #[must_use]
    pub fn abort() -> Self {
        Self::new("abort", |_| RouteDecision::Abort)
    }

    /// Run the callback
    #[must_use]
    pub fn decide(&self, request: &InterceptedRequest) -> RouteDecision {
        (self.func)(request)
    }

    /// Label used in logs
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandler")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Declarative route registration, reusable across scenario runs
#[derive(Debug, Clone)]
pub struct RouteSpec {
    /// URL glob
    pub pattern: String,
    /// Request filter within the glob
    pub predicate: RequestPredicate,
    /// Decision callback
    pub handler: RouteHandler,
    /// Minimum number of matches expected before verification
    pub min_matches: Option<usize>,
}

impl RouteSpec {
    /// Route every request matching `pattern` to `handler`
    pub fn new(pattern: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            pattern: pattern.into(),
            predicate: RequestPredicate::Any,
            handler,
            min_matches: None,
        }
    }

    /// Restrict to requests accepted by `predicate`
    #[must_use]
    pub fn when(mut self, predicate: RequestPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Restrict to a single HTTP method
    #[must_use]
    pub fn method(self, method: HttpMethod) -> Self {
        self.when(RequestPredicate::Method(method))
    }

    /// Require at least `n` matches by the time the scenario is verified
    #[must_use]
    pub const fn expect_at_least(mut self, n: usize) -> Self {
        self.min_matches = Some(n);
        self
    }
}

/// Opaque identifier of a registered route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

/// A registered route
#[derive(Debug)]
pub struct Route {
    id: RouteId,
    glob: UrlGlob,
    predicate: RequestPredicate,
    handler: RouteHandler,
    min_matches: Option<usize>,
    match_count: usize,
}

impl Route {
    /// Check glob and predicate
    #[must_use]
    pub fn matches(&self, request: &InterceptedRequest) -> bool {
        self.glob.matches(&request.url) && self.predicate.accepts(request)
    }

    /// Route id
    #[must_use]
    pub const fn id(&self) -> RouteId {
        self.id
    }

    /// Glob the route was registered with
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.glob.as_str()
    }

    /// Number of requests this route has handled
    #[must_use]
    pub const fn match_count(&self) -> usize {
        self.match_count
    }
}

/// Route table for one browsing context
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    next_id: u64,
    unrouted: usize,
}

impl RouteTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `pattern`, filtered by `predicate`
    pub fn register_route(
        &mut self,
        pattern: &str,
        predicate: RequestPredicate,
        handler: RouteHandler,
    ) -> FreezeResult<RouteId> {
        self.register(&RouteSpec::new(pattern, handler).when(predicate))
    }

    /// Register a route from a [`RouteSpec`]
    pub fn register(&mut self, spec: &RouteSpec) -> FreezeResult<RouteId> {
        let glob = UrlGlob::new(&spec.pattern)?;
        let id = RouteId(self.next_id);
        self.next_id += 1;
        debug!(
            pattern = %glob,
            predicate = %spec.predicate,
            handler = spec.handler.label(),
            "route registered"
        );
        self.routes.push(Route {
            id,
            glob,
            predicate: spec.predicate.clone(),
            handler: spec.handler.clone(),
            min_matches: spec.min_matches,
            match_count: 0,
        });
        Ok(id)
    }

    /// Return the handler that would run for `request`, without recording a match
    #[must_use]
    pub fn match_request(&self, request: &InterceptedRequest) -> Option<&RouteHandler> {
        self.routes
            .iter()
            .find(|route| route.matches(request))
            .map(|route| &route.handler)
    }

    /// Select the handler for `request` and record the match
    pub fn resolve(&mut self, request: &InterceptedRequest) -> Option<(RouteId, RouteHandler)> {
        if let Some(route) = self.routes.iter_mut().find(|route| route.matches(request)) {
            route.match_count += 1;
            Some((route.id, route.handler.clone()))
        } else {
            self.unrouted += 1;
            None
        }
    }

    /// Remove every registration for `pattern`. Clearing an unknown pattern is a no-op.
    pub fn clear_route(&mut self, pattern: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|route| route.pattern() != pattern);
        let removed = before - self.routes.len();
        debug!(pattern, removed, "route cleared");
        removed
    }

    /// Remove every route
    pub fn clear_all(&mut self) {
        self.routes.clear();
        self.unrouted = 0;
    }

    /// Number of registered routes
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Requests that matched no route
    #[must_use]
    pub const fn unrouted_count(&self) -> usize {
        self.unrouted
    }

    /// Registered routes in resolution order
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Fail if any route matched fewer times than it required
    pub fn verify(&self) -> FreezeResult<()> {
        for route in &self.routes {
            if let Some(min) = route.min_matches {
                if route.match_count < min {
                    return Err(FreezeError::RouteConfig {
                        pattern: route.pattern().to_string(),
                        message: format!(
                            "expected at least {min} match(es) for {}, got {}",
                            route.predicate, route.match_count
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn get(url: &str) -> InterceptedRequest {
        InterceptedRequest::new("r1", HttpMethod::Get, url)
    }

    fn post(url: &str) -> InterceptedRequest {
        InterceptedRequest::new("r2", HttpMethod::Post, url).with_body("{}")
    }

    mod http_method_tests {
        use super::*;

        #[test]
        fn test_parse() {
            assert_eq!(HttpMethod::parse("GET"), HttpMethod::Get);
            assert_eq!(HttpMethod::parse("post"), HttpMethod::Post);
            assert_eq!(HttpMethod::parse("PROPFIND"), HttpMethod::Other);
        }

        #[test]
        fn test_display() {
            assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        }
    }

    mod glob_tests {
        use super::*;

        #[test]
        fn test_double_star_crosses_segments() {
            let glob = UrlGlob::new("**/api/cases").unwrap();
            assert!(glob.matches("http://localhost:3000/api/cases"));
            assert!(!glob.matches("http://localhost:3000/api/cases/123"));
            assert!(!glob.matches("http://localhost:3000/api/casesx"));
        }

        #[test]
        fn test_single_star_stays_in_segment() {
            let glob = UrlGlob::new("**/api/cases/*").unwrap();
            assert!(glob.matches("http://host/api/cases/abc"));
            assert!(!glob.matches("http://host/api/cases/abc/results"));
        }

        #[test]
        fn test_question_mark() {
            let glob = UrlGlob::new("**/v?/status").unwrap();
            assert!(glob.matches("https://x/v1/status"));
            assert!(!glob.matches("https://x/v10/status"));
        }

        #[test]
        fn test_regex_metacharacters_are_literal() {
            let glob = UrlGlob::new("**/search?q=a+b").unwrap();
            assert!(glob.matches("http://h/search1q=a+b"));
            assert!(!glob.matches("http://h/searchq=aab"));
        }

        #[test]
        fn test_empty_pattern_rejected() {
            let err = UrlGlob::new("  ").unwrap_err();
            assert_eq!(err.kind(), "RouteConfigError");
        }
    }

    mod predicate_tests {
        use super::*;

        #[test]
        fn test_method_and_body() {
            assert!(RequestPredicate::Method(HttpMethod::Post).accepts(&post("u")));
            assert!(!RequestPredicate::Method(HttpMethod::Post).accepts(&get("u")));
            assert!(RequestPredicate::HasBody.accepts(&post("u")));
            assert!(RequestPredicate::NoBody.accepts(&get("u")));
        }

        #[test]
        fn test_custom() {
            let pred = RequestPredicate::custom("query has page=2", |r| r.url.contains("page=2"));
            assert!(pred.accepts(&get("http://h/api?page=2")));
            assert!(!pred.accepts(&get("http://h/api?page=1")));
            assert_eq!(pred.to_string(), "query has page=2");
        }

        #[test]
        fn test_body_json() {
            let request = post("u");
            let value: serde_json::Value = request.body_json().unwrap();
            assert!(value.is_object());
            assert!(get("u").body_json::<serde_json::Value>().is_err());
        }
    }

    mod route_table_tests {
        use super::*;

        fn labelled(label: &'static str) -> RouteHandler {
            RouteHandler::new(label, |_| RouteDecision::Continue)
        }

        #[test]
        fn test_first_registered_wins() {
            let mut table = RouteTable::new();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("first"))
                .unwrap();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("second"))
                .unwrap();
            let handler = table.match_request(&get("http://h/api/cases")).unwrap();
            assert_eq!(handler.label(), "first");
        }

        #[test]
        fn test_predicate_dispatch_by_method() {
            let mut table = RouteTable::new();
            table
                .register_route(
                    "**/api/cases",
                    RequestPredicate::Method(HttpMethod::Post),
                    labelled("create"),
                )
                .unwrap();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("list"))
                .unwrap();

            let url = "http://h/api/cases";
            assert_eq!(table.match_request(&post(url)).unwrap().label(), "create");
            assert_eq!(table.match_request(&get(url)).unwrap().label(), "list");
        }

        #[test]
        fn test_unrelated_pattern_never_selected() {
            let mut table = RouteTable::new();
            table
                .register_route("**/api/files/*", RequestPredicate::Any, labelled("files"))
                .unwrap();
            assert!(table.match_request(&get("http://h/api/cases")).is_none());
            assert!(table.resolve(&get("http://h/api/cases")).is_none());
            assert_eq!(table.unrouted_count(), 1);
        }

        #[test]
        fn test_resolve_counts_matches() {
            let mut table = RouteTable::new();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("list"))
                .unwrap();
            table.resolve(&get("http://h/api/cases"));
            table.resolve(&get("http://h/api/cases"));
            assert_eq!(table.routes()[0].match_count(), 2);
        }

        #[test]
        fn test_clear_route_is_idempotent() {
            let mut table = RouteTable::new();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("a"))
                .unwrap();
            table
                .register_route("**/api/cases", RequestPredicate::Any, labelled("b"))
                .unwrap();
            assert_eq!(table.clear_route("**/api/cases"), 2);
            assert_eq!(table.clear_route("**/api/cases"), 0);
            assert_eq!(table.clear_route("**/never/registered"), 0);
            assert_eq!(table.route_count(), 0);
        }

        #[test]
        fn test_verify_reports_unmatched_required_route() {
            let mut table = RouteTable::new();
            table
                .register(&RouteSpec::new("**/api/cases", labelled("list")).expect_at_least(1))
                .unwrap();
            let err = table.verify().unwrap_err();
            assert_eq!(err.kind(), "RouteConfigError");

            table.resolve(&get("http://h/api/cases"));
            assert!(table.verify().is_ok());
        }

        #[test]
        fn test_invalid_pattern_not_registered() {
            let mut table = RouteTable::new();
            assert!(table
                .register_route("", RequestPredicate::Any, labelled("x"))
                .is_err());
            assert_eq!(table.route_count(), 0);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_pattern_isolation(segment in "[a-z]{1,8}", other in "[a-z]{1,8}") {
                prop_assume!(segment != other);
                let mut table = RouteTable::new();
                table.register_route(
                    &format!("**/api/{segment}"),
                    RequestPredicate::Any,
                    RouteHandler::new(segment.clone(), |_| RouteDecision::Continue),
                ).unwrap();
                table.register_route(
                    &format!("**/api/{other}"),
                    RequestPredicate::Any,
                    RouteHandler::new(other.clone(), |_| RouteDecision::Continue),
                ).unwrap();

                let request = get(&format!("http://host/api/{segment}"));
                let handler = table.match_request(&request).unwrap();
                prop_assert_eq!(handler.label(), segment.as_str());
            }

            #[test]
            fn prop_exactly_one_handler_selected(n in 1usize..8) {
                let mut table = RouteTable::new();
                for i in 0..n {
                    table.register_route(
                        "**/api/cases",
                        RequestPredicate::Any,
                        RouteHandler::new(format!("h{i}"), |_| RouteDecision::Continue),
                    ).unwrap();
                }
                table.resolve(&get("http://host/api/cases"));
                let total: usize = table.routes().iter().map(Route::match_count).sum();
                prop_assert_eq!(total, 1);
                prop_assert_eq!(table.routes()[0].match_count(), 1);
            }
        }
    }
}
