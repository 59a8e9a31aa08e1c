//! Tenant resolution strategies.
//!
//! Each resolver extracts a tenant identifier from one part of an incoming
//! operation: a token claim, an API key, a route value, the path, a header,
//! the subdomain, or the query string. Resolvers are polymorphic over a
//! single `resolve` capability and carry a priority so higher-specificity
//! sources are tried first by the pipeline.
//!
//! Resolvers answer with `Ok(None)` ("no opinion") when their source is
//! absent or unusable; a conversion failure is not an error.

use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};
use crate::store::{ControlStore, TenantStatus};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Default priority of [`ClaimResolver`].
pub const CLAIM_PRIORITY: i32 = 200;
/// Default priority of [`ApiKeyResolver`].
pub const API_KEY_PRIORITY: i32 = 175;
/// Default priority of [`RouteValueResolver`].
pub const ROUTE_VALUE_PRIORITY: i32 = 150;
/// Default priority of [`PathSegmentResolver`].
pub const PATH_PRIORITY: i32 = 125;
/// Default priority of [`HeaderResolver`].
pub const HEADER_PRIORITY: i32 = 100;
/// Default priority of [`SubdomainResolver`].
pub const SUBDOMAIN_PRIORITY: i32 = 50;
/// Default priority of [`QueryStringResolver`].
pub const QUERY_STRING_PRIORITY: i32 = 25;

/// Framework-neutral snapshot of an inbound operation.
///
/// HTTP wiring lives outside this crate; adapters build one of these from
/// whatever request type they have.
#[derive(Debug, Clone, Default)]
pub struct ResolutionRequest {
    headers: HashMap<String, String>,
    path: String,
    query: HashMap<String, String>,
    route_params: HashMap<String, String>,
    claims: HashMap<String, String>,
}

impl ResolutionRequest {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name: String = name.into();
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Add a query-string parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Add a route parameter.
    pub fn with_route_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_params.insert(name.into(), value.into());
        self
    }

    /// Add a token claim.
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    /// Look up a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|v| v.as_str())
    }

    /// Look up a route parameter.
    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.route_params.get(name).map(|v| v.as_str())
    }

    /// Look up a claim.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(|v| v.as_str())
    }
}

/// Tenant resolver capability.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Resolver name, used in logs and resolution events.
    fn name(&self) -> &str;

    /// Resolution priority; higher runs first.
    fn priority(&self) -> i32;

    /// Try to extract a tenant identifier from the request.
    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>>;
}

/// Resolves the tenant from a token claim (most trusted source).
pub struct ClaimResolver {
    claim: String,
    priority: i32,
}

impl ClaimResolver {
    /// Resolve from the given claim name.
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            priority: CLAIM_PRIORITY,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for ClaimResolver {
    fn name(&self) -> &str {
        "claim"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(request.claim(&self.claim).and_then(TenantId::parse))
    }
}

/// Resolves the tenant by looking up an API key in the control store.
///
/// Only Active tenants resolve; any other status is "no opinion" so a less
/// trusted source never reactivates a suspended tenant.
pub struct ApiKeyResolver {
    store: Arc<dyn ControlStore>,
    header: String,
    priority: i32,
}

impl ApiKeyResolver {
    /// Resolve from the `x-api-key` header.
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self {
            store,
            header: "x-api-key".to_string(),
            priority: API_KEY_PRIORITY,
        }
    }

    /// Read the API key from a different header.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        let header: String = header.into();
        self.header = header.to_lowercase();
        self
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for ApiKeyResolver {
    fn name(&self) -> &str {
        "api_key"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        let Some(api_key) = request.header(&self.header) else {
            return Ok(None);
        };

        let Some(record) = self.store.get_by_api_key(api_key).await? else {
            return Ok(None);
        };

        if record.status != TenantStatus::Active {
            return Ok(None);
        }

        Ok(Some(TenantId::Uuid(record.id)))
    }
}

/// Resolves the tenant from a named route parameter.
pub struct RouteValueResolver {
    param: String,
    priority: i32,
}

impl RouteValueResolver {
    /// Resolve from the given route parameter.
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            priority: ROUTE_VALUE_PRIORITY,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for RouteValueResolver {
    fn name(&self) -> &str {
        "route_value"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(request.route_param(&self.param).and_then(TenantId::parse))
    }
}

/// Resolves the tenant from a path pattern.
///
/// # Examples
///
/// ```
/// use warren::PathSegmentResolver;
///
/// let resolver = PathSegmentResolver::new(r"^/tenants/([^/]+)", 1).unwrap();
/// ```
pub struct PathSegmentResolver {
    pattern: Regex,
    group_index: usize,
    priority: i32,
}

impl PathSegmentResolver {
    /// Resolve from `pattern`, taking capture group `group_index`.
    pub fn new(pattern: &str, group_index: usize) -> TenancyResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)
                .map_err(|e| TenancyError::Configuration(e.to_string()))?,
            group_index,
            priority: PATH_PRIORITY,
        })
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for PathSegmentResolver {
    fn name(&self) -> &str {
        "path"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(self
            .pattern
            .captures(request.path())
            .and_then(|captures| captures.get(self.group_index))
            .and_then(|m| TenantId::parse(m.as_str())))
    }
}

/// Resolves the tenant from a request header.
pub struct HeaderResolver {
    header: String,
    priority: i32,
}

impl HeaderResolver {
    /// Resolve from the given header name.
    pub fn new(header: impl Into<String>) -> Self {
        let header: String = header.into();
        Self {
            header: header.to_lowercase(),
            priority: HEADER_PRIORITY,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for HeaderResolver {
    fn name(&self) -> &str {
        "header"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(request.header(&self.header).and_then(TenantId::parse))
    }
}

/// Resolves the tenant from the subdomain of the Host header.
///
/// Strips a configured base domain; well-known non-tenant subdomains
/// (`www`, `api`, `app` by default) are ignored.
pub struct SubdomainResolver {
    base_domain: String,
    ignored: Vec<String>,
    priority: i32,
}

impl SubdomainResolver {
    /// Resolve subdomains of `base_domain` (e.g. `example.com`).
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            ignored: vec!["www".to_string(), "api".to_string(), "app".to_string()],
            priority: SUBDOMAIN_PRIORITY,
        }
    }

    /// Replace the ignored-subdomain list.
    pub fn with_ignored(mut self, ignored: Vec<String>) -> Self {
        self.ignored = ignored;
        self
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Extract the subdomain from a host header value.
    fn extract_subdomain(&self, host: &str) -> Option<String> {
        // Remove port if present
        let host = host.split(':').next().unwrap_or(host);

        let subdomain = host.strip_suffix(&format!(".{}", self.base_domain))?;
        if subdomain.is_empty() || subdomain.contains('.') {
            return None;
        }
        if self.ignored.iter().any(|i| i == subdomain) {
            return None;
        }
        Some(subdomain.to_string())
    }
}

#[async_trait]
impl TenantResolver for SubdomainResolver {
    fn name(&self) -> &str {
        "subdomain"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(request
            .header("host")
            .and_then(|host| self.extract_subdomain(host))
            .and_then(|subdomain| TenantId::parse(&subdomain)))
    }
}

/// Resolves the tenant from a query-string parameter (least trusted source).
pub struct QueryStringResolver {
    param: String,
    priority: i32,
}

impl QueryStringResolver {
    /// Resolve from the given query parameter.
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            priority: QUERY_STRING_PRIORITY,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl TenantResolver for QueryStringResolver {
    fn name(&self) -> &str {
        "query_string"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn resolve(&self, request: &ResolutionRequest) -> TenancyResult<Option<TenantId>> {
        Ok(request.query(&self.param).and_then(TenantId::parse))
    }
}
