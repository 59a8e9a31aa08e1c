//! Priority-ordered tenant resolution pipeline.
//!
//! Tries registered resolvers in descending priority order (ties broken by
//! registration order) until one yields an identifier that passes validation,
//! then installs the tenant context and publishes a resolved event.
//!
//! A misbehaving resolver must not abort the pipeline: resolver errors are
//! logged and treated as "no opinion". A candidate rejected by the validator
//! sends the loop on to the next resolver, not into a hard failure.

use crate::context::{TenantContext, TenantContextCell, TenantId};
use crate::error::{TenancyError, TenancyResult};
use crate::events::{EventPublisher, TenancyEvent};
use crate::naming::SchemaNamer;
use crate::resolver::{ResolutionRequest, TenantResolver};
use crate::validator::TenantValidator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What to do when no resolver yields a valid tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundBehavior {
    /// Fail with [`TenancyError::NotFound`]; the boundary maps this to a
    /// 403-class rejection.
    #[default]
    Reject,
    /// Return [`TenantResolution::NotResolved`].
    ReturnNone,
    /// Return [`TenantResolution::UseDefault`]; the caller picks the default.
    UseDefault,
}

/// Outcome of a pipeline resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantResolution {
    /// A tenant was resolved and its context installed.
    Resolved(Arc<TenantContext>),
    /// No tenant was resolved (under [`NotFoundBehavior::ReturnNone`]).
    NotResolved,
    /// No tenant was resolved; the caller should use its default tenant
    /// (under [`NotFoundBehavior::UseDefault`]).
    UseDefault,
}

impl TenantResolution {
    /// The resolved context, if any.
    pub fn context(&self) -> Option<&Arc<TenantContext>> {
        match self {
            Self::Resolved(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// TTL cache for validation results, keyed by the identifier's string form.
///
/// Status changes take effect after expiry; the staleness window (default
/// 5 minutes) is an accepted trade-off.
pub struct ValidationCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (bool, Instant)>>,
}

impl ValidationCache {
    /// Default time-to-live for validation results.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Create a cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a fresh entry.
    pub fn get(&self, key: &str) -> Option<bool> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(valid, _)| *valid)
    }

    /// Store a result.
    pub fn insert(&self, key: impl Into<String>, valid: bool) {
        self.entries.write().insert(key.into(), (valid, Instant::now()));
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ValidationCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

/// The resolution pipeline.
pub struct ResolverPipeline {
    resolvers: Vec<Arc<dyn TenantResolver>>,
    validator: Option<Arc<dyn TenantValidator>>,
    validation_cache: ValidationCache,
    namer: Arc<SchemaNamer>,
    publisher: Arc<EventPublisher>,
    not_found: NotFoundBehavior,
}

impl ResolverPipeline {
    /// Create an empty pipeline.
    pub fn new(namer: Arc<SchemaNamer>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            resolvers: Vec::new(),
            validator: None,
            validation_cache: ValidationCache::default(),
            namer,
            publisher,
            not_found: NotFoundBehavior::default(),
        }
    }

    /// Register a resolver. The list stays sorted by descending priority;
    /// equal priorities keep registration order.
    pub fn register(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.resolvers.push(resolver);
        self.resolvers
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
        self
    }

    /// Enable validation of resolved identifiers.
    pub fn with_validator(mut self, validator: Arc<dyn TenantValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the validation cache TTL.
    pub fn with_validation_ttl(mut self, ttl: Duration) -> Self {
        self.validation_cache = ValidationCache::new(ttl);
        self
    }

    /// Set the not-found behavior.
    pub fn with_not_found_behavior(mut self, behavior: NotFoundBehavior) -> Self {
        self.not_found = behavior;
        self
    }

    /// Registered resolver names, in trial order.
    pub fn resolver_names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Drop a cached validation result (e.g. after suspending a tenant).
    pub fn invalidate_validation(&self, id: &TenantId) {
        self.validation_cache.invalidate(&id.to_string());
    }

    /// Resolve the tenant for a request, installing the context into `cell`.
    pub async fn resolve(
        &self,
        request: &ResolutionRequest,
        cell: &TenantContextCell,
    ) -> TenancyResult<TenantResolution> {
        for resolver in &self.resolvers {
            let candidate = match resolver.resolve(request).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(resolver = resolver.name(), "Resolver failed: {}", e);
                    continue;
                }
            };

            let Some(id) = candidate else {
                continue;
            };

            if !self.validate(&id).await {
                debug!(
                    resolver = resolver.name(),
                    tenant = %id,
                    "Candidate rejected by validator"
                );
                continue;
            }

            let schema = self.namer.generate(&id)?;
            let context = Arc::new(TenantContext::new(id.clone()).with_schema(schema));
            cell.replace(Some(context.clone()));

            debug!(resolver = resolver.name(), tenant = %id, "Tenant resolved");
            self.publisher
                .publish(TenancyEvent::resolved(&id, resolver.name()))
                .await;

            return Ok(TenantResolution::Resolved(context));
        }

        match self.not_found {
            NotFoundBehavior::Reject => Err(TenancyError::NotFound(
                "no resolver produced a valid tenant".to_string(),
            )),
            NotFoundBehavior::ReturnNone => Ok(TenantResolution::NotResolved),
            NotFoundBehavior::UseDefault => Ok(TenantResolution::UseDefault),
        }
    }

    /// Validate a candidate through the TTL cache. Validator errors are
    /// absorbed as "invalid" and not cached.
    async fn validate(&self, id: &TenantId) -> bool {
        let Some(validator) = &self.validator else {
            return true;
        };

        let key = id.to_string();
        if let Some(valid) = self.validation_cache.get(&key) {
            return valid;
        }

        match validator.validate(id).await {
            Ok(valid) => {
                self.validation_cache.insert(key, valid);
                valid
            }
            Err(e) => {
                warn!(tenant = %id, "Validator failed: {}", e);
                false
            }
        }
    }
}
