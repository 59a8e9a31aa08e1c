//! Tenant identity and request-scoped tenant context.
//!
//! The context is carried explicitly: each unit of work (HTTP request,
//! background job) owns a [`TenantContextCell`], and [`TenantScope`] installs
//! a context into it with guaranteed restore-on-drop, so nested scopes unwind
//! in LIFO order on every exit path.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Tenant identifier.
///
/// A closed set of identifier shapes with a deterministic string form.
/// "No tenant" is expressed as `Option<TenantId>`, not a sentinel value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantId {
    /// UUID identifier (control-store backed tenants).
    Uuid(Uuid),
    /// Integer identifier.
    Int(i64),
    /// String identifier (slugs, subdomains).
    Str(String),
}

impl TenantId {
    /// Parse an identifier from its textual form.
    ///
    /// Tries UUID, then integer, then falls back to a string identifier.
    /// Returns `None` for empty or whitespace-only input.
    ///
    /// # Examples
    ///
    /// ```
    /// use warren::TenantId;
    ///
    /// assert_eq!(TenantId::parse("42"), Some(TenantId::Int(42)));
    /// assert_eq!(TenantId::parse("acme"), Some(TenantId::Str("acme".to_string())));
    /// assert_eq!(TenantId::parse("  "), None);
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(uuid) = Uuid::parse_str(raw) {
            return Some(Self::Uuid(uuid));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Self::Int(n));
        }
        Some(Self::Str(raw.to_string()))
    }

    /// Get the UUID form, if this identifier is a UUID.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{}", u),
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<i64> for TenantId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Immutable per-tenant context for one unit of work.
///
/// Replaced, never mutated, when the active tenant changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    id: TenantId,
    schema: Option<String>,
    properties: HashMap<String, String>,
}

impl TenantContext {
    /// Create a context for a tenant.
    pub fn new(id: TenantId) -> Self {
        Self {
            id,
            schema: None,
            properties: HashMap::new(),
        }
    }

    /// Attach the tenant's schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Attach an arbitrary property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The tenant identifier.
    pub fn id(&self) -> &TenantId {
        &self.id
    }

    /// The tenant's schema name, if known.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Look up a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.as_str())
    }
}

/// Carrier for the ambient tenant context of one unit of work.
///
/// Each concurrently executing unit of work gets its own cell; cells are
/// never shared across units. Install contexts through [`TenantScope`] when
/// restoration matters, or [`TenantContextCell::replace`] for the lifetime of
/// the whole unit.
#[derive(Debug, Default)]
pub struct TenantContextCell {
    current: RwLock<Option<Arc<TenantContext>>>,
}

impl TenantContextCell {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently installed context, if any.
    pub fn current(&self) -> Option<Arc<TenantContext>> {
        self.current.read().clone()
    }

    /// The current tenant identifier, if any.
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.current.read().as_ref().map(|c| c.id().clone())
    }

    /// Whether a tenant is installed.
    pub fn has_tenant(&self) -> bool {
        self.current.read().is_some()
    }

    /// Install a context (or clear with `None`), returning the previous one.
    pub fn replace(&self, context: Option<Arc<TenantContext>>) -> Option<Arc<TenantContext>> {
        std::mem::replace(&mut *self.current.write(), context)
    }

    /// Clear the cell.
    pub fn clear(&self) {
        self.replace(None);
    }
}

/// RAII guard that installs a tenant context and restores the previous one
/// when dropped.
///
/// Scopes nest: dropping restores exactly what was installed at entry, so
/// nested scopes unwind LIFO, including during panics.
///
/// # Examples
///
/// ```
/// use warren::{TenantContext, TenantContextCell, TenantId, TenantScope};
///
/// let cell = TenantContextCell::new();
/// {
///     let _scope = TenantScope::enter(&cell, TenantContext::new(TenantId::from("acme")));
///     assert!(cell.has_tenant());
/// }
/// assert!(!cell.has_tenant());
/// ```
#[must_use = "the scope restores the previous context when dropped"]
pub struct TenantScope<'a> {
    cell: &'a TenantContextCell,
    previous: Option<Arc<TenantContext>>,
}

impl<'a> TenantScope<'a> {
    /// Install `context` into `cell`, capturing the previous value.
    pub fn enter(cell: &'a TenantContextCell, context: TenantContext) -> Self {
        let previous = cell.replace(Some(Arc::new(context)));
        Self { cell, previous }
    }

    /// The context installed by this scope.
    pub fn context(&self) -> Option<Arc<TenantContext>> {
        self.cell.current()
    }
}

impl Drop for TenantScope<'_> {
    fn drop(&mut self) {
        self.cell.replace(self.previous.take());
    }
}
