//! Tenancy lifecycle events.
//!
//! Immutable, timestamped facts describing lifecycle transitions. Events fan
//! out to zero or more handlers; a failing handler is logged and isolated so
//! it cannot block the others or the operation that published the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::context::TenantId;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyEventKind {
    /// A tenant was provisioned.
    Created,
    /// A tenant's schema was deleted.
    Deleted {
        /// Whether the schema was dropped (`true`) or soft-deleted (`false`).
        hard: bool,
    },
    /// A tenant's schema was archived.
    Archived,
    /// A tenant's schema was restored from its archive.
    Restored,
    /// A structural migration was applied to a tenant's schema.
    MigrationApplied {
        /// Version of the applied migration.
        version: String,
    },
    /// A request was resolved to a tenant.
    Resolved {
        /// Name of the resolver that produced the identifier.
        resolver: String,
    },
}

/// A lifecycle fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the transition happened.
    pub timestamp: DateTime<Utc>,

    /// String form of the tenant identifier.
    pub tenant_id: String,

    /// The transition itself.
    pub kind: TenancyEventKind,
}

impl TenancyEvent {
    fn new(tenant_id: &TenantId, kind: TenancyEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            kind,
        }
    }

    /// A tenant was provisioned.
    pub fn created(tenant_id: &TenantId) -> Self {
        Self::new(tenant_id, TenancyEventKind::Created)
    }

    /// A tenant's schema was deleted.
    pub fn deleted(tenant_id: &TenantId, hard: bool) -> Self {
        Self::new(tenant_id, TenancyEventKind::Deleted { hard })
    }

    /// A tenant's schema was archived.
    pub fn archived(tenant_id: &TenantId) -> Self {
        Self::new(tenant_id, TenancyEventKind::Archived)
    }

    /// A tenant's schema was restored.
    pub fn restored(tenant_id: &TenantId) -> Self {
        Self::new(tenant_id, TenancyEventKind::Restored)
    }

    /// A migration was applied.
    pub fn migration_applied(tenant_id: &TenantId, version: impl Into<String>) -> Self {
        Self::new(
            tenant_id,
            TenancyEventKind::MigrationApplied {
                version: version.into(),
            },
        )
    }

    /// A request was resolved to this tenant.
    pub fn resolved(tenant_id: &TenantId, resolver: impl Into<String>) -> Self {
        Self::new(
            tenant_id,
            TenancyEventKind::Resolved {
                resolver: resolver.into(),
            },
        )
    }

    /// Short name of the event kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TenancyEventKind::Created => "created",
            TenancyEventKind::Deleted { .. } => "deleted",
            TenancyEventKind::Archived => "archived",
            TenancyEventKind::Restored => "restored",
            TenancyEventKind::MigrationApplied { .. } => "migration_applied",
            TenancyEventKind::Resolved { .. } => "resolved",
        }
    }
}

/// Event handler error.
#[derive(Debug, thiserror::Error)]
pub enum EventHandlerError {
    /// The handler failed.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),
}

/// Handler for tenancy events.
#[async_trait]
pub trait TenancyEventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: &TenancyEvent) -> Result<(), EventHandlerError>;
}

/// Fan-out publisher for tenancy events.
///
/// Handlers run in registration order; a failing handler is logged and the
/// remaining handlers still run. Publish never fails the calling operation.
#[derive(Default)]
pub struct EventPublisher {
    handlers: RwLock<Vec<Arc<dyn TenancyEventHandler>>>,
}

impl EventPublisher {
    /// Create a publisher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn subscribe(&self, handler: Arc<dyn TenancyEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Publish an event to every handler.
    pub async fn publish(&self, event: TenancyEvent) {
        let handlers: Vec<_> = self.handlers.read().clone();
        if handlers.is_empty() {
            return;
        }

        debug!(
            tenant = %event.tenant_id,
            kind = event.kind_name(),
            "Publishing tenancy event"
        );

        for handler in handlers {
            if let Err(e) = handler.handle(&event).await {
                error!(
                    tenant = %event.tenant_id,
                    kind = event.kind_name(),
                    "Event handler failed: {}",
                    e
                );
            }
        }
    }
}
