//! Schema-Per-Tenant Multi-Tenancy
//!
//! Isolates each tenant's data inside its own schema in one relational
//! database, and manages the full lifecycle around that isolation: resolving
//! which tenant a request belongs to, provisioning/archiving/restoring/
//! deleting tenant schemas, and keeping every schema migrated.
//!
//! # Features
//!
//! - 🏢 **Tenant Isolation** - Schema-per-tenant lifecycle with explicit
//!   illegal-transition errors
//! - 🔍 **Tenant Resolution** - Priority-ordered pluggable resolvers
//!   (claims, API key, route, path, header, subdomain, query string)
//! - ✅ **Validation** - TTL-cached checks that a resolved tenant is real
//!   and active
//! - 📊 **Migrations** - Bounded-parallel migration runner with
//!   failure-containment policies, retry, timeout, and cancellation
//! - 📝 **Control Store** - Optional centralized tenant metadata with
//!   salted API-key hashing and a caching decorator
//! - 📣 **Lifecycle Events** - Immutable facts fanned out to isolated
//!   subscribers
//!
//! # Quick Start
//!
//! ## 1. Wire the capabilities
//!
//! ```rust,ignore
//! use warren::prelude::*;
//! use std::sync::Arc;
//!
//! // Implement SchemaOps with your database client.
//! let ops: Arc<dyn SchemaOps> = Arc::new(PgSchemaOps::new(pool.clone()));
//! let namer = Arc::new(SchemaNamer::new(SchemaNamingOptions::default()));
//! let strategy = Arc::new(SchemaPerTenantStrategy::new(ops.clone(), namer.clone()));
//!
//! let publisher = Arc::new(EventPublisher::new());
//! let backend: Arc<dyn MigrationBackend> = Arc::new(PgMigrationBackend::new(pool));
//! let runner = MigrationRunner::new(backend, strategy.clone(), publisher.clone())
//!     .register(Arc::new(SqlMigration::new(
//!         "0001",
//!         "create_users",
//!         "CREATE TABLE users (id uuid PRIMARY KEY)",
//!     )));
//!
//! let manager = TenantManager::new(strategy.clone(), runner, publisher.clone());
//! ```
//!
//! ## 2. Resolve tenants per request
//!
//! ```rust,ignore
//! let pipeline = ResolverPipeline::new(namer.clone(), publisher.clone())
//!     .register(Arc::new(HeaderResolver::new("X-Tenant-ID")))
//!     .register(Arc::new(SubdomainResolver::new("example.com")))
//!     .with_validator(Arc::new(SchemaExistsValidator::new(ops, namer)));
//!
//! // One cell per unit of work.
//! let cell = TenantContextCell::new();
//! let request = ResolutionRequest::new()
//!     .with_header("host", "acme.example.com");
//!
//! match pipeline.resolve(&request, &cell).await {
//!     Ok(resolution) => { /* cell now carries the tenant context */ }
//!     Err(TenancyError::NotFound(_)) => { /* respond 403 */ }
//!     Err(e) => { /* ... */ }
//! }
//! ```
//!
//! ## 3. Manage the lifecycle
//!
//! ```rust,ignore
//! let id = TenantId::from("acme");
//! manager.provision(&id).await?;          // schema + migrations + seeders
//! manager.archive(&id).await?;            // rename away
//! manager.restore(&id).await?;            // rename back
//! manager.delete(&id, false).await?;      // soft delete (timestamped rename)
//!
//! manager.migrate_all_tenants().await?;   // bounded-parallel migrations
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod isolation;
pub mod manager;
pub mod migration;
pub mod naming;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod validator;

pub use context::{TenantContext, TenantContextCell, TenantId, TenantScope};
pub use error::{TenancyError, TenancyResult};
pub use events::{
    EventHandlerError, EventPublisher, TenancyEvent, TenancyEventHandler, TenancyEventKind,
};
pub use isolation::SchemaPerTenantStrategy;
pub use manager::{ProvisionRequest, TenantManager, TenantSeeder};
pub use migration::{
    CancelToken, FailureBehavior, InMemoryMigrationBackend, MigrationBackend, MigrationOptions,
    MigrationRunner, MigrationSummary, SchemaMigration, SqlMigration,
};
pub use naming::{SchemaNamer, SchemaNamingOptions};
pub use pipeline::{NotFoundBehavior, ResolverPipeline, TenantResolution, ValidationCache};
pub use resolver::{
    ApiKeyResolver, ClaimResolver, HeaderResolver, PathSegmentResolver, QueryStringResolver,
    ResolutionRequest, RouteValueResolver, SubdomainResolver, TenantResolver,
};
pub use schema::{InMemorySchemaOps, SchemaOps};
pub use store::{
    CachingControlStore, ControlStore, InMemoryControlStore, PasswordProtector, TenantRecord,
    TenantStatus, generate_api_key, hash_api_key, verify_api_key,
};
pub use validator::{SchemaExistsValidator, TenantValidator};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{TenantContext, TenantContextCell, TenantId, TenantScope};
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::events::{EventPublisher, TenancyEvent, TenancyEventHandler};
    pub use crate::isolation::SchemaPerTenantStrategy;
    pub use crate::manager::{ProvisionRequest, TenantManager, TenantSeeder};
    pub use crate::migration::{
        CancelToken, FailureBehavior, MigrationBackend, MigrationOptions, MigrationRunner,
        SchemaMigration, SqlMigration,
    };
    pub use crate::naming::{SchemaNamer, SchemaNamingOptions};
    pub use crate::pipeline::{NotFoundBehavior, ResolverPipeline, TenantResolution};
    pub use crate::resolver::{
        ApiKeyResolver, ClaimResolver, HeaderResolver, PathSegmentResolver, QueryStringResolver,
        ResolutionRequest, RouteValueResolver, SubdomainResolver, TenantResolver,
    };
    pub use crate::schema::SchemaOps;
    pub use crate::store::{ControlStore, PasswordProtector, TenantRecord, TenantStatus};
    pub use crate::validator::{SchemaExistsValidator, TenantValidator};
}
