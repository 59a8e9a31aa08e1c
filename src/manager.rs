//! Tenant lifecycle orchestration.
//!
//! [`TenantManager`] composes the isolation strategy, the migration runner,
//! seeders, the event publisher, and the optional control store into full
//! lifecycle operations: provision, archive, restore, delete, migrate.
//!
//! Only the primary data-owner's migrations (the runner this manager was
//! built with) are applied during provisioning; additional owners must be
//! migrated explicitly with their own runners. This asymmetry is deliberate.

use crate::context::{TenantContext, TenantContextCell, TenantId};
use crate::error::{TenancyError, TenancyResult};
use crate::events::{EventPublisher, TenancyEvent};
use crate::isolation::SchemaPerTenantStrategy;
use crate::migration::{CancelToken, MigrationRunner, MigrationSummary};
use crate::store::{ControlStore, PasswordProtector, TenantRecord, TenantStatus, hash_api_key};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Seeds initial data into a freshly provisioned tenant.
///
/// Seeders run in ascending priority order, inside a [`crate::TenantScope`]
/// bound to the new tenant.
#[async_trait]
pub trait TenantSeeder: Send + Sync {
    /// Seeder name, for logs.
    fn name(&self) -> &str;

    /// Execution order; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Seed the tenant.
    async fn seed(&self, context: &TenantContext) -> TenancyResult<()>;
}

/// Request for control-store-backed provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Unique, URL-safe slug.
    pub slug: String,

    /// Database name override.
    pub database: Option<String>,

    /// Server override.
    pub server: Option<String>,

    /// Database user override.
    pub db_user: Option<String>,

    /// Plaintext database password; stored only in protected form.
    pub password: Option<String>,

    /// Plaintext API key; stored only as a salted hash.
    pub api_key: Option<String>,
}

impl ProvisionRequest {
    /// Create a request for a slug.
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            database: None,
            server: None,
            db_user: None,
            password: None,
            api_key: None,
        }
    }

    /// Set the database override.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the server override.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the database user override.
    pub fn with_db_user(mut self, user: impl Into<String>) -> Self {
        self.db_user = Some(user.into());
        self
    }

    /// Set the database password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Top-level tenant lifecycle orchestrator.
pub struct TenantManager {
    strategy: Arc<SchemaPerTenantStrategy>,
    runner: MigrationRunner,
    seeders: Vec<Arc<dyn TenantSeeder>>,
    publisher: Arc<EventPublisher>,
    control: Option<Arc<dyn ControlStore>>,
    protector: Option<Arc<dyn PasswordProtector>>,
    context: Arc<TenantContextCell>,
}

impl TenantManager {
    /// Create a manager.
    pub fn new(
        strategy: Arc<SchemaPerTenantStrategy>,
        runner: MigrationRunner,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            strategy,
            runner,
            seeders: Vec::new(),
            publisher,
            control: None,
            protector: None,
            context: Arc::new(TenantContextCell::new()),
        }
    }

    /// Attach a control store, enabling record-backed provisioning.
    pub fn with_control_store(mut self, control: Arc<dyn ControlStore>) -> Self {
        self.control = Some(control);
        self
    }

    /// Attach a credential protector for record-backed provisioning.
    pub fn with_password_protector(mut self, protector: Arc<dyn PasswordProtector>) -> Self {
        self.protector = Some(protector);
        self
    }

    /// Use an externally owned context cell.
    pub fn with_context_cell(mut self, cell: Arc<TenantContextCell>) -> Self {
        self.context = cell;
        self
    }

    /// Register a seeder. The list stays sorted ascending by priority;
    /// equal priorities keep registration order.
    pub fn register_seeder(mut self, seeder: Arc<dyn TenantSeeder>) -> Self {
        self.seeders.push(seeder);
        self.seeders.sort_by_key(|s| s.priority());
        self
    }

    /// The manager's context cell.
    pub fn context_cell(&self) -> &Arc<TenantContextCell> {
        &self.context
    }

    /// Run startup migrations if the runner is configured for them.
    pub async fn bootstrap(&self) -> TenancyResult<Option<MigrationSummary>> {
        self.runner.run_startup().await
    }

    /// Provision a tenant: create its schema, migrate it, and seed it.
    ///
    /// Returns the schema name. Fails with [`TenancyError::AlreadyExists`]
    /// when the tenant is already provisioned.
    pub async fn provision(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.strategy.provision(id).await?;
        self.runner.migrate_one(id).await?;
        self.run_seeders(id, &schema).await?;

        self.publisher.publish(TenancyEvent::created(id)).await;
        Ok(schema)
    }

    /// Provision a tenant with a control-store record.
    ///
    /// Creates a Pending record, provisions and migrates the schema, seeds
    /// it, then flips the record to Active. The record write and the schema
    /// DDL are different resources with no shared transaction: on any
    /// failure after the record exists, the record is deleted best-effort
    /// and the original error re-raised. A crash inside that window leaves a
    /// Pending record for [`reconcile_pending`](Self::reconcile_pending) to
    /// sweep.
    pub async fn provision_with_record(
        &self,
        request: ProvisionRequest,
    ) -> TenancyResult<TenantRecord> {
        let control = self.control.as_ref().ok_or_else(|| {
            TenancyError::Configuration("control store not configured".to_string())
        })?;

        let record_id = Uuid::new_v4();
        let id = TenantId::Uuid(record_id);
        let schema = self.strategy.namer().generate(&id)?;

        let mut record = TenantRecord::new(&request.slug, &schema).with_id(record_id);
        record.database = request.database;
        record.server = request.server;
        record.db_user = request.db_user;

        if let Some(password) = &request.password {
            let protector = self.protector.as_ref().ok_or_else(|| {
                TenancyError::Configuration(
                    "password protector required to store credentials".to_string(),
                )
            })?;
            record.encrypted_password = Some(protector.protect(password).await?);
        }
        if let Some(api_key) = &request.api_key {
            record.api_key_hash = Some(hash_api_key(api_key));
        }

        info!(tenant = %id, slug = %record.slug, "Creating control record");
        control.create(&record).await?;

        let provisioned: TenancyResult<()> = async {
            self.strategy.provision(&id).await?;
            self.runner.migrate_one(&id).await?;
            self.run_seeders(&id, &schema).await?;
            Ok(())
        }
        .await;

        match provisioned {
            Ok(()) => {
                control.update_status(record.id, TenantStatus::Active).await?;
                record.status = TenantStatus::Active;
                record.updated_at = Utc::now();

                self.publisher.publish(TenancyEvent::created(&id)).await;
                Ok(record)
            }
            Err(e) => {
                warn!(tenant = %id, "Provisioning failed, deleting control record: {}", e);
                if let Err(compensation) = control.delete(record.id).await {
                    error!(
                        tenant = %id,
                        "Compensating delete failed: {}",
                        compensation
                    );
                    return Err(TenancyError::ControlStoreInconsistency(format!(
                        "provisioning failed ({}) and the control record for '{}' could not \
                         be removed: {}",
                        e, record.slug, compensation
                    )));
                }
                Err(e)
            }
        }
    }

    /// Delete a tenant's schema (hard or soft) and publish the event.
    pub async fn delete(&self, id: &TenantId, hard: bool) -> TenancyResult<()> {
        self.strategy.delete(id, hard).await?;
        self.publisher.publish(TenancyEvent::deleted(id, hard)).await;
        Ok(())
    }

    /// Archive a tenant's schema and publish the event.
    pub async fn archive(&self, id: &TenantId) -> TenancyResult<String> {
        let archived = self.strategy.archive(id).await?;
        self.publisher.publish(TenancyEvent::archived(id)).await;
        Ok(archived)
    }

    /// Restore a tenant's schema from its archive and publish the event.
    pub async fn restore(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.strategy.restore(id).await?;
        self.publisher.publish(TenancyEvent::restored(id)).await;
        Ok(schema)
    }

    /// Whether the tenant's schema exists.
    pub async fn exists(&self, id: &TenantId) -> TenancyResult<bool> {
        self.strategy.exists(id).await
    }

    /// Enumerate provisioned tenants.
    pub async fn enumerate(&self) -> TenancyResult<Vec<TenantId>> {
        self.strategy.enumerate().await
    }

    /// Apply pending migrations to one tenant.
    pub async fn migrate_tenant(&self, id: &TenantId) -> TenancyResult<usize> {
        self.runner.migrate_one(id).await
    }

    /// Apply pending migrations to all tenants.
    pub async fn migrate_all_tenants(&self) -> TenancyResult<MigrationSummary> {
        self.runner.migrate_all().await
    }

    /// Apply pending migrations to all tenants with a cancellation signal.
    pub async fn migrate_all_tenants_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> TenancyResult<MigrationSummary> {
        self.runner.migrate_all_with_cancel(cancel).await
    }

    /// Sweep stale Pending control records whose schema never materialized.
    ///
    /// Covers the crash window of
    /// [`provision_with_record`](Self::provision_with_record): a record
    /// created but never activated, older than `older_than`, with no schema
    /// behind it, is deleted. Returns the IDs of swept records.
    pub async fn reconcile_pending(&self, older_than: Duration) -> TenancyResult<Vec<Uuid>> {
        let control = self.control.as_ref().ok_or_else(|| {
            TenancyError::Configuration("control store not configured".to_string())
        })?;

        let max_age = ChronoDuration::from_std(older_than)
            .map_err(|e| TenancyError::Configuration(e.to_string()))?;
        let cutoff = Utc::now() - max_age;

        let mut swept = Vec::new();
        for record in control.list().await? {
            if record.status != TenantStatus::Pending || record.created_at >= cutoff {
                continue;
            }

            let id = TenantId::Uuid(record.id);
            if self.strategy.exists(&id).await? {
                // Schema exists but activation never happened; leave the
                // record for an operator to inspect.
                warn!(tenant = %id, slug = %record.slug, "Stale Pending record has a live schema");
                continue;
            }

            info!(tenant = %id, slug = %record.slug, "Sweeping orphaned Pending record");
            control.delete(record.id).await?;
            swept.push(record.id);
        }

        Ok(swept)
    }

    /// Run all seeders inside a scope bound to the new tenant.
    async fn run_seeders(&self, id: &TenantId, schema: &str) -> TenancyResult<()> {
        if self.seeders.is_empty() {
            return Ok(());
        }

        let context = TenantContext::new(id.clone()).with_schema(schema);
        let _scope = crate::context::TenantScope::enter(&self.context, context.clone());

        for seeder in &self.seeders {
            debug!(tenant = %id, seeder = seeder.name(), "Running seeder");
            seeder.seed(&context).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHandlerError, TenancyEventHandler, TenancyEventKind};
    use crate::migration::{InMemoryMigrationBackend, SqlMigration};
    use crate::naming::{SchemaNamer, SchemaNamingOptions};
    use crate::schema::{InMemorySchemaOps, SchemaOps};
    use crate::store::InMemoryControlStore;
    use parking_lot::Mutex;

    struct Fixture {
        ops: Arc<InMemorySchemaOps>,
        backend: Arc<InMemoryMigrationBackend>,
        store: Arc<InMemoryControlStore>,
        publisher: Arc<EventPublisher>,
        events: Arc<Mutex<Vec<TenancyEventKind>>>,
    }

    struct RecordingHandler {
        events: Arc<Mutex<Vec<TenancyEventKind>>>,
    }

    #[async_trait]
    impl TenancyEventHandler for RecordingHandler {
        async fn handle(&self, event: &TenancyEvent) -> Result<(), EventHandlerError> {
            self.events.lock().push(event.kind.clone());
            Ok(())
        }
    }

    fn fixture() -> (TenantManager, Fixture) {
        let ops = Arc::new(InMemorySchemaOps::new());
        let backend = Arc::new(InMemoryMigrationBackend::new());
        let store = Arc::new(InMemoryControlStore::new());
        let publisher = Arc::new(EventPublisher::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        publisher.subscribe(Arc::new(RecordingHandler {
            events: events.clone(),
        }));

        let strategy = Arc::new(SchemaPerTenantStrategy::new(
            ops.clone(),
            Arc::new(SchemaNamer::new(SchemaNamingOptions::default())),
        ));
        let runner = MigrationRunner::new(backend.clone(), strategy.clone(), publisher.clone())
            .register(Arc::new(SqlMigration::new(
                "0001",
                "create_users",
                "CREATE TABLE users (id uuid PRIMARY KEY)",
            )));

        let manager = TenantManager::new(strategy, runner, publisher.clone())
            .with_control_store(store.clone());

        (
            manager,
            Fixture {
                ops,
                backend,
                store,
                publisher,
                events,
            },
        )
    }

    fn kinds(fixture: &Fixture) -> Vec<TenancyEventKind> {
        fixture.events.lock().clone()
    }

    struct OrderedSeeder {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl TenantSeeder for OrderedSeeder {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn seed(&self, context: &TenantContext) -> TenancyResult<()> {
            if self.fail {
                return Err(TenancyError::Storage("seed failed".to_string()));
            }
            self.log
                .lock()
                .push(format!("{}:{}", self.name, context.id()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_provision_migrates_and_publishes() {
        let (manager, fx) = fixture();
        let id = TenantId::from("acme");

        let schema = manager.provision(&id).await.unwrap();
        assert_eq!(schema, "tenant_acme");
        assert!(manager.exists(&id).await.unwrap());
        assert_eq!(
            fx.backend.applied("tenant_acme", "__migrations_history"),
            vec!["0001"]
        );
        assert_eq!(
            kinds(&fx),
            vec![
                TenancyEventKind::MigrationApplied {
                    version: "0001".to_string()
                },
                TenancyEventKind::Created
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_twice_fails() {
        let (manager, _fx) = fixture();
        let id = TenantId::from("acme");

        manager.provision(&id).await.unwrap();
        let err = manager.provision(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_seeders_run_in_priority_order_inside_scope() {
        let (manager, _fx) = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));

        let manager = manager
            .register_seeder(Arc::new(OrderedSeeder {
                name: "documents",
                priority: 10,
                log: log.clone(),
                fail: false,
            }))
            .register_seeder(Arc::new(OrderedSeeder {
                name: "users",
                priority: 1,
                log: log.clone(),
                fail: false,
            }));

        manager.provision(&TenantId::from("acme")).await.unwrap();

        assert_eq!(*log.lock(), vec!["users:acme", "documents:acme"]);
        // Scope restored after seeding.
        assert!(!manager.context_cell().has_tenant());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (manager, fx) = fixture();
        let id = TenantId::from("acme");

        manager.provision(&id).await.unwrap();
        manager.archive(&id).await.unwrap();
        manager.restore(&id).await.unwrap();
        manager.delete(&id, true).await.unwrap();

        let observed = kinds(&fx);
        assert!(observed.contains(&TenancyEventKind::Archived));
        assert!(observed.contains(&TenancyEventKind::Restored));
        assert!(observed.contains(&TenancyEventKind::Deleted { hard: true }));
    }

    #[tokio::test]
    async fn test_provision_with_record_activates() {
        let (manager, fx) = fixture();

        let record = manager
            .provision_with_record(
                ProvisionRequest::new("acme").with_api_key("sk-secret-key"),
            )
            .await
            .unwrap();

        assert_eq!(record.status, TenantStatus::Active);
        assert!(record.api_key_hash.is_some());
        assert!(!record.api_key_hash.as_deref().unwrap().contains("sk-secret-key"));

        let stored = fx.store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TenantStatus::Active);
        assert_eq!(stored.schema_name, record.schema_name);
        assert!(fx.ops.schema_exists(&record.schema_name).await.unwrap());
    }

    #[tokio::test]
    async fn test_provision_with_record_compensates_on_failure() {
        let (manager, fx) = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager.register_seeder(Arc::new(OrderedSeeder {
            name: "broken",
            priority: 0,
            log,
            fail: true,
        }));

        let err = manager
            .provision_with_record(ProvisionRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Storage(_)));

        // The Pending record was compensated away.
        assert!(fx.store.get_by_slug("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_with_record_requires_protector_for_password() {
        let (manager, _fx) = fixture();

        let err = manager
            .provision_with_record(ProvisionRequest::new("acme").with_password("hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_provision_without_control_store_fails() {
        let (manager, _fx) = fixture();
        let manager = TenantManager::new(
            manager.strategy.clone(),
            manager.runner.clone(),
            manager.publisher.clone(),
        );

        let err = manager
            .provision_with_record(ProvisionRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_reconcile_pending_sweeps_orphans() {
        let (manager, fx) = fixture();

        // An orphaned Pending record with no schema behind it.
        let mut orphan = TenantRecord::new("orphan", "tenant_orphan");
        orphan.created_at = Utc::now() - ChronoDuration::hours(2);
        fx.store.create(&orphan).await.unwrap();

        // A fresh Pending record that must be left alone.
        fx.store
            .create(&TenantRecord::new("fresh", "tenant_fresh"))
            .await
            .unwrap();

        let swept = manager
            .reconcile_pending(Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(swept, vec![orphan.id]);
        assert!(fx.store.get_by_slug("orphan").await.unwrap().is_none());
        assert!(fx.store.get_by_slug("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_pending_with_live_schema() {
        let (manager, fx) = fixture();

        let mut stuck = TenantRecord::new("stuck", "tenant_stuck");
        stuck.created_at = Utc::now() - ChronoDuration::hours(2);
        let stuck_id = TenantId::Uuid(stuck.id);
        stuck.schema_name = manager.strategy.namer().generate(&stuck_id).unwrap();
        fx.store.create(&stuck).await.unwrap();
        fx.ops.create_schema(&stuck.schema_name).await.unwrap();

        let swept = manager
            .reconcile_pending(Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(swept.is_empty());
        assert!(fx.store.get_by_slug("stuck").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migrate_delegation() {
        let (manager, fx) = fixture();
        manager.provision(&TenantId::from("acme")).await.unwrap();
        manager.provision(&TenantId::from("globex")).await.unwrap();

        let summary = manager.migrate_all_tenants().await.unwrap();
        assert_eq!(summary.succeeded.len(), 2);
        assert!(fx.publisher.handler_count() > 0);
    }
}
