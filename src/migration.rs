//! Structural migrations across tenant schemas.
//!
//! The runner applies pending migrations to one tenant's schema
//! ([`MigrationRunner::migrate_one`]) or to every provisioned tenant under a
//! bounded worker pool ([`MigrationRunner::migrate_all`]), with a
//! configurable failure-containment policy, optional per-tenant retry and
//! timeout, and cooperative cancellation.
//!
//! Applied versions are recorded in a schema-local history table. The table
//! name is configurable per logical data-owner so independent owners sharing
//! one schema each keep their own history and never see the others'
//! migrations as unknown.

use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};
use crate::events::{EventPublisher, TenancyEvent};
use crate::isolation::SchemaPerTenantStrategy;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One versioned structural change.
pub trait SchemaMigration: Send + Sync {
    /// Version string; migrations apply in ascending version order.
    fn version(&self) -> &str;

    /// Human-readable migration name.
    fn name(&self) -> &str;

    /// The DDL to execute inside the target schema.
    fn up_sql(&self) -> &str;
}

/// A migration defined by a SQL string.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: String,
    name: String,
    sql: String,
}

impl SqlMigration {
    /// Create a migration.
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            sql: sql.into(),
        }
    }
}

impl SchemaMigration for SqlMigration {
    fn version(&self) -> &str {
        &self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up_sql(&self) -> &str {
        &self.sql
    }
}

/// Executes migrations against a schema and tracks them in its history table.
///
/// Implement this trait with your database client.
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    /// Versions already recorded in the schema's history table.
    async fn applied_versions(
        &self,
        schema: &str,
        history_table: &str,
    ) -> TenancyResult<Vec<String>>;

    /// Execute one migration inside the schema and record it, wrapping both
    /// in a transaction when `use_transaction` is set.
    async fn apply(
        &self,
        schema: &str,
        history_table: &str,
        migration: &dyn SchemaMigration,
        use_transaction: bool,
    ) -> TenancyResult<()>;
}

/// In-memory migration backend for testing.
///
/// Records applied versions per `(schema, history_table)` pair; individual
/// schemas can be marked as failing to exercise containment policies.
#[derive(Debug, Default)]
pub struct InMemoryMigrationBackend {
    history: RwLock<HashMap<(String, String), Vec<String>>>,
    failing_schemas: RwLock<HashSet<String>>,
}

impl InMemoryMigrationBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `apply` against `schema` fail.
    pub fn fail_for(&self, schema: impl Into<String>) {
        self.failing_schemas.write().insert(schema.into());
    }

    /// Versions applied to a schema's history table.
    pub fn applied(&self, schema: &str, history_table: &str) -> Vec<String> {
        self.history
            .read()
            .get(&(schema.to_string(), history_table.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MigrationBackend for InMemoryMigrationBackend {
    async fn applied_versions(
        &self,
        schema: &str,
        history_table: &str,
    ) -> TenancyResult<Vec<String>> {
        Ok(self.applied(schema, history_table))
    }

    async fn apply(
        &self,
        schema: &str,
        history_table: &str,
        migration: &dyn SchemaMigration,
        _use_transaction: bool,
    ) -> TenancyResult<()> {
        if self.failing_schemas.read().contains(schema) {
            return Err(TenancyError::Migration(format!(
                "injected failure for {}",
                schema
            )));
        }
        self.history
            .write()
            .entry((schema.to_string(), history_table.to_string()))
            .or_default()
            .push(migration.version().to_string());
        Ok(())
    }
}

/// What a per-tenant failure does to the rest of a [`MigrationRunner::migrate_all`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureBehavior {
    /// First failure cancels all in-flight and not-yet-started work; the
    /// overall call fails.
    #[default]
    StopAll,
    /// Every tenant is attempted; the overall call fails at the end if any
    /// tenant failed.
    ContinueOthers,
    /// Every tenant is attempted; failures are reported in the summary but
    /// the overall call succeeds.
    Skip,
}

/// Migration runner configuration.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Migrate all tenants when the application starts.
    pub apply_on_startup: bool,

    /// Maximum concurrent tenant migrations (at least 1).
    pub max_parallelism: usize,

    /// Failure-containment policy for `migrate_all`.
    pub failure_behavior: FailureBehavior,

    /// Per-tenant time limit; exceeding it fails that tenant's migration.
    pub timeout: Option<Duration>,

    /// Wrap each migration and its history record in a transaction.
    pub use_transactions: bool,

    /// History table name for this runner's logical data-owner.
    pub history_table: String,

    /// Create the tenant's schema when it is missing instead of failing.
    pub auto_create_schema: bool,

    /// Retry a failed tenant migration before applying the containment
    /// policy.
    pub retry_on_failure: bool,

    /// Number of retries after the initial attempt.
    pub retry_count: u32,

    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            apply_on_startup: false,
            max_parallelism: 4,
            failure_behavior: FailureBehavior::default(),
            timeout: None,
            use_transactions: true,
            history_table: "__migrations_history".to_string(),
            auto_create_schema: false,
            retry_on_failure: false,
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl MigrationOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Migrate all tenants on startup.
    pub fn with_apply_on_startup(mut self, apply: bool) -> Self {
        self.apply_on_startup = apply;
        self
    }

    /// Set the parallelism bound.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max;
        self
    }

    /// Set the failure-containment policy.
    pub fn with_failure_behavior(mut self, behavior: FailureBehavior) -> Self {
        self.failure_behavior = behavior;
        self
    }

    /// Set the per-tenant timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable transactions.
    pub fn with_transactions(mut self, use_transactions: bool) -> Self {
        self.use_transactions = use_transactions;
        self
    }

    /// Set the history table name.
    pub fn with_history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Create missing schemas instead of failing.
    pub fn with_auto_create_schema(mut self, auto_create: bool) -> Self {
        self.auto_create_schema = auto_create;
        self
    }

    /// Enable retries with the given count and delay.
    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_on_failure = true;
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }
}

/// Cooperative cancellation signal.
///
/// Cancelling prevents queued tenant migrations from starting and promptly
/// aborts in-flight ones at their next await point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is signalled.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-tenant outcome of a `migrate_all` run.
#[derive(Debug, Clone, Default)]
pub struct MigrationSummary {
    /// Tenants migrated successfully.
    pub succeeded: Vec<TenantId>,

    /// Tenants whose migration failed, with the failure message.
    pub failed: Vec<(TenantId, String)>,

    /// Tenants that never started because of cancellation or `StopAll`.
    pub skipped: Vec<TenantId>,
}

impl MigrationSummary {
    /// Whether any tenant failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Total number of tenants considered.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }
}

/// Applies pending migrations to tenant schemas.
#[derive(Clone)]
pub struct MigrationRunner {
    backend: Arc<dyn MigrationBackend>,
    strategy: Arc<SchemaPerTenantStrategy>,
    publisher: Arc<EventPublisher>,
    migrations: Vec<Arc<dyn SchemaMigration>>,
    options: MigrationOptions,
}

impl MigrationRunner {
    /// Create a runner with default options and no migrations.
    pub fn new(
        backend: Arc<dyn MigrationBackend>,
        strategy: Arc<SchemaPerTenantStrategy>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            backend,
            strategy,
            publisher,
            migrations: Vec::new(),
            options: MigrationOptions::default(),
        }
    }

    /// Set the options.
    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a migration.
    pub fn register(mut self, migration: Arc<dyn SchemaMigration>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// The runner's options.
    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Migrate all tenants if the runner is configured to do so on startup.
    pub async fn run_startup(&self) -> TenancyResult<Option<MigrationSummary>> {
        if !self.options.apply_on_startup {
            return Ok(None);
        }
        info!("Applying startup migrations to all tenants");
        self.migrate_all().await.map(Some)
    }

    /// Apply all pending migrations to one tenant's schema.
    ///
    /// Returns the number of migrations applied. Fails with
    /// [`TenancyError::NotFound`] when the schema is missing, unless the
    /// runner is configured to auto-create it.
    pub async fn migrate_one(&self, id: &TenantId) -> TenancyResult<usize> {
        let schema = self.strategy.namer().generate(id)?;

        if !self.strategy.ops().schema_exists(&schema).await? {
            if self.options.auto_create_schema {
                info!(tenant = %id, schema = %schema, "Creating missing schema before migration");
                self.strategy.ops().create_schema(&schema).await?;
            } else {
                return Err(TenancyError::NotFound(id.to_string()));
            }
        }

        let applied: HashSet<String> = self
            .backend
            .applied_versions(&schema, &self.options.history_table)
            .await?
            .into_iter()
            .collect();

        let mut pending: Vec<_> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(m.version()))
            .collect();
        pending.sort_by(|a, b| a.version().cmp(b.version()));

        let count = pending.len();
        for migration in pending {
            debug!(
                tenant = %id,
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );
            self.backend
                .apply(
                    &schema,
                    &self.options.history_table,
                    migration.as_ref(),
                    self.options.use_transactions,
                )
                .await
                .map_err(|e| {
                    TenancyError::Migration(format!(
                        "{} on tenant {}: {}",
                        migration.version(),
                        id,
                        e
                    ))
                })?;
            self.publisher
                .publish(TenancyEvent::migration_applied(id, migration.version()))
                .await;
        }

        Ok(count)
    }

    /// Migrate every provisioned tenant. See
    /// [`migrate_all_with_cancel`](Self::migrate_all_with_cancel).
    pub async fn migrate_all(&self) -> TenancyResult<MigrationSummary> {
        self.migrate_all_with_cancel(&CancelToken::new()).await
    }

    /// Migrate every provisioned tenant under the configured parallelism
    /// bound and failure-containment policy.
    ///
    /// Under `Skip` the call succeeds even when tenants failed; under
    /// `StopAll` and `ContinueOthers` it fails if any tenant failed. A
    /// cancelled run fails with [`TenancyError::Cancelled`].
    pub async fn migrate_all_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> TenancyResult<MigrationSummary> {
        let summary = self.try_migrate_all(cancel).await?;

        if cancel.is_cancelled() {
            return Err(TenancyError::Cancelled);
        }

        match self.options.failure_behavior {
            FailureBehavior::Skip => Ok(summary),
            FailureBehavior::StopAll | FailureBehavior::ContinueOthers => {
                if summary.has_failures() {
                    Err(TenancyError::Migration(format!(
                        "{} of {} tenant migrations failed",
                        summary.failed.len(),
                        summary.total()
                    )))
                } else {
                    Ok(summary)
                }
            }
        }
    }

    /// Migrate every provisioned tenant and report per-tenant outcomes
    /// without applying the failure-containment policy to the return value.
    pub async fn try_migrate_all(&self, cancel: &CancelToken) -> TenancyResult<MigrationSummary> {
        let ids = self.strategy.enumerate().await?;
        info!(tenants = ids.len(), "Migrating all tenants");

        let semaphore = Arc::new(Semaphore::new(self.options.max_parallelism.max(1)));
        let stop = CancelToken::new();
        let summary = Arc::new(Mutex::new(MigrationSummary::default()));
        let mut tasks = JoinSet::new();

        for id in ids {
            let runner = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let stop = stop.clone();
            let summary = summary.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() || stop.is_cancelled() {
                    summary.lock().skipped.push(id);
                    return;
                }

                let outcome = tokio::select! {
                    result = runner.migrate_with_retry(&id) => Some(result),
                    _ = cancel.cancelled() => None,
                    _ = stop.cancelled() => None,
                };

                match outcome {
                    None => summary.lock().skipped.push(id),
                    Some(Ok(applied)) => {
                        debug!(tenant = %id, applied, "Tenant migrated");
                        summary.lock().succeeded.push(id);
                    }
                    Some(Err(e)) => {
                        error!(tenant = %id, "Tenant migration failed: {}", e);
                        if runner.options.failure_behavior == FailureBehavior::StopAll {
                            stop.cancel();
                        }
                        summary.lock().failed.push((id, e.to_string()));
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Migration task panicked: {}", e);
            }
        }

        let summary = summary.lock().clone();
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Finished migrating all tenants"
        );
        Ok(summary)
    }

    /// One tenant's migration with the configured timeout and retries.
    async fn migrate_with_retry(&self, id: &TenantId) -> TenancyResult<usize> {
        let mut result = self.migrate_one_bounded(id).await;

        let retries = if self.options.retry_on_failure {
            self.options.retry_count
        } else {
            0
        };

        let mut attempt = 0;
        while result.is_err() && attempt < retries {
            attempt += 1;
            warn!(tenant = %id, attempt, "Retrying tenant migration");
            tokio::time::sleep(self.options.retry_delay).await;
            result = self.migrate_one_bounded(id).await;
        }

        result
    }

    async fn migrate_one_bounded(&self, id: &TenantId) -> TenancyResult<usize> {
        match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.migrate_one(id)).await {
                Ok(result) => result,
                Err(_) => Err(TenancyError::Timeout(limit)),
            },
            None => self.migrate_one(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{SchemaNamer, SchemaNamingOptions};
    use crate::schema::{InMemorySchemaOps, SchemaOps};
    use std::sync::atomic::AtomicU32;

    fn strategy(ops: Arc<InMemorySchemaOps>) -> Arc<SchemaPerTenantStrategy> {
        Arc::new(SchemaPerTenantStrategy::new(
            ops,
            Arc::new(SchemaNamer::new(SchemaNamingOptions::default())),
        ))
    }

    fn runner_with(
        backend: Arc<dyn MigrationBackend>,
        strategy: Arc<SchemaPerTenantStrategy>,
    ) -> MigrationRunner {
        MigrationRunner::new(backend, strategy, Arc::new(EventPublisher::new()))
            .register(Arc::new(SqlMigration::new(
                "0001",
                "create_users",
                "CREATE TABLE users (id uuid PRIMARY KEY)",
            )))
            .register(Arc::new(SqlMigration::new(
                "0002",
                "create_documents",
                "CREATE TABLE documents (id uuid PRIMARY KEY)",
            )))
    }

    #[tokio::test]
    async fn test_migrate_one_applies_pending_in_order() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let backend = Arc::new(InMemoryMigrationBackend::new());
        let strategy = strategy(ops);
        strategy.provision(&TenantId::from("acme")).await.unwrap();

        let runner = runner_with(backend.clone(), strategy);
        let applied = runner.migrate_one(&TenantId::from("acme")).await.unwrap();

        assert_eq!(applied, 2);
        assert_eq!(
            backend.applied("tenant_acme", "__migrations_history"),
            vec!["0001", "0002"]
        );
    }

    #[tokio::test]
    async fn test_migrate_one_is_incremental() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let backend = Arc::new(InMemoryMigrationBackend::new());
        let strategy = strategy(ops);
        strategy.provision(&TenantId::from("acme")).await.unwrap();

        let runner = runner_with(backend.clone(), strategy);
        runner.migrate_one(&TenantId::from("acme")).await.unwrap();

        let second = runner.migrate_one(&TenantId::from("acme")).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            backend.applied("tenant_acme", "__migrations_history").len(),
            2
        );
    }

    #[tokio::test]
    async fn test_migrate_one_missing_schema_fails() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let runner = runner_with(Arc::new(InMemoryMigrationBackend::new()), strategy(ops));

        let err = runner.migrate_one(&TenantId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_migrate_one_auto_creates_schema() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let runner = runner_with(
            Arc::new(InMemoryMigrationBackend::new()),
            strategy(ops.clone()),
        )
        .with_options(MigrationOptions::default().with_auto_create_schema(true));

        runner.migrate_one(&TenantId::from("ghost")).await.unwrap();
        assert!(ops.schema_exists("tenant_ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_separate_history_tables_per_owner() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let backend = Arc::new(InMemoryMigrationBackend::new());
        let strategy = strategy(ops);
        strategy.provision(&TenantId::from("acme")).await.unwrap();

        let primary = runner_with(backend.clone(), strategy.clone());
        let reporting = MigrationRunner::new(
            backend.clone(),
            strategy,
            Arc::new(EventPublisher::new()),
        )
        .register(Arc::new(SqlMigration::new(
            "0001",
            "create_reports",
            "CREATE TABLE reports (id uuid PRIMARY KEY)",
        )))
        .with_options(MigrationOptions::default().with_history_table("__reporting_history"));

        primary.migrate_one(&TenantId::from("acme")).await.unwrap();
        reporting.migrate_one(&TenantId::from("acme")).await.unwrap();

        assert_eq!(
            backend.applied("tenant_acme", "__migrations_history").len(),
            2
        );
        assert_eq!(
            backend.applied("tenant_acme", "__reporting_history"),
            vec!["0001"]
        );
    }

    async fn three_tenants_one_failing() -> (MigrationRunner, Arc<InMemoryMigrationBackend>) {
        let ops = Arc::new(InMemorySchemaOps::new());
        let backend = Arc::new(InMemoryMigrationBackend::new());
        let strategy = strategy(ops);

        for slug in ["alpha", "beta", "gamma"] {
            strategy.provision(&TenantId::from(slug)).await.unwrap();
        }
        backend.fail_for("tenant_beta");

        (runner_with(backend.clone(), strategy), backend)
    }

    #[tokio::test]
    async fn test_continue_others_attempts_every_tenant() {
        let (runner, backend) = three_tenants_one_failing().await;
        let runner = runner.with_options(
            MigrationOptions::default().with_failure_behavior(FailureBehavior::ContinueOthers),
        );

        let summary = runner.try_migrate_all(&CancelToken::new()).await.unwrap();

        let mut succeeded: Vec<_> = summary.succeeded.iter().map(|id| id.to_string()).collect();
        succeeded.sort();
        assert_eq!(succeeded, vec!["alpha", "gamma"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, TenantId::from("beta"));
        assert!(summary.skipped.is_empty());

        // Alpha and gamma really were migrated.
        assert_eq!(
            backend.applied("tenant_alpha", "__migrations_history").len(),
            2
        );
        assert_eq!(
            backend.applied("tenant_gamma", "__migrations_history").len(),
            2
        );

        // The overall call still reports failure.
        let err = runner.migrate_all().await.unwrap_err();
        assert!(matches!(err, TenancyError::Migration(_)));
    }

    #[tokio::test]
    async fn test_skip_succeeds_with_failures_reported() {
        let (runner, _backend) = three_tenants_one_failing().await;
        let runner = runner.with_options(
            MigrationOptions::default().with_failure_behavior(FailureBehavior::Skip),
        );

        let summary = runner.migrate_all().await.unwrap();
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_all_short_circuits() {
        let (runner, _backend) = three_tenants_one_failing().await;
        let runner = runner.with_options(
            MigrationOptions::default()
                .with_failure_behavior(FailureBehavior::StopAll)
                .with_max_parallelism(1),
        );

        let summary = runner.try_migrate_all(&CancelToken::new()).await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.succeeded.len() + summary.skipped.len(), 2);

        let err = runner.migrate_all().await.unwrap_err();
        assert!(matches!(err, TenancyError::Migration(_)));
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_and_skips() {
        let (runner, _backend) = three_tenants_one_failing().await;
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = runner.try_migrate_all(&cancel).await.unwrap();
        assert_eq!(summary.skipped.len(), 3);
        assert!(summary.succeeded.is_empty());

        let err = runner.migrate_all_with_cancel(&cancel).await.unwrap_err();
        assert!(matches!(err, TenancyError::Cancelled));
    }

    struct FlakyBackend {
        failures_left: AtomicU32,
        inner: InMemoryMigrationBackend,
    }

    #[async_trait]
    impl MigrationBackend for FlakyBackend {
        async fn applied_versions(
            &self,
            schema: &str,
            history_table: &str,
        ) -> TenancyResult<Vec<String>> {
            self.inner.applied_versions(schema, history_table).await
        }

        async fn apply(
            &self,
            schema: &str,
            history_table: &str,
            migration: &dyn SchemaMigration,
            use_transaction: bool,
        ) -> TenancyResult<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TenancyError::Migration("transient".to_string()));
            }
            self.inner
                .apply(schema, history_table, migration, use_transaction)
                .await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failures() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let strategy = strategy(ops);
        strategy.provision(&TenantId::from("acme")).await.unwrap();

        let backend = Arc::new(FlakyBackend {
            failures_left: AtomicU32::new(2),
            inner: InMemoryMigrationBackend::new(),
        });

        let runner = runner_with(backend, strategy).with_options(
            MigrationOptions::default()
                .with_failure_behavior(FailureBehavior::ContinueOthers)
                .with_retry(3, Duration::from_millis(1)),
        );

        let summary = runner.migrate_all().await.unwrap();
        assert_eq!(summary.succeeded, vec![TenantId::from("acme")]);
    }

    struct SlowBackend;

    #[async_trait]
    impl MigrationBackend for SlowBackend {
        async fn applied_versions(
            &self,
            _schema: &str,
            _history_table: &str,
        ) -> TenancyResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn apply(
            &self,
            _schema: &str,
            _history_table: &str,
            _migration: &dyn SchemaMigration,
            _use_transaction: bool,
        ) -> TenancyResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_per_tenant_timeout_is_contained() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let strategy = strategy(ops);
        strategy.provision(&TenantId::from("acme")).await.unwrap();

        let runner = runner_with(Arc::new(SlowBackend), strategy).with_options(
            MigrationOptions::default()
                .with_failure_behavior(FailureBehavior::Skip)
                .with_timeout(Duration::from_millis(10)),
        );

        let summary = runner.migrate_all().await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].1.contains("timed out"));
    }

    struct GaugedBackend {
        active: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl MigrationBackend for GaugedBackend {
        async fn applied_versions(
            &self,
            _schema: &str,
            _history_table: &str,
        ) -> TenancyResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn apply(
            &self,
            _schema: &str,
            _history_table: &str,
            _migration: &dyn SchemaMigration,
            _use_transaction: bool,
        ) -> TenancyResult<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let strategy = strategy(ops);
        for i in 0..8 {
            strategy
                .provision(&TenantId::from(format!("t{}", i).as_str()))
                .await
                .unwrap();
        }

        let backend = Arc::new(GaugedBackend {
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        });

        let runner = MigrationRunner::new(
            backend.clone(),
            strategy,
            Arc::new(EventPublisher::new()),
        )
        .register(Arc::new(SqlMigration::new("0001", "noop", "SELECT 1")))
        .with_options(MigrationOptions::default().with_max_parallelism(2));

        runner.migrate_all().await.unwrap();
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    }
}
