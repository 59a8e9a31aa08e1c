//! Schema-per-tenant isolation strategy.
//!
//! Lifecycle operations over one tenant's schema: provision, archive,
//! restore, soft/hard delete, and enumeration. Illegal transitions
//! (provisioning an existing tenant, archiving a missing one) fail
//! explicitly; this layer never retries.

use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};
use crate::naming::SchemaNamer;
use crate::schema::SchemaOps;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Schema-per-tenant lifecycle operations.
pub struct SchemaPerTenantStrategy {
    ops: Arc<dyn SchemaOps>,
    namer: Arc<SchemaNamer>,
}

impl SchemaPerTenantStrategy {
    /// Create a strategy over a schema capability and naming policy.
    pub fn new(ops: Arc<dyn SchemaOps>, namer: Arc<SchemaNamer>) -> Self {
        Self { ops, namer }
    }

    /// The naming policy.
    pub fn namer(&self) -> &Arc<SchemaNamer> {
        &self.namer
    }

    /// The schema capability.
    pub fn ops(&self) -> &Arc<dyn SchemaOps> {
        &self.ops
    }

    /// Create the tenant's schema. Fails with
    /// [`TenancyError::AlreadyExists`] if it is already provisioned.
    ///
    /// Concurrent callers race at the database level: the loser gets the
    /// already-exists error from [`SchemaOps::create_schema`].
    pub async fn provision(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.namer.generate(id)?;
        info!(tenant = %id, schema = %schema, "Provisioning tenant schema");

        if self.ops.schema_exists(&schema).await? {
            return Err(TenancyError::AlreadyExists(id.to_string()));
        }
        self.ops.create_schema(&schema).await?;

        info!(tenant = %id, schema = %schema, "Tenant schema provisioned");
        Ok(schema)
    }

    /// Whether the tenant's schema exists.
    pub async fn exists(&self, id: &TenantId) -> TenancyResult<bool> {
        let schema = self.namer.generate(id)?;
        self.ops.schema_exists(&schema).await
    }

    /// Rename the tenant's schema to its fixed archived name.
    ///
    /// Fails with [`TenancyError::NotFound`] if the schema is absent and with
    /// [`TenancyError::AlreadyExists`] if the archived name is taken (i.e.
    /// the tenant was archived before without being restored).
    pub async fn archive(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.namer.generate(id)?;
        let archived = self.namer.archived_name(&schema);
        info!(tenant = %id, schema = %schema, "Archiving tenant schema");

        if !self.ops.schema_exists(&schema).await? {
            return Err(TenancyError::NotFound(id.to_string()));
        }
        if self.ops.schema_exists(&archived).await? {
            return Err(TenancyError::AlreadyExists(archived));
        }
        self.ops.rename_schema(&schema, &archived).await?;

        info!(tenant = %id, archived = %archived, "Tenant schema archived");
        Ok(archived)
    }

    /// Rename the tenant's archived schema back to its live name.
    ///
    /// Fails with [`TenancyError::NotFound`] if no archived schema exists.
    pub async fn restore(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.namer.generate(id)?;
        let archived = self.namer.archived_name(&schema);
        info!(tenant = %id, archived = %archived, "Restoring tenant schema");

        if !self.ops.schema_exists(&archived).await? {
            return Err(TenancyError::NotFound(id.to_string()));
        }
        self.ops.rename_schema(&archived, &schema).await?;

        info!(tenant = %id, schema = %schema, "Tenant schema restored");
        Ok(schema)
    }

    /// Delete the tenant's schema.
    ///
    /// Hard delete drops the schema with everything in it — irreversible.
    /// Soft delete renames it to a timestamped archive name; repeated soft
    /// deletes never collide. Fails with [`TenancyError::NotFound`] if the
    /// schema is absent.
    pub async fn delete(&self, id: &TenantId, hard: bool) -> TenancyResult<()> {
        let schema = self.namer.generate(id)?;
        info!(tenant = %id, schema = %schema, hard, "Deleting tenant schema");

        if !self.ops.schema_exists(&schema).await? {
            return Err(TenancyError::NotFound(id.to_string()));
        }

        if hard {
            self.ops.drop_schema(&schema).await?;
        } else {
            let target = self.namer.soft_delete_name(&schema, Utc::now());
            self.ops.rename_schema(&schema, &target).await?;
        }

        info!(tenant = %id, schema = %schema, hard, "Tenant schema deleted");
        Ok(())
    }

    /// Point the operations connection at the tenant's schema.
    ///
    /// Fails with [`TenancyError::NotFound`] if the schema is absent, so an
    /// unprovisioned tenant surfaces here instead of as a raw database error
    /// on the first query.
    pub async fn set_search_path(&self, id: &TenantId) -> TenancyResult<String> {
        let schema = self.namer.generate(id)?;
        if !self.ops.schema_exists(&schema).await? {
            return Err(TenancyError::NotFound(id.to_string()));
        }
        self.ops.set_search_path(&schema).await?;
        Ok(schema)
    }

    /// Enumerate provisioned tenants by listing schemas with the tenant
    /// prefix and mapping them back through the naming policy.
    ///
    /// The mapping is lossy: identifiers are recovered from sanitized schema
    /// names, so `Acme-Corp` enumerates as `acme_corp`.
    pub async fn enumerate(&self) -> TenancyResult<Vec<TenantId>> {
        let prefix = &self.namer.options().schema_prefix;
        let schemas = self.ops.list_schemas(prefix).await?;

        Ok(schemas
            .iter()
            .filter_map(|schema| TenantId::parse(&self.namer.extract_id(schema)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::SchemaNamingOptions;
    use crate::schema::InMemorySchemaOps;

    fn strategy() -> SchemaPerTenantStrategy {
        SchemaPerTenantStrategy::new(
            Arc::new(InMemorySchemaOps::new()),
            Arc::new(SchemaNamer::new(SchemaNamingOptions::default())),
        )
    }

    #[tokio::test]
    async fn test_provision_then_exists() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        assert!(!strategy.exists(&id).await.unwrap());
        let schema = strategy.provision(&id).await.unwrap();
        assert_eq!(schema, "tenant_acme");
        assert!(strategy.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_provision_twice_fails() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        let err = strategy.provision(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_hard_delete_round_trip() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        strategy.delete(&id, true).await.unwrap();
        assert!(!strategy.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_fails() {
        let strategy = strategy();
        let err = strategy
            .delete(&TenantId::from("ghost"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_renames_with_timestamp() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let strategy = SchemaPerTenantStrategy::new(
            ops.clone(),
            Arc::new(SchemaNamer::new(SchemaNamingOptions::default())),
        );
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        strategy.delete(&id, false).await.unwrap();

        assert!(!strategy.exists(&id).await.unwrap());
        let archived = ops.list_schemas("zzz_archived_tenant_acme_").await.unwrap();
        assert_eq!(archived.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_restore_round_trip() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        let archived = strategy.archive(&id).await.unwrap();
        assert_eq!(archived, "zzz_archived_tenant_acme");
        assert!(!strategy.exists(&id).await.unwrap());

        strategy.restore(&id).await.unwrap();
        assert!(strategy.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_archive_twice_without_restore_fails() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        strategy.archive(&id).await.unwrap();

        // The live schema is gone.
        let err = strategy.archive(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));

        // Re-provision, then archive again: the fixed archived name is taken.
        strategy.provision(&id).await.unwrap();
        let err = strategy.archive(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_restore_without_archive_fails() {
        let strategy = strategy();
        let id = TenantId::from("acme");

        strategy.provision(&id).await.unwrap();
        let err = strategy.restore(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_search_path() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let strategy = SchemaPerTenantStrategy::new(
            ops.clone(),
            Arc::new(SchemaNamer::new(SchemaNamingOptions::default())),
        );
        let id = TenantId::from("acme");

        let err = strategy.set_search_path(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));

        strategy.provision(&id).await.unwrap();
        strategy.set_search_path(&id).await.unwrap();
        assert_eq!(ops.current_search_path(), "tenant_acme");
    }

    #[tokio::test]
    async fn test_enumerate() {
        let strategy = strategy();
        strategy.provision(&TenantId::from("acme")).await.unwrap();
        strategy.provision(&TenantId::from("globex")).await.unwrap();
        strategy.provision(&TenantId::from(42)).await.unwrap();

        let mut ids = strategy.enumerate().await.unwrap();
        ids.sort_by_key(|id| id.to_string());
        assert_eq!(
            ids,
            vec![
                TenantId::Int(42),
                TenantId::from("acme"),
                TenantId::from("globex")
            ]
        );
    }

    #[tokio::test]
    async fn test_enumerate_skips_archived() {
        let strategy = strategy();
        strategy.provision(&TenantId::from("acme")).await.unwrap();
        strategy.provision(&TenantId::from("globex")).await.unwrap();
        strategy.archive(&TenantId::from("globex")).await.unwrap();

        let ids = strategy.enumerate().await.unwrap();
        assert_eq!(ids, vec![TenantId::from("acme")]);
    }
}
