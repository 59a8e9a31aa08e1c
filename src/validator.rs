//! Tenant validation.
//!
//! A validator answers "does this identifier correspond to a real, usable
//! tenant". Validators are stateless; the pipeline caches their results with
//! a TTL (see [`crate::pipeline::ValidationCache`]).

use crate::context::TenantId;
use crate::error::TenancyResult;
use crate::naming::SchemaNamer;
use crate::schema::SchemaOps;
use crate::store::{ControlStore, TenantStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Pluggable tenant validation capability.
#[async_trait]
pub trait TenantValidator: Send + Sync {
    /// Check whether the identifier names a usable tenant.
    async fn validate(&self, id: &TenantId) -> TenancyResult<bool>;
}

/// Validates that the tenant's schema exists, and — when a control store is
/// configured — that its status is Active. Both checks must pass.
pub struct SchemaExistsValidator {
    ops: Arc<dyn SchemaOps>,
    namer: Arc<SchemaNamer>,
    control: Option<Arc<dyn ControlStore>>,
}

impl SchemaExistsValidator {
    /// Validate against the schema catalog only.
    pub fn new(ops: Arc<dyn SchemaOps>, namer: Arc<SchemaNamer>) -> Self {
        Self {
            ops,
            namer,
            control: None,
        }
    }

    /// Additionally require an Active control-store record.
    pub fn with_control_store(mut self, control: Arc<dyn ControlStore>) -> Self {
        self.control = Some(control);
        self
    }
}

#[async_trait]
impl TenantValidator for SchemaExistsValidator {
    async fn validate(&self, id: &TenantId) -> TenancyResult<bool> {
        // An identifier the naming policy rejects can never be a usable tenant.
        let schema = match self.namer.generate(id) {
            Ok(schema) => schema,
            Err(_) => return Ok(false),
        };

        if !self.ops.schema_exists(&schema).await? {
            return Ok(false);
        }

        if let Some(control) = &self.control {
            let record = match id.as_uuid() {
                Some(uuid) => control.get(uuid).await?,
                None => control.get_by_slug(&id.to_string()).await?,
            };
            return Ok(record.is_some_and(|r| r.status == TenantStatus::Active));
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::SchemaNamingOptions;
    use crate::schema::InMemorySchemaOps;
    use crate::store::{InMemoryControlStore, TenantRecord};

    fn namer() -> Arc<SchemaNamer> {
        Arc::new(SchemaNamer::new(SchemaNamingOptions::default()))
    }

    #[tokio::test]
    async fn test_schema_existence_check() {
        let ops = Arc::new(InMemorySchemaOps::new());
        ops.create_schema("tenant_acme").await.unwrap();

        let validator = SchemaExistsValidator::new(ops, namer());

        assert!(validator.validate(&TenantId::from("acme")).await.unwrap());
        assert!(!validator.validate(&TenantId::from("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_control_store_status_required() {
        let ops = Arc::new(InMemorySchemaOps::new());
        let store = Arc::new(InMemoryControlStore::new());

        let record = TenantRecord::new("acme", "tenant_acme");
        let id = TenantId::Uuid(record.id);
        store.create(&record).await.unwrap();

        let schema = namer().generate(&id).unwrap();
        ops.create_schema(&schema).await.unwrap();

        let validator =
            SchemaExistsValidator::new(ops, namer()).with_control_store(store.clone());

        // Schema exists but the record is still Pending.
        assert!(!validator.validate(&id).await.unwrap());

        store
            .update_status(record.id, TenantStatus::Active)
            .await
            .unwrap();
        assert!(validator.validate(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_record_fails_validation() {
        let ops = Arc::new(InMemorySchemaOps::new());
        ops.create_schema("tenant_acme").await.unwrap();

        let store = Arc::new(InMemoryControlStore::new());
        let validator = SchemaExistsValidator::new(ops, namer()).with_control_store(store);

        assert!(!validator.validate(&TenantId::from("acme")).await.unwrap());
    }
}
