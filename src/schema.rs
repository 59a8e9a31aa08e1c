//! Raw schema DDL operations.
//!
//! [`SchemaOps`] is the leaf capability everything else is built on:
//! create/drop/rename schemas, existence checks, prefix listing, and
//! search-path selection. It carries no policy; implementors bind their own
//! connection pool.
//!
//! # Usage
//!
//! ```rust,ignore
//! struct PgSchemaOps {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl SchemaOps for PgSchemaOps {
//!     async fn create_schema(&self, name: &str) -> TenancyResult<()> {
//!         sqlx::query(&format!("CREATE SCHEMA \"{}\"", name))
//!             .execute(&self.pool)
//!             .await
//!             .map_err(|e| TenancyError::Storage(e.to_string()))?;
//!         Ok(())
//!     }
//!
//!     // ... implement other methods
//! }
//! ```

use crate::error::{TenancyError, TenancyResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Raw schema DDL capability.
///
/// Implement this trait with your database client. Error semantics mirror
/// PostgreSQL: creating an existing schema, dropping a missing one, or
/// renaming onto an existing name are errors, so racing callers surface
/// conflicts instead of corrupting state.
#[async_trait]
pub trait SchemaOps: Send + Sync {
    /// Create a schema. Fails if it already exists.
    async fn create_schema(&self, name: &str) -> TenancyResult<()>;

    /// Drop a schema and everything in it. Fails if it does not exist.
    async fn drop_schema(&self, name: &str) -> TenancyResult<()>;

    /// Rename a schema. Fails if the source is missing or the target exists.
    async fn rename_schema(&self, from: &str, to: &str) -> TenancyResult<()>;

    /// Check whether a schema exists.
    async fn schema_exists(&self, name: &str) -> TenancyResult<bool>;

    /// List schemas whose names start with `prefix`.
    async fn list_schemas(&self, prefix: &str) -> TenancyResult<Vec<String>>;

    /// Set the search path of the operations connection.
    async fn set_search_path(&self, schema: &str) -> TenancyResult<()>;
}

/// In-memory schema catalog for testing.
#[derive(Debug, Default)]
pub struct InMemorySchemaOps {
    schemas: RwLock<BTreeSet<String>>,
    search_path: RwLock<String>,
}

impl InMemorySchemaOps {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(BTreeSet::new()),
            search_path: RwLock::new("public".to_string()),
        }
    }

    /// The currently selected search path.
    pub fn current_search_path(&self) -> String {
        self.search_path.read().clone()
    }

    /// All schema names, ordered.
    pub fn all_schemas(&self) -> Vec<String> {
        self.schemas.read().iter().cloned().collect()
    }
}

#[async_trait]
impl SchemaOps for InMemorySchemaOps {
    async fn create_schema(&self, name: &str) -> TenancyResult<()> {
        let mut schemas = self.schemas.write();
        if !schemas.insert(name.to_string()) {
            return Err(TenancyError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn drop_schema(&self, name: &str) -> TenancyResult<()> {
        let mut schemas = self.schemas.write();
        if !schemas.remove(name) {
            return Err(TenancyError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn rename_schema(&self, from: &str, to: &str) -> TenancyResult<()> {
        let mut schemas = self.schemas.write();
        if !schemas.contains(from) {
            return Err(TenancyError::NotFound(from.to_string()));
        }
        if schemas.contains(to) {
            return Err(TenancyError::AlreadyExists(to.to_string()));
        }
        schemas.remove(from);
        schemas.insert(to.to_string());
        Ok(())
    }

    async fn schema_exists(&self, name: &str) -> TenancyResult<bool> {
        Ok(self.schemas.read().contains(name))
    }

    async fn list_schemas(&self, prefix: &str) -> TenancyResult<Vec<String>> {
        Ok(self
            .schemas
            .read()
            .iter()
            .filter(|s| s.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn set_search_path(&self, schema: &str) -> TenancyResult<()> {
        *self.search_path.write() = schema.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_exists() {
        let ops = InMemorySchemaOps::new();
        assert!(!ops.schema_exists("tenant_acme").await.unwrap());

        ops.create_schema("tenant_acme").await.unwrap();
        assert!(ops.schema_exists("tenant_acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let ops = InMemorySchemaOps::new();
        ops.create_schema("tenant_acme").await.unwrap();

        let err = ops.create_schema("tenant_acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_drop_missing_fails() {
        let ops = InMemorySchemaOps::new();
        let err = ops.drop_schema("tenant_ghost").await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename() {
        let ops = InMemorySchemaOps::new();
        ops.create_schema("tenant_acme").await.unwrap();

        ops.rename_schema("tenant_acme", "zzz_archived_tenant_acme")
            .await
            .unwrap();
        assert!(!ops.schema_exists("tenant_acme").await.unwrap());
        assert!(ops.schema_exists("zzz_archived_tenant_acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_onto_existing_fails() {
        let ops = InMemorySchemaOps::new();
        ops.create_schema("a").await.unwrap();
        ops.create_schema("b").await.unwrap();

        let err = ops.rename_schema("a", "b").await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let ops = InMemorySchemaOps::new();
        ops.create_schema("tenant_acme").await.unwrap();
        ops.create_schema("tenant_globex").await.unwrap();
        ops.create_schema("public").await.unwrap();

        let listed = ops.list_schemas("tenant_").await.unwrap();
        assert_eq!(listed, vec!["tenant_acme", "tenant_globex"]);
    }

    #[tokio::test]
    async fn test_search_path() {
        let ops = InMemorySchemaOps::new();
        ops.set_search_path("tenant_acme").await.unwrap();
        assert_eq!(ops.current_search_path(), "tenant_acme");
    }
}
