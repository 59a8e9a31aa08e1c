//! Centralized tenant control store.
//!
//! Optional control-plane metadata, independent of tenant schemas: status,
//! slug, connection overrides, encrypted credentials, and the salted hash of
//! the tenant's API key. A caching decorator wraps any store implementation.
//!
//! API keys are never stored or transmitted in plaintext; only their salted
//! SHA-256 hash is persisted, and verification uses a constant-time
//! comparison.

use crate::error::{TenancyError, TenancyResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Tenant status in the control store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Created but not yet provisioned.
    Pending,
    /// Provisioned and operational.
    Active,
    /// Temporarily suspended.
    Suspended,
    /// Administratively disabled.
    Disabled,
    /// Marked for deletion.
    FlaggedForDelete,
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Disabled => write!(f, "disabled"),
            Self::FlaggedForDelete => write!(f, "flagged_for_delete"),
        }
    }
}

/// Control-store record for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Tenant ID.
    pub id: Uuid,

    /// Unique, URL-safe slug.
    pub slug: String,

    /// Current status.
    pub status: TenantStatus,

    /// Physical schema name.
    pub schema_name: String,

    /// Database name override (if the tenant lives in a separate database).
    pub database: Option<String>,

    /// Server override.
    pub server: Option<String>,

    /// Database user override.
    pub db_user: Option<String>,

    /// Encrypted database password (opaque; see [`PasswordProtector`]).
    pub encrypted_password: Option<String>,

    /// Salted hash of the tenant's API key.
    pub api_key_hash: Option<String>,

    /// Created timestamp.
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Create a new Pending record.
    pub fn new(slug: impl Into<String>, schema_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            slug: slug.into(),
            status: TenantStatus::Pending,
            schema_name: schema_name.into(),
            database: None,
            server: None,
            db_user: None,
            encrypted_password: None,
            api_key_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the record ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
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

    /// Set the encrypted password.
    pub fn with_encrypted_password(mut self, encrypted: impl Into<String>) -> Self {
        self.encrypted_password = Some(encrypted.into());
        self
    }

    /// Set the API key hash.
    pub fn with_api_key_hash(mut self, hash: impl Into<String>) -> Self {
        self.api_key_hash = Some(hash.into());
        self
    }
}

/// Opaque credential protection capability.
///
/// Implement with your secret-management or encryption primitive of choice;
/// this crate only shuttles the opaque protected form in and out of records.
#[async_trait]
pub trait PasswordProtector: Send + Sync {
    /// Protect a plaintext credential.
    async fn protect(&self, plaintext: &str) -> TenancyResult<String>;

    /// Recover the plaintext from its protected form.
    async fn unprotect(&self, protected: &str) -> TenancyResult<String>;
}

/// Centralized tenant metadata store.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Create a record. Fails if the ID or slug is taken.
    async fn create(&self, record: &TenantRecord) -> TenancyResult<()>;

    /// Get a record by ID.
    async fn get(&self, id: Uuid) -> TenancyResult<Option<TenantRecord>>;

    /// Get a record by slug.
    async fn get_by_slug(&self, slug: &str) -> TenancyResult<Option<TenantRecord>>;

    /// Find the record whose stored hash matches the presented API key.
    ///
    /// Implementations must use [`verify_api_key`] (or an equivalent
    /// constant-time comparison), never plain string equality.
    async fn get_by_api_key(&self, api_key: &str) -> TenancyResult<Option<TenantRecord>>;

    /// Transition a record's status.
    async fn update_status(&self, id: Uuid, status: TenantStatus) -> TenancyResult<()>;

    /// Delete a record.
    async fn delete(&self, id: Uuid) -> TenancyResult<()>;

    /// List all records.
    async fn list(&self) -> TenancyResult<Vec<TenantRecord>>;
}

/// Generate a random URL-safe API key.
pub fn generate_api_key() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash an API key with a fresh random salt.
///
/// Storage form is `{salt}${hex(sha256(salt || key))}`.
pub fn hash_api_key(key: &str) -> String {
    let mut rng = rand::rng();
    let salt_bytes: Vec<u8> = (0..16).map(|_| rng.random()).collect();
    let salt = hex::encode(salt_bytes);
    format!("{}${}", salt, digest_with_salt(&salt, key))
}

/// Verify a presented API key against a stored salted hash.
pub fn verify_api_key(key: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    constant_time_eq(&digest_with_salt(salt, key), digest)
}

fn digest_with_salt(salt: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison (prevent timing attacks).
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// In-memory control store for testing.
#[derive(Debug, Default)]
pub struct InMemoryControlStore {
    records: RwLock<HashMap<Uuid, TenantRecord>>,
}

impl InMemoryControlStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlStore for InMemoryControlStore {
    async fn create(&self, record: &TenantRecord) -> TenancyResult<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(TenancyError::AlreadyExists(record.id.to_string()));
        }
        if records.values().any(|r| r.slug == record.slug) {
            return Err(TenancyError::AlreadyExists(record.slug.clone()));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> TenancyResult<Option<TenantRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> TenancyResult<Option<TenantRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.slug == slug)
            .cloned())
    }

    async fn get_by_api_key(&self, api_key: &str) -> TenancyResult<Option<TenantRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| {
                r.api_key_hash
                    .as_deref()
                    .is_some_and(|stored| verify_api_key(api_key, stored))
            })
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> TenancyResult<()> {
        let mut records = self.records.write();
        match records.get_mut(&id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(TenancyError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: Uuid) -> TenancyResult<()> {
        let mut records = self.records.write();
        if records.remove(&id).is_none() {
            return Err(TenancyError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> TenancyResult<Vec<TenantRecord>> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

/// Caching decorator for any [`ControlStore`].
///
/// Reads by slug and by API key are cached with a TTL; writes invalidate the
/// affected entries before delegating, so a racing read repopulates from the
/// underlying store rather than resurrecting stale data.
pub struct CachingControlStore<S: ControlStore> {
    inner: S,
    ttl: Duration,
    by_slug: DashMap<String, (TenantRecord, Instant)>,
    by_key_digest: DashMap<String, (TenantRecord, Instant)>,
}

impl<S: ControlStore> CachingControlStore<S> {
    /// Default read TTL.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Wrap a store with the default TTL.
    pub fn new(inner: S) -> Self {
        Self::with_ttl(inner, Self::DEFAULT_TTL)
    }

    /// Wrap a store with a custom TTL.
    pub fn with_ttl(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            by_slug: DashMap::new(),
            by_key_digest: DashMap::new(),
        }
    }

    /// Cache key for API-key lookups: a digest of the presented key, so the
    /// plaintext key never sits in the cache.
    fn key_digest(api_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn fresh(&self, inserted: Instant) -> bool {
        inserted.elapsed() < self.ttl
    }

    fn invalidate(&self, id: Uuid) {
        self.by_slug.retain(|_, (record, _)| record.id != id);
        self.by_key_digest.retain(|_, (record, _)| record.id != id);
    }
}

#[async_trait]
impl<S: ControlStore> ControlStore for CachingControlStore<S> {
    async fn create(&self, record: &TenantRecord) -> TenancyResult<()> {
        self.invalidate(record.id);
        self.by_slug.remove(&record.slug);
        self.inner.create(record).await
    }

    async fn get(&self, id: Uuid) -> TenancyResult<Option<TenantRecord>> {
        self.inner.get(id).await
    }

    async fn get_by_slug(&self, slug: &str) -> TenancyResult<Option<TenantRecord>> {
        if let Some(entry) = self.by_slug.get(slug) {
            let (record, inserted) = entry.value();
            if self.fresh(*inserted) {
                return Ok(Some(record.clone()));
            }
        }

        let found = self.inner.get_by_slug(slug).await?;
        if let Some(record) = &found {
            self.by_slug
                .insert(slug.to_string(), (record.clone(), Instant::now()));
        }
        Ok(found)
    }

    async fn get_by_api_key(&self, api_key: &str) -> TenancyResult<Option<TenantRecord>> {
        let digest = Self::key_digest(api_key);
        if let Some(entry) = self.by_key_digest.get(&digest) {
            let (record, inserted) = entry.value();
            if self.fresh(*inserted) {
                return Ok(Some(record.clone()));
            }
        }

        let found = self.inner.get_by_api_key(api_key).await?;
        if let Some(record) = &found {
            self.by_key_digest
                .insert(digest, (record.clone(), Instant::now()));
        }
        Ok(found)
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> TenancyResult<()> {
        self.invalidate(id);
        self.inner.update_status(id, status).await
    }

    async fn delete(&self, id: Uuid) -> TenancyResult<()> {
        self.invalidate(id);
        self.inner.delete(id).await
    }

    async fn list(&self) -> TenancyResult<Vec<TenantRecord>> {
        self.inner.list().await
    }
}
