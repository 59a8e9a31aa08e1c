//! Schema naming policy.
//!
//! Deterministic, validated mapping between a tenant identifier and the
//! physical schema name (plus its archived variants).

use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// SQL keywords that must not be used as schema names.
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "cast", "check", "column",
    "constraint", "create", "cross", "current_date", "current_time", "current_user", "default",
    "delete", "desc", "distinct", "drop", "else", "end", "except", "exists", "foreign", "from",
    "full", "grant", "group", "having", "in", "index", "inner", "insert", "intersect", "into",
    "is", "join", "left", "like", "limit", "not", "null", "offset", "on", "or", "order", "outer",
    "primary", "references", "revoke", "right", "select", "session_user", "set", "table", "then",
    "to", "union", "unique", "update", "user", "using", "values", "when", "where", "with",
];

/// Options for schema name generation.
#[derive(Debug, Clone)]
pub struct SchemaNamingOptions {
    /// Prefix applied to every tenant schema (e.g. `tenant_`).
    pub schema_prefix: String,

    /// Name of the shared (non-tenant) schema.
    pub shared_schema: String,

    /// Prefix applied when archiving a schema.
    pub archive_prefix: String,

    /// Maximum schema name length (PostgreSQL identifiers cap at 63 bytes).
    pub max_name_length: usize,

    /// Whether generated names are validated.
    pub validate_names: bool,
}

impl Default for SchemaNamingOptions {
    fn default() -> Self {
        Self {
            schema_prefix: "tenant_".to_string(),
            shared_schema: "public".to_string(),
            archive_prefix: "zzz_archived_".to_string(),
            max_name_length: 63,
            validate_names: true,
        }
    }
}

impl SchemaNamingOptions {
    /// Create options with a custom schema prefix.
    pub fn new(schema_prefix: impl Into<String>) -> Self {
        Self {
            schema_prefix: schema_prefix.into(),
            ..Default::default()
        }
    }

    /// Set the shared schema name.
    pub fn with_shared_schema(mut self, schema: impl Into<String>) -> Self {
        self.shared_schema = schema.into();
        self
    }

    /// Set the archive prefix.
    pub fn with_archive_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.archive_prefix = prefix.into();
        self
    }

    /// Set the maximum name length.
    pub fn with_max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }

    /// Enable or disable name validation.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_names = validate;
        self
    }
}

type NameGenerator = dyn Fn(&TenantId) -> String + Send + Sync;

/// Generates and validates schema names for tenants.
///
/// Generation is deterministic: the same identifier always maps to the same
/// schema name. A custom generator can replace the default
/// sanitize-and-prefix scheme, but its output is still validated.
///
/// # Examples
///
/// ```
/// use warren::{SchemaNamer, SchemaNamingOptions, TenantId};
///
/// let namer = SchemaNamer::new(SchemaNamingOptions::default());
/// let name = namer.generate(&TenantId::from("Acme-Corp")).unwrap();
/// assert_eq!(name, "tenant_acme_corp");
/// ```
pub struct SchemaNamer {
    options: SchemaNamingOptions,
    generator: Option<Arc<NameGenerator>>,
}

impl SchemaNamer {
    /// Create a namer with the given options.
    pub fn new(options: SchemaNamingOptions) -> Self {
        Self {
            options,
            generator: None,
        }
    }

    /// Replace the default generation scheme with a custom generator.
    ///
    /// Validation still applies to the generator's output.
    pub fn with_generator(
        mut self,
        generator: impl Fn(&TenantId) -> String + Send + Sync + 'static,
    ) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// The naming options.
    pub fn options(&self) -> &SchemaNamingOptions {
        &self.options
    }

    /// Generate the schema name for a tenant.
    pub fn generate(&self, id: &TenantId) -> TenancyResult<String> {
        let name = match &self.generator {
            Some(generator) => generator(id),
            None => format!(
                "{}{}",
                self.options.schema_prefix,
                sanitize(&id.to_string())
            ),
        };

        if self.options.validate_names {
            self.validate(&name)?;
        }

        Ok(name)
    }

    /// Extract the identifier portion from a schema name.
    ///
    /// Strips the configured prefix if present, otherwise returns the name
    /// unchanged. Only an approximate inverse of [`generate`](Self::generate):
    /// sanitization is not invertible.
    pub fn extract_id(&self, schema_name: &str) -> String {
        schema_name
            .strip_prefix(&self.options.schema_prefix)
            .unwrap_or(schema_name)
            .to_string()
    }

    /// The fixed archived name for a schema.
    pub fn archived_name(&self, schema_name: &str) -> String {
        format!("{}{}", self.options.archive_prefix, schema_name)
    }

    /// The timestamped archive name used by soft delete.
    ///
    /// Repeated soft deletes never collide because of the timestamp suffix.
    pub fn soft_delete_name(&self, schema_name: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}_{}",
            self.options.archive_prefix,
            schema_name,
            at.format("%Y%m%d%H%M%S")
        )
    }

    /// Validate a schema name against charset, length, and reserved words.
    pub fn validate(&self, name: &str) -> TenancyResult<()> {
        if name.is_empty() {
            return Err(TenancyError::InvalidSchemaName(
                "generated name is empty".to_string(),
            ));
        }

        if name.len() > self.options.max_name_length {
            return Err(TenancyError::InvalidSchemaName(format!(
                "'{}' exceeds maximum length of {}",
                name, self.options.max_name_length
            )));
        }

        let mut chars = name.chars();
        let valid_first = chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_first || !valid_rest {
            return Err(TenancyError::InvalidSchemaName(format!(
                "'{}' must match ^[a-z_][a-z0-9_]*$",
                name
            )));
        }

        if RESERVED_KEYWORDS.contains(&name) {
            return Err(TenancyError::InvalidSchemaName(format!(
                "'{}' is a reserved keyword",
                name
            )));
        }

        Ok(())
    }
}

/// Lowercase the identifier and replace anything outside `[a-z0-9_]` with `_`.
fn sanitize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
