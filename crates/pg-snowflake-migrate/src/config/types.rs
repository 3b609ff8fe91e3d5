//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::identifier::canonicalize;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Target warehouse configuration (Snowflake).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Target warehouse (Snowflake) configuration.
///
/// Authentication is key-pair only: a PKCS#8 private key signs a short-lived
/// JWT, and the public key fingerprint identifies which registered key was used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Account identifier, e.g. `xy12345.us-east-1` or `myorg-myaccount`.
    #[serde(default)]
    pub account: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Role to run statements as.
    #[serde(default)]
    pub role: String,

    /// Warehouse (compute resource) to run statements on.
    #[serde(default)]
    pub warehouse: String,

    /// PEM-encoded PKCS#8 private key. `~` and `$VAR` are expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    /// PEM-encoded public key matching `private_key_file`. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_file: Option<String>,

    /// Registered key fingerprint (`SHA256:<base64>`). Overrides the one
    /// derived from the private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,

    /// Explicit target database name; overrides `database_suffix`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Environment suffix; the target database is `NORTHWIND_<suffix>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_suffix: Option<String>,

    /// Target schema (default: "PUBLIC").
    #[serde(default = "default_target_schema")]
    pub schema: String,

    /// Override of the account URL (e.g. for private link).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Per-statement timeout in seconds (default: 600).
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// TOML connections file to fill empty connection fields from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_file: Option<String>,

    /// Named table in the connections file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

/// Prefix of derived target database names.
pub const DATABASE_PREFIX: &str = "NORTHWIND";

impl TargetConfig {
    /// Target database name in canonical form.
    ///
    /// Returns `None` when neither `database` nor `database_suffix` is set.
    pub fn database_name(&self) -> Option<String> {
        match (&self.database, &self.database_suffix) {
            (Some(db), _) if !db.is_empty() => Some(canonicalize(db)),
            (_, Some(suffix)) if !suffix.is_empty() => {
                Some(format!("{}_{}", DATABASE_PREFIX, canonicalize(suffix)))
            }
            _ => None,
        }
    }

    /// Target schema name in canonical form.
    pub fn schema_name(&self) -> String {
        canonicalize(&self.schema)
    }

    /// Account name used in JWT claims: upper-cased, up to the first `.`.
    pub fn account_identifier(&self) -> String {
        let account = self.account.split('.').next().unwrap_or_default();
        canonicalize(account)
    }

    /// Base URL of the SQL API.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if !endpoint.is_empty() => endpoint.trim_end_matches('/').to_string(),
            _ => format!(
                "https://{}.snowflakecomputing.com",
                self.account.to_lowercase()
            ),
        }
    }
}

/// How a table is put in place on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Drop the table, recreate it, load it.
    #[default]
    DropRecreate,

    /// Load into a staging table, swap it in only after the row count checks out.
    StagedSwap,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::DropRecreate => f.write_str("drop_recreate"),
            LoadMode::StagedSwap => f.write_str("staged_swap"),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source rows per streamed batch (default: 10000).
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Rows per bound INSERT statement (default: 1000).
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Load mode (default: drop_recreate).
    #[serde(default)]
    pub load_mode: LoadMode,

    /// Tables migrated concurrently within a dependency wave (default: 1).
    #[serde(default = "default_table_concurrency")]
    pub table_concurrency: usize,

    /// Keep going after a table fails, skipping its dependents (default: false).
    #[serde(default)]
    pub continue_on_error: bool,

    /// Publish the reporting views after loading (default: true).
    #[serde(default = "default_true")]
    pub publish_views: bool,

    /// Absolute tolerance for float metric comparison (default: 0.01).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            fetch_size: default_fetch_size(),
            insert_batch_size: default_insert_batch_size(),
            load_mode: LoadMode::default(),
            table_concurrency: default_table_concurrency(),
            continue_on_error: false,
            publish_views: true,
            tolerance: default_tolerance(),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_target_schema() -> String {
    "PUBLIC".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_statement_timeout() -> u64 {
    600
}

fn default_fetch_size() -> usize {
    10_000
}

fn default_insert_batch_size() -> usize {
    1_000
}

fn default_table_concurrency() -> usize {
    1
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}
