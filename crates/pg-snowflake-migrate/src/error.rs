//! Error types for the migration library.

use thiserror::Error;

/// Process exit code for a clean run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for configuration errors (invalid YAML, missing fields, etc.).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for a run that completed but reported row-count or metric mismatches.
pub const EXIT_MISMATCH: u8 = 2;
/// Exit code for unreachable databases or unusable credentials.
pub const EXIT_CONNECTION_ERROR: u8 = 3;
/// Exit code for failed statements (DDL, load, view, query).
pub const EXIT_STATEMENT_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database could not be reached.
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Key material or secrets are missing or unreadable.
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source database driver error
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Transport error talking to the warehouse API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A statement failed to execute
    #[error("Query failed ({context}): {message}")]
    Query { context: String, message: String },

    /// Bulk load into a target table failed
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// A derived view could not be (re)defined
    #[error("View {view} could not be published: {message}")]
    View { view: String, message: String },

    /// The table dependency graph is invalid or was not respected
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML connections file parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Query error
    pub fn query(context: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Query {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a View error
    pub fn view(view: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::View {
            view: view.into(),
            message: message.into(),
        }
    }

    /// Whether this error means a database is unreachable or credentials are unusable.
    ///
    /// Connection errors abort the whole run; statement errors only fail one table.
    pub fn is_connection(&self) -> bool {
        match self {
            MigrateError::Connection { .. }
            | MigrateError::Credentials(_)
            | MigrateError::Pool { .. }
            | MigrateError::Http(_) => true,
            MigrateError::Source(e) => e.as_db_error().is_none(),
            _ => false,
        }
    }

    /// Map the error to a process exit code.
    pub fn exit_code(&self) -> u8 {
        if self.is_connection() {
            return EXIT_CONNECTION_ERROR;
        }
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Toml(_)
            | MigrateError::Json(_) => EXIT_CONFIG_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_STATEMENT_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
