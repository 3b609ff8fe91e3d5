//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use crate::source::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(MigrateError::Config("source.schema is required".into()));
    }
    SslMode::parse(&config.source.ssl_mode)?;

    // Target validation
    let target = &config.target;
    for (key, value) in [
        ("target.account", &target.account),
        ("target.user", &target.user),
        ("target.role", &target.role),
        ("target.warehouse", &target.warehouse),
        ("target.schema", &target.schema),
    ] {
        if value.is_empty() {
            return Err(MigrateError::Config(format!("{} is required", key)));
        }
    }
    if target.private_key_file.as_deref().map_or(true, str::is_empty) {
        return Err(MigrateError::Config(
            "target.private_key_file is required".into(),
        ));
    }
    if target.database_name().is_none() {
        return Err(MigrateError::Config(
            "target.database_suffix (or target.database) is required".into(),
        ));
    }
    if target.statement_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "target.statement_timeout_secs must be at least 1".into(),
        ));
    }

    // Migration config validation
    let migration = &config.migration;
    if migration.fetch_size == 0 {
        return Err(MigrateError::Config(
            "migration.fetch_size must be at least 1".into(),
        ));
    }
    if migration.insert_batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.insert_batch_size must be at least 1".into(),
        ));
    }
    if migration.table_concurrency == 0 {
        return Err(MigrateError::Config(
            "migration.table_concurrency must be at least 1".into(),
        ));
    }
    if migration.tolerance.is_nan() || migration.tolerance <= 0.0 {
        return Err(MigrateError::Config(format!(
            "migration.tolerance must be positive, got {}",
            migration.tolerance
        )));
    }

    Ok(())
}
