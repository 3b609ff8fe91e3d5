//! Identifier canonicalization, validation, and quoting.
//!
//! Identifiers (table, column, view, schema names) cannot be bound as
//! statement parameters, so every identifier that reaches SQL text passes
//! through this module. Values are always bound, never interpolated.
//!
//! The target warehouse stores unquoted identifiers upper-cased. We apply
//! that rule once, here, and then always quote the canonical form so the
//! source's lower-case names and the target's upper-case names can never
//! drift apart between call sites.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across both engines).
/// - PostgreSQL: 63 bytes
/// - Snowflake: 255 characters
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Canonical target form of an identifier: upper-cased.
///
/// ```
/// use pg_snowflake_migrate::core::identifier::canonicalize;
/// assert_eq!(canonicalize("order_details"), "ORDER_DETAILS");
/// ```
pub fn canonicalize(name: &str) -> String {
    name.to_uppercase()
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier exactly as given.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote a warehouse identifier in its canonical (upper-case) form.
pub fn quote_target(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", canonicalize(name).replace('"', "\"\"")))
}
