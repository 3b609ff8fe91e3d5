//! Connections-file merge and key material loading.
//!
//! The warehouse CLI tooling keeps named connections in a TOML file
//! (`~/.snowflake/connections.toml` by default):
//!
//! ```toml
//! default_connection_name = "playground"
//!
//! [playground]
//! account = "xy12345.us-east-1"
//! user = "MIGRATOR"
//! role = "SYSADMIN"
//! warehouse = "COMPUTE_WH"
//! private_key_file = "~/.snowflake/rsa_key.p8"
//! ```
//!
//! Values from that file only fill fields the YAML config left empty.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::TargetConfig;
use crate::error::{MigrateError, Result};

/// Default location of the connections file.
pub const DEFAULT_CONNECTIONS_FILE: &str = "~/.snowflake/connections.toml";

/// One named table of the connections file.
#[derive(Debug, Default, Deserialize)]
struct ConnectionEntry {
    account: Option<String>,
    user: Option<String>,
    role: Option<String>,
    warehouse: Option<String>,
    database: Option<String>,
    schema: Option<String>,
    #[serde(alias = "private_key_path")]
    private_key_file: Option<String>,
}

/// Key pair material used to sign login tokens.
#[derive(Clone)]
pub struct KeyMaterial {
    /// PEM-encoded private key.
    pub private_key_pem: Vec<u8>,
    /// `SHA256:<base64>` fingerprint of the DER public key.
    pub fingerprint: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key_pem", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Expand `~` and `$VAR` in a configured path.
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .map_err(|e| MigrateError::Config(format!("cannot expand path '{}': {}", path, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

impl TargetConfig {
    /// Fill empty connection fields from the connections file.
    ///
    /// Does nothing unless `connections_file` or `connection_name` is set.
    pub fn merge_connections_file(&mut self) -> Result<()> {
        if self.connections_file.is_none() && self.connection_name.is_none() {
            return Ok(());
        }

        let file = self
            .connections_file
            .clone()
            .unwrap_or_else(|| DEFAULT_CONNECTIONS_FILE.to_string());
        let path = expand_path(&file)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MigrateError::Credentials(format!(
                "cannot read connections file {}: {}",
                path.display(),
                e
            ))
        })?;

        self.merge_connections_toml(&content)?;
        debug!("Merged connection settings from {}", path.display());
        Ok(())
    }

    /// Fill empty connection fields from connections-file TOML text.
    pub fn merge_connections_toml(&mut self, content: &str) -> Result<()> {
        let table: toml::Table = toml::from_str(content)?;

        let name = match &self.connection_name {
            Some(name) => name.clone(),
            None => table
                .get("default_connection_name")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string(),
        };

        let entry = table.get(&name).cloned().ok_or_else(|| {
            MigrateError::Credentials(format!("connection '{}' not found in connections file", name))
        })?;
        let entry: ConnectionEntry = entry.try_into()?;

        fill(&mut self.account, entry.account);
        fill(&mut self.user, entry.user);
        fill(&mut self.role, entry.role);
        fill(&mut self.warehouse, entry.warehouse);
        if self.private_key_file.is_none() {
            self.private_key_file = entry.private_key_file;
        }
        if self.database.is_none() && self.database_suffix.is_none() {
            self.database = entry.database;
        }
        if let Some(schema) = entry.schema {
            if self.schema.is_empty() {
                self.schema = schema;
            }
        }

        Ok(())
    }

    /// Load the private key and resolve the public key fingerprint.
    ///
    /// An explicit `public_key_fingerprint` or `public_key_file` wins;
    /// otherwise the fingerprint is derived from the private key.
    pub fn load_key_material(&self) -> Result<KeyMaterial> {
        let key_file = self
            .private_key_file
            .as_deref()
            .ok_or_else(|| MigrateError::Credentials("target.private_key_file is not set".into()))?;
        let private_key_pem = read_key_file(key_file, "private key")?;

        let fingerprint = match (&self.public_key_fingerprint, &self.public_key_file) {
            (Some(fp), _) if !fp.is_empty() => normalize_fingerprint(fp),
            (_, Some(public_key_file)) if !public_key_file.is_empty() => {
                let pem = read_key_file(public_key_file, "public key")?;
                public_key_fingerprint(&String::from_utf8_lossy(&pem))?
            }
            _ => private_key_fingerprint(&String::from_utf8_lossy(&private_key_pem))?,
        };

        Ok(KeyMaterial {
            private_key_pem,
            fingerprint,
        })
    }
}

fn fill(field: &mut String, value: Option<String>) {
    if field.is_empty() {
        if let Some(value) = value {
            *field = value;
        }
    }
}

fn read_key_file(path: &str, what: &str) -> Result<Vec<u8>> {
    let path = expand_path(path)?;
    std::fs::read(&path).map_err(|e| {
        MigrateError::Credentials(format!("cannot read {} {}: {}", what, path.display(), e))
    })
}

fn normalize_fingerprint(fp: &str) -> String {
    if fp.starts_with("SHA256:") {
        fp.to_string()
    } else {
        format!("SHA256:{}", fp)
    }
}

/// Fingerprint of the public half of a PKCS#8 PEM RSA private key.
pub fn private_key_fingerprint(pem: &str) -> Result<String> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| {
        MigrateError::Credentials(format!("private key is not a PKCS#8 RSA key: {}", e))
    })?;
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| MigrateError::Credentials(format!("cannot encode public key: {}", e)))?;
    Ok(der_fingerprint(der.as_bytes()))
}

fn der_fingerprint(der: &[u8]) -> String {
    format!("SHA256:{}", BASE64.encode(Sha256::digest(der)))
}

/// `SHA256:` + base64 of the SHA-256 digest of a PEM public key's DER body.
pub fn public_key_fingerprint(pem: &str) -> Result<String> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    if body.is_empty() {
        return Err(MigrateError::Credentials("public key PEM is empty".into()));
    }

    let der = BASE64
        .decode(body.as_bytes())
        .map_err(|e| MigrateError::Credentials(format!("public key is not valid PEM: {}", e)))?;

    Ok(der_fingerprint(&der))
}
