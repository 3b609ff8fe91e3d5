//! Configuration loading and validation.

mod credentials;
mod types;
mod validation;

pub use credentials::{expand_path, public_key_fingerprint, KeyMaterial, DEFAULT_CONNECTIONS_FILE};
pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Empty target connection fields are filled from the connections file
    /// (when one is configured) before validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.target.merge_connections_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl SourceConfig {
    /// `host:port/database`, used in connection error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}
