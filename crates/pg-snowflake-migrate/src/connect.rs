//! Connection factory.
//!
//! Components never open connections themselves; they receive the handles
//! built here. The caller owns the [`Connections`] and closes them when the
//! run is over.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::traits::{MetricSource, SourceReader, TargetWriter};
use crate::error::Result;
use crate::source::PgSourceReader;
use crate::target::SnowflakeWriter;

/// Open handles to both databases.
///
/// The source and target each appear twice: once behind the data-movement
/// trait and once behind [`MetricSource`] for reconciliation.
#[derive(Clone)]
pub struct Connections {
    pub source: Arc<dyn SourceReader>,
    pub source_metrics: Arc<dyn MetricSource>,
    pub target: Arc<dyn TargetWriter>,
    pub target_metrics: Arc<dyn MetricSource>,
}

impl Connections {
    /// Pair a source and a target that each implement [`MetricSource`] too.
    pub fn new<S, T>(source: Arc<S>, target: Arc<T>) -> Self
    where
        S: SourceReader + MetricSource + 'static,
        T: TargetWriter + MetricSource + 'static,
    {
        Self {
            source: source.clone(),
            source_metrics: source,
            target: target.clone(),
            target_metrics: target,
        }
    }

    /// Release both connection pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

/// Outcome of connecting to both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Builds [`Connections`] from configuration.
pub struct ConnectionFactory {
    config: Config,
}

impl ConnectionFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to the PostgreSQL source.
    ///
    /// The pool holds one connection per concurrent table plus one for
    /// reconciliation queries.
    pub async fn connect_source(&self) -> Result<Arc<PgSourceReader>> {
        let max_conns = self.config.migration.table_concurrency + 1;
        Ok(Arc::new(
            PgSourceReader::connect(&self.config.source, max_conns).await?,
        ))
    }

    /// Load key material and connect to the warehouse.
    pub async fn connect_target(&self) -> Result<Arc<SnowflakeWriter>> {
        Ok(Arc::new(
            SnowflakeWriter::connect(&self.config.target, self.config.migration.insert_batch_size)
                .await?,
        ))
    }

    /// Connect to both sides, source first.
    pub async fn open(&self) -> Result<Connections> {
        let source = self.connect_source().await?;
        let target = match self.connect_target().await {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };
        info!("Source and target connections established");
        Ok(Connections::new(source, target))
    }

    /// Connect to each side independently and run `SELECT 1`.
    ///
    /// Failures are reported in the result rather than returned.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = self.connect_source().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;
        let source_error = match source {
            Ok(reader) => {
                reader.close().await;
                None
            }
            Err(e) => {
                warn!("Source health check failed: {}", e);
                Some(e.to_string())
            }
        };

        let start = Instant::now();
        let target = self.connect_target().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;
        let target_error = match target {
            Ok(writer) => {
                writer.close().await;
                None
            }
            Err(e) => {
                warn!("Target health check failed: {}", e);
                Some(e.to_string())
            }
        };

        HealthCheckResult {
            source_connected: source_error.is_none(),
            source_latency_ms,
            target_connected: target_error.is_none(),
            target_latency_ms,
            healthy: source_error.is_none() && target_error.is_none(),
            source_error,
            target_error,
        }
    }
}
