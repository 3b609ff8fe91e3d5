//! Per-table migration: extract, provision, load, self-check.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LoadMode;
use crate::core::traits::{SourceReader, TargetWriter};
use crate::core::value::Batch;
use crate::core::TableSpec;
use crate::error::{MigrateError, Result};
use crate::verify::CheckStatus;

/// Outcome of migrating one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Logical table name.
    pub table: String,
    /// Rows extracted from the source.
    pub source_rows: i64,
    /// Rows counted in the loaded target table.
    pub target_rows: i64,
    /// Rows the target reported as written.
    pub rows_written: u64,
    pub status: CheckStatus,
    pub load_mode: LoadMode,
    pub duration_ms: u64,
}

impl MigrationResult {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

impl fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: source={}, target={} [{}]",
            self.table, self.source_rows, self.target_rows, self.status
        )
    }
}

/// Moves one table from the source to the target.
///
/// A call is a single, final attempt: a mismatch is reported in the result,
/// never retried. Calling again drops and reloads the table from scratch.
pub struct TableMigrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    fetch_size: usize,
    load_mode: LoadMode,
}

impl TableMigrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        fetch_size: usize,
        load_mode: LoadMode,
    ) -> Self {
        Self {
            source,
            target,
            fetch_size: fetch_size.max(1),
            load_mode,
        }
    }

    /// Migrate `spec` and compare extracted rows with the loaded row count.
    pub async fn migrate(&self, spec: &TableSpec) -> Result<MigrationResult> {
        let start = Instant::now();
        info!("{}: migrating (mode: {})", spec.name, self.load_mode);

        let mut rx = self.source.read_table(spec, self.fetch_size);

        // The first batch proves the extraction statement runs before anything
        // on the target is dropped.
        let first = next_batch(&mut rx, spec).await?;

        let result = match self.load_mode {
            LoadMode::DropRecreate => {
                self.target.provision(spec).await?;
                let name = spec.target_name();
                let (extracted, written) = self.load(spec, &name, first, &mut rx).await?;
                let loaded = self.target.row_count(&name).await?;
                self.result(spec, extracted, loaded, written, start)
            }
            LoadMode::StagedSwap => self.migrate_staged(spec, first, &mut rx, start).await?,
        };

        if result.is_ok() {
            info!(
                "{}: {} rows in {}ms [OK]",
                spec.name, result.target_rows, result.duration_ms
            );
        } else {
            warn!(
                "{}: extracted {} rows but target holds {} [MISMATCH]",
                spec.name, result.source_rows, result.target_rows
            );
        }
        Ok(result)
    }

    /// Load into the staging table and swap it in only after the row count checks out.
    async fn migrate_staged(
        &self,
        spec: &TableSpec,
        first: Batch,
        rx: &mut mpsc::Receiver<Result<Batch>>,
        start: Instant,
    ) -> Result<MigrationResult> {
        let name = spec.target_name();
        let staging = spec.staging_name();

        self.target.provision_as(spec, &staging).await?;

        let (extracted, written) = match self.load(spec, &staging, first, rx).await {
            Ok(counts) => counts,
            Err(e) => {
                self.discard_staging(spec, &staging).await;
                return Err(e);
            }
        };
        let loaded = self.target.row_count(&staging).await?;

        if loaded == extracted {
            if self.target.table_exists(&name).await? {
                self.target.swap_tables(&name, &staging).await?;
                self.target.drop_table(&staging).await?;
                debug!("{}: swapped {} into place", spec.name, staging);
            } else {
                self.target.rename_table(&staging, &name).await?;
                debug!("{}: renamed {} into place", spec.name, staging);
            }
        } else {
            warn!(
                "{}: staging row count {} differs from source {}; previous table kept",
                spec.name, loaded, extracted
            );
            self.discard_staging(spec, &staging).await;
        }

        Ok(self.result(spec, extracted, loaded, written, start))
    }

    async fn discard_staging(&self, spec: &TableSpec, staging: &str) {
        if let Err(e) = self.target.drop_table(staging).await {
            warn!("{}: failed to drop {}: {}", spec.name, staging, e);
        }
    }

    /// Write the first batch and every following one into `name`.
    ///
    /// Returns `(rows extracted, rows the target reported written)`.
    async fn load(
        &self,
        spec: &TableSpec,
        name: &str,
        first: Batch,
        rx: &mut mpsc::Receiver<Result<Batch>>,
    ) -> Result<(i64, u64)> {
        let mut extracted: i64 = 0;
        let mut written: u64 = 0;
        let mut batch = first;

        loop {
            if !batch.is_empty() {
                extracted += batch.len() as i64;
                written += self.target.write_batch(spec, name, &batch.rows).await?;
                debug!("{}: {} rows extracted so far", spec.name, extracted);
            }
            if batch.is_last {
                break;
            }
            batch = next_batch(rx, spec).await?;
        }

        Ok((extracted, written))
    }

    fn result(
        &self,
        spec: &TableSpec,
        source_rows: i64,
        target_rows: i64,
        rows_written: u64,
        start: Instant,
    ) -> MigrationResult {
        MigrationResult {
            table: spec.name.clone(),
            source_rows,
            target_rows,
            rows_written,
            status: CheckStatus::from_match(source_rows == target_rows),
            load_mode: self.load_mode,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

async fn next_batch(rx: &mut mpsc::Receiver<Result<Batch>>, spec: &TableSpec) -> Result<Batch> {
    match rx.recv().await {
        Some(batch) => batch,
        None => Err(MigrateError::query(
            format!("reading {}", spec.name),
            "source stream ended before the final batch",
        )),
    }
}
