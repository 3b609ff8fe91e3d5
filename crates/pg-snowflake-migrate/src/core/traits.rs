//! Core traits at the database seams.
//!
//! - [`SourceReader`]: streams base-table rows out of the source database
//! - [`TargetWriter`]: provisions, loads, and counts target tables; defines views
//! - [`MetricSource`]: row counts and line-item aggregates for reconciliation
//!
//! Components receive these as `Arc<dyn Trait>` at construction, so the
//! pipeline never reaches for a process-wide connection and tests can swap
//! in the in-memory implementations.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::verify::MetricSnapshot;

use super::schema::{TableSpec, ViewSpec};
use super::value::{Batch, Row};

/// Read base-table rows from the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Start streaming rows from a table.
    ///
    /// Returns a channel receiver that yields batches of at most `fetch_size`
    /// rows, each row aligned to `spec.columns`. The reader spawns a
    /// background task that fills the channel, so a slow writer applies
    /// backpressure instead of buffering the whole table.
    ///
    /// Errors (unreachable source, unknown column) arrive as an `Err` item.
    fn read_table(&self, spec: &TableSpec, fetch_size: usize) -> mpsc::Receiver<Result<Batch>>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Provision and load tables on the target warehouse.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Create the target database and schema if they do not exist.
    async fn bootstrap(&self) -> Result<()>;

    /// Drop a table if it exists.
    async fn drop_table(&self, name: &str) -> Result<()>;

    /// Create a table named `name` with `spec`'s target columns.
    async fn create_table(&self, spec: &TableSpec, name: &str) -> Result<()>;

    /// Check if a table exists.
    async fn table_exists(&self, name: &str) -> Result<bool>;

    /// Insert rows into table `name`, preserving column order and precision.
    ///
    /// Returns the number of rows the target reports as written.
    async fn write_batch(&self, spec: &TableSpec, name: &str, rows: &[Row]) -> Result<u64>;

    /// Get the current row count for a table.
    async fn row_count(&self, name: &str) -> Result<i64>;

    /// Atomically exchange the contents of `name` and `staging`.
    async fn swap_tables(&self, name: &str, staging: &str) -> Result<()>;

    /// Rename a table.
    async fn rename_table(&self, from: &str, to: &str) -> Result<()>;

    /// Define `view`, replacing any previous definition.
    async fn create_view(&self, view: &ViewSpec) -> Result<()>;

    /// Drop and recreate the canonical target table for `spec`.
    ///
    /// Destructive and idempotent: existing data is discarded every time.
    async fn provision(&self, spec: &TableSpec) -> Result<()> {
        self.provision_as(spec, &spec.target_name()).await
    }

    /// Drop and recreate `spec` under an explicit name (e.g. a staging name).
    async fn provision_as(&self, spec: &TableSpec, name: &str) -> Result<()> {
        self.drop_table(name).await?;
        self.create_table(spec, name).await
    }

    /// Get the database type identifier (e.g., "snowflake").
    fn db_type(&self) -> &str;

    /// Release resources.
    async fn close(&self);
}

/// Read-only access used by reconciliation, implemented for both sides.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// `COUNT(*)` of the table `spec` names on this side.
    async fn count_rows(&self, spec: &TableSpec) -> Result<i64>;

    /// Line-item aggregates (revenue sums, order count, quantity, days to ship).
    async fn line_item_metrics(&self) -> Result<MetricSnapshot>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}
