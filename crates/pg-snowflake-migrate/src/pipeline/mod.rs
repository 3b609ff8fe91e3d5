//! Migration pipeline: bootstrap, dependency-ordered table loads, views.
//!
//! - [`MigrationPipeline`]: runs a whole migration, a single-table rerun,
//!   view publication, or reconciliation over one set of [`Connections`]
//! - [`RunSummary`]: outcome of a run, printable or serializable to JSON
//! - [`plan`]: the waves and DDL a run would issue, without connecting

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::SchemaCatalog;
use crate::config::{LoadMode, MigrationConfig, TargetConfig};
use crate::connect::Connections;
use crate::error::{MigrateError, Result};
use crate::migrate::{MigrationResult, TableMigrator};
use crate::target::ddl;
use crate::verify::{ReconciliationEngine, ReconciliationReport};
use crate::views::ViewPublisher;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithMismatches,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::CompletedWithMismatches => f.write_str("completed_with_mismatches"),
            RunStatus::Failed => f.write_str("failed"),
        }
    }
}

/// A table whose migration raised an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTable {
    pub table: String,
    pub error: String,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// One entry per migrated table, in load order.
    pub tables: Vec<MigrationResult>,

    /// Tables that raised an error (only with `continue_on_error`).
    pub failed_tables: Vec<FailedTable>,

    /// Tables not attempted because a predecessor failed.
    pub skipped_tables: Vec<String>,

    /// Views (re)defined after the loads.
    pub views_published: Vec<String>,

    /// Total rows extracted from the source.
    pub rows_transferred: i64,

    /// Reconciliation report, when verification ran after the loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<ReconciliationReport>,
}

impl RunSummary {
    /// Any table or verification check reported MISMATCH.
    pub fn has_mismatches(&self) -> bool {
        self.tables.iter().any(|t| !t.is_ok())
            || self.verification.as_ref().is_some_and(|r| !r.is_clean())
    }

    /// Attach a reconciliation report and refresh the status.
    pub fn attach_verification(&mut self, report: ReconciliationReport) {
        self.verification = Some(report);
        self.status = self.derive_status();
    }

    fn derive_status(&self) -> RunStatus {
        if !self.failed_tables.is_empty() || !self.skipped_tables.is_empty() {
            RunStatus::Failed
        } else if self.has_mismatches() {
            RunStatus::CompletedWithMismatches
        } else {
            RunStatus::Completed
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Table Migration ===")?;
        for result in &self.tables {
            writeln!(f, "  {}", result)?;
        }
        for failed in &self.failed_tables {
            writeln!(f, "  {}: FAILED ({})", failed.table, failed.error)?;
        }
        for table in &self.skipped_tables {
            writeln!(f, "  {}: SKIPPED", table)?;
        }
        if !self.views_published.is_empty() {
            writeln!(f, "Views published: {}", self.views_published.join(", "))?;
        }
        writeln!(
            f,
            "Migration {}: {} tables, {} rows in {:.1}s",
            self.status,
            self.tables.len(),
            self.rows_transferred,
            self.duration_seconds
        )?;
        if let Some(report) = &self.verification {
            writeln!(f)?;
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}

/// Coordinates a migration over explicit connections.
pub struct MigrationPipeline {
    catalog: Arc<SchemaCatalog>,
    conns: Connections,
    options: MigrationConfig,
}

impl MigrationPipeline {
    pub fn new(catalog: Arc<SchemaCatalog>, conns: Connections, options: MigrationConfig) -> Self {
        Self {
            catalog,
            conns,
            options,
        }
    }

    fn migrator(&self) -> TableMigrator {
        TableMigrator::new(
            self.conns.source.clone(),
            self.conns.target.clone(),
            self.options.fetch_size,
            self.options.load_mode,
        )
    }

    /// Bootstrap the target, migrate every table wave by wave, publish views.
    ///
    /// Connection errors and cancellation abort the run. Other table errors
    /// abort it too unless `continue_on_error` is set, in which case the
    /// table is recorded as failed and its dependents are skipped.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        self.conns.target.bootstrap().await?;

        let migrator = Arc::new(self.migrator());
        let semaphore = Arc::new(Semaphore::new(self.options.table_concurrency.max(1)));

        let mut tables = Vec::new();
        let mut failed_tables = Vec::new();
        let mut skipped_tables = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();

        for (wave_no, wave) in self.catalog.load_waves().into_iter().enumerate() {
            let names: Vec<&str> = wave.iter().map(|t| t.name.as_str()).collect();
            info!("Wave {}: {}", wave_no + 1, names.join(", "));

            let mut handles = Vec::new();
            for spec in wave {
                if cancel.is_cancelled() {
                    info!("Cancellation requested, stopping new migrations");
                    break;
                }
                if blocked.contains(&spec.name) {
                    warn!("{}: skipped, a predecessor failed", spec.name);
                    skipped_tables.push(spec.name.clone());
                    continue;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MigrateError::Cancelled)?;
                let name = spec.name.clone();
                let migrator = migrator.clone();
                let cancel = cancel.clone();
                let spec = spec.clone();

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    if cancel.is_cancelled() {
                        return Err(MigrateError::Cancelled);
                    }
                    migrator.migrate(&spec).await
                });
                handles.push((name, handle));
            }

            let mut abort: Option<MigrateError> = None;
            for (name, handle) in handles {
                let outcome = handle.await.unwrap_or_else(|e| {
                    Err(MigrateError::query(
                        format!("migrating {}", name),
                        format!("task panicked: {}", e),
                    ))
                });

                match outcome {
                    Ok(result) => tables.push(result),
                    Err(e) => {
                        error!("{}: failed - {}", name, e);
                        let fatal = e.is_connection()
                            || matches!(e, MigrateError::Cancelled)
                            || !self.options.continue_on_error;
                        if fatal {
                            abort.get_or_insert(e);
                        } else {
                            blocked.extend(
                                self.catalog.dependents_of(&name).into_iter().map(String::from),
                            );
                            failed_tables.push(FailedTable {
                                table: name,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }

            if let Some(e) = abort {
                return Err(e);
            }
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
        }

        let mut views_published = Vec::new();
        if !failed_tables.is_empty() || !skipped_tables.is_empty() {
            warn!(
                "Skipping view publication: {} tables failed, {} skipped",
                failed_tables.len(),
                skipped_tables.len()
            );
        } else if self.options.publish_views {
            views_published = self.publish_views().await?;
        } else {
            info!("View publication disabled");
        }

        let completed_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            status: RunStatus::Completed,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            rows_transferred: tables.iter().map(|t: &MigrationResult| t.source_rows).sum(),
            tables,
            failed_tables,
            skipped_tables,
            views_published,
            verification: None,
        };
        summary.status = summary.derive_status();

        info!(
            "Migration {}: {} tables, {} rows in {:.1}s",
            summary.status,
            summary.tables.len(),
            summary.rows_transferred,
            summary.duration_seconds
        );
        Ok(summary)
    }

    /// Drop and reload one table. Views over it are not redefined.
    pub async fn migrate_table(&self, name: &str) -> Result<MigrationResult> {
        let spec = self.catalog.table(name).ok_or_else(|| {
            MigrateError::Config(format!(
                "Unknown table '{}'. Known tables: {}",
                name,
                self.catalog
                    .table_specs()
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        self.conns.target.bootstrap().await?;
        self.migrator().migrate(spec).await
    }

    /// Publish every catalog view.
    pub async fn publish_views(&self) -> Result<Vec<String>> {
        ViewPublisher::new(self.catalog.clone(), self.conns.target.clone())
            .publish()
            .await
    }

    /// Compare source and target with the configured tolerance.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        ReconciliationEngine::new(
            self.catalog.clone(),
            self.conns.source_metrics.clone(),
            self.conns.target_metrics.clone(),
        )
        .with_tolerance(self.options.tolerance)
        .reconcile()
        .await
    }
}

/// Load waves and statements a run would issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub database: String,
    pub schema: String,
    pub load_mode: LoadMode,
    pub waves: Vec<Vec<String>>,
    pub statements: Vec<String>,
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Target: {}.{} (mode: {})",
            self.database, self.schema, self.load_mode
        )?;
        for (i, wave) in self.waves.iter().enumerate() {
            writeln!(f, "Wave {}: {}", i + 1, wave.join(", "))?;
        }
        for statement in &self.statements {
            writeln!(f)?;
            writeln!(f, "{};", statement)?;
        }
        Ok(())
    }
}

/// Build the plan for `catalog` on `target` without touching either database.
pub fn plan(catalog: &SchemaCatalog, target: &TargetConfig, mode: LoadMode) -> Result<MigrationPlan> {
    let database = target.database_name().ok_or_else(|| {
        MigrateError::Config("target.database_suffix (or target.database) is required".into())
    })?;
    let schema = target.schema_name();

    let mut statements = vec![
        ddl::create_database(&database)?,
        ddl::create_schema(&database, &schema)?,
    ];

    for spec in catalog.table_specs() {
        let name = spec.target_name();
        match mode {
            LoadMode::DropRecreate => {
                statements.push(ddl::drop_table(&name)?);
                statements.push(ddl::create_table(spec, &name)?);
            }
            LoadMode::StagedSwap => {
                let staging = spec.staging_name();
                statements.push(ddl::drop_table(&staging)?);
                statements.push(ddl::create_table(spec, &staging)?);
                statements.push(ddl::swap_tables(&name, &staging)?);
                statements.push(ddl::drop_table(&staging)?);
            }
        }
    }

    for view in catalog.view_specs() {
        statements.push(ddl::create_view(view)?);
    }

    Ok(MigrationPlan {
        database,
        schema,
        load_mode: mode,
        waves: catalog
            .load_waves()
            .iter()
            .map(|w| w.iter().map(|t| t.name.clone()).collect())
            .collect(),
        statements,
    })
}
