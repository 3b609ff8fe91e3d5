//! # pg-snowflake-migrate
//!
//! PostgreSQL to Snowflake migration and reconciliation for the Northwind
//! schema.
//!
//! This library provides:
//!
//! - **Dependency-ordered loads** of the eight Northwind tables, optionally
//!   concurrent within a dependency wave
//! - **Two load modes**: drop-and-recreate, or load into a staging table and
//!   swap it in only when the row count checks out
//! - **Reporting views** with calculated revenue and shipping columns
//! - **Reconciliation** of row counts and line-item aggregates between the
//!   source and the warehouse
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_snowflake_migrate::{Config, ConnectionFactory, MigrationPipeline, SchemaCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_snowflake_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let conns = ConnectionFactory::new(config.clone()).open().await?;
//!     let catalog = Arc::new(SchemaCatalog::northwind()?);
//!
//!     let pipeline = MigrationPipeline::new(catalog, conns.clone(), config.migration);
//!     let summary = pipeline.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", summary.rows_transferred);
//!
//!     conns.close().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod connect;
pub mod core;
pub mod error;
pub mod migrate;
pub mod pipeline;
pub mod source;
pub mod target;
pub mod verify;
pub mod views;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use catalog::SchemaCatalog;
pub use config::{Config, LoadMode, MigrationConfig, SourceConfig, TargetConfig};
pub use connect::{ConnectionFactory, Connections, HealthCheckResult};
pub use error::{MigrateError, Result};
pub use migrate::{MigrationResult, TableMigrator};
pub use pipeline::{plan, MigrationPipeline, MigrationPlan, RunStatus, RunSummary};
pub use source::PgSourceReader;
pub use target::SnowflakeWriter;
pub use verify::{ReconciliationEngine, ReconciliationReport};
pub use views::ViewPublisher;
