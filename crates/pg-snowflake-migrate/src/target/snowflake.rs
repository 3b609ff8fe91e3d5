//! Warehouse target writer.
//!
//! Implements [`TargetWriter`] (provisioning, loading, view definition) and
//! [`MetricSource`] (reconciliation reads) on top of the SQL API client.

use async_trait::async_trait;
use tracing::{debug, info};

use super::client::{Binding, Scope, SqlApiClient, StatementResult};
use super::ddl;
use crate::catalog::ORDER_DETAILS_VIEW;
use crate::config::TargetConfig;
use crate::core::identifier::canonicalize;
use crate::core::schema::{TableSpec, ViewSpec};
use crate::core::traits::{MetricSource, TargetWriter};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};
use crate::verify::metrics::{target_count_query, target_line_item_metrics_query};
use crate::verify::MetricSnapshot;

/// Writer for the warehouse target.
pub struct SnowflakeWriter {
    client: SqlApiClient,
    insert_batch_size: usize,
}

impl SnowflakeWriter {
    /// Load key material, build the API client, and verify the warehouse answers.
    pub async fn connect(config: &TargetConfig, insert_batch_size: usize) -> Result<Self> {
        let material = config.load_key_material()?;
        let client = SqlApiClient::new(config, &material)?;

        let writer = Self {
            client,
            insert_batch_size: insert_batch_size.max(1),
        };
        writer.health_check().await?;

        info!(
            "Connected to warehouse: {} (database {}, schema {})",
            writer.client.endpoint(),
            writer.client.database(),
            writer.client.schema()
        );
        Ok(writer)
    }

    /// Run `SELECT 1` without selecting a database.
    pub async fn health_check(&self) -> Result<()> {
        self.client
            .execute(Scope::Account, "SELECT 1", &[], "health check")
            .await
            .map(|_| ())
    }

    /// Database every scoped statement runs in.
    pub fn database(&self) -> &str {
        self.client.database()
    }

    async fn run(&self, sql: &str, context: &str) -> Result<StatementResult> {
        self.client.execute(Scope::Schema, sql, &[], context).await
    }
}

#[async_trait]
impl TargetWriter for SnowflakeWriter {
    async fn bootstrap(&self) -> Result<()> {
        let database = self.client.database();
        let schema = self.client.schema();

        self.client
            .execute(
                Scope::Account,
                &ddl::create_database(database)?,
                &[],
                "creating target database",
            )
            .await?;
        self.client
            .execute(
                Scope::Account,
                &ddl::create_schema(database, schema)?,
                &[],
                "creating target schema",
            )
            .await?;

        info!("Target database {}.{} is ready", database, schema);
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.run(&ddl::drop_table(name)?, &format!("dropping {}", name))
            .await?;
        debug!("Dropped table {}", canonicalize(name));
        Ok(())
    }

    async fn create_table(&self, spec: &TableSpec, name: &str) -> Result<()> {
        self.run(&ddl::create_table(spec, name)?, &format!("creating {}", name))
            .await?;
        debug!("Created table {}", canonicalize(name));
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let result = self
            .client
            .execute(
                Scope::Schema,
                ddl::table_exists(),
                &[Binding::text(Some(canonicalize(name)))],
                &format!("checking for {}", name),
            )
            .await?;
        Ok(parse_i64(result.scalar()).unwrap_or(0) > 0)
    }

    async fn write_batch(&self, spec: &TableSpec, name: &str, rows: &[Row]) -> Result<u64> {
        let mut written = 0u64;

        for chunk in rows.chunks(self.insert_batch_size) {
            let sql = ddl::insert_rows(spec, name, chunk.len())?;
            let bindings: Vec<Binding> = chunk.iter().flatten().map(bind_value).collect();

            let result = self
                .client
                .execute(
                    Scope::Schema,
                    &sql,
                    &bindings,
                    &format!("inserting into {}", name),
                )
                .await
                .map_err(|e| as_load_error(name, e))?;

            written += result
                .rows_affected
                .or_else(|| parse_i64(result.scalar()).map(|n| n as u64))
                .unwrap_or(chunk.len() as u64);
        }

        debug!("Wrote {} rows to {}", written, canonicalize(name));
        Ok(written)
    }

    async fn row_count(&self, name: &str) -> Result<i64> {
        let context = format!("counting rows of {}", name);
        let result = self.run(&ddl::row_count(name)?, &context).await?;
        parse_i64(result.scalar())
            .ok_or_else(|| MigrateError::query(context, "COUNT(*) returned no value"))
    }

    async fn swap_tables(&self, name: &str, staging: &str) -> Result<()> {
        self.run(
            &ddl::swap_tables(name, staging)?,
            &format!("swapping {} with {}", name, staging),
        )
        .await?;
        Ok(())
    }

    async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.run(
            &ddl::rename_table(from, to)?,
            &format!("renaming {} to {}", from, to),
        )
        .await?;
        Ok(())
    }

    async fn create_view(&self, view: &ViewSpec) -> Result<()> {
        self.run(&ddl::create_view(view)?, &format!("creating {}", view.name))
            .await
            .map_err(|e| match e {
                MigrateError::Query { message, .. } => MigrateError::view(&view.name, message),
                other => other,
            })?;
        info!("Published view {}", view.name);
        Ok(())
    }

    fn db_type(&self) -> &str {
        "snowflake"
    }

    async fn close(&self) {}
}

#[async_trait]
impl MetricSource for SnowflakeWriter {
    async fn count_rows(&self, spec: &TableSpec) -> Result<i64> {
        let context = format!("counting rows of {}", spec.target_name());
        let result = self
            .run(&target_count_query(&spec.target_name())?, &context)
            .await?;
        parse_i64(result.scalar())
            .ok_or_else(|| MigrateError::query(context, "COUNT(*) returned no value"))
    }

    async fn line_item_metrics(&self) -> Result<MetricSnapshot> {
        let result = self
            .run(
                &target_line_item_metrics_query(ORDER_DETAILS_VIEW)?,
                "computing target line-item metrics",
            )
            .await?;
        Ok(snapshot_from_row(&result))
    }

    fn db_type(&self) -> &str {
        "snowflake"
    }
}

/// Map a failed insert statement to a load error for `table`.
fn as_load_error(table: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Query { message, .. } => MigrateError::load(canonicalize(table), message),
        other => other,
    }
}

/// Positional binding for one value.
///
/// Floats use the shortest round-trip decimal form, decimals their exact
/// text, binary data lower-case hex. NULLs keep the type of their column.
pub fn bind_value(value: &SqlValue<'_>) -> Binding {
    match value {
        SqlValue::Null(t) => null_binding(*t),
        SqlValue::Bool(v) => Binding::boolean(Some(*v)),
        SqlValue::I16(v) => Binding::fixed(Some(v.to_string())),
        SqlValue::I32(v) => Binding::fixed(Some(v.to_string())),
        SqlValue::I64(v) => Binding::fixed(Some(v.to_string())),
        SqlValue::F32(v) => Binding::real(Some(v.to_string())),
        SqlValue::F64(v) => Binding::real(Some(v.to_string())),
        SqlValue::Decimal(v) => Binding::text(Some(v.to_string())),
        SqlValue::Text(s) => Binding::text(Some(s.to_string())),
        SqlValue::Bytes(b) => Binding::text(Some(hex::encode(b))),
        SqlValue::Date(d) => Binding::text(Some(d.format("%Y-%m-%d").to_string())),
        SqlValue::DateTime(dt) => {
            Binding::text(Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        }
    }
}

fn null_binding(t: SqlNullType) -> Binding {
    match t {
        SqlNullType::Bool => Binding::boolean(None),
        SqlNullType::I16 | SqlNullType::I32 | SqlNullType::I64 => Binding::fixed(None),
        SqlNullType::F32 | SqlNullType::F64 => Binding::real(None),
        SqlNullType::Decimal
        | SqlNullType::String
        | SqlNullType::Bytes
        | SqlNullType::Date
        | SqlNullType::DateTime => Binding::text(None),
    }
}

fn parse_i64(cell: Option<&str>) -> Option<i64> {
    let cell = cell?.trim();
    cell.parse::<i64>()
        .ok()
        .or_else(|| cell.parse::<f64>().ok().map(|f| f.round() as i64))
}

fn parse_f64(cell: Option<&str>) -> Option<f64> {
    cell?.trim().parse().ok()
}

fn snapshot_from_row(result: &StatementResult) -> MetricSnapshot {
    let cell = |idx: usize| result.first_row_cell(idx);
    MetricSnapshot {
        gross_revenue: parse_f64(cell(0)),
        discount_amount: parse_f64(cell(1)),
        net_revenue: parse_f64(cell(2)),
        order_count: parse_i64(cell(3)),
        total_quantity: parse_i64(cell(4)),
        avg_days_to_ship: parse_f64(cell(5)),
    }
}
