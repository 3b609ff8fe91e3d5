//! PostgreSQL source reader.
//!
//! Implements [`SourceReader`] (streaming extraction) and [`MetricSource`]
//! (row counts and line-item aggregates) over a deadpool-postgres pool.

use std::borrow::Cow;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::tls::{make_tls_connector, SslMode};
use crate::catalog::{LINE_ITEM_TABLE, ORDER_TABLE};
use crate::config::SourceConfig;
use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::schema::TableSpec;
use crate::core::traits::{MetricSource, SourceReader};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};
use crate::verify::metrics::{postgres_count_query, postgres_line_item_metrics_query};
use crate::verify::MetricSnapshot;

/// Batches buffered between the reader task and the writer.
const CHANNEL_CAPACITY: usize = 4;

/// PostgreSQL source reader.
pub struct PgSourceReader {
    pool: Pool,
    schema: String,
    endpoint: String,
}

impl PgSourceReader {
    /// Build the pool and verify the source is reachable.
    pub async fn connect(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("pg-snowflake-migrate");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let mgr = match make_tls_connector(ssl_mode)? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL source pool"))?;

        let reader = Self {
            pool,
            schema: config.schema.clone(),
            endpoint: config.endpoint(),
        };
        reader.health_check().await?;

        info!("Connected to PostgreSQL source: {}", reader.endpoint);
        Ok(reader)
    }

    /// Run `SELECT 1` on a pooled connection.
    pub async fn health_check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(&self.endpoint, e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&self.endpoint, e.to_string()))?;
        Ok(())
    }

    async fn query_one(&self, sql: &str, context: &str) -> Result<tokio_postgres::Row> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context.to_string()))?;
        debug!("{}: {}", context, sql);
        client
            .query_one(sql, &[])
            .await
            .map_err(|e| statement_error(context, e))
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    fn read_table(&self, spec: &TableSpec, fetch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let schema = self.schema.clone();
        let spec = spec.clone();

        tokio::spawn(async move {
            if let Err(e) = stream_table(pool, &schema, &spec, fetch_size.max(1), &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl MetricSource for PgSourceReader {
    async fn count_rows(&self, spec: &TableSpec) -> Result<i64> {
        let sql = postgres_count_query(&self.schema, &spec.name)?;
        let row = self
            .query_one(&sql, &format!("counting rows of {}", spec.name))
            .await?;
        row.try_get::<_, i64>(0)
            .map_err(|e| decode_error(&format!("counting rows of {}", spec.name), e))
    }

    async fn line_item_metrics(&self) -> Result<MetricSnapshot> {
        let context = "computing source line-item metrics";
        let sql = postgres_line_item_metrics_query(&self.schema, LINE_ITEM_TABLE, ORDER_TABLE)?;
        let row = self.query_one(&sql, context).await?;

        let float = |idx: usize| row.try_get::<_, Option<f64>>(idx);
        let int = |idx: usize| row.try_get::<_, Option<i64>>(idx);
        let decode = |e: tokio_postgres::Error| decode_error(context, e);

        Ok(MetricSnapshot {
            gross_revenue: float(0).map_err(decode)?,
            discount_amount: float(1).map_err(decode)?,
            net_revenue: float(2).map_err(decode)?,
            order_count: int(3).map_err(decode)?,
            total_quantity: int(4).map_err(decode)?,
            avg_days_to_ship: float(5).map_err(decode)?,
        })
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// `SELECT` of a table's source columns, in spec order, ordered by primary key.
pub fn select_query(schema: &str, spec: &TableSpec) -> Result<String> {
    let columns = spec
        .source_columns()
        .into_iter()
        .map(quote_pg)
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", columns, qualify_pg(schema, &spec.name)?);

    if !spec.primary_key.is_empty() {
        let order = spec
            .primary_key
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }

    Ok(sql)
}

/// Stream a table into batches of at most `fetch_size` rows.
async fn stream_table(
    pool: Pool,
    schema: &str,
    spec: &TableSpec,
    fetch_size: usize,
    tx: &mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, format!("getting connection to read {}", spec.name)))?;

    let sql = select_query(schema, spec)?;
    let context = format!("extracting {}", spec.name);
    debug!("{}: {}", context, sql);

    let stream = client
        .query_raw(sql.as_str(), std::iter::empty::<String>())
        .await
        .map_err(|e| statement_error(&context, e))?;
    pin_mut!(stream);

    let mut rows: Vec<Row> = Vec::with_capacity(fetch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let row = row.map_err(|e| statement_error(&context, e))?;
        rows.push(decode_row(&row, spec)?);

        if rows.len() >= fetch_size {
            total += rows.len();
            let batch = Batch::new(std::mem::replace(&mut rows, Vec::with_capacity(fetch_size)));
            if tx.send(Ok(batch)).await.is_err() {
                // Receiver dropped: the migration was abandoned.
                return Ok(());
            }
        }
    }

    total += rows.len();
    debug!("Extracted {} rows from {}", total, spec.name);
    let _ = tx.send(Ok(Batch::new(rows).mark_final())).await;
    Ok(())
}

/// Decode one result row, aligned to `spec.columns`.
fn decode_row(row: &tokio_postgres::Row, spec: &TableSpec) -> Result<Row> {
    let mut values = Vec::with_capacity(spec.columns.len());
    for (idx, column) in spec.columns.iter().enumerate() {
        let type_name = row.columns()[idx].type_().name().to_string();
        let value = decode_value(row, idx, &type_name).map_err(|e| {
            MigrateError::query(
                format!("decoding {}.{} ({})", spec.name, column.source, type_name),
                e,
            )
        })?;
        values.push(value);
    }
    Ok(values)
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    type_name: &str,
) -> std::result::Result<SqlValue<'static>, String> {
    fn get<'r, T: tokio_postgres::types::FromSql<'r>>(
        row: &'r tokio_postgres::Row,
        idx: usize,
    ) -> std::result::Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match type_name {
        "bool" => get::<bool>(row, idx)?
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "int2" => get::<i16>(row, idx)?
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "int4" => get::<i32>(row, idx)?
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "int8" => get::<i64>(row, idx)?
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "float4" => get::<f32>(row, idx)?
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        "float8" => get::<f64>(row, idx)?
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "numeric" => get::<rust_decimal::Decimal>(row, idx)?
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, idx)?
            .map(|s| SqlValue::Text(Cow::Owned(s)))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        "bytea" => get::<Vec<u8>>(row, idx)?
            .map(|b| SqlValue::Bytes(Cow::Owned(b)))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        "date" => get::<chrono::NaiveDate>(row, idx)?
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "timestamp" => get::<chrono::NaiveDateTime>(row, idx)?
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        other => return Err(format!("unsupported source type '{}'", other)),
    };
    Ok(value)
}

/// Classify a driver error: server-side failures are statement errors,
/// everything else (closed socket, TLS, timeouts) stays a connection error.
fn statement_error(context: &str, e: tokio_postgres::Error) -> MigrateError {
    match e.as_db_error() {
        Some(db) => MigrateError::query(
            context,
            format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        ),
        None => MigrateError::Source(e),
    }
}

fn decode_error(context: &str, e: tokio_postgres::Error) -> MigrateError {
    MigrateError::query(context, e.to_string())
}
