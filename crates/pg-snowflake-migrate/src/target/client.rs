//! Warehouse SQL API client (`/api/v2/statements`).
//!
//! One HTTP request runs one statement. Every request names the warehouse,
//! role, timeout and (for scoped statements) the database and schema, so no
//! server-side session state is relied upon.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::auth::JwtAuthenticator;
use crate::config::{KeyMaterial, TargetConfig};
use crate::error::{MigrateError, Result};

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Delay between polls of a statement still running.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One positional (`?`) bind value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: Option<String>,
}

impl Binding {
    pub fn fixed(value: Option<String>) -> Self {
        Self { kind: "FIXED", value }
    }

    pub fn real(value: Option<String>) -> Self {
        Self { kind: "REAL", value }
    }

    pub fn text(value: Option<String>) -> Self {
        Self { kind: "TEXT", value }
    }

    pub fn boolean(value: Option<bool>) -> Self {
        Self {
            kind: "BOOLEAN",
            value: value.map(|b| b.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    warehouse: &'a str,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, &'a Binding>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    statement_status_url: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
    #[serde(default)]
    stats: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

/// Rows and counters returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    /// Column names of the result set.
    pub columns: Vec<String>,
    /// Cell values as text; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows inserted/updated/deleted, for DML.
    pub rows_affected: Option<u64>,
}

impl StatementResult {
    /// First cell of the first row.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }

    /// Cell `idx` of the first row.
    pub fn first_row_cell(&self, idx: usize) -> Option<&str> {
        self.rows.first()?.get(idx)?.as_deref()
    }
}

/// Where a statement runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Warehouse and role only (database provisioning).
    Account,
    /// Pinned to the target database and schema.
    Schema,
}

/// HTTP client for the SQL API.
#[derive(Debug)]
pub struct SqlApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: JwtAuthenticator,
    warehouse: String,
    role: String,
    database: String,
    schema: String,
    timeout_secs: u64,
}

impl SqlApiClient {
    /// Build a client; no request is made until the first statement.
    pub fn new(config: &TargetConfig, material: &KeyMaterial) -> Result<Self> {
        let database = config.database_name().ok_or_else(|| {
            MigrateError::Config("target.database_suffix (or target.database) is required".into())
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("pg-snowflake-migrate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.statement_timeout_secs + 60))
            .build()
            .map_err(|e| MigrateError::connection(config.base_url(), e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            auth: JwtAuthenticator::new(config, material)?,
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            database,
            schema: config.schema_name(),
            timeout_secs: config.statement_timeout_secs,
        })
    }

    /// Target database name (canonical).
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Target schema name (canonical).
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Base URL requests go to.
    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    /// Run one statement with positional bindings.
    ///
    /// SQL failures are returned as [`MigrateError::Query`] with `context`;
    /// authentication and transport failures as connection errors.
    pub async fn execute(
        &self,
        scope: Scope,
        sql: &str,
        bindings: &[Binding],
        context: &str,
    ) -> Result<StatementResult> {
        let (database, schema) = match scope {
            Scope::Account => (None, None),
            Scope::Schema => (Some(self.database.as_str()), Some(self.schema.as_str())),
        };
        let request = StatementRequest {
            statement: sql,
            timeout: self.timeout_secs,
            warehouse: &self.warehouse,
            role: &self.role,
            database,
            schema,
            bindings: bindings
                .iter()
                .enumerate()
                .map(|(i, b)| ((i + 1).to_string(), b))
                .collect(),
        };

        debug!("{}: {} ({} bindings)", context, first_line(sql), bindings.len());

        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        let response = self
            .authorized(self.http.post(&url))?
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .json(&request)
            .send()
            .await?;

        let (mut status, mut body) = self.read_response(response, context).await?;

        // 202: accepted but still running; poll until any other status.
        while status == 202 {
            let status_url = body.statement_status_url.clone().ok_or_else(|| {
                MigrateError::query(context, "statement still running but no status URL returned")
            })?;
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .authorized(self.http.get(format!("{}{}", self.base_url, status_url)))?
                .send()
                .await?;
            (status, body) = self.read_response(response, context).await?;
        }

        let mut result = StatementResult {
            columns: body
                .result_set_meta_data
                .as_ref()
                .map(|m| m.row_type.iter().map(|r| r.name.clone()).collect())
                .unwrap_or_default(),
            rows: std::mem::take(&mut body.data),
            rows_affected: rows_affected(body.stats.as_ref()),
        };

        let partitions = body
            .result_set_meta_data
            .as_ref()
            .map_or(0, |m| m.partition_info.len());
        if partitions > 1 {
            let handle = body.statement_handle.clone().ok_or_else(|| {
                MigrateError::query(context, "partitioned result without a statement handle")
            })?;
            for partition in 1..partitions {
                let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
                let response = self
                    .authorized(self.http.get(url))?
                    .query(&[("partition", partition.to_string())])
                    .send()
                    .await?;
                let (_, page) = self.read_response(response, context).await?;
                result.rows.extend(page.data);
            }
        }

        Ok(result)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(request
            .bearer_auth(self.auth.token()?)
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<(u16, StatementResponse)> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = classify_response(status, &text, &self.base_url, context)?;
        Ok((status, body))
    }
}

/// Map an HTTP status and body to a parsed response or an error.
fn classify_response(
    status: u16,
    body: &str,
    endpoint: &str,
    context: &str,
) -> Result<StatementResponse> {
    // Error bodies are not always JSON; the raw text stands in for the message.
    let parsed = serde_json::from_str::<StatementResponse>(body).ok();
    let message = |parsed: Option<StatementResponse>| {
        parsed
            .and_then(|r| r.message)
            .unwrap_or_else(|| body.to_string())
    };

    match status {
        200 | 202 => serde_json::from_str(body)
            .map_err(|e| MigrateError::query(context, format!("malformed API response: {}", e))),
        401 | 403 => Err(MigrateError::connection(
            endpoint,
            format!(
                "authentication rejected (HTTP {}): {}",
                status,
                message(parsed)
            ),
        )),
        408 | 429 | 500..=599 => Err(MigrateError::connection(
            endpoint,
            format!("HTTP {}: {}", status, body),
        )),
        _ => {
            let (sql_state, code) = parsed
                .as_ref()
                .map_or((None, None), |r| (r.sql_state.clone(), r.code.clone()));
            let message = message(parsed);
            let detail = match (sql_state, code) {
                (Some(state), Some(code)) => {
                    format!("{} (SQLSTATE {}, code {})", message, state, code)
                }
                (Some(state), None) => format!("{} (SQLSTATE {})", message, state),
                _ => format!("{} (HTTP {})", message, status),
            };
            Err(MigrateError::query(context, detail))
        }
    }
}

/// DML row count from the response `stats`.
fn rows_affected(stats: Option<&Value>) -> Option<u64> {
    let stats = stats?;
    let inserted = stats.get("numRowsInserted").and_then(Value::as_u64);
    let updated = stats.get("numRowsUpdated").and_then(Value::as_u64);
    let deleted = stats.get("numRowsDeleted").and_then(Value::as_u64);
    match (inserted, updated, deleted) {
        (None, None, None) => None,
        (i, u, d) => Some(i.unwrap_or(0) + u.unwrap_or(0) + d.unwrap_or(0)),
    }
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or(sql)
}
