//! Type definitions for reconciliation reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Mismatch,
}

impl CheckStatus {
    pub fn from_match(matched: bool) -> Self {
        if matched {
            CheckStatus::Ok
        } else {
            CheckStatus::Mismatch
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CheckStatus::Ok)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => f.write_str("OK"),
            CheckStatus::Mismatch => f.write_str("MISMATCH"),
        }
    }
}

/// Line-item aggregates computed on one side.
///
/// Each field is `None` when the aggregate is SQL NULL (e.g. an empty table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub gross_revenue: Option<f64>,
    pub discount_amount: Option<f64>,
    pub net_revenue: Option<f64>,
    pub order_count: Option<i64>,
    pub total_quantity: Option<i64>,
    pub avg_days_to_ship: Option<f64>,
}

/// How a metric is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Passes when `|source - target| < tolerance`.
    Float,
    /// Passes only on exact equality.
    Integer,
}

/// Source vs. target comparison of one named aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub name: String,
    pub label: String,
    pub kind: MetricKind,
    pub source: f64,
    pub target: f64,
    pub difference: f64,
    pub passed: bool,
}

impl MetricCheck {
    /// Compare a float aggregate; NULL counts as zero.
    pub fn float(name: &str, label: &str, source: Option<f64>, target: Option<f64>, tolerance: f64) -> Self {
        let source = source.unwrap_or(0.0);
        let target = target.unwrap_or(0.0);
        let difference = (source - target).abs();
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: MetricKind::Float,
            source,
            target,
            difference,
            passed: difference < tolerance,
        }
    }

    /// Compare an integer aggregate exactly; NULL counts as zero.
    pub fn integer(name: &str, label: &str, source: Option<i64>, target: Option<i64>) -> Self {
        let source = source.unwrap_or(0);
        let target = target.unwrap_or(0);
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: MetricKind::Integer,
            source: source as f64,
            target: target as f64,
            difference: (source - target).abs() as f64,
            passed: source == target,
        }
    }

    pub fn status(&self) -> CheckStatus {
        CheckStatus::from_match(self.passed)
    }
}

impl fmt::Display for MetricCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MetricKind::Float => write!(
                f,
                "{}: source={:.2}, target={:.2} [{}]",
                self.label,
                self.source,
                self.target,
                self.status()
            ),
            MetricKind::Integer => write!(
                f,
                "{}: source={}, target={} [{}]",
                self.label,
                self.source as i64,
                self.target as i64,
                self.status()
            ),
        }
    }
}

/// Exact row-count comparison for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_rows: i64,
    pub target_rows: i64,
    pub status: CheckStatus,
}

impl RowCountCheck {
    pub fn new(table: &str, source_rows: i64, target_rows: i64) -> Self {
        Self {
            table: table.to_string(),
            source_rows,
            target_rows,
            status: CheckStatus::from_match(source_rows == target_rows),
        }
    }
}

impl fmt::Display for RowCountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: source={}, target={} [{}]",
            self.table, self.source_rows, self.target_rows, self.status
        )
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub tolerance: f64,
    pub row_counts: Vec<RowCountCheck>,
    pub metrics: Vec<MetricCheck>,
}

impl ReconciliationReport {
    /// True when every row count and every metric matched.
    pub fn is_clean(&self) -> bool {
        self.row_counts.iter().all(|c| c.status.is_ok()) && self.metrics.iter().all(|m| m.passed)
    }

    /// Tables whose row counts differ.
    pub fn mismatched_tables(&self) -> Vec<&str> {
        self.row_counts
            .iter()
            .filter(|c| !c.status.is_ok())
            .map(|c| c.table.as_str())
            .collect()
    }

    /// Metrics outside tolerance.
    pub fn failed_metrics(&self) -> Vec<&str> {
        self.metrics
            .iter()
            .filter(|m| !m.passed)
            .map(|m| m.name.as_str())
            .collect()
    }

    pub fn row_count(&self, table: &str) -> Option<&RowCountCheck> {
        self.row_counts.iter().find(|c| c.table == table)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricCheck> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Row Count Verification ===")?;
        for check in &self.row_counts {
            writeln!(f, "  {}", check)?;
        }
        writeln!(f)?;
        writeln!(f, "=== Key Metrics Verification ===")?;
        for metric in &self.metrics {
            writeln!(f, "  {}", metric)?;
        }
        writeln!(f)?;
        writeln!(f, "=== Verification Complete ===")?;
        if self.mismatched_tables().is_empty() {
            writeln!(f, "All row counts match!")?;
        } else {
            writeln!(f, "WARNING: Some row counts do not match!")?;
        }
        if !self.failed_metrics().is_empty() {
            writeln!(f, "WARNING: Some metrics are outside tolerance!")?;
        }
        Ok(())
    }
}
