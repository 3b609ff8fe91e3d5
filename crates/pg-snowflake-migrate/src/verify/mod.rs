//! Source-vs-target reconciliation.
//!
//! Two read-only checks run against already-migrated state:
//!
//! - **Row counts**: exact `COUNT(*)` equality for every catalog table.
//! - **Metrics**: line-item aggregates from the source tables compared with
//!   the same aggregates over the order-detail view on the target. Revenue
//!   sums and average days to ship pass within the tolerance, order count and
//!   total quantity must match exactly.
//!
//! Mismatches are data in the [`ReconciliationReport`], never errors. Only an
//! unreachable database or a failing query makes [`ReconciliationEngine`]
//! return `Err`.

pub mod metrics;
pub mod types;

pub use types::{
    CheckStatus, MetricCheck, MetricKind, MetricSnapshot, ReconciliationReport, RowCountCheck,
};

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::SchemaCatalog;
use crate::core::traits::MetricSource;
use crate::error::Result;

/// Default tolerance for floating-point metrics.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Compares source and target state and produces a report.
///
/// Holds no state between runs; every call to [`reconcile`](Self::reconcile)
/// queries both sides afresh.
pub struct ReconciliationEngine {
    catalog: Arc<SchemaCatalog>,
    source: Arc<dyn MetricSource>,
    target: Arc<dyn MetricSource>,
    tolerance: f64,
}

impl ReconciliationEngine {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        source: Arc<dyn MetricSource>,
        target: Arc<dyn MetricSource>,
    ) -> Self {
        Self {
            catalog,
            source,
            target,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Override the float metric tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Run both checks.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        info!(
            "Reconciling {} against {}",
            self.source.db_type(),
            self.target.db_type()
        );

        let row_counts = self.check_row_counts().await?;
        let metrics = self.check_metrics().await?;

        let report = ReconciliationReport {
            generated_at: Utc::now(),
            tolerance: self.tolerance,
            row_counts,
            metrics,
        };

        if report.is_clean() {
            info!("Reconciliation clean");
        } else {
            warn!(
                tables = ?report.mismatched_tables(),
                metrics = ?report.failed_metrics(),
                "Reconciliation found mismatches"
            );
        }

        Ok(report)
    }

    /// Exact row-count comparison for every table, in dependency order.
    pub async fn check_row_counts(&self) -> Result<Vec<RowCountCheck>> {
        let mut checks = Vec::with_capacity(self.catalog.table_specs().len());

        for spec in self.catalog.table_specs() {
            let source_rows = self.source.count_rows(spec).await?;
            let target_rows = self.target.count_rows(spec).await?;
            let check = RowCountCheck::new(&spec.name, source_rows, target_rows);

            if check.status.is_ok() {
                info!("{}", check);
            } else {
                warn!("{}", check);
            }
            checks.push(check);
        }

        Ok(checks)
    }

    /// Compare line-item aggregates.
    pub async fn check_metrics(&self) -> Result<Vec<MetricCheck>> {
        let source = self.source.line_item_metrics().await?;
        let target = self.target.line_item_metrics().await?;
        let checks = compare_metrics(&source, &target, self.tolerance);

        for check in &checks {
            if check.passed {
                info!("{}", check);
            } else {
                warn!("{}", check);
            }
        }

        Ok(checks)
    }
}

/// Build the fixed set of metric comparisons from two snapshots.
pub fn compare_metrics(source: &MetricSnapshot, target: &MetricSnapshot, tolerance: f64) -> Vec<MetricCheck> {
    vec![
        MetricCheck::float(
            "gross_revenue",
            "Gross Revenue",
            source.gross_revenue,
            target.gross_revenue,
            tolerance,
        ),
        MetricCheck::float(
            "discount_amount",
            "Discount",
            source.discount_amount,
            target.discount_amount,
            tolerance,
        ),
        MetricCheck::float(
            "net_revenue",
            "Net Revenue",
            source.net_revenue,
            target.net_revenue,
            tolerance,
        ),
        MetricCheck::integer("order_count", "Orders", source.order_count, target.order_count),
        MetricCheck::integer(
            "total_quantity",
            "Quantity",
            source.total_quantity,
            target.total_quantity,
        ),
        MetricCheck::float(
            "avg_days_to_ship",
            "Avg Days to Ship",
            source.avg_days_to_ship,
            target.avg_days_to_ship,
            tolerance,
        ),
    ]
}
