//! SQL generation for reconciliation queries.
//!
//! Both sides compute the same aggregates, but from different shapes:
//! - PostgreSQL aggregates the raw `order_details` rows (and joins `orders`
//!   for ship dates), casting `real` columns through `numeric` so the sums
//!   are taken over the decimal values the warehouse received.
//! - The warehouse aggregates the calculated columns of the order-detail view.
//!
//! Every query returns one row in the column order of [`METRIC_COLUMNS`].

use crate::core::identifier::{qualify_pg, quote_target};
use crate::error::Result;

/// Column order shared by both metric queries.
pub const METRIC_COLUMNS: [&str; 6] = [
    "gross_revenue",
    "discount_amount",
    "net_revenue",
    "order_count",
    "total_quantity",
    "avg_days_to_ship",
];

/// `COUNT(*)` of a source table, as `int8`.
pub fn postgres_count_query(schema: &str, table: &str) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*)::int8 AS row_count FROM {}",
        qualify_pg(schema, table)?
    ))
}

/// Line-item aggregates over the source tables.
///
/// Ship-date differences come from a left join so lines without a parent
/// order still contribute to the revenue sums; `AVG` skips NULL differences.
pub fn postgres_line_item_metrics_query(schema: &str, line_items: &str, orders: &str) -> Result<String> {
    let gross = "od.unit_price::numeric * od.quantity";
    let discount = "od.unit_price::numeric * od.quantity * od.discount::numeric";

    Ok(format!(
        r#"SELECT
    SUM({gross})::float8 AS gross_revenue,
    SUM({discount})::float8 AS discount_amount,
    SUM({gross} - {discount})::float8 AS net_revenue,
    COUNT(DISTINCT od.order_id)::int8 AS order_count,
    SUM(od.quantity)::int8 AS total_quantity,
    AVG(o.shipped_date - o.order_date)::float8 AS avg_days_to_ship
FROM {line_items} od
LEFT JOIN {orders} o ON od.order_id = o.order_id"#,
        gross = gross,
        discount = discount,
        line_items = qualify_pg(schema, line_items)?,
        orders = qualify_pg(schema, orders)?,
    ))
}

/// `COUNT(*)` of a warehouse table in the session database and schema.
pub fn target_count_query(table: &str) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*) AS ROW_COUNT FROM {}",
        quote_target(table)?
    ))
}

/// Line-item aggregates over the order-detail view's calculated columns.
pub fn target_line_item_metrics_query(view: &str) -> Result<String> {
    Ok(format!(
        r#"SELECT
    SUM(GROSS_REVENUE) AS GROSS_REVENUE,
    SUM(DISCOUNT_AMOUNT) AS DISCOUNT_AMOUNT,
    SUM(NET_REVENUE) AS NET_REVENUE,
    COUNT(DISTINCT ORDER_ID) AS ORDER_COUNT,
    SUM(QUANTITY) AS TOTAL_QUANTITY,
    AVG(DAYS_TO_SHIP) AS AVG_DAYS_TO_SHIP
FROM {}"#,
        quote_target(view)?
    ))
}
