//! In-memory source and warehouse used by the unit tests.
//!
//! `MemorySource` serves fixed rows per table; `MemoryWarehouse` keeps
//! tables in maps and evaluates views on read by walking the `ViewSpec` join
//! graph and its calculated-column expressions. `StubApi` stands in for the
//! warehouse SQL API over HTTP.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::catalog::{SchemaCatalog, LINE_ITEM_TABLE, ORDER_DETAILS_VIEW, ORDER_TABLE};
use crate::core::identifier::canonicalize;
use crate::core::traits::{MetricSource, SourceReader, TargetWriter};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::core::{ColumnRef, JoinKind, TableSpec, TargetType, ViewSpec};
use crate::error::{MigrateError, Result};
use crate::verify::MetricSnapshot;

fn null_of(data_type: TargetType) -> SqlValue<'static> {
    SqlValue::Null(match data_type {
        TargetType::Integer => SqlNullType::I32,
        TargetType::Varchar(_) | TargetType::Text => SqlNullType::String,
        TargetType::Float => SqlNullType::F64,
        TargetType::Date => SqlNullType::Date,
        TargetType::Binary => SqlNullType::Bytes,
        TargetType::Boolean => SqlNullType::Bool,
    })
}

/// Build a row for `spec`, NULL in every column not listed.
pub fn fill(spec: &TableSpec, values: Vec<(&str, SqlValue<'static>)>) -> Row {
    let mut row: Row = spec.columns.iter().map(|c| null_of(c.data_type)).collect();
    for (column, value) in values {
        let idx = spec
            .columns
            .iter()
            .position(|c| c.source == column)
            .unwrap_or_else(|| panic!("{} has no column {}", spec.name, column));
        row[idx] = value;
    }
    row
}

fn date(y: i32, m: u32, d: u32) -> SqlValue<'static> {
    SqlValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn text(s: &str) -> SqlValue<'static> {
    SqlValue::text_owned(s.to_string())
}

/// A small, referentially consistent Northwind data set.
///
/// - 8 categories
/// - product 4 has no category
/// - order 10250 has no ship date
/// - line (10248, 3) is `unit_price=10, quantity=5, discount=0.1`
pub fn northwind_rows(catalog: &SchemaCatalog) -> HashMap<String, Vec<Row>> {
    let spec = |name: &str| catalog.table(name).unwrap();
    let mut data = HashMap::new();

    let categories = spec("categories");
    data.insert(
        "categories".to_string(),
        (1..=8i16)
            .map(|i| {
                fill(
                    categories,
                    vec![
                        ("category_id", SqlValue::I16(i)),
                        ("category_name", text(&format!("Category {}", i))),
                        ("description", text(&format!("Description of category {}", i))),
                        ("picture", SqlValue::bytes_owned(vec![0x15, 0x1c, i as u8])),
                    ],
                )
            })
            .collect(),
    );

    let customers = spec("customers");
    data.insert(
        "customers".to_string(),
        [
            ("ALFKI", "Alfreds Futterkiste", "Berlin", "Germany"),
            ("ANATR", "Ana Trujillo Emparedados y helados", "México D.F.", "Mexico"),
            ("ANTON", "Antonio Moreno Taquería", "México D.F.", "Mexico"),
        ]
        .iter()
        .map(|(id, company, city, country)| {
            fill(
                customers,
                vec![
                    ("customer_id", text(id)),
                    ("company_name", text(company)),
                    ("city", text(city)),
                    ("country", text(country)),
                ],
            )
        })
        .collect(),
    );

    let employees = spec("employees");
    data.insert(
        "employees".to_string(),
        vec![
            fill(
                employees,
                vec![
                    ("employee_id", SqlValue::I16(1)),
                    ("last_name", text("Davolio")),
                    ("first_name", text("Nancy")),
                    ("title", text("Sales Representative")),
                    ("hire_date", date(1992, 5, 1)),
                    ("city", text("Seattle")),
                    ("reports_to", SqlValue::I16(2)),
                ],
            ),
            fill(
                employees,
                vec![
                    ("employee_id", SqlValue::I16(2)),
                    ("last_name", text("Fuller")),
                    ("first_name", text("Andrew")),
                    ("title", text("Vice President, Sales")),
                    ("hire_date", date(1992, 8, 14)),
                    ("city", text("Tacoma")),
                ],
            ),
        ],
    );

    let suppliers = spec("suppliers");
    data.insert(
        "suppliers".to_string(),
        vec![
            fill(
                suppliers,
                vec![
                    ("supplier_id", SqlValue::I16(1)),
                    ("company_name", text("Exotic Liquids")),
                ],
            ),
            fill(
                suppliers,
                vec![
                    ("supplier_id", SqlValue::I16(2)),
                    ("company_name", text("New Orleans Cajun Delights")),
                ],
            ),
        ],
    );

    let shippers = spec("shippers");
    data.insert(
        "shippers".to_string(),
        ["Speedy Express", "United Package", "Federal Shipping"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                fill(
                    shippers,
                    vec![
                        ("shipper_id", SqlValue::I16(i as i16 + 1)),
                        ("company_name", text(name)),
                    ],
                )
            })
            .collect(),
    );

    let products = spec("products");
    let product = |id: i16, name: &str, category: Option<i16>, price: f32| {
        fill(
            products,
            vec![
                ("product_id", SqlValue::I16(id)),
                ("product_name", text(name)),
                ("supplier_id", SqlValue::I16(1)),
                (
                    "category_id",
                    category.map_or(SqlValue::Null(SqlNullType::I16), SqlValue::I16),
                ),
                ("unit_price", SqlValue::F32(price)),
                ("units_in_stock", SqlValue::I16(10)),
                ("discontinued", SqlValue::I32(0)),
            ],
        )
    };
    data.insert(
        "products".to_string(),
        vec![
            product(1, "Chai", Some(1), 18.0),
            product(2, "Chang", Some(1), 19.0),
            product(3, "Aniseed Syrup", Some(2), 10.0),
            product(4, "Mystery Box", None, 7.5),
        ],
    );

    let orders = spec("orders");
    let order = |id: i16,
                 customer: &str,
                 employee: i16,
                 via: i16,
                 ordered: SqlValue<'static>,
                 shipped: SqlValue<'static>| {
        fill(
            orders,
            vec![
                ("order_id", SqlValue::I16(id)),
                ("customer_id", text(customer)),
                ("employee_id", SqlValue::I16(employee)),
                ("order_date", ordered),
                ("shipped_date", shipped),
                ("ship_via", SqlValue::I16(via)),
                ("freight", SqlValue::F32(32.38)),
            ],
        )
    };
    data.insert(
        "orders".to_string(),
        vec![
            order(10248, "ALFKI", 1, 3, date(1996, 7, 4), date(1996, 7, 16)),
            order(10249, "ANATR", 2, 1, date(1996, 7, 5), date(1996, 7, 10)),
            order(10250, "ANTON", 1, 2, date(1996, 7, 8), SqlValue::Null(SqlNullType::Date)),
        ],
    );

    let details = spec("order_details");
    data.insert(
        "order_details".to_string(),
        vec![
            line(details, 10248, 3, 10.0, 5, 0.1),
            line(details, 10248, 1, 18.0, 12, 0.0),
            line(details, 10249, 2, 19.0, 10, 0.05),
            line(details, 10250, 4, 7.5, 4, 0.0),
        ],
    );

    data
}

/// One order line.
pub fn line(spec: &TableSpec, order: i16, product: i16, price: f32, quantity: i16, discount: f32) -> Row {
    fill(
        spec,
        vec![
            ("order_id", SqlValue::I16(order)),
            ("product_id", SqlValue::I16(product)),
            ("unit_price", SqlValue::F32(price)),
            ("quantity", SqlValue::I16(quantity)),
            ("discount", SqlValue::F32(discount)),
        ],
    )
}

/// Source serving fixed rows per table.
pub struct MemorySource {
    catalog: Arc<SchemaCatalog>,
    tables: HashMap<String, Vec<Row>>,
    offline: bool,
}

impl MemorySource {
    pub fn empty(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            tables: HashMap::new(),
            offline: false,
        }
    }

    pub fn northwind(catalog: Arc<SchemaCatalog>) -> Self {
        let tables = northwind_rows(&catalog);
        Self {
            catalog,
            tables,
            offline: false,
        }
    }

    /// Replace a table's rows.
    pub fn with_rows(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Replace the order lines with `n` generated lines over the sample orders.
    pub fn with_line_items(self, n: usize) -> Self {
        let spec = self.catalog.table(LINE_ITEM_TABLE).unwrap().clone();
        let orders = [10248i16, 10249, 10250];
        let discounts = [0.0f32, 0.05, 0.1];
        let rows = (0..n)
            .map(|i| {
                line(
                    &spec,
                    orders[i % orders.len()],
                    (i % 4) as i16 + 1,
                    10.0 + (i % 7) as f32,
                    (i % 9) as i16 + 1,
                    discounts[i % discounts.len()],
                )
            })
            .collect();
        self.with_rows(LINE_ITEM_TABLE, rows)
    }

    /// Fail every call as if the source were unreachable.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    fn table_rows(&self, name: &str) -> Result<&Vec<Row>> {
        if self.offline {
            return Err(MigrateError::connection("memory-source", "connection refused"));
        }
        self.tables.get(name).ok_or_else(|| {
            MigrateError::query(
                format!("reading {}", name),
                format!("relation \"{}\" does not exist (SQLSTATE 42P01)", name),
            )
        })
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    fn read_table(&self, spec: &TableSpec, fetch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let rows = self.table_rows(&spec.name);
        let chunks: Vec<Vec<Row>> = match &rows {
            Ok(rows) => rows.chunks(fetch_size.max(1)).map(|c| c.to_vec()).collect(),
            Err(_) => Vec::new(),
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        match rows {
            Err(e) => {
                let _ = tx.try_send(Err(e));
            }
            Ok(_) if chunks.is_empty() => {
                let _ = tx.try_send(Ok(Batch::empty_final()));
            }
            Ok(_) => {
                let last = chunks.len() - 1;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let batch = Batch::new(chunk);
                    let batch = if i == last { batch.mark_final() } else { batch };
                    let _ = tx.try_send(Ok(batch));
                }
            }
        }
        rx
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[async_trait]
impl MetricSource for MemorySource {
    async fn count_rows(&self, spec: &TableSpec) -> Result<i64> {
        Ok(self.table_rows(&spec.name)?.len() as i64)
    }

    async fn line_item_metrics(&self) -> Result<MetricSnapshot> {
        let lines_spec = self.catalog.table(LINE_ITEM_TABLE).unwrap();
        let orders_spec = self.catalog.table(ORDER_TABLE).unwrap();
        let lines = self.table_rows(LINE_ITEM_TABLE)?;
        let orders = self.table_rows(ORDER_TABLE)?;

        let col = |spec: &TableSpec, name: &str| spec.target_column_index(name).unwrap();
        let (l_order, l_price, l_qty, l_disc) = (
            col(lines_spec, "order_id"),
            col(lines_spec, "unit_price"),
            col(lines_spec, "quantity"),
            col(lines_spec, "discount"),
        );
        let (o_id, o_ordered, o_shipped) = (
            col(orders_spec, "order_id"),
            col(orders_spec, "order_date"),
            col(orders_spec, "shipped_date"),
        );

        let mut acc = Aggregates::default();
        for row in lines {
            let gross = match (row[l_price].as_f64(), row[l_qty].as_f64()) {
                (Some(p), Some(q)) => Some(p * q),
                _ => None,
            };
            let discount = match (gross, row[l_disc].as_f64()) {
                (Some(g), Some(d)) => Some(g * d),
                _ => None,
            };
            let net = match (gross, discount) {
                (Some(g), Some(d)) => Some(g - d),
                _ => None,
            };
            let days = orders
                .iter()
                .find(|o| same_value(&o[o_id], &row[l_order]))
                .and_then(|o| match (o[o_ordered].as_date(), o[o_shipped].as_date()) {
                    (Some(s), Some(e)) => Some((e - s).num_days() as f64),
                    _ => None,
                });
            acc.add(gross, discount, net, row[l_order].as_i64(), row[l_qty].as_i64(), days);
        }
        Ok(acc.snapshot())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct Aggregates {
    gross: Option<f64>,
    discount: Option<f64>,
    net: Option<f64>,
    orders: HashSet<i64>,
    quantity: Option<i64>,
    days_sum: f64,
    days_n: usize,
}

impl Aggregates {
    fn add(
        &mut self,
        gross: Option<f64>,
        discount: Option<f64>,
        net: Option<f64>,
        order: Option<i64>,
        quantity: Option<i64>,
        days: Option<f64>,
    ) {
        let sum = |acc: &mut Option<f64>, v: Option<f64>| {
            if let Some(v) = v {
                *acc = Some(acc.unwrap_or(0.0) + v);
            }
        };
        sum(&mut self.gross, gross);
        sum(&mut self.discount, discount);
        sum(&mut self.net, net);
        if let Some(order) = order {
            self.orders.insert(order);
        }
        if let Some(q) = quantity {
            self.quantity = Some(self.quantity.unwrap_or(0) + q);
        }
        if let Some(d) = days {
            self.days_sum += d;
            self.days_n += 1;
        }
    }

    fn snapshot(self) -> MetricSnapshot {
        MetricSnapshot {
            gross_revenue: self.gross,
            discount_amount: self.discount,
            net_revenue: self.net,
            order_count: Some(self.orders.len() as i64),
            total_quantity: self.quantity,
            avg_days_to_ship: (self.days_n > 0).then(|| self.days_sum / self.days_n as f64),
        }
    }
}

/// Equality used by join predicates: integers compare by value across widths.
fn same_value(a: &SqlValue<'_>, b: &SqlValue<'_>) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

struct MemTable {
    spec: TableSpec,
    rows: Vec<Row>,
}

#[derive(Default)]
struct WarehouseState {
    bootstrapped: bool,
    tables: HashMap<String, MemTable>,
    views: HashMap<String, ViewSpec>,
    statements: Vec<String>,
    short_writes: HashMap<String, usize>,
    failing_loads: HashSet<String>,
    offline: bool,
}

/// Warehouse keeping tables in memory.
#[derive(Default)]
pub struct MemoryWarehouse {
    state: Mutex<WarehouseState>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently drop the next `n` rows written for logical table `table`.
    pub fn short_write(&self, table: &str, n: usize) {
        self.state.lock().unwrap().short_writes.insert(table.to_string(), n);
    }

    /// Fail every load into logical table `table`.
    pub fn fail_load(&self, table: &str) {
        self.state.lock().unwrap().failing_loads.insert(table.to_string());
    }

    /// Fail every call as if the warehouse were unreachable.
    pub fn go_offline(&self) {
        self.state.lock().unwrap().offline = true;
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.state.lock().unwrap().bootstrapped
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(&canonicalize(name))
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.state.lock().unwrap().views.contains_key(&canonicalize(name))
    }

    pub fn rows(&self, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&canonicalize(name))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Statement log, e.g. `CREATE ORDERS`, `SWAP ORDERS ORDERS__STAGING`.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Evaluate view `name`: output column names and rows.
    pub fn query_view(&self, name: &str) -> Result<(Vec<String>, Vec<Row>)> {
        let state = self.state.lock().unwrap();
        let view = state.views.get(&canonicalize(name)).ok_or_else(|| {
            MigrateError::query(format!("selecting from {}", name), "view does not exist")
        })?;
        let rows = materialize(view, &state.tables)?;
        Ok((view.output_columns(), rows))
    }

    fn lock_online(&self) -> Result<std::sync::MutexGuard<'_, WarehouseState>> {
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(MigrateError::connection("memory-warehouse", "HTTP 503"));
        }
        Ok(state)
    }
}

fn missing_table(name: &str, context: &str) -> MigrateError {
    MigrateError::query(
        format!("{} {}", context, name),
        format!("Table '{}' does not exist or not authorized.", canonicalize(name)),
    )
}

/// Evaluate the join graph and projections of `view` over `tables`.
fn materialize(view: &ViewSpec, tables: &HashMap<String, MemTable>) -> Result<Vec<Row>> {
    let mut bound: HashMap<&str, &MemTable> = HashMap::new();
    for r in view.table_refs() {
        let table = tables
            .get(&canonicalize(&r.table))
            .ok_or_else(|| missing_table(&r.table, "reading"))?;
        bound.insert(r.alias.as_str(), table);
    }

    type Partial<'a> = HashMap<&'a str, Option<usize>>;

    let resolve = |p: &Partial<'_>, c: &ColumnRef| -> Option<SqlValue<'static>> {
        let table = bound.get(c.alias.as_str())?;
        let idx = table.spec.target_column_index(&c.column)?;
        let row = (*p.get(c.alias.as_str())?)?;
        Some(table.rows[row][idx].clone())
    };

    let base = bound[view.base.alias.as_str()];
    let mut partials: Vec<Partial<'_>> = (0..base.rows.len())
        .map(|i| HashMap::from([(view.base.alias.as_str(), Some(i))]))
        .collect();

    for join in &view.joins {
        let alias = join.table.alias.as_str();
        let table = bound[alias];
        let mut next = Vec::new();
        for p in partials {
            let matches: Vec<usize> = (0..table.rows.len())
                .filter(|&j| {
                    join.on.iter().all(|(left, right)| {
                        let lv = resolve(&p, left);
                        let rv = table
                            .spec
                            .target_column_index(&right.column)
                            .map(|idx| &table.rows[j][idx]);
                        matches!((lv, rv), (Some(l), Some(r)) if same_value(&l, r))
                    })
                })
                .collect();

            if matches.is_empty() {
                if join.kind == JoinKind::LeftOuter {
                    let mut p = p;
                    p.insert(alias, None);
                    next.push(p);
                }
            } else {
                for j in matches {
                    let mut q = p.clone();
                    q.insert(alias, Some(j));
                    next.push(q);
                }
            }
        }
        partials = next;
    }

    Ok(partials
        .iter()
        .map(|p| {
            let lookup = |c: &ColumnRef| resolve(p, c);
            view.passthrough
                .iter()
                .map(|proj| lookup(&proj.column).unwrap_or(SqlValue::Null(SqlNullType::String)))
                .chain(view.calculated.iter().map(|calc| calc.expr.eval(&lookup)))
                .collect()
        })
        .collect())
}

#[async_trait]
impl TargetWriter for MemoryWarehouse {
    async fn bootstrap(&self) -> Result<()> {
        let mut state = self.lock_online()?;
        state.bootstrapped = true;
        state.statements.push("BOOTSTRAP".to_string());
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        let mut state = self.lock_online()?;
        state.tables.remove(&canonicalize(name));
        state.statements.push(format!("DROP {}", canonicalize(name)));
        Ok(())
    }

    async fn create_table(&self, spec: &TableSpec, name: &str) -> Result<()> {
        let mut state = self.lock_online()?;
        let key = canonicalize(name);
        if state.tables.contains_key(&key) {
            return Err(MigrateError::query(
                format!("creating {}", name),
                format!("Object '{}' already exists.", key),
            ));
        }
        state.tables.insert(
            key.clone(),
            MemTable {
                spec: spec.clone(),
                rows: Vec::new(),
            },
        );
        state.statements.push(format!("CREATE {}", key));
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock_online()?.tables.contains_key(&canonicalize(name)))
    }

    async fn write_batch(&self, spec: &TableSpec, name: &str, rows: &[Row]) -> Result<u64> {
        let mut state = self.lock_online()?;
        if state.failing_loads.contains(&spec.name) {
            return Err(MigrateError::load(
                canonicalize(name),
                "Numeric value 'abc' is not recognized",
            ));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != spec.columns.len()) {
            return Err(MigrateError::load(
                canonicalize(name),
                format!("expected {} values, got {}", spec.columns.len(), bad.len()),
            ));
        }

        let skip = state.short_writes.get(&spec.name).copied().unwrap_or(0).min(rows.len());
        if skip > 0 {
            if let Some(left) = state.short_writes.get_mut(&spec.name) {
                *left -= skip;
            }
        }

        let table = state
            .tables
            .get_mut(&canonicalize(name))
            .ok_or_else(|| MigrateError::load(canonicalize(name), "table does not exist"))?;
        let kept = &rows[..rows.len() - skip];
        table.rows.extend_from_slice(kept);
        Ok(kept.len() as u64)
    }

    async fn row_count(&self, name: &str) -> Result<i64> {
        let state = self.lock_online()?;
        state
            .tables
            .get(&canonicalize(name))
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| missing_table(name, "counting"))
    }

    async fn swap_tables(&self, name: &str, staging: &str) -> Result<()> {
        let mut state = self.lock_online()?;
        let (a, b) = (canonicalize(name), canonicalize(staging));
        let left = state.tables.remove(&a).ok_or_else(|| missing_table(name, "swapping"))?;
        let Some(right) = state.tables.remove(&b) else {
            state.tables.insert(a, left);
            return Err(missing_table(staging, "swapping"));
        };
        state.tables.insert(a.clone(), right);
        state.tables.insert(b.clone(), left);
        state.statements.push(format!("SWAP {} {}", a, b));
        Ok(())
    }

    async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock_online()?;
        let (a, b) = (canonicalize(from), canonicalize(to));
        if state.tables.contains_key(&b) {
            return Err(MigrateError::query(
                format!("renaming {}", from),
                format!("Object '{}' already exists.", b),
            ));
        }
        let table = state.tables.remove(&a).ok_or_else(|| missing_table(from, "renaming"))?;
        state.tables.insert(b.clone(), table);
        state.statements.push(format!("RENAME {} {}", a, b));
        Ok(())
    }

    async fn create_view(&self, view: &ViewSpec) -> Result<()> {
        let mut state = self.lock_online()?;
        for table in view.referenced_tables() {
            if !state.tables.contains_key(&canonicalize(table)) {
                return Err(MigrateError::view(
                    &view.name,
                    format!("Table '{}' does not exist or not authorized.", canonicalize(table)),
                ));
            }
        }
        state.views.insert(view.name.clone(), view.clone());
        state.statements.push(format!("VIEW {}", view.name));
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[async_trait]
impl MetricSource for MemoryWarehouse {
    async fn count_rows(&self, spec: &TableSpec) -> Result<i64> {
        self.row_count(&spec.target_name()).await
    }

    async fn line_item_metrics(&self) -> Result<MetricSnapshot> {
        self.lock_online().map(drop)?;
        let (columns, rows) = self.query_view(ORDER_DETAILS_VIEW)?;
        let idx = |name: &str| columns.iter().position(|c| c == name).unwrap();
        let (gross, discount, net, order, quantity, days) = (
            idx("GROSS_REVENUE"),
            idx("DISCOUNT_AMOUNT"),
            idx("NET_REVENUE"),
            idx("ORDER_ID"),
            idx("QUANTITY"),
            idx("DAYS_TO_SHIP"),
        );

        let mut acc = Aggregates::default();
        for row in &rows {
            acc.add(
                row[gross].as_f64(),
                row[discount].as_f64(),
                row[net].as_f64(),
                row[order].as_i64(),
                row[quantity].as_i64(),
                row[days].as_f64(),
            );
        }
        Ok(acc.snapshot())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

/// One request received by [`StubApi`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path and query string.
    pub target: String,
    pub body: String,
}

/// Local HTTP server answering with canned `(status, body)` replies, one
/// connection per reply, in order. Stops listening after the last reply.
pub struct StubApi {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubApi {
    pub async fn start(replies: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                answer(stream, status, &body, &recorded).await;
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(stream: TcpStream, status: u16, body: &str, recorded: &Mutex<Vec<RecordedRequest>>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
    }
    let mut request_body = vec![0u8; content_length];
    reader.read_exact(&mut request_body).await.unwrap();

    // Recorded before replying so the caller sees it once its request returns.
    recorded.lock().unwrap().push(RecordedRequest {
        method,
        target,
        body: String::from_utf8(request_body).unwrap(),
    });

    let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}
