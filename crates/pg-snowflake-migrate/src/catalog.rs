//! Static registry of the migrated tables and published views.
//!
//! The catalog owns every [`TableSpec`] and [`ViewSpec`] for the life of the
//! process. Construction validates two things up front:
//!
//! - the table dependency graph is closed and acyclic, and
//! - every column a view joins on, projects, or computes from exists in the
//!   target column list of the table its alias points at.
//!
//! Load order is derived from the graph rather than from list position, so
//! a misordered declaration cannot silently load a fact table before its
//! dimensions.

use std::collections::{HashMap, HashSet};

use crate::core::identifier::validate_identifier;
use crate::core::schema::{ColumnRef, Expr, JoinKind, TableSpec, TargetType, ViewSpec};
use crate::error::{MigrateError, Result};

/// Target name of the order-line reporting view.
pub const ORDER_DETAILS_VIEW: &str = "ORDER_DETAILS_VIEW";

/// Target name of the product reporting view.
pub const PRODUCT_VIEW: &str = "PRODUCT_VIEW";

/// Logical name of the line-item fact table.
pub const LINE_ITEM_TABLE: &str = "order_details";

/// Logical name of the order header table.
pub const ORDER_TABLE: &str = "orders";

/// Registry of table and view definitions.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    /// Tables in dependency order.
    tables: Vec<TableSpec>,
    views: Vec<ViewSpec>,
}

impl SchemaCatalog {
    /// Build and validate a catalog.
    pub fn new(tables: Vec<TableSpec>, views: Vec<ViewSpec>) -> Result<Self> {
        let tables = dependency_order(tables)?;
        let catalog = Self { tables, views };
        for view in &catalog.views {
            catalog.check_view(view)?;
        }
        Ok(catalog)
    }

    /// The Northwind tables and the two reporting views.
    pub fn northwind() -> Result<Self> {
        Self::new(northwind_tables(), northwind_views())
    }

    /// Tables in dependency order: every table follows all of its predecessors.
    pub fn table_specs(&self) -> &[TableSpec] {
        &self.tables
    }

    /// View definitions.
    pub fn view_specs(&self) -> &[ViewSpec] {
        &self.views
    }

    /// Look up a table by logical or target name.
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Look up a view by name.
    pub fn view(&self, name: &str) -> Option<&ViewSpec> {
        self.views.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Group tables into waves; a table's predecessors are all in earlier waves.
    ///
    /// Tables within a wave are mutually independent and may load concurrently.
    pub fn load_waves(&self) -> Vec<Vec<&TableSpec>> {
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut waves: Vec<Vec<&TableSpec>> = Vec::new();

        for table in &self.tables {
            let wave = table
                .depends_on
                .iter()
                .filter_map(|d| level.get(d.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(&table.name, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(table);
        }

        waves
    }

    /// Every table that directly or transitively requires `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let mut affected: HashSet<&str> = HashSet::new();
        affected.insert(name);
        let mut dependents = Vec::new();

        // Tables are topologically sorted, so one forward pass sees every
        // predecessor before its dependents.
        for table in &self.tables {
            if table.depends_on.iter().any(|d| affected.contains(d.as_str())) {
                affected.insert(&table.name);
                dependents.push(table.name.as_str());
            }
        }

        dependents
    }

    /// Fail unless every column reference in `view` resolves to a target column.
    fn check_view(&self, view: &ViewSpec) -> Result<()> {
        validate_identifier(&view.name)?;

        let mut aliases: HashMap<&str, &TableSpec> = HashMap::new();
        let mut joined: HashSet<&str> = HashSet::new();

        for table_ref in view.table_refs() {
            let table = self.table(&table_ref.table).ok_or_else(|| {
                MigrateError::view(
                    &view.name,
                    format!("references unknown table '{}'", table_ref.table),
                )
            })?;
            if aliases.insert(&table_ref.alias, table).is_some() {
                return Err(MigrateError::view(
                    &view.name,
                    format!("alias '{}' is used twice", table_ref.alias),
                ));
            }
        }

        let resolve = |c: &ColumnRef| -> Result<()> {
            let table = aliases.get(c.alias.as_str()).ok_or_else(|| {
                MigrateError::view(&view.name, format!("unknown alias in '{}'", c))
            })?;
            if table.target_column(&c.column).is_none() {
                return Err(MigrateError::view(
                    &view.name,
                    format!("column '{}' does not exist in {}", c, table.target_name()),
                ));
            }
            Ok(())
        };

        joined.insert(&view.base.alias);
        for join in &view.joins {
            for (left, right) in &join.on {
                resolve(left)?;
                resolve(right)?;
                if !joined.contains(left.alias.as_str()) {
                    return Err(MigrateError::view(
                        &view.name,
                        format!("join predicate '{}' is not reachable before '{}'", left, join.table.alias),
                    ));
                }
                if right.alias != join.table.alias {
                    return Err(MigrateError::view(
                        &view.name,
                        format!("join predicate '{}' must reference '{}'", right, join.table.alias),
                    ));
                }
            }
            joined.insert(&join.table.alias);
        }

        for column in view.column_refs() {
            resolve(column)?;
        }

        let outputs = view.output_columns();
        let unique: HashSet<&String> = outputs.iter().collect();
        if unique.len() != outputs.len() {
            return Err(MigrateError::view(&view.name, "duplicate output column names"));
        }

        Ok(())
    }
}

/// Sort tables so every table follows its predecessors.
///
/// Among tables that are ready at the same time, declaration order wins,
/// which keeps the order stable and readable in logs.
fn dependency_order(tables: Vec<TableSpec>) -> Result<Vec<TableSpec>> {
    let mut names: HashSet<String> = HashSet::new();
    for table in &tables {
        validate_identifier(&table.name)?;
        if !names.insert(table.name.clone()) {
            return Err(MigrateError::Dependency(format!(
                "table '{}' is declared twice",
                table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "table '{}' has no columns",
                table.name
            )));
        }
        for pk in &table.primary_key {
            if !table.columns.iter().any(|c| &c.source == pk) {
                return Err(MigrateError::Config(format!(
                    "primary key column '{}' is not a column of '{}'",
                    pk, table.name
                )));
            }
        }
    }

    for table in &tables {
        for dep in &table.depends_on {
            if !names.contains(dep) {
                return Err(MigrateError::Dependency(format!(
                    "table '{}' depends on unknown table '{}'",
                    table.name, dep
                )));
            }
        }
    }

    let mut remaining = tables;
    let mut ordered: Vec<TableSpec> = Vec::with_capacity(remaining.len());
    let mut placed: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|t| t.depends_on.iter().all(|d| placed.contains(d)));

        match ready {
            Some(idx) => {
                let table = remaining.remove(idx);
                placed.insert(table.name.clone());
                ordered.push(table);
            }
            None => {
                let stuck: Vec<&str> = remaining.iter().map(|t| t.name.as_str()).collect();
                return Err(MigrateError::Dependency(format!(
                    "dependency cycle among tables: {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    Ok(ordered)
}

fn northwind_tables() -> Vec<TableSpec> {
    use TargetType::{Binary, Date, Float, Integer, Text, Varchar};

    vec![
        TableSpec::new("categories")
            .column("category_id", Integer)
            .column("category_name", Varchar(255))
            .column("description", Text)
            .column("picture", Binary)
            .primary_key(&["category_id"]),
        TableSpec::new("customers")
            .column("customer_id", Varchar(10))
            .column("company_name", Varchar(255))
            .column("contact_name", Varchar(255))
            .column("contact_title", Varchar(255))
            .column("address", Varchar(255))
            .column("city", Varchar(255))
            .column("region", Varchar(255))
            .column("postal_code", Varchar(255))
            .column("country", Varchar(255))
            .column("phone", Varchar(255))
            .column("fax", Varchar(255))
            .primary_key(&["customer_id"]),
        TableSpec::new("employees")
            .column("employee_id", Integer)
            .column("last_name", Varchar(255))
            .column("first_name", Varchar(255))
            .column("title", Varchar(255))
            .column("title_of_courtesy", Varchar(255))
            .column("birth_date", Date)
            .column("hire_date", Date)
            .column("address", Varchar(255))
            .column("city", Varchar(255))
            .column("region", Varchar(255))
            .column("postal_code", Varchar(255))
            .column("country", Varchar(255))
            .column("home_phone", Varchar(255))
            .column("extension", Varchar(255))
            .column("photo", Binary)
            .column("notes", Text)
            .column("reports_to", Integer)
            .column("photo_path", Varchar(255))
            .primary_key(&["employee_id"]),
        TableSpec::new("suppliers")
            .column("supplier_id", Integer)
            .column("company_name", Varchar(255))
            .column("contact_name", Varchar(255))
            .column("contact_title", Varchar(255))
            .column("address", Varchar(255))
            .column("city", Varchar(255))
            .column("region", Varchar(255))
            .column("postal_code", Varchar(255))
            .column("country", Varchar(255))
            .column("phone", Varchar(255))
            .column("fax", Varchar(255))
            .column("homepage", Text)
            .primary_key(&["supplier_id"]),
        TableSpec::new("shippers")
            .column("shipper_id", Integer)
            .column("company_name", Varchar(255))
            .column("phone", Varchar(255))
            .primary_key(&["shipper_id"]),
        TableSpec::new("products")
            .column("product_id", Integer)
            .column("product_name", Varchar(255))
            .column("supplier_id", Integer)
            .column("category_id", Integer)
            .column("quantity_per_unit", Varchar(255))
            .column("unit_price", Float)
            .column("units_in_stock", Integer)
            .column("units_on_order", Integer)
            .column("reorder_level", Integer)
            .column("discontinued", Integer)
            .primary_key(&["product_id"])
            .depends_on(&["categories"]),
        TableSpec::new("orders")
            .column("order_id", Integer)
            .column("customer_id", Varchar(10))
            .column("employee_id", Integer)
            .column("order_date", Date)
            .column("required_date", Date)
            .column("shipped_date", Date)
            .column("ship_via", Integer)
            .column("freight", Float)
            .column("ship_name", Varchar(255))
            .column("ship_address", Varchar(255))
            .column("ship_city", Varchar(255))
            .column("ship_region", Varchar(255))
            .column("ship_postal_code", Varchar(255))
            .column("ship_country", Varchar(255))
            .primary_key(&["order_id"])
            .depends_on(&["customers", "employees", "shippers"]),
        TableSpec::new("order_details")
            .column("order_id", Integer)
            .column("product_id", Integer)
            .column("unit_price", Float)
            .column("quantity", Integer)
            .column("discount", Float)
            .primary_key(&["order_id", "product_id"])
            .depends_on(&["orders", "products"]),
    ]
}

fn northwind_views() -> Vec<ViewSpec> {
    let gross = || Expr::mul(Expr::col("od", "unit_price"), Expr::col("od", "quantity"));
    let discount = || Expr::mul(gross(), Expr::col("od", "discount"));

    let order_details = ViewSpec::new(ORDER_DETAILS_VIEW, "order_details", "od")
        .join(JoinKind::Inner, "orders", "o", ColumnRef::new("od", "order_id"), "order_id")
        .join(JoinKind::LeftOuter, "customers", "c", ColumnRef::new("o", "customer_id"), "customer_id")
        .join(JoinKind::LeftOuter, "employees", "e", ColumnRef::new("o", "employee_id"), "employee_id")
        .join(JoinKind::LeftOuter, "shippers", "s", ColumnRef::new("o", "ship_via"), "shipper_id")
        .join(JoinKind::LeftOuter, "products", "p", ColumnRef::new("od", "product_id"), "product_id")
        .join(JoinKind::LeftOuter, "categories", "cat", ColumnRef::new("p", "category_id"), "category_id")
        .select("od", &["order_id", "product_id", "unit_price", "quantity", "discount"])
        .select("o", &["order_date", "shipped_date", "customer_id", "employee_id", "ship_via"])
        .select_as("c", "company_name", "customer_company")
        .select_as("c", "contact_name", "customer_contact")
        .select_as("c", "contact_title", "customer_title")
        .select_as("c", "city", "customer_city")
        .select_as("c", "country", "customer_country")
        .select_as("e", "last_name", "employee_last_name")
        .select_as("e", "first_name", "employee_name")
        .select_as("e", "title", "employee_title")
        .select("e", &["hire_date"])
        .select_as("e", "city", "employee_city")
        .select_as("s", "company_name", "shipping_company")
        .select("p", &["product_name", "category_id"])
        .select("cat", &["category_name"])
        .calculate("gross_revenue", gross())
        .calculate("discount_amount", discount())
        .calculate("net_revenue", Expr::sub(gross(), discount()))
        .calculate(
            "days_to_ship",
            Expr::days_between(Expr::col("o", "order_date"), Expr::col("o", "shipped_date")),
        );

    let products = ViewSpec::new(PRODUCT_VIEW, "products", "p")
        .join(JoinKind::LeftOuter, "categories", "c", ColumnRef::new("p", "category_id"), "category_id")
        .select(
            "p",
            &[
                "product_id",
                "product_name",
                "supplier_id",
                "category_id",
                "unit_price",
                "units_in_stock",
                "units_on_order",
            ],
        )
        .select("c", &["category_name"])
        .select_as("c", "description", "category_description");

    vec![order_details, products]
}
