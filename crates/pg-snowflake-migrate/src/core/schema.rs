//! Table and view definitions.
//!
//! These types describe the fixed set of base tables and derived views the
//! migration moves. They are built once at process start by the
//! [`SchemaCatalog`](crate::catalog::SchemaCatalog) and never mutated.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::canonicalize;
use super::value::{SqlNullType, SqlValue};

/// Target column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Integer,
    Varchar(u32),
    Text,
    Float,
    Date,
    Binary,
    Boolean,
}

impl TargetType {
    /// SQL type name as used in target DDL.
    pub fn sql(&self) -> String {
        match self {
            TargetType::Integer => "INTEGER".to_string(),
            TargetType::Varchar(len) => format!("VARCHAR({})", len),
            TargetType::Text => "TEXT".to_string(),
            TargetType::Float => "FLOAT".to_string(),
            TargetType::Date => "DATE".to_string(),
            TargetType::Binary => "BINARY".to_string(),
            TargetType::Boolean => "BOOLEAN".to_string(),
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// One column of a base table: source name, canonical target name, type, nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name on the source.
    pub source: String,
    /// Column name on the target (canonical form of `source`).
    pub target: String,
    /// Target column type.
    pub data_type: TargetType,
    /// Whether the target column accepts NULL.
    pub nullable: bool,
}

impl ColumnSpec {
    /// Create a nullable column whose target name is the canonical source name.
    pub fn new(source: impl Into<String>, data_type: TargetType) -> Self {
        let source = source.into();
        Self {
            target: canonicalize(&source),
            source,
            data_type,
            nullable: true,
        }
    }
}

/// A base table to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Logical (source) table name.
    pub name: String,
    /// Columns in load order.
    pub columns: Vec<ColumnSpec>,
    /// Primary key column names (source names).
    pub primary_key: Vec<String>,
    /// Logical names of tables that must be loaded before this one.
    pub depends_on: Vec<String>,
}

impl TableSpec {
    /// Start a table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Append a column.
    pub fn column(mut self, source: &str, data_type: TargetType) -> Self {
        self.columns.push(ColumnSpec::new(source, data_type));
        self
    }

    /// Set the primary key; key columns become NOT NULL.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        for col in &mut self.columns {
            if self.primary_key.contains(&col.source) {
                col.nullable = false;
            }
        }
        self
    }

    /// Declare required predecessors.
    pub fn depends_on(mut self, tables: &[&str]) -> Self {
        self.depends_on = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Canonical target table name.
    pub fn target_name(&self) -> String {
        canonicalize(&self.name)
    }

    /// Name of the staging table used by the staged-swap load mode.
    pub fn staging_name(&self) -> String {
        format!("{}__STAGING", self.target_name())
    }

    /// Source column names in load order.
    pub fn source_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.source.as_str()).collect()
    }

    /// Target column names in load order.
    pub fn target_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.target.as_str()).collect()
    }

    /// Look up a column by its target name.
    pub fn target_column(&self, target: &str) -> Option<&ColumnSpec> {
        let wanted = canonicalize(target);
        self.columns.iter().find(|c| c.target == wanted)
    }

    /// Position of a target column in load order.
    pub fn target_column_index(&self, target: &str) -> Option<usize> {
        let wanted = canonicalize(target);
        self.columns.iter().position(|c| c.target == wanted)
    }

    /// Primary key in target naming.
    pub fn target_primary_key(&self) -> Vec<String> {
        self.primary_key.iter().map(|c| canonicalize(c)).collect()
    }
}

/// How a joined table attaches to the rows built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Rows without a match are dropped.
    Inner,
    /// Rows without a match are kept with NULLs for the joined columns.
    LeftOuter,
}

impl JoinKind {
    /// SQL keyword for the join.
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::LeftOuter => "LEFT JOIN",
        }
    }
}

/// A table occurrence in a view's FROM clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// Logical table name.
    pub table: String,
    /// Alias used by column references.
    pub alias: String,
}

impl TableRef {
    pub fn new(table: &str, alias: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
        }
    }
}

/// A column reached through a table alias, named by its target column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: &str, column: &str) -> Self {
        Self {
            alias: alias.to_string(),
            column: canonicalize(column),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// One edge of a view's join graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    /// Equality predicates `(already joined column, column of the joined table)`.
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

/// A column copied into the view unchanged, optionally renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub column: ColumnRef,
    pub alias: Option<String>,
}

impl Projection {
    /// Name of the column in the view.
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(alias) => canonicalize(alias),
            None => self.column.column.clone(),
        }
    }
}

/// Expression over view columns, evaluated per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Column(ColumnRef),
    Mul(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    /// Whole days from `start` to `end`; NULL if either side is NULL.
    DaysBetween { start: Box<Expr>, end: Box<Expr> },
}

impl Expr {
    pub fn col(alias: &str, column: &str) -> Self {
        Expr::Column(ColumnRef::new(alias, column))
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::Mul(Box::new(lhs), Box::new(rhs))
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::Sub(Box::new(lhs), Box::new(rhs))
    }

    pub fn days_between(start: Expr, end: Expr) -> Self {
        Expr::DaysBetween {
            start: Box::new(start),
            end: Box::new(end),
        }
    }

    /// Collect every column this expression reads.
    pub fn column_refs<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Mul(a, b) | Expr::Sub(a, b) => {
                a.column_refs(out);
                b.column_refs(out);
            }
            Expr::DaysBetween { start, end } => {
                start.column_refs(out);
                end.column_refs(out);
            }
        }
    }

    /// Evaluate against one joined row.
    ///
    /// Arithmetic is done in `f64`. Any NULL operand yields NULL.
    pub fn eval<F>(&self, resolve: &F) -> SqlValue<'static>
    where
        F: Fn(&ColumnRef) -> Option<SqlValue<'static>>,
    {
        match self {
            Expr::Column(c) => resolve(c).unwrap_or(SqlValue::Null(SqlNullType::String)),
            Expr::Mul(a, b) => match (a.eval(resolve).as_f64(), b.eval(resolve).as_f64()) {
                (Some(x), Some(y)) => SqlValue::F64(x * y),
                _ => SqlValue::Null(SqlNullType::F64),
            },
            Expr::Sub(a, b) => match (a.eval(resolve).as_f64(), b.eval(resolve).as_f64()) {
                (Some(x), Some(y)) => SqlValue::F64(x - y),
                _ => SqlValue::Null(SqlNullType::F64),
            },
            Expr::DaysBetween { start, end } => {
                match (start.eval(resolve).as_date(), end.eval(resolve).as_date()) {
                    (Some(s), Some(e)) => SqlValue::I64((e - s).num_days()),
                    _ => SqlValue::Null(SqlNullType::I64),
                }
            }
        }
    }
}

/// A column computed from other columns of the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedColumn {
    pub name: String,
    pub expr: Expr,
}

impl CalculatedColumn {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self {
            name: canonicalize(name),
            expr,
        }
    }
}

/// A derived reporting view over the base tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    /// View name (canonical).
    pub name: String,
    /// Driving table of the FROM clause.
    pub base: TableRef,
    /// Join edges, applied in order.
    pub joins: Vec<Join>,
    /// Columns copied through.
    pub passthrough: Vec<Projection>,
    /// Columns computed per row.
    pub calculated: Vec<CalculatedColumn>,
}

impl ViewSpec {
    /// Start a view definition driven by `table AS alias`.
    pub fn new(name: &str, table: &str, alias: &str) -> Self {
        Self {
            name: canonicalize(name),
            base: TableRef::new(table, alias),
            joins: Vec::new(),
            passthrough: Vec::new(),
            calculated: Vec::new(),
        }
    }

    /// Add a join edge on a single equality predicate.
    pub fn join(mut self, kind: JoinKind, table: &str, alias: &str, left: ColumnRef, right_col: &str) -> Self {
        let right = ColumnRef::new(alias, right_col);
        self.joins.push(Join {
            kind,
            table: TableRef::new(table, alias),
            on: vec![(left, right)],
        });
        self
    }

    /// Add passthrough columns from one alias.
    pub fn select(mut self, alias: &str, columns: &[&str]) -> Self {
        for column in columns {
            self.passthrough.push(Projection {
                column: ColumnRef::new(alias, column),
                alias: None,
            });
        }
        self
    }

    /// Add a renamed passthrough column.
    pub fn select_as(mut self, alias: &str, column: &str, output: &str) -> Self {
        self.passthrough.push(Projection {
            column: ColumnRef::new(alias, column),
            alias: Some(output.to_string()),
        });
        self
    }

    /// Add a calculated column.
    pub fn calculate(mut self, name: &str, expr: Expr) -> Self {
        self.calculated.push(CalculatedColumn::new(name, expr));
        self
    }

    /// Every table occurrence, base first.
    pub fn table_refs(&self) -> Vec<&TableRef> {
        std::iter::once(&self.base)
            .chain(self.joins.iter().map(|j| &j.table))
            .collect()
    }

    /// Logical names of the base tables this view reads.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for r in self.table_refs() {
            if !tables.contains(&r.table.as_str()) {
                tables.push(&r.table);
            }
        }
        tables
    }

    /// Output column names in order (passthrough, then calculated).
    pub fn output_columns(&self) -> Vec<String> {
        self.passthrough
            .iter()
            .map(Projection::output_name)
            .chain(self.calculated.iter().map(|c| c.name.clone()))
            .collect()
    }

    /// Every column reference in the view: join predicates, projections, expressions.
    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut refs = Vec::new();
        for join in &self.joins {
            for (left, right) in &join.on {
                refs.push(left);
                refs.push(right);
            }
        }
        refs.extend(self.passthrough.iter().map(|p| &p.column));
        for calc in &self.calculated {
            calc.expr.column_refs(&mut refs);
        }
        refs
    }
}
