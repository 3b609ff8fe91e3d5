//! Warehouse DDL and DML text generation.
//!
//! All identifiers go through [`quote_target`]; values never appear in the
//! generated text and are bound positionally instead.

use crate::core::identifier::quote_target;
use crate::core::{Expr, TableSpec, TargetType, ViewSpec};
use crate::error::Result;

pub fn create_database(database: &str) -> Result<String> {
    Ok(format!("CREATE DATABASE IF NOT EXISTS {}", quote_target(database)?))
}

pub fn create_schema(database: &str, schema: &str) -> Result<String> {
    Ok(format!(
        "CREATE SCHEMA IF NOT EXISTS {}.{}",
        quote_target(database)?,
        quote_target(schema)?
    ))
}

pub fn drop_table(name: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_target(name)?))
}

/// `CREATE TABLE` for `spec`'s target columns under `name`.
pub fn create_table(spec: &TableSpec, name: &str) -> Result<String> {
    let mut ddl = format!("CREATE TABLE {} (\n", quote_target(name)?);

    for col in &spec.columns {
        let nullable = if col.nullable { "" } else { " NOT NULL" };
        ddl.push_str(&format!(
            "    {} {}{},\n",
            quote_target(&col.target)?,
            col.data_type.sql(),
            nullable
        ));
    }

    let pk = spec
        .target_primary_key()
        .iter()
        .map(|c| quote_target(c))
        .collect::<Result<Vec<_>>>()?;
    if pk.is_empty() {
        // Drop the trailing ",\n" of the last column.
        ddl.truncate(ddl.len() - 2);
        ddl.push('\n');
    } else {
        ddl.push_str(&format!("    PRIMARY KEY ({})\n", pk.join(", ")));
    }

    ddl.push(')');
    Ok(ddl)
}

pub fn table_exists() -> &'static str {
    "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = CURRENT_SCHEMA() AND TABLE_NAME = ?"
}

pub fn row_count(name: &str) -> Result<String> {
    Ok(format!("SELECT COUNT(*) FROM {}", quote_target(name)?))
}

pub fn swap_tables(name: &str, staging: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} SWAP WITH {}",
        quote_target(name)?,
        quote_target(staging)?
    ))
}

pub fn rename_table(from: &str, to: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_target(from)?,
        quote_target(to)?
    ))
}

/// Multi-row insert with `rows` placeholder tuples.
///
/// Binary and date columns are bound as text and converted in the
/// `SELECT` list, since the API binds only scalar text-like types.
pub fn insert_rows(spec: &TableSpec, name: &str, rows: usize) -> Result<String> {
    let columns = spec
        .columns
        .iter()
        .map(|c| quote_target(&c.target))
        .collect::<Result<Vec<_>>>()?;

    let select = spec
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let slot = format!("column{}", i + 1);
            match c.data_type {
                TargetType::Binary => format!("TO_BINARY({}, 'HEX')", slot),
                TargetType::Date => format!("TO_DATE({})", slot),
                _ => slot,
            }
        })
        .collect::<Vec<_>>();

    let tuple = format!("({})", vec!["?"; spec.columns.len()].join(", "));
    let values = vec![tuple.as_str(); rows].join(", ");

    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM VALUES {}",
        quote_target(name)?,
        columns.join(", "),
        select.join(", "),
        values
    ))
}

/// `CREATE OR REPLACE VIEW` for `view`.
pub fn create_view(view: &ViewSpec) -> Result<String> {
    let mut select = Vec::new();
    for p in &view.passthrough {
        let source = format!("{}.{}", p.column.alias, quote_target(&p.column.column)?);
        let output = p.output_name();
        if output == p.column.column {
            select.push(source);
        } else {
            select.push(format!("{} AS {}", source, quote_target(&output)?));
        }
    }
    for calc in &view.calculated {
        select.push(format!("{} AS {}", render_expr(&calc.expr)?, quote_target(&calc.name)?));
    }

    let mut sql = format!(
        "CREATE OR REPLACE VIEW {} AS\nSELECT\n    {}\nFROM {} {}",
        quote_target(&view.name)?,
        select.join(",\n    "),
        quote_target(&view.base.table)?,
        view.base.alias
    );

    for join in &view.joins {
        let predicates = join
            .on
            .iter()
            .map(|(left, right)| {
                Ok(format!(
                    "{}.{} = {}.{}",
                    left.alias,
                    quote_target(&left.column)?,
                    right.alias,
                    quote_target(&right.column)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(
            "\n{} {} {} ON {}",
            join.kind.sql(),
            quote_target(&join.table.table)?,
            join.table.alias,
            predicates.join(" AND ")
        ));
    }

    Ok(sql)
}

fn render_expr(expr: &Expr) -> Result<String> {
    Ok(match expr {
        Expr::Column(c) => format!("{}.{}", c.alias, quote_target(&c.column)?),
        Expr::Mul(a, b) => format!("({} * {})", render_expr(a)?, render_expr(b)?),
        Expr::Sub(a, b) => format!("({} - {})", render_expr(a)?, render_expr(b)?),
        Expr::DaysBetween { start, end } => {
            format!("DATEDIFF(day, {}, {})", render_expr(start)?, render_expr(end)?)
        }
    })
}
