//! Core abstractions shared by every component.
//!
//! - [`schema`]: table and view definitions
//! - [`value`]: SQL value representation and row batches
//! - [`traits`]: source, target, and metric seams
//! - [`identifier`]: identifier canonicalization and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{
    CalculatedColumn, ColumnRef, ColumnSpec, Expr, Join, JoinKind, Projection, TableRef,
    TableSpec, TargetType, ViewSpec,
};
pub use traits::{MetricSource, SourceReader, TargetWriter};
pub use value::{Batch, Row, SqlNullType, SqlValue};
