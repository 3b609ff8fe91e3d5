//! SQL value types for moving rows between the source and the warehouse.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Type hint for NULL values so the target binding carries the right type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    String,
    Bytes,
    Date,
    DateTime,
}

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so values decoded from a borrowed
/// buffer do not allocate until they must outlive it.
///
/// `F32` is kept distinct from `F64`: single-precision source columns
/// (`real`) are rendered through `f32`'s shortest decimal form, so `0.1`
/// stays `0.1` on the target rather than widening to `0.10000000149`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint.
    Null(SqlNullType),

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real/float4).
    F32(f32),

    /// 64-bit floating point (double precision/float8).
    F64(f64),

    /// Decimal value with arbitrary precision (numeric).
    Decimal(Decimal),

    /// Text/string data.
    Text(Cow<'a, str>),

    /// Binary data.
    Bytes(Cow<'a, [u8]>),

    /// Date without time component.
    Date(NaiveDate),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

/// A fully owned row, aligned to a table's column list.
pub type Row = Vec<SqlValue<'static>>;

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Numeric view of the value as `f64`, or `None` for NULL and non-numeric values.
    ///
    /// `F32` goes through its decimal text so `0.1f32` yields `0.1`, matching
    /// what the warehouse stores after load.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::I16(v) => Some(f64::from(*v)),
            SqlValue::I32(v) => Some(f64::from(*v)),
            SqlValue::I64(v) => Some(*v as f64),
            SqlValue::F32(v) => v.to_string().parse().ok(),
            SqlValue::F64(v) => Some(*v),
            SqlValue::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }

    /// Integer view of the value, or `None` for NULL and non-integer values.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Date view of the value (timestamps truncate to their date).
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Date(d) => Some(*d),
            SqlValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }
}

impl<'a> SqlValue<'a> {
    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Create a bytes value from an owned Vec<u8>.
    #[must_use]
    pub fn bytes_owned(b: Vec<u8>) -> SqlValue<'static> {
        SqlValue::Bytes(Cow::Owned(b))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue<'static> {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f32> for SqlValue<'static> {
    fn from(v: f32) -> Self {
        SqlValue::F32(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

/// A batch of rows streamed from the source.
#[derive(Debug, Default)]
pub struct Batch {
    /// Rows in this batch (owned for channel transfer).
    pub rows: Vec<Row>,

    /// Whether this is the final batch for the table.
    pub is_last: bool,
}

impl Batch {
    /// Create a new batch with the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            is_last: false,
        }
    }

    /// Create an empty final batch.
    pub fn empty_final() -> Self {
        Self {
            rows: Vec::new(),
            is_last: true,
        }
    }

    /// Mark this as the final batch.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
