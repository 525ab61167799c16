//! Core types for StrataDB
//!
//! Defines column data types, row values, table schemas, and rows. These are
//! the in-memory shapes that `format::Table` serializes bit-exactly to disk.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column data types supported by the binary table format.
///
/// The discriminant values are the exact `i8` tags written to disk
/// (`format.rs`'s `data_type` field) — changing them is a format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum DataType {
    Integer64 = 0,
    Float64 = 1,
    String = 2,
    Boolean = 3,
    Timestamp = 4,
    Datetime = 5,
}

impl DataType {
    /// Decode the on-disk tag byte, failing closed on anything unrecognized.
    pub fn from_tag(tag: i8) -> Option<Self> {
        match tag {
            0 => Some(DataType::Integer64),
            1 => Some(DataType::Float64),
            2 => Some(DataType::String),
            3 => Some(DataType::Boolean),
            4 => Some(DataType::Timestamp),
            5 => Some(DataType::Datetime),
            _ => None,
        }
    }

    pub fn tag(self) -> i8 {
        self as i8
    }

    /// Whether `value` is the correct runtime representation for this column type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Integer64, Value::Integer(_)) => true,
            (DataType::Float64, Value::Float(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Boolean, Value::Boolean(_)) => true,
            (DataType::Timestamp, Value::Timestamp(_)) => true,
            (DataType::Datetime, Value::Datetime(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer64 => write!(f, "INTEGER64"),
            DataType::Float64 => write!(f, "FLOAT64"),
            DataType::String => write!(f, "STRING"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Datetime => write!(f, "DATETIME"),
        }
    }
}

/// A row value.
///
/// `Null` never gets its own byte pattern on disk (see `format.rs`'s
/// per-row null bitmap, `SPEC_FULL.md` §9 Q1) — it only exists as an
/// in-memory placeholder and as a predicate/default-value literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    /// Unix seconds
    Timestamp(i64),
    /// Unix epoch milliseconds
    Datetime(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type this value would serialize as, if not null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer64),
            Value::Float(_) => Some(DataType::Float64),
            Value::String(_) => Some(DataType::String),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Datetime(_) => Some(DataType::Datetime),
        }
    }

    /// Promote integer/float operands to `f64` for cross-type numeric comparison.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Timestamp(t) => Some(*t as f64),
            Value::Datetime(d) => Some(*d as f64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64() == b.as_f64()
            }
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64().partial_cmp(&b.as_f64())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Datetime(v) => write!(f, "{}", v),
        }
    }
}

/// A column definition in a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Declared maximum byte length; only meaningful for `DataType::String`.
    pub length: u16,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: 0,
            nullable: true,
            is_primary_key: false,
            default_value: None,
        }
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }
}

/// Index metadata: persisted in a table's metadata extension section
/// (`SPEC_FULL.md` §3, §4.2) but never consulted by query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Table schema and bookkeeping fields, as stored in the metadata section of
/// a table file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<Column>,
    pub row_count: u64,
    /// `data_offset` is recomputed by `format::serialize_table` on every
    /// write; callers never need to set it themselves.
    pub data_offset: u32,
    /// Index descriptors (extension section, not part of the fixed layout).
    pub indexes: Vec<IndexMetadata>,
    /// Foreign-key constraint names (extension section).
    pub constraints: Vec<String>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            row_count: 0,
            data_offset: 0,
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Validate the invariants from `SPEC_FULL.md` §3: non-empty name, no
    /// duplicate column names, every String column has a positive length.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;

        if self.name.is_empty() {
            return Err(Error::InvalidData("table name cannot be empty".into()));
        }
        if self.columns.is_empty() {
            return Err(Error::InvalidData(
                "table must declare at least one column".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::duplicate_column(&column.name));
            }
            if column.data_type == DataType::String && column.length == 0 {
                return Err(Error::InvalidData(format!(
                    "string column '{}' must declare a positive length",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A row of data: values in the same order as `TableMetadata::columns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_numeric_equality_promotes_to_f64() {
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Timestamp(10), Value::Integer(10));
    }

    #[test]
    fn ordering_places_null_below_everything() {
        assert!(Value::Null < Value::Integer(i64::MIN));
        assert!(Value::Integer(1) < Value::Integer(2));
    }

    #[test]
    fn metadata_validation_rejects_duplicate_columns() {
        let meta = TableMetadata::new(
            "t",
            vec![
                Column::new("a", DataType::Integer64),
                Column::new("a", DataType::Float64),
            ],
        );
        assert!(meta.validate().is_err());
    }

    #[test]
    fn metadata_validation_rejects_zero_length_string() {
        let meta = TableMetadata::new("t", vec![Column::new("s", DataType::String)]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn metadata_validation_rejects_empty_name() {
        let meta = TableMetadata::new("", vec![Column::new("a", DataType::Integer64)]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn data_type_accepts_null_for_any_column() {
        assert!(DataType::Integer64.accepts(&Value::Null));
        assert!(!DataType::Integer64.accepts(&Value::String("x".into())));
    }
}
