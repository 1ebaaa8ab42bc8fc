//! Result stream types for sqlstencil

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{Result, StencilError};

/// A single cell value received from the execution backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit unsigned integer
    UInt64(u64),
    /// 64-bit floating point
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Date (year, month, day)
    Date(NaiveDate),
    /// DateTime without timezone
    DateTime(NaiveDateTime),
    /// Nested JSON value (objects, arrays)
    Json(serde_json::Value),
}

impl Value {
    /// Convert a JSON cell from a row-object frame
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt64(u)
                } else if let Some(f) = n.as_f64() {
                    Value::Float64(f)
                } else {
                    Value::Decimal(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// One materialized row of a batch, in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Column metadata announced by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    /// Column name
    #[serde(default)]
    pub name: String,
    /// Data type (backend-specific string)
    #[serde(default)]
    pub data_type: String,
    /// Whether the column can be NULL
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }
}

/// One chunk of a streamed result set: named columns with a fixed row count.
///
/// Data is stored column-major so that columnar wire encodings convert
/// without transposition.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<ColumnMeta>,
    data: Vec<Vec<Value>>,
    row_count: usize,
}

impl Batch {
    /// Create a batch from column-major data.
    ///
    /// Every column must hold the same number of values.
    pub fn new(columns: Vec<ColumnMeta>, data: Vec<Vec<Value>>) -> Result<Self> {
        if columns.len() != data.len() {
            return Err(StencilError::Shape(format!(
                "{} columns declared but {} provided",
                columns.len(),
                data.len()
            )));
        }
        let row_count = data.first().map(Vec::len).unwrap_or(0);
        if let Some((idx, column)) = data.iter().enumerate().find(|(_, c)| c.len() != row_count)
        {
            return Err(StencilError::Shape(format!(
                "column '{}' has {} rows, expected {}",
                columns[idx].name,
                column.len(),
                row_count
            )));
        }
        Ok(Self {
            columns,
            data,
            row_count,
        })
    }

    /// Create a batch from row-major values
    pub fn from_rows(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut data: Vec<Vec<Value>> = columns
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StencilError::Shape(format!(
                    "row {} has {} values, expected {}",
                    row_idx,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in data.iter_mut().zip(row) {
                column.push(value);
            }
        }
        Self::new(columns, data)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Get a single cell
    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        self.data.get(column).and_then(|c| c.get(row))
    }

    /// Materialize a row
    pub fn row(&self, index: usize) -> Option<Row> {
        if index >= self.row_count {
            return None;
        }
        let values = self.data.iter().map(|c| c[index].clone()).collect();
        Some(Row { values })
    }
}

/// Accumulated result of a streamed execution
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    batches: Vec<Batch>,
    total_rows: u64,
}

impl ResultSet {
    /// Create a new empty result set
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            batches: Vec::new(),
            total_rows: 0,
        }
    }

    /// Record column metadata announced ahead of the first batch
    pub fn set_columns(&mut self, columns: Vec<ColumnMeta>) {
        self.columns = columns;
    }

    /// Append a batch, adopting its columns if none were announced
    pub fn push_batch(&mut self, batch: Batch) {
        if self.columns.is_empty() {
            self.columns = batch.columns().to_vec();
        }
        self.total_rows += batch.row_count() as u64;
        self.batches.push(batch);
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Total number of rows across all batches
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Iterate over all rows in arrival order
    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.batches
            .iter()
            .flat_map(|batch| (0..batch.row_count()).filter_map(move |i| batch.row(i)))
    }
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::new()
    }
}
