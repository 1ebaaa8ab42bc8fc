//! Result stream framing
//!
//! The backend answers with one of two wire encodings. Both decode into the
//! same [`Frame`] sequence, so the client never sees the difference.
//!
//! - NDJSON: one JSON object per line, tagged by `type`
//!   (`meta`, `rows`, `error`)
//! - Arrow IPC stream: schema message followed by record batches

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::buffer::Buffer;
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Float64Type, Int64Type, Schema, TimeUnit, TimestampMicrosecondType,
    UInt64Type,
};
use arrow::error::ArrowError;
use arrow::ipc::reader::StreamDecoder;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use sqlstencil_core::{Batch, ColumnMeta, Value};

use crate::error::StreamError;

/// Content type announcing an Arrow IPC stream body
pub const ARROW_STREAM_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

/// One decoded unit of a result stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Column metadata for the batches that follow
    Meta(Vec<ColumnMeta>),
    Batch(Batch),
    /// The backend reported a failure mid-stream
    Error(String),
}

/// Wire encoding of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    Ndjson,
    ArrowIpc,
}

impl FrameEncoding {
    /// Arrow IPC when the content type says so, NDJSON otherwise
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with(ARROW_STREAM_CONTENT_TYPE) => {
                FrameEncoding::ArrowIpc
            }
            _ => FrameEncoding::Ndjson,
        }
    }

    pub fn decoder(self) -> Box<dyn FrameDecoder> {
        match self {
            FrameEncoding::Ndjson => Box::new(NdjsonDecoder::new()),
            FrameEncoding::ArrowIpc => Box::new(ArrowDecoder::new()),
        }
    }
}

/// Incremental body decoder: chunks in, frames out
pub trait FrameDecoder: Send {
    /// Feed the next body chunk; chunk boundaries may fall anywhere
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError>;

    /// Signal end of body, flushing any trailing frame
    fn finish(&mut self) -> Result<Vec<Frame>, StreamError>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum NdjsonFrame {
    Meta { columns: Vec<ColumnMeta> },
    Rows { rows: Vec<Map<String, Json>> },
    Error { message: String },
}

/// Newline-delimited JSON frames
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
    columns: Vec<ColumnMeta>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<Frame>, StreamError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }

        let frame = match serde_json::from_slice::<NdjsonFrame>(line)? {
            NdjsonFrame::Meta { columns } => {
                self.columns = columns.clone();
                Frame::Meta(columns)
            }
            NdjsonFrame::Rows { rows } => Frame::Batch(self.rows_to_batch(rows)?),
            NdjsonFrame::Error { message } => Frame::Error(message),
        };
        Ok(Some(frame))
    }

    /// Row objects to a batch, keyed by the announced columns. Without a
    /// preceding `meta` frame the first row's keys become the columns.
    fn rows_to_batch(&mut self, rows: Vec<Map<String, Json>>) -> Result<Batch, StreamError> {
        if self.columns.is_empty() {
            if let Some(first) = rows.first() {
                self.columns = first
                    .iter()
                    .map(|(name, value)| ColumnMeta::new(name.clone(), json_type_name(value)))
                    .collect();
            }
        }

        let values = rows
            .into_iter()
            .map(|mut row| {
                self.columns
                    .iter()
                    .map(|column| Value::from_json(row.remove(&column.name).unwrap_or(Json::Null)))
                    .collect()
            })
            .collect();
        Ok(Batch::from_rows(self.columns.clone(), values)?)
    }
}

impl FrameDecoder for NdjsonDecoder {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = self.decode_line(&line)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    fn finish(&mut self) -> Result<Vec<Frame>, StreamError> {
        let rest = std::mem::take(&mut self.pending);
        Ok(self.decode_line(&rest)?.into_iter().collect())
    }
}

fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_f64() => "double",
        Json::Number(_) => "bigint",
        Json::String(_) => "varchar",
        Json::Array(_) | Json::Object(_) => "json",
    }
}

/// Arrow IPC stream frames
pub struct ArrowDecoder {
    decoder: StreamDecoder,
    schema_sent: bool,
}

impl ArrowDecoder {
    pub fn new() -> Self {
        Self {
            decoder: StreamDecoder::new(),
            schema_sent: false,
        }
    }
}

impl Default for ArrowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for ArrowDecoder {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError> {
        let mut buffer = Buffer::from_vec(chunk.to_vec());
        let mut frames = Vec::new();

        while !buffer.is_empty() {
            let Some(batch) = self.decoder.decode(&mut buffer)? else {
                continue;
            };
            let columns = schema_columns(&batch.schema());
            if !self.schema_sent {
                self.schema_sent = true;
                frames.push(Frame::Meta(columns.clone()));
            }
            frames.push(Frame::Batch(record_batch_to_batch(&batch, columns)?));
        }
        Ok(frames)
    }

    fn finish(&mut self) -> Result<Vec<Frame>, StreamError> {
        self.decoder.finish()?;
        Ok(Vec::new())
    }
}

fn schema_columns(schema: &Arc<Schema>) -> Vec<ColumnMeta> {
    schema
        .fields()
        .iter()
        .map(|field| {
            let mut column = ColumnMeta::new(field.name().clone(), field.data_type().to_string());
            column.nullable = field.is_nullable();
            column
        })
        .collect()
}

/// Convert a record batch into a column-major [`Batch`]
pub fn record_batch_to_batch(batch: &RecordBatch, columns: Vec<ColumnMeta>) -> Result<Batch, StreamError> {
    let data = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>, ArrowError>>()?;
    Ok(Batch::new(columns, data)?)
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>, ArrowError> {
    let len = array.len();
    let values = match array.data_type() {
        DataType::Null => vec![Value::Null; len],
        DataType::Boolean => {
            let typed = array.as_boolean();
            collect(len, array, |i| Value::Bool(typed.value(i)))
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let widened = cast(array, &DataType::Int64)?;
            let typed = widened.as_primitive::<Int64Type>();
            collect(len, array, |i| Value::Int64(typed.value(i)))
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            let widened = cast(array, &DataType::UInt64)?;
            let typed = widened.as_primitive::<UInt64Type>();
            collect(len, array, |i| Value::UInt64(typed.value(i)))
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let widened = cast(array, &DataType::Float64)?;
            let typed = widened.as_primitive::<Float64Type>();
            collect(len, array, |i| Value::Float64(typed.value(i)))
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array, &DataType::Utf8)?;
            let typed = text.as_string::<i32>();
            collect(len, array, |i| Value::String(typed.value(i).to_string()))
        }
        DataType::Binary | DataType::LargeBinary => {
            let bytes = cast(array, &DataType::Binary)?;
            let typed = bytes.as_binary::<i32>();
            collect(len, array, |i| Value::Bytes(typed.value(i).to_vec()))
        }
        DataType::Date32 | DataType::Date64 => {
            let days = cast(array, &DataType::Date32)?;
            let typed = days.as_primitive::<Date32Type>();
            collect(len, array, |i| {
                typed.value_as_date(i).map(Value::Date).unwrap_or(Value::Null)
            })
        }
        DataType::Timestamp(_, _) => {
            let micros = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
            let typed = micros.as_primitive::<TimestampMicrosecondType>();
            collect(len, array, |i| {
                typed
                    .value_as_datetime(i)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null)
            })
        }
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => {
            let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())?;
            collect(len, array, |i| Value::Decimal(formatter.value(i).to_string()))
        }
        _ => {
            let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())?;
            collect(len, array, |i| Value::String(formatter.value(i).to_string()))
        }
    };
    Ok(values)
}

fn collect(len: usize, array: &ArrayRef, value: impl Fn(usize) -> Value) -> Vec<Value> {
    (0..len)
        .map(|i| if array.is_null(i) { Value::Null } else { value(i) })
        .collect()
}
