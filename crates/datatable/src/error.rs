//! Error types for the table engine.

use crate::types::ColumnType;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ByteReaderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("byte range {offset}..{} is outside the {size} byte source", offset + len)]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("byte reader has been closed")]
    Closed,
    #[error("byte reader is read-only")]
    ReadOnly,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown table orientation tag {0}")]
    UnknownOrientation(u8),
    #[error("column {column}: unknown element type tag {tag}")]
    UnknownColumnType { column: u32, tag: u8 },
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown metadata value tag {0}")]
    UnknownMetadataValue(u8),
    #[error("data offset marker {marker} does not match header end {actual}")]
    DataOffsetMismatch { marker: u64, actual: u64 },
    #[error("column {column}: {message}")]
    InvalidColumn { column: u32, message: String },
    #[error("invalid {0} element")]
    InvalidElement(&'static str),
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("buffer is finalized; no further elements can be added")]
    Finalized,
    #[error("corrupt overflow block: {0}")]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("no converter registered from {from} to {to}")]
    Unsupported { from: ColumnType, to: ColumnType },
    #[error("value {value} is not representable as {to}")]
    OutOfRange { value: String, to: ColumnType },
    #[error("indexer limit of {limit} distinct values exceeded")]
    IndexerCapacity { limit: usize },
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid table: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    Reader(#[from] ByteReaderError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("column {column}: cannot read {actual} column as {expected}")]
    TypeMismatch {
        column: usize,
        expected: ColumnType,
        actual: ColumnType,
    },
    #[error("column index {index} out of range (table has {count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },
    #[error("row index {index} out of range (table has {count} rows)")]
    RowOutOfRange { index: u64, count: u64 },
    #[error("block index {index} out of range (column has {count} blocks)")]
    BlockOutOfRange { index: usize, count: usize },
    #[error("column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: usize,
        expected: u64,
        actual: u64,
    },
    #[error("block fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("table has {0} rows; the format stores row counts as u32")]
    TooManyRows(u64),
}

/// Failure of a conversion or analysis scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

pub type Result<T> = std::result::Result<T, TableError>;
