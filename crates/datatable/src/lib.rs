//! Column-oriented data tables.
//!
//! This crate focuses on:
//! - A binary, column-oriented table format with per-column metadata.
//! - Block-oriented typed column readers with small LRU caches, fetched asynchronously.
//! - Append-only composite buffers that spill completed blocks to temp storage.
//! - Streaming conversions and analyses over columns (casts, one-hot vectors,
//!   distinct indexing, numeric statistics, normalization).

#![forbid(unsafe_code)]

pub mod analysis;
pub mod byte_reader;
pub mod composite;
pub mod convert;
mod distinct;
mod element;
mod error;
pub mod header;
pub mod metadata;
pub mod read_buffer;
pub mod scan;
mod table;
mod types;

pub use chrono;

pub use crate::byte_reader::{
    ByteBlockReader, FileByteReader, MemoryByteReader, PositionedIo, StreamByteReader,
};
pub use crate::composite::{
    BufferState, CompositeBuffer, CompositeBufferOptions, DEFAULT_BLOCK_SIZE,
    DEFAULT_MAX_IN_MEMORY_BLOCKS,
};
pub use crate::distinct::DEFAULT_MAX_DISTINCT_COUNT;
pub use crate::element::{
    ColumnElement, DistinctKey, FloatMatrix, FloatTensor, FloatTensor3D, FloatTensor4D,
    FloatVector, IndexList, NumericElement, Value, WeightedIndex, WeightedIndexList,
};
pub use crate::error::{
    BufferError, ByteReaderError, ConversionError, FormatError, Result, ScanError, TableError,
};
pub use crate::metadata::{MetaData, MetaValue};
pub use crate::read_buffer::{ColumnBuffer, ColumnLayout, ConvertingBuffer, MemoryBuffer, ReadOnlyBuffer};
pub use crate::scan::{CancellationToken, ProgressNotification, ScanOptions, ScanStatus};
pub use crate::table::{ColumnInfo, ColumnOrientedTable, TableBuilder, TableOptions};
pub use crate::types::ColumnType;
pub use datatable_fs::{TempFileManager, TempStreamProvider};
