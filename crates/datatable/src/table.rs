#![forbid(unsafe_code)]

//! Column-oriented tables: opening, typed column access and writing.

use crate::byte_reader::{ByteBlockReader, FileByteReader, MemoryByteReader};
use crate::composite::{CompositeBuffer, CompositeBufferOptions, DEFAULT_BLOCK_SIZE};
use crate::convert::ConverterTable;
use crate::element::{ColumnElement, Value};
use crate::error::{BufferError, ConversionError, FormatError, Result, TableError};
use crate::header::{ColumnDescriptor, TableHeader};
use crate::metadata::MetaData;
use crate::read_buffer::{
    effective_block_size, ColumnBuffer, ColumnLayout, ConvertFn, ConvertingBuffer, ReadOnlyBuffer,
};
use crate::scan::{ScanOptions, ScanStatus};
use crate::types::ColumnType;
use crate::{dispatch_column_type, dispatch_numeric_type};
use bytes::Bytes;
use datatable_fs::{atomic_write, AtomicWriteError, TempStreamProvider};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Header bytes read per attempt while parsing; doubled until the header fits.
const HEADER_PROBE_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Elements per block for column readers (clamped to the row count).
    pub block_size: usize,
    /// Blocks each column reader keeps cached.
    pub cache_blocks: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub index: usize,
    pub column_type: ColumnType,
    pub metadata: MetaData,
    #[serde(skip)]
    pub layout: ColumnLayout,
    /// Bytes of column data.
    pub byte_size: u64,
}

impl ColumnInfo {
    pub fn name(&self) -> Option<&str> {
        self.metadata.name()
    }
}

/// Read access to a table in the column-oriented binary format.
///
/// Opening parses the header and derives every column's byte range; column
/// data is only read when blocks are fetched through the readers returned by
/// [`column`](Self::column) and friends.
pub struct ColumnOrientedTable {
    reader: Arc<dyn ByteBlockReader>,
    options: TableOptions,
    row_count: u64,
    columns: Vec<ColumnInfo>,
    converters: Arc<ConverterTable>,
}

impl std::fmt::Debug for ColumnOrientedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnOrientedTable")
            .field("row_count", &self.row_count)
            .field("column_types", &self.column_types())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ColumnOrientedTable {
    pub fn open(reader: Arc<dyn ByteBlockReader>, options: TableOptions) -> Result<Self> {
        let (header, data_offset) = read_header(reader.as_ref())?;
        let row_count = u64::from(header.row_count);

        let mut columns = Vec::with_capacity(header.columns.len());
        let mut offset = data_offset;
        for (index, ColumnDescriptor { column_type, metadata }) in header.columns.into_iter().enumerate() {
            let invalid = |message: String| FormatError::InvalidColumn {
                column: index as u32,
                message,
            };
            let (layout, payload_len) = match column_type.fixed_size() {
                Some(element_size) => (
                    ColumnLayout::Fixed {
                        offset,
                        element_size,
                    },
                    0,
                ),
                None => (
                    ColumnLayout::Encoded { offset },
                    read_payload_len(reader.as_ref(), index, offset, row_count)?,
                ),
            };
            let end = layout
                .byte_size(row_count, payload_len)
                .and_then(|size| offset.checked_add(size))
                .ok_or_else(|| {
                    invalid(format!(
                        "{column_type} data size overflows (payload length {payload_len})"
                    ))
                })?;
            if end > reader.size() {
                return Err(invalid(format!(
                    "{column_type} data at {offset}..{end} extends past the {} byte source",
                    reader.size()
                ))
                .into());
            }
            let byte_size = end - offset;
            columns.push(ColumnInfo {
                index,
                column_type,
                metadata,
                layout,
                byte_size,
            });
            offset = end;
        }

        log::debug!(
            "opened column table: {row_count} rows, {} columns, {} data bytes",
            columns.len(),
            offset - data_offset
        );

        Ok(Self {
            reader,
            options,
            row_count,
            columns,
            converters: Arc::new(ConverterTable::default()),
        })
    }

    pub fn open_path(path: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        let reader = FileByteReader::open(path)?;
        Self::open(Arc::new(reader), options)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>, options: TableOptions) -> Result<Self> {
        Self::open(Arc::new(MemoryByteReader::new(bytes)), options)
    }

    /// Replace the converter table used for numeric column conversion.
    pub fn with_converters(mut self, converters: Arc<ConverterTable>) -> Self {
        self.converters = converters;
        self
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_info(&self, index: usize) -> Result<&ColumnInfo> {
        self.columns.get(index).ok_or(TableError::ColumnOutOfRange {
            index,
            count: self.columns.len(),
        })
    }

    pub fn metadata(&self, index: usize) -> Result<&MetaData> {
        self.column_info(index).map(|c| &c.metadata)
    }

    /// Index of the first column whose `Name` metadata equals `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == Some(name))
    }

    /// Effective block size of every column reader this table hands out.
    pub fn block_size(&self) -> usize {
        effective_block_size(self.options.block_size, self.row_count)
    }

    pub fn reader(&self) -> &Arc<dyn ByteBlockReader> {
        &self.reader
    }

    fn typed_column<T: ColumnElement>(&self, info: &ColumnInfo) -> Result<ColumnBuffer<T>> {
        Ok(ColumnBuffer::new(
            self.reader.clone(),
            info.layout,
            self.row_count,
            self.options.block_size,
            NonZeroUsize::new(self.options.cache_blocks).unwrap_or(NonZeroUsize::MIN),
        )?)
    }

    /// Reader over column `index` as elements of type `T`.
    ///
    /// A column stored as `T` is read directly. Numeric columns can be read as
    /// any numeric type the converter table supports, and every column can be
    /// read as `String`. Anything else, including a numeric pair missing from
    /// the converter table, is a [`TableError::TypeMismatch`].
    pub fn column<T: ColumnElement>(&self, index: usize) -> Result<Box<dyn ReadOnlyBuffer<T>>> {
        let info = self.column_info(index)?;
        let stored = info.column_type;
        let requested = T::COLUMN_TYPE;

        if stored == requested {
            return Ok(Box::new(self.typed_column::<T>(info)?));
        }

        if stored.is_numeric() && requested.is_numeric() {
            let converted: Option<Box<dyn ReadOnlyBuffer<T>>> = dispatch_numeric_type!(
                stored,
                S => match self.converters.get::<S, T>() {
                    Ok(convert) => {
                        let convert: ConvertFn<S, T> = Arc::new(move |v: &S| convert(*v));
                        let buffer = ConvertingBuffer::new(Box::new(self.typed_column::<S>(info)?), convert);
                        Some(Box::new(buffer) as Box<dyn ReadOnlyBuffer<T>>)
                    }
                    Err(ConversionError::Unsupported { .. }) => None,
                    Err(err) => return Err(err.into()),
                },
                None
            );
            if let Some(buffer) = converted {
                return Ok(buffer);
            }
        }

        if requested == ColumnType::String {
            let strings: Box<dyn ReadOnlyBuffer<String>> = dispatch_column_type!(stored, S => {
                let convert: ConvertFn<S, String> = Arc::new(|v: &S| Ok(v.to_display_string()));
                let buffer = ConvertingBuffer::new(Box::new(self.typed_column::<S>(info)?), convert);
                Box::new(buffer) as Box<dyn ReadOnlyBuffer<String>>
            });
            let erased: Box<dyn Any> = Box::new(strings);
            if let Ok(buffer) = erased.downcast::<Box<dyn ReadOnlyBuffer<T>>>() {
                return Ok(*buffer);
            }
        }

        Err(TableError::TypeMismatch {
            column: index,
            expected: requested,
            actual: stored,
        })
    }

    /// Type-erased reader over column `index`.
    pub fn erased_column(&self, index: usize) -> Result<Box<dyn ReadOnlyBuffer<Value>>> {
        let info = self.column_info(index)?;
        Ok(dispatch_column_type!(info.column_type, S => {
            let convert: ConvertFn<S, Value> = Arc::new(|v: &S| Ok(v.to_value()));
            let buffer = ConvertingBuffer::new(Box::new(self.typed_column::<S>(info)?), convert);
            Box::new(buffer) as Box<dyn ReadOnlyBuffer<Value>>
        }))
    }

    /// Every column's value at row `index`.
    pub async fn row(&self, index: u64) -> Result<Vec<Value>> {
        if index >= self.row_count {
            return Err(TableError::RowOutOfRange {
                index,
                count: self.row_count,
            });
        }
        let block_size = self.block_size() as u64;
        let block = (index / block_size) as usize;
        let within = (index % block_size) as usize;

        let mut row = Vec::with_capacity(self.columns.len());
        for column in 0..self.columns.len() {
            let mut reader = self.erased_column(column)?;
            let values = reader.get_typed_block(block).await?;
            row.push(values[within].clone());
        }
        Ok(row)
    }

    /// Visit rows in order, one block of every column at a time.
    ///
    /// `callback` receives the row index and the row's values. Cancellation and
    /// progress behave as in [`crate::scan::for_each_block`].
    pub async fn for_each_row<F, E>(&self, mut callback: F, options: ScanOptions<'_>) -> std::result::Result<ScanStatus, E>
    where
        F: FnMut(u64, &[Value]) -> std::result::Result<(), E>,
        E: From<TableError>,
    {
        let mut readers = (0..self.columns.len())
            .map(|column| self.erased_column(column))
            .collect::<Result<Vec<_>>>()?;
        let block_count = crate::read_buffer::block_count(self.row_count, self.block_size());

        if let Some(notify) = options.notify {
            notify.on_start(options.message);
        }

        let mut row_index = 0u64;
        let mut row = Vec::with_capacity(readers.len());
        for block in 0..block_count {
            if options.cancel.is_some_and(|c| c.is_cancelled()) {
                log::debug!("row scan cancelled after {block} of {block_count} blocks");
                if let Some(notify) = options.notify {
                    notify.on_complete(true);
                }
                return Ok(ScanStatus::Cancelled);
            }

            let mut blocks = Vec::with_capacity(readers.len());
            for reader in readers.iter_mut() {
                blocks.push(reader.get_typed_block(block).await?);
            }
            let rows_in_block = blocks.first().map_or(0, |b| b.len());
            for within in 0..rows_in_block {
                row.clear();
                row.extend(blocks.iter().map(|b| b[within].clone()));
                callback(row_index, &row)?;
                row_index += 1;
            }

            if let Some(notify) = options.notify {
                notify.on_progress((block + 1) as f32 / block_count as f32);
            }
        }

        if let Some(notify) = options.notify {
            notify.on_complete(false);
        }
        Ok(ScanStatus::Completed)
    }
}

fn read_header(reader: &dyn ByteBlockReader) -> Result<(TableHeader, u64)> {
    let size = reader.size();
    let mut probe = HEADER_PROBE_BYTES.min(size);
    loop {
        let bytes = reader.get_block(0, probe)?;
        match TableHeader::parse(&bytes) {
            Err(FormatError::Truncated(_)) if probe < size => {
                probe = (probe * 2).min(size);
            }
            other => return Ok(other?),
        }
    }
}

/// Last entry of an encoded column's offset table, which is its payload length.
fn read_payload_len(reader: &dyn ByteBlockReader, column: usize, offset: u64, rows: u64) -> Result<u64> {
    let table_end = ColumnLayout::Encoded { offset }
        .byte_size(rows, 0)
        .and_then(|size| offset.checked_add(size))
        .filter(|end| *end <= reader.size())
        .ok_or_else(|| FormatError::InvalidColumn {
            column: column as u32,
            message: format!("offset table for {rows} rows at {offset} is truncated"),
        })?;
    let raw = reader.get_block(table_end - 8, 8)?;
    let mut last = [0u8; 8];
    last.copy_from_slice(&raw);
    Ok(u64::from_le_bytes(last))
}

/// Storage for one builder column with its element type erased.
trait BuilderColumn: Send {
    fn column_type(&self) -> ColumnType;
    fn len(&self) -> u64;
    fn metadata(&self) -> &MetaData;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn write_data(&mut self, out: &mut dyn Write) -> std::result::Result<u64, BufferError>;
}

impl<T: ColumnElement> BuilderColumn for CompositeBuffer<T> {
    fn column_type(&self) -> ColumnType {
        T::COLUMN_TYPE
    }

    fn len(&self) -> u64 {
        self.size()
    }

    fn metadata(&self) -> &MetaData {
        CompositeBuffer::metadata(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn write_data(&mut self, out: &mut dyn Write) -> std::result::Result<u64, BufferError> {
        self.write_to(out)
    }
}

/// Accumulates columns in composite buffers and writes them as one table.
pub struct TableBuilder {
    provider: Arc<dyn TempStreamProvider>,
    options: CompositeBufferOptions,
    columns: Vec<Box<dyn BuilderColumn>>,
}

impl TableBuilder {
    pub fn new(provider: Arc<dyn TempStreamProvider>, options: CompositeBufferOptions) -> Self {
        Self {
            provider,
            options,
            columns: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Declare a column of `T` and return its buffer for filling.
    pub fn add_column<T: ColumnElement>(&mut self, name: &str) -> &mut CompositeBuffer<T> {
        let index = self.add_buffer(name, CompositeBuffer::<T>::new(self.provider.clone(), self.options));
        self.column_mut::<T>(index)
            .expect("column was just added with this element type")
    }

    /// Adopt an already filled buffer as the next column. Returns its index.
    pub fn add_buffer<T: ColumnElement>(&mut self, name: &str, mut buffer: CompositeBuffer<T>) -> usize {
        let index = self.columns.len();
        let metadata = buffer.metadata_mut();
        metadata.set_name(name);
        metadata.set_index(index as u32);
        metadata.set_column_type(T::COLUMN_TYPE);
        self.columns.push(Box::new(buffer));
        index
    }

    /// Buffer of column `index` if it holds elements of type `T`.
    pub fn column_mut<T: ColumnElement>(&mut self, index: usize) -> Option<&mut CompositeBuffer<T>> {
        self.columns
            .get_mut(index)?
            .as_any_mut()
            .downcast_mut::<CompositeBuffer<T>>()
    }

    /// Write header and column data. Every column must have the same length.
    /// Returns the number of bytes written.
    pub fn write_to(&mut self, out: &mut impl Write) -> Result<u64> {
        let rows = self.columns.first().map_or(0, |c| c.len());
        for (column, buffer) in self.columns.iter().enumerate() {
            if buffer.len() != rows {
                return Err(TableError::LengthMismatch {
                    column,
                    expected: rows,
                    actual: buffer.len(),
                });
            }
        }
        let row_count = u32::try_from(rows).map_err(|_| TableError::TooManyRows(rows))?;

        let header = TableHeader {
            row_count,
            columns: self
                .columns
                .iter()
                .map(|c| ColumnDescriptor {
                    column_type: c.column_type(),
                    metadata: c.metadata().clone(),
                })
                .collect(),
        };
        let mut written = header.write_to(out)?;
        for buffer in &mut self.columns {
            written += buffer.write_data(out)?;
        }
        log::debug!(
            "wrote column table: {rows} rows, {} columns, {written} bytes",
            self.columns.len()
        );
        Ok(written)
    }

    /// [`write_to`](Self::write_to) a file, replacing it atomically.
    pub fn write_to_path(&mut self, path: impl AsRef<Path>) -> Result<u64> {
        atomic_write(path, |file| self.write_to(file)).map_err(|err| match err {
            AtomicWriteError::Io(err) => TableError::Io(err),
            AtomicWriteError::Writer(err) => err,
        })
    }

    /// Write into memory and open the result.
    pub fn finish(mut self, options: TableOptions) -> Result<ColumnOrientedTable> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        ColumnOrientedTable::from_bytes(bytes, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatable_fs::TempFileManager;
    use pretty_assertions::assert_eq;

    fn builder() -> TableBuilder {
        TableBuilder::new(
            Arc::new(TempFileManager::new()),
            CompositeBufferOptions {
                block_size: 2,
                max_in_memory_blocks: 2,
                max_distinct: Some(16),
            },
        )
    }

    fn options(block_size: usize) -> TableOptions {
        TableOptions {
            block_size,
            cache_blocks: 1,
        }
    }

    #[tokio::test]
    async fn numeric_columns_read_through_converters() {
        let mut builder = builder();
        builder.add_column::<i16>("small").extend([1, -2, 300]).unwrap();
        let table = builder.finish(options(2)).unwrap();

        let mut as_double = table.column::<f64>(0).unwrap();
        assert_eq!(&as_double.get_typed_block(1).await.unwrap()[..], &[300.0]);

        let mut as_sbyte = table.column::<i8>(0).unwrap();
        assert_eq!(&as_sbyte.get_typed_block(0).await.unwrap()[..], &[1, -2]);
        assert!(matches!(
            as_sbyte.get_typed_block(1).await,
            Err(TableError::Conversion(_))
        ));
    }

    #[tokio::test]
    async fn any_column_reads_as_strings() {
        let mut builder = builder();
        builder.add_column::<bool>("flag").extend([true, false]).unwrap();
        let table = builder.finish(options(8)).unwrap();
        let mut strings = table.column::<String>(0).unwrap();
        assert_eq!(
            &strings.get_typed_block(0).await.unwrap()[..],
            &["true".to_string(), "false".to_string()]
        );
    }

    #[test]
    fn incompatible_request_names_column_and_types() {
        let mut builder = builder();
        builder.add_column::<String>("name").add("x".into()).unwrap();
        let table = builder.finish(TableOptions::default()).unwrap();
        let err = table.column::<i32>(0).err().unwrap();
        assert_eq!(err.to_string(), "column 0: cannot read String column as Int");
        assert!(matches!(
            table.column::<i32>(3).err().unwrap(),
            TableError::ColumnOutOfRange { index: 3, count: 1 }
        ));
    }

    #[test]
    fn builder_rejects_ragged_columns() {
        let mut builder = builder();
        builder.add_column::<i32>("a").extend([1, 2]).unwrap();
        builder.add_column::<i32>("b").add(1).unwrap();
        let err = builder.write_to(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            TableError::LengthMismatch {
                column: 1,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn builder_metadata_records_name_index_and_type() {
        let mut builder = builder();
        builder.add_column::<f32>("score").add(0.5).unwrap();
        builder.add_column::<String>("label").add("a".into()).unwrap();
        assert!(builder.column_mut::<f32>(1).is_none());
        let table = builder.finish(TableOptions::default()).unwrap();

        let label = table.metadata(1).unwrap();
        assert_eq!(label.name(), Some("label"));
        assert_eq!(label.index(), Some(1));
        assert_eq!(label.get_str(crate::metadata::keys::TYPE), Some("String"));
        assert!(!label.is_numeric());
        assert_eq!(table.column_index("score"), Some(0));
    }

    #[test]
    fn truncated_column_data_is_rejected_at_open() {
        let mut builder = builder();
        builder.add_column::<i64>("n").extend([1, 2, 3]).unwrap();
        let mut bytes = Vec::new();
        builder.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        let err = ColumnOrientedTable::from_bytes(bytes, TableOptions::default()).unwrap_err();
        assert!(err.to_string().contains("column 0"), "{err}");
    }

    #[test]
    fn corrupt_payload_length_fails_the_open() {
        let mut builder = builder();
        builder.add_column::<String>("s").add("abc".into()).unwrap();
        let mut bytes = Vec::new();
        builder.write_to(&mut bytes).unwrap();
        let table = ColumnOrientedTable::from_bytes(bytes.clone(), TableOptions::default()).unwrap();
        let last_offset = table.column_info(0).unwrap().layout.offset() as usize + 8;

        for bogus in [u64::MAX, u64::MAX - 16, 1 << 40] {
            let mut corrupt = bytes.clone();
            corrupt[last_offset..last_offset + 8].copy_from_slice(&bogus.to_le_bytes());
            let err = ColumnOrientedTable::from_bytes(corrupt, TableOptions::default()).unwrap_err();
            assert!(
                matches!(err, TableError::Format(FormatError::InvalidColumn { column: 0, .. })),
                "{err}"
            );
        }
    }

    #[test]
    fn missing_converter_pair_is_a_type_mismatch() {
        let mut builder = builder();
        builder.add_column::<i16>("n").extend([1, 2]).unwrap();
        let mut converters = ConverterTable::new();
        converters.register::<i16, f64>(|v| Ok(f64::from(v)));
        let table = builder
            .finish(TableOptions::default())
            .unwrap()
            .with_converters(Arc::new(converters));

        assert!(table.column::<f64>(0).is_ok());
        let err = table.column::<i32>(0).err().unwrap();
        assert!(matches!(
            err,
            TableError::TypeMismatch {
                column: 0,
                expected: ColumnType::Int,
                actual: ColumnType::Short
            }
        ));
        assert_eq!(err.to_string(), "column 0: cannot read Short column as Int");
    }

    #[test]
    fn large_headers_are_probed_incrementally() {
        let mut builder = builder();
        let column = builder.add_column::<i32>("wide");
        column.metadata_mut().set("Notes", "x".repeat(40_000));
        column.add(7).unwrap();
        let table = builder.finish(TableOptions::default()).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.metadata(0).unwrap().get_str("Notes").map(str::len), Some(40_000));
    }
}
