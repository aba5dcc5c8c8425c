//! Typed, block-oriented read access to column data.

use crate::byte_reader::ByteBlockReader;
use crate::element::ColumnElement;
use crate::error::{ConversionError, FormatError, Result, TableError};
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

pub type BlockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<Arc<[T]>>> + Send + 'a>>;

/// Read-only sequence of `T` fetched one block at a time.
///
/// Implementations take `&mut self` for fetches because they own a block cache;
/// readers that need to run in parallel should each hold their own instance.
pub trait ReadOnlyBuffer<T>: Send {
    /// Number of elements.
    fn size(&self) -> u64;

    /// Elements per block (the last block may be shorter).
    fn block_size(&self) -> usize;

    fn block_count(&self) -> usize {
        block_count(self.size(), self.block_size())
    }

    /// Fetch block `index`. An empty buffer yields an empty block for any index.
    fn get_typed_block(&mut self, index: usize) -> BlockFuture<'_, T>;
}

impl<T, B: ReadOnlyBuffer<T> + ?Sized> ReadOnlyBuffer<T> for Box<B> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn block_count(&self) -> usize {
        (**self).block_count()
    }

    fn get_typed_block(&mut self, index: usize) -> BlockFuture<'_, T> {
        (**self).get_typed_block(index)
    }
}

pub(crate) fn block_count(size: u64, block_size: usize) -> usize {
    if size == 0 || block_size == 0 {
        return 0;
    }
    size.div_ceil(block_size as u64) as usize
}

/// Configured block size clamped to the element count.
pub(crate) fn effective_block_size(configured: usize, size: u64) -> usize {
    (configured.max(1) as u64).min(size) as usize
}

fn element_range(index: usize, block_size: usize, size: u64) -> (u64, u64) {
    let start = index as u64 * block_size as u64;
    let end = (start + block_size as u64).min(size);
    (start, end)
}

fn check_block(index: usize, count: usize) -> Result<()> {
    if index >= count {
        return Err(TableError::BlockOutOfRange { index, count });
    }
    Ok(())
}

fn read_u64s(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            u64::from_le_bytes(raw)
        })
        .collect()
}

/// Where a column's bytes live inside the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnLayout {
    /// `rows × element_size` bytes starting at `offset`.
    Fixed { offset: u64, element_size: usize },
    /// `rows + 1` little-endian u64 payload offsets starting at `offset`,
    /// followed by the payload.
    Encoded { offset: u64 },
}

impl ColumnLayout {
    pub fn offset(&self) -> u64 {
        match self {
            ColumnLayout::Fixed { offset, .. } | ColumnLayout::Encoded { offset } => *offset,
        }
    }

    /// Bytes occupied by the column. `payload_len` (the last offset table entry)
    /// only matters for encoded columns. `None` if the size does not fit a `u64`.
    pub fn byte_size(&self, rows: u64, payload_len: u64) -> Option<u64> {
        match self {
            ColumnLayout::Fixed { element_size, .. } => rows.checked_mul(*element_size as u64),
            ColumnLayout::Encoded { .. } => rows
                .checked_add(1)?
                .checked_mul(8)?
                .checked_add(payload_len),
        }
    }
}

/// [`ReadOnlyBuffer`] over a column's byte range.
///
/// Blocks are fetched on tokio's blocking pool and kept in a small LRU keyed by
/// block index. The default capacity is one block: repeated access within a
/// block is free, anything else refetches.
pub struct ColumnBuffer<T: ColumnElement> {
    reader: Arc<dyn ByteBlockReader>,
    layout: ColumnLayout,
    size: u64,
    block_size: usize,
    cache: LruCache<usize, Arc<[T]>>,
    fetches: u64,
}

impl<T: ColumnElement> ColumnBuffer<T> {
    pub fn new(
        reader: Arc<dyn ByteBlockReader>,
        layout: ColumnLayout,
        rows: u64,
        block_size: usize,
        cache_blocks: NonZeroUsize,
    ) -> std::result::Result<Self, FormatError> {
        let matches_type = match (layout, T::COLUMN_TYPE.fixed_size()) {
            (ColumnLayout::Fixed { element_size, .. }, Some(size)) => element_size == size,
            (ColumnLayout::Encoded { .. }, None) => true,
            _ => false,
        };
        if !matches_type {
            return Err(FormatError::InvalidElement(T::COLUMN_TYPE.name()));
        }
        Ok(Self {
            reader,
            layout,
            size: rows,
            block_size: effective_block_size(block_size, rows),
            cache: LruCache::new(cache_blocks),
            fetches: 0,
        })
    }

    /// Fixed-size column over `byte_size` bytes at `offset`; the element count is
    /// `byte_size / element_size`.
    pub fn from_byte_range(
        reader: Arc<dyn ByteBlockReader>,
        offset: u64,
        byte_size: u64,
        block_size: usize,
    ) -> std::result::Result<Self, FormatError> {
        let element_size = T::COLUMN_TYPE
            .fixed_size()
            .ok_or(FormatError::InvalidElement(T::COLUMN_TYPE.name()))?;
        Self::new(
            reader,
            ColumnLayout::Fixed {
                offset,
                element_size,
            },
            byte_size / element_size as u64,
            block_size,
            NonZeroUsize::MIN,
        )
    }

    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }

    /// Number of block fetches that reached the byte reader.
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    fn fetch(&self, index: usize) -> impl Future<Output = Result<Vec<T>>> + Send + 'static {
        let (start, end) = element_range(index, self.block_size, self.size);
        let reader = self.reader.clone();
        let layout = self.layout;
        let rows = self.size;

        async move {
            tokio::task::spawn_blocking(move || match layout {
                ColumnLayout::Fixed {
                    offset,
                    element_size,
                } => {
                    let bytes = reader.get_block(
                        offset + start * element_size as u64,
                        (end - start) * element_size as u64,
                    )?;
                    bytes
                        .chunks_exact(element_size)
                        .map(|chunk| T::decode(chunk).map_err(TableError::from))
                        .collect()
                }
                ColumnLayout::Encoded { offset } => {
                    let table = reader.get_block(offset + start * 8, (end - start + 1) * 8)?;
                    let offsets = read_u64s(&table);
                    if offsets.windows(2).any(|w| w[1] < w[0]) {
                        return Err(FormatError::InvalidElement("offset table").into());
                    }
                    let first = offsets[0];
                    let last = offsets[offsets.len() - 1];
                    let payload_at = ColumnLayout::Encoded { offset }
                        .byte_size(rows, first)
                        .and_then(|table_and_skip| offset.checked_add(table_and_skip))
                        .ok_or(FormatError::InvalidElement("offset table"))?;
                    let payload = reader.get_block(payload_at, last - first)?;

                    offsets
                        .windows(2)
                        .map(|w| {
                            let from = (w[0] - first) as usize;
                            let to = (w[1] - first) as usize;
                            T::decode(&payload[from..to]).map_err(TableError::from)
                        })
                        .collect()
                }
            })
            .await?
        }
    }
}

impl<T: ColumnElement> ReadOnlyBuffer<T> for ColumnBuffer<T> {
    fn size(&self) -> u64 {
        self.size
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn get_typed_block(&mut self, index: usize) -> BlockFuture<'_, T> {
        Box::pin(async move {
            if self.size == 0 {
                return Ok(Arc::from(Vec::new()));
            }
            check_block(index, self.block_count())?;
            if let Some(hit) = self.cache.get(&index) {
                return Ok(hit.clone());
            }

            let block: Arc<[T]> = Arc::from(self.fetch(index).await?);
            self.fetches += 1;
            self.cache.put(index, block.clone());
            Ok(block)
        })
    }
}

/// [`ReadOnlyBuffer`] over elements already in memory.
#[derive(Clone, Debug)]
pub struct MemoryBuffer<T> {
    data: Arc<[T]>,
    block_size: usize,
}

impl<T: Clone> MemoryBuffer<T> {
    pub fn new(data: impl Into<Arc<[T]>>, block_size: usize) -> Self {
        let data = data.into();
        let block_size = effective_block_size(block_size, data.len() as u64);
        Self { data, block_size }
    }
}

impl<T: Clone + Send + Sync + 'static> ReadOnlyBuffer<T> for MemoryBuffer<T> {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn get_typed_block(&mut self, index: usize) -> BlockFuture<'_, T> {
        let result = if self.data.is_empty() {
            Ok(Arc::from(Vec::new()))
        } else {
            check_block(index, self.block_count()).map(|()| {
                let (start, end) = element_range(index, self.block_size, self.size());
                Arc::from(&self.data[start as usize..end as usize])
            })
        };
        Box::pin(std::future::ready(result))
    }
}

pub type ConvertFn<S, T> = Arc<dyn Fn(&S) -> std::result::Result<T, ConversionError> + Send + Sync>;

/// Presents a buffer of `S` as a buffer of `T` by converting each block as it
/// is fetched. The most recently converted block is kept.
pub struct ConvertingBuffer<S, T> {
    inner: Box<dyn ReadOnlyBuffer<S>>,
    convert: ConvertFn<S, T>,
    last: Option<(usize, Arc<[T]>)>,
}

impl<S, T> ConvertingBuffer<S, T> {
    pub fn new(inner: Box<dyn ReadOnlyBuffer<S>>, convert: ConvertFn<S, T>) -> Self {
        Self {
            inner,
            convert,
            last: None,
        }
    }
}

impl<S: Send + Sync + 'static, T: Send + Sync + 'static> ReadOnlyBuffer<T> for ConvertingBuffer<S, T> {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn get_typed_block(&mut self, index: usize) -> BlockFuture<'_, T> {
        Box::pin(async move {
            if let Some((cached, block)) = &self.last {
                if *cached == index {
                    return Ok(block.clone());
                }
            }
            let source = self.inner.get_typed_block(index).await?;
            let converted = source
                .iter()
                .map(|item| (self.convert)(item))
                .collect::<std::result::Result<Vec<T>, _>>()?;
            let block: Arc<[T]> = Arc::from(converted);
            self.last = Some((index, block.clone()));
            Ok(block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_reader::MemoryByteReader;
    use crate::composite::{CompositeBuffer, CompositeBufferOptions};
    use datatable_fs::TempFileManager;

    fn int_column(values: &[i32], block_size: usize) -> ColumnBuffer<i32> {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let len = bytes.len() as u64;
        ColumnBuffer::from_byte_range(Arc::new(MemoryByteReader::new(bytes)), 0, len, block_size)
            .unwrap()
    }

    #[tokio::test]
    async fn block_arithmetic_and_last_block_length() {
        let values: Vec<i32> = (0..10).collect();
        let mut column = int_column(&values, 4);
        assert_eq!(column.size(), 10);
        assert_eq!(column.block_size(), 4);
        assert_eq!(column.block_count(), 3);
        let last = column.get_typed_block(2).await.unwrap();
        assert_eq!(&last[..], &[8, 9]);
        assert!(matches!(
            column.get_typed_block(3).await,
            Err(TableError::BlockOutOfRange { index: 3, count: 3 })
        ));
    }

    #[tokio::test]
    async fn block_size_is_clamped_to_element_count() {
        let mut column = int_column(&[1, 2, 3], 1024);
        assert_eq!(column.block_size(), 3);
        assert_eq!(column.block_count(), 1);
        assert_eq!(&column.get_typed_block(0).await.unwrap()[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_column_has_no_blocks_and_reads_empty() {
        let mut column = int_column(&[], 16);
        assert_eq!(column.block_count(), 0);
        assert!(column.get_typed_block(0).await.unwrap().is_empty());
        assert!(column.get_typed_block(7).await.unwrap().is_empty());
        assert_eq!(column.fetch_count(), 0);
    }

    #[tokio::test]
    async fn repeated_fetch_hits_the_cache() {
        let mut column = int_column(&(0..100).collect::<Vec<_>>(), 10);
        let first = column.get_typed_block(3).await.unwrap();
        let second = column.get_typed_block(3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(column.fetch_count(), 1);

        // Single-slot cache: alternating blocks refetch.
        column.get_typed_block(4).await.unwrap();
        column.get_typed_block(3).await.unwrap();
        assert_eq!(column.fetch_count(), 3);
    }

    #[tokio::test]
    async fn encoded_column_reads_variable_length_blocks() {
        let words = ["alpha", "", "gamma", "delta", "ε"].map(String::from);
        let mut buffer: CompositeBuffer<String> =
            CompositeBuffer::new(Arc::new(TempFileManager::new()), CompositeBufferOptions::default());
        buffer.add_all(&words).unwrap();
        let mut bytes = Vec::new();
        buffer.write_to(&mut bytes).unwrap();

        let mut column: ColumnBuffer<String> = ColumnBuffer::new(
            Arc::new(MemoryByteReader::new(bytes)),
            ColumnLayout::Encoded { offset: 0 },
            words.len() as u64,
            2,
            NonZeroUsize::MIN,
        )
        .unwrap();
        assert_eq!(column.block_count(), 3);
        assert_eq!(&column.get_typed_block(0).await.unwrap()[..], &words[0..2]);
        assert_eq!(&column.get_typed_block(1).await.unwrap()[..], &words[2..4]);
        assert_eq!(&column.get_typed_block(2).await.unwrap()[..], &words[4..]);
    }

    #[test]
    fn layout_must_match_element_type() {
        let reader: Arc<dyn ByteBlockReader> = Arc::new(MemoryByteReader::new(vec![0u8; 8]));
        assert!(ColumnBuffer::<String>::new(
            reader.clone(),
            ColumnLayout::Fixed {
                offset: 0,
                element_size: 4
            },
            2,
            4,
            NonZeroUsize::MIN
        )
        .is_err());
        assert!(ColumnBuffer::<i64>::new(
            reader,
            ColumnLayout::Fixed {
                offset: 0,
                element_size: 4
            },
            2,
            4,
            NonZeroUsize::MIN
        )
        .is_err());
    }

    #[tokio::test]
    async fn converting_buffer_maps_each_element() {
        let inner = MemoryBuffer::new(vec![1i32, 2, 3], 2);
        let mut converted: ConvertingBuffer<i32, f64> =
            ConvertingBuffer::new(Box::new(inner), Arc::new(|v: &i32| Ok(*v as f64 * 0.5)));
        assert_eq!(converted.block_count(), 2);
        assert_eq!(&converted.get_typed_block(1).await.unwrap()[..], &[1.5]);
    }
}
