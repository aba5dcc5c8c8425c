#![forbid(unsafe_code)]

//! Append-only typed buffers that spill to temp storage.

use crate::distinct::{DistinctTracker, DEFAULT_MAX_DISTINCT_COUNT};
use crate::element::{decode_framed, encode_framed, ColumnElement};
use crate::error::BufferError;
use crate::metadata::MetaData;
use datatable_fs::{TempStream, TempStreamProvider};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, MutexGuard};
use uuid::Uuid;

pub const DEFAULT_BLOCK_SIZE: usize = 32_768;
pub const DEFAULT_MAX_IN_MEMORY_BLOCKS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeBufferOptions {
    /// Elements per block.
    pub block_size: usize,
    /// Blocks held in memory, counting the one being filled. Further completed
    /// blocks go to the temp stream.
    pub max_in_memory_blocks: usize,
    /// Distinct-value ceiling; `None` disables distinct tracking.
    pub max_distinct: Option<usize>,
}

impl Default for CompositeBufferOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_in_memory_blocks: DEFAULT_MAX_IN_MEMORY_BLOCKS,
            max_distinct: Some(DEFAULT_MAX_DISTINCT_COUNT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Everything added so far is in memory.
    Filling,
    /// At least one block lives in the temp stream.
    Overflowed,
    /// Read back at least once; no more appends.
    Finalized,
}

/// Growable sequence of `T` with bounded memory use.
///
/// Elements are grouped into blocks of `block_size`. Completed blocks stay in
/// memory until `max_in_memory_blocks` is reached, after which each completed
/// block is written to a temp stream obtained from the provider under this
/// buffer's id. Reading (`for_each_block`, `write_to`) finalizes the buffer.
pub struct CompositeBuffer<T: ColumnElement> {
    id: Uuid,
    options: CompositeBufferOptions,
    provider: Arc<dyn TempStreamProvider>,
    retained: Vec<Vec<T>>,
    current: Vec<T>,
    overflow: Option<TempStream>,
    overflow_blocks: usize,
    size: u64,
    distinct: DistinctTracker,
    state: BufferState,
    metadata: MetaData,
}

impl<T: ColumnElement> std::fmt::Debug for CompositeBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBuffer")
            .field("id", &self.id)
            .field("column_type", &T::COLUMN_TYPE)
            .field("size", &self.size)
            .field("state", &self.state)
            .field("overflow_blocks", &self.overflow_blocks)
            .finish_non_exhaustive()
    }
}

impl<T: ColumnElement> CompositeBuffer<T> {
    pub fn new(provider: Arc<dyn TempStreamProvider>, options: CompositeBufferOptions) -> Self {
        let block_size = options.block_size.max(1);
        Self {
            id: Uuid::new_v4(),
            options: CompositeBufferOptions {
                block_size,
                max_in_memory_blocks: options.max_in_memory_blocks.max(1),
                ..options
            },
            provider,
            retained: Vec::new(),
            current: Vec::with_capacity(block_size.min(4096)),
            overflow: None,
            overflow_blocks: 0,
            size: 0,
            distinct: DistinctTracker::new(options.max_distinct),
            state: BufferState::Filling,
            metadata: MetaData::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &CompositeBufferOptions {
        &self.options
    }

    /// Number of elements ever added.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn block_size(&self) -> usize {
        self.options.block_size
    }

    pub fn block_count(&self) -> usize {
        self.size.div_ceil(self.options.block_size as u64) as usize
    }

    /// Distinct element count, or `None` once the ceiling has been exceeded.
    pub fn distinct_items(&self) -> Option<u64> {
        self.distinct.count()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn overflow_blocks(&self) -> usize {
        self.overflow_blocks
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetaData {
        &mut self.metadata
    }

    pub fn add(&mut self, item: T) -> Result<(), BufferError> {
        if self.state == BufferState::Finalized {
            return Err(BufferError::Finalized);
        }
        if self.current.len() == self.options.block_size {
            self.retire_current()?;
        }
        self.distinct.insert(item.distinct_key());
        self.current.push(item);
        self.size += 1;
        Ok(())
    }

    pub fn add_all(&mut self, items: &[T]) -> Result<(), BufferError> {
        for item in items {
            self.add(item.clone())?;
        }
        Ok(())
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) -> Result<(), BufferError> {
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    fn retire_current(&mut self) -> Result<(), BufferError> {
        if self.retained.len() + 1 < self.options.max_in_memory_blocks {
            let block = std::mem::replace(
                &mut self.current,
                Vec::with_capacity(self.options.block_size.min(4096)),
            );
            self.retained.push(block);
            return Ok(());
        }

        let stream = match &self.overflow {
            Some(stream) => stream.clone(),
            None => {
                let stream = self.provider.get(self.id)?;
                log::debug!(
                    "buffer {} ({}) overflowing to temp storage after {} elements",
                    self.id,
                    T::COLUMN_TYPE,
                    self.size
                );
                self.overflow = Some(stream.clone());
                stream
            }
        };
        write_overflow_block(&stream, &self.current)?;
        self.current.clear();
        self.overflow_blocks += 1;
        self.state = BufferState::Overflowed;
        Ok(())
    }

    /// Visit every block in insertion order and finalize the buffer.
    pub fn for_each_block<E>(&mut self, mut callback: impl FnMut(&[T]) -> Result<(), E>) -> Result<(), E>
    where
        E: From<BufferError>,
    {
        self.state = BufferState::Finalized;

        for block in &self.retained {
            callback(block)?;
        }

        if let Some(stream) = &self.overflow {
            let mut file = lock_stream(stream).map_err(BufferError::from)?;
            file.seek(SeekFrom::Start(0)).map_err(BufferError::from)?;
            for _ in 0..self.overflow_blocks {
                let block = read_overflow_block::<T>(&mut *file)?;
                callback(&block)?;
            }
        }

        if !self.current.is_empty() {
            callback(&self.current)?;
        }
        Ok(())
    }

    /// Collect every element; finalizes the buffer.
    pub fn to_vec(&mut self) -> Result<Vec<T>, BufferError> {
        let mut out = Vec::with_capacity(self.size as usize);
        self.for_each_block(|block| {
            out.extend_from_slice(block);
            Ok::<_, BufferError>(())
        })?;
        Ok(out)
    }

    /// Serialize in column data layout and finalize. Returns the bytes written.
    ///
    /// Fixed-size elements are written back to back. Variable-length elements are
    /// written as an offset table of `size + 1` little-endian `u64`s followed by
    /// the concatenated payloads.
    pub fn write_to(&mut self, out: &mut dyn Write) -> Result<u64, BufferError> {
        let mut written = 0u64;
        let mut scratch = Vec::new();

        if T::COLUMN_TYPE.fixed_size().is_none() {
            out.write_all(&0u64.to_le_bytes())?;
            written += 8;
            let mut end = 0u64;
            self.for_each_block(|block| {
                for item in block {
                    scratch.clear();
                    item.encode(&mut scratch);
                    end += scratch.len() as u64;
                    out.write_all(&end.to_le_bytes())?;
                    written += 8;
                }
                Ok::<_, BufferError>(())
            })?;
        }

        self.for_each_block(|block| {
            scratch.clear();
            for item in block {
                item.encode(&mut scratch);
            }
            out.write_all(&scratch)?;
            written += scratch.len() as u64;
            Ok::<_, BufferError>(())
        })?;

        Ok(written)
    }
}

impl<T: ColumnElement> Drop for CompositeBuffer<T> {
    fn drop(&mut self) {
        if self.overflow.take().is_some() {
            self.provider.release(self.id);
        }
    }
}

fn lock_stream(stream: &TempStream) -> io::Result<MutexGuard<'_, File>> {
    stream
        .lock()
        .map_err(|_| io::Error::other("temp stream lock poisoned"))
}

fn write_overflow_block<T: ColumnElement>(stream: &TempStream, block: &[T]) -> io::Result<()> {
    let mut payload = Vec::new();
    for item in block {
        encode_framed(item, &mut payload);
    }
    let mut file = lock_stream(stream)?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(&(block.len() as u32).to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&payload)?;
    Ok(())
}

fn read_overflow_block<T: ColumnElement>(file: &mut impl Read) -> Result<Vec<T>, BufferError> {
    let mut header = [0u8; 12];
    file.read_exact(&mut header)?;
    let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[4..]);
    let len = u64::from_le_bytes(len) as usize;

    let mut payload = vec![0u8; len];
    file.read_exact(&mut payload)?;

    let mut cursor = payload.as_slice();
    let mut block = Vec::with_capacity(count);
    for _ in 0..count {
        block.push(decode_framed::<T>(&mut cursor)?);
    }
    Ok(block)
}
