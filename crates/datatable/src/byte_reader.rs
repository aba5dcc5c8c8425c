//! Random-access byte sources that tables and column readers sit on.

use crate::error::ByteReaderError;
use bytes::Bytes;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

/// Byte range access over a backing store of fixed size.
///
/// Reads may run concurrently. An `update` racing with reads of the same range
/// must be serialized by the caller.
pub trait ByteBlockReader: Send + Sync + fmt::Debug {
    /// Total number of bytes.
    fn size(&self) -> u64;

    /// Read `len` bytes at `offset`. An empty request always succeeds.
    fn get_block(&self, offset: u64, len: u64) -> Result<Bytes, ByteReaderError>;

    /// Overwrite bytes in place; the range must already exist.
    fn update(&self, offset: u64, data: &[u8]) -> Result<(), ByteReaderError>;

    /// Release the backing handle. Calling this more than once is a no-op.
    fn close(&self);
}

fn check_range(offset: u64, len: u64, size: u64) -> Result<(), ByteReaderError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ByteReaderError::OutOfBounds { offset, len, size }),
    }
}

fn buffer_len(len: u64) -> Result<usize, ByteReaderError> {
    usize::try_from(len).map_err(|_| {
        ByteReaderError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block of {len} bytes does not fit in memory"),
        ))
    })
}

/// Read-only reader over an in-memory byte region.
#[derive(Debug)]
pub struct MemoryByteReader {
    data: Bytes,
    closed: AtomicBool,
}

impl MemoryByteReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            closed: AtomicBool::new(false),
        }
    }
}

impl ByteBlockReader for MemoryByteReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn get_block(&self, offset: u64, len: u64) -> Result<Bytes, ByteReaderError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ByteReaderError::Closed);
        }
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len as usize))
    }

    /// Memory regions are immutable; an update is reported rather than dropped.
    fn update(&self, _offset: u64, _data: &[u8]) -> Result<(), ByteReaderError> {
        Err(ByteReaderError::ReadOnly)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Offset-addressed I/O that does not move a shared cursor.
pub trait PositionedIo: Send + Sync {
    /// May return fewer bytes than requested.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl PositionedIo for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// File-backed reader using positioned reads, so concurrent readers never
/// contend on a cursor.
pub struct FileByteReader<F: PositionedIo = File> {
    file: RwLock<Option<F>>,
    size: u64,
}

impl FileByteReader<File> {
    /// Open read-only.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::from_io(file, size))
    }

    /// Open for reading and in-place updates.
    pub fn open_writable(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::from_io(file, size))
    }
}

impl<F: PositionedIo> FileByteReader<F> {
    pub fn from_io(io: F, size: u64) -> Self {
        Self {
            file: RwLock::new(Some(io)),
            size,
        }
    }
}

impl<F: PositionedIo> fmt::Debug for FileByteReader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileByteReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Loop until `buf` is full; short reads are normal and are retried.
fn read_exact_at(io: &impl PositionedIo, buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match io.read_at(&mut buf[filled..], offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("end of file after {filled} of {} bytes", buf.len()),
                ))
            }
            Ok(n) => {
                if filled + n < buf.len() {
                    log::trace!("short read: {n} bytes at offset {offset}, retrying");
                }
                filled += n;
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn write_all_at(io: &impl PositionedIo, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match io.write_at(buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

impl<F: PositionedIo> ByteBlockReader for FileByteReader<F> {
    fn size(&self) -> u64 {
        self.size
    }

    fn get_block(&self, offset: u64, len: u64) -> Result<Bytes, ByteReaderError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        check_range(offset, len, self.size)?;
        let guard = self.file.read().expect("file reader lock poisoned");
        let io = guard.as_ref().ok_or(ByteReaderError::Closed)?;
        let mut buf = vec![0u8; buffer_len(len)?];
        read_exact_at(io, &mut buf, offset)?;
        Ok(Bytes::from(buf))
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<(), ByteReaderError> {
        check_range(offset, data.len() as u64, self.size)?;
        let guard = self.file.read().expect("file reader lock poisoned");
        let io = guard.as_ref().ok_or(ByteReaderError::Closed)?;
        write_all_at(io, data, offset)?;
        io.sync()?;
        Ok(())
    }

    fn close(&self) {
        let mut guard = self.file.write().expect("file reader lock poisoned");
        if guard.take().is_some() {
            log::debug!("closed file reader ({} bytes)", self.size);
        }
    }
}

/// Reader over a seekable stream. Every access seeks a shared cursor, so reads
/// and updates are serialized by a mutex.
pub struct StreamByteReader<S> {
    stream: Mutex<Option<S>>,
    size: u64,
}

impl<S: Read + Write + Seek + Send> StreamByteReader<S> {
    pub fn new(mut stream: S) -> io::Result<Self> {
        let size = stream.seek(SeekFrom::End(0))?;
        Ok(Self {
            stream: Mutex::new(Some(stream)),
            size,
        })
    }

    /// Take the stream back, e.g. to inspect what updates wrote.
    pub fn into_inner(self) -> Option<S> {
        self.stream.into_inner().expect("stream reader lock poisoned")
    }
}

impl<S> fmt::Debug for StreamByteReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamByteReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write + Seek + Send> ByteBlockReader for StreamByteReader<S> {
    fn size(&self) -> u64 {
        self.size
    }

    fn get_block(&self, offset: u64, len: u64) -> Result<Bytes, ByteReaderError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        check_range(offset, len, self.size)?;
        let mut guard = self.stream.lock().expect("stream reader lock poisoned");
        let stream = guard.as_mut().ok_or(ByteReaderError::Closed)?;
        let mut buf = vec![0u8; buffer_len(len)?];
        stream.seek(SeekFrom::Start(offset))?;
        stream.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<(), ByteReaderError> {
        check_range(offset, data.len() as u64, self.size)?;
        let mut guard = self.stream.lock().expect("stream reader lock poisoned");
        let stream = guard.as_mut().ok_or(ByteReaderError::Closed)?;
        stream.seek(SeekFrom::Start(offset))?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn close(&self) {
        self.stream
            .lock()
            .expect("stream reader lock poisoned")
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    /// Serves at most `chunk` bytes per call to exercise short-read handling.
    struct Trickle {
        data: Vec<u8>,
        chunk: usize,
        calls: AtomicUsize,
    }

    impl PositionedIo for Trickle {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let start = (offset as usize).min(self.data.len());
            let n = buf.len().min(self.chunk).min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn write_at(&self, _buf: &[u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn file_reader_loops_over_short_reads() {
        let data: Vec<u8> = (0..=255u8).collect();
        let trickle = Trickle {
            data: data.clone(),
            chunk: 7,
            calls: AtomicUsize::new(0),
        };
        let reader = FileByteReader::from_io(trickle, data.len() as u64);

        let block = reader.get_block(10, 100).unwrap();
        assert_eq!(&block[..], &data[10..110]);
        let calls = reader
            .file
            .read()
            .unwrap()
            .as_ref()
            .unwrap()
            .calls
            .load(Ordering::Relaxed);
        assert_eq!(calls, 15);
    }

    #[test]
    fn premature_eof_is_an_error_not_a_truncation() {
        // Claims more bytes than the source can deliver.
        let trickle = Trickle {
            data: vec![1, 2, 3],
            chunk: 2,
            calls: AtomicUsize::new(0),
        };
        let reader = FileByteReader::from_io(trickle, 10);
        let err = reader.get_block(0, 5).unwrap_err();
        match err {
            ByteReaderError::Io(io) => assert_eq!(io.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_and_empty_requests() {
        let reader = MemoryByteReader::new(vec![1u8, 2, 3, 4]);
        assert!(reader.get_block(4, 0).unwrap().is_empty());
        assert!(reader.get_block(100, 0).unwrap().is_empty());
        assert!(matches!(
            reader.get_block(2, 3),
            Err(ByteReaderError::OutOfBounds {
                offset: 2,
                len: 3,
                size: 4
            })
        ));
        assert!(matches!(
            reader.get_block(u64::MAX, 2),
            Err(ByteReaderError::OutOfBounds { .. })
        ));
        assert_eq!(&reader.get_block(1, 2).unwrap()[..], &[2, 3]);
    }

    #[test]
    fn memory_reader_rejects_updates() {
        let reader = MemoryByteReader::new(vec![0u8; 8]);
        assert!(matches!(
            reader.update(0, &[1]),
            Err(ByteReaderError::ReadOnly)
        ));
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let reader = MemoryByteReader::new(vec![0u8; 8]);
        reader.close();
        reader.close();
        assert!(matches!(reader.get_block(0, 1), Err(ByteReaderError::Closed)));

        let stream = StreamByteReader::new(Cursor::new(vec![0u8; 8])).unwrap();
        stream.close();
        stream.close();
        assert!(matches!(stream.get_block(0, 1), Err(ByteReaderError::Closed)));
    }

    #[test]
    fn stream_reader_updates_in_place() {
        let reader = StreamByteReader::new(Cursor::new(vec![0u8; 6])).unwrap();
        assert_eq!(reader.size(), 6);
        reader.update(2, &[7, 8]).unwrap();
        assert_eq!(&reader.get_block(0, 6).unwrap()[..], &[0, 0, 7, 8, 0, 0]);
        assert!(matches!(
            reader.update(5, &[1, 2]),
            Err(ByteReaderError::OutOfBounds { .. })
        ));
        let inner = reader.into_inner().unwrap().into_inner();
        assert_eq!(inner, vec![0, 0, 7, 8, 0, 0]);
    }

    #[test]
    fn file_reader_reads_and_updates_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytes.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let reader = FileByteReader::open_writable(&path).unwrap();
        assert_eq!(&reader.get_block(6, 5).unwrap()[..], b"world");
        reader.update(0, b"HELLO").unwrap();
        assert_eq!(&reader.get_block(0, 11).unwrap()[..], b"HELLO world");
        reader.close();
        reader.close();
        assert!(matches!(reader.get_block(0, 1), Err(ByteReaderError::Closed)));
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO world");
    }
}
