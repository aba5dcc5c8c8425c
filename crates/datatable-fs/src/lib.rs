//! Filesystem utilities shared by the datatable crates.
//!
//! - [`atomic_write`]: write a table file next to its destination, sync it, then
//!   rename it into place so readers never observe a half-written table.
//! - [`TempStreamProvider`] / [`TempFileManager`]: per-buffer scratch streams that
//!   composite buffers spill completed blocks into.

mod temp;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

pub use crate::temp::{TempFileManager, TempStream, TempStreamProvider};

#[derive(Debug, Error)]
pub enum AtomicWriteError<E: std::error::Error + 'static> {
    #[error("io error: {0}")]
    Io(#[source] io::Error),
    #[error("write error: {0}")]
    Writer(#[source] E),
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` is `Some("")` for bare file names like `table.dt`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write `dest` atomically.
///
/// `write_fn` receives a temp file in the destination directory. The temp file is
/// flushed, synced and renamed over `dest` only when `write_fn` succeeds; on error
/// the destination is untouched and the temp file is removed.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>>
where
    E: std::error::Error + 'static,
{
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir).map_err(AtomicWriteError::Io)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(AtomicWriteError::Io)?;
    let out = write_fn(tmp.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    tmp.as_file_mut().flush().map_err(AtomicWriteError::Io)?;
    tmp.as_file().sync_all().map_err(AtomicWriteError::Io)?;
    tmp.persist(dest)
        .map_err(|err| AtomicWriteError::Io(err.error))?;

    // Best-effort: the file is already in place.
    if let Err(err) = sync_dir(dir) {
        log::trace!("directory sync after atomic write failed: {err}");
    }

    Ok(out)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    // Opening a directory as a file only works on some platforms.
    File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn atomic_write_replaces_existing_file() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("table.dt");
        std::fs::write(&dest, b"old").expect("seed");

        atomic_write(&dest, |file| file.write_all(b"new contents")).expect("atomic write");
        assert_eq!(std::fs::read(&dest).expect("read"), b"new contents");
    }

    #[test]
    fn failed_write_leaves_destination_untouched() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("table.dt");
        std::fs::write(&dest, b"sentinel").expect("seed");

        let err = atomic_write(&dest, |file| {
            file.write_all(b"partial").expect("write temp");
            Err::<(), _>(io::Error::new(io::ErrorKind::Other, "simulated"))
        })
        .expect_err("writer error should propagate");
        assert!(matches!(err, AtomicWriteError::Writer(_)));

        assert_eq!(std::fs::read(&dest).expect("read"), b"sentinel");
        let files: Vec<_> = std::fs::read_dir(tmp.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        assert_eq!(files, vec![dest], "temp file should be cleaned up");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("nested").join("dir").join("table.dt");
        atomic_write(&dest, |file| file.write_all(b"x")).expect("atomic write");
        assert!(dest.exists());
    }
}
