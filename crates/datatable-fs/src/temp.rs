use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Shared handle to one scratch stream.
pub type TempStream = Arc<Mutex<File>>;

/// Source of scratch streams for buffers that outgrow memory.
///
/// `get` must return the same stream for the same id until it is released
/// (or [`clear`](Self::clear) is called); callers rely on that to read back
/// what they wrote earlier.
pub trait TempStreamProvider: Send + Sync {
    fn get(&self, id: Uuid) -> io::Result<TempStream>;

    /// Forget the stream for `id`. Unknown ids are ignored.
    fn release(&self, id: Uuid);

    /// Drop every stream handed out so far.
    fn clear(&self);
}

/// [`TempStreamProvider`] backed by anonymous temp files.
///
/// Files are unlinked by the OS as soon as the last handle is dropped, so
/// `clear` (or dropping the manager plus every outstanding handle) is enough
/// to release disk space.
#[derive(Debug, Default)]
pub struct TempFileManager {
    dir: Option<PathBuf>,
    streams: Mutex<HashMap<Uuid, TempStream>>,
}

impl TempFileManager {
    /// Create streams in the system temp directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create streams inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.streams.lock().expect("temp stream map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TempStreamProvider for TempFileManager {
    fn get(&self, id: Uuid) -> io::Result<TempStream> {
        let mut streams = self.streams.lock().expect("temp stream map poisoned");
        if let Some(stream) = streams.get(&id) {
            return Ok(stream.clone());
        }

        let file = match &self.dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        log::debug!("allocated temp stream {id}");
        let stream = Arc::new(Mutex::new(file));
        streams.insert(id, stream.clone());
        Ok(stream)
    }

    fn release(&self, id: Uuid) {
        let mut streams = self.streams.lock().expect("temp stream map poisoned");
        if streams.remove(&id).is_some() {
            log::debug!("released temp stream {id}");
        }
    }

    fn clear(&self) {
        let mut streams = self.streams.lock().expect("temp stream map poisoned");
        log::debug!("releasing {} temp streams", streams.len());
        streams.clear();
    }
}
