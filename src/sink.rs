//! Byte sinks: where in-order payload bytes end up.
//!
//! The engine calls [`ByteSink::write`] once per delivered segment, only
//! with in-order bytes. On graceful closure it calls [`ByteSink::finish`];
//! on abrupt closure it calls [`ByteSink::abort`], which must leave an
//! explicit error record behind so truncated transfers can be told apart
//! from complete ones.
//!
//! The server opens one sink per accepted connection through a
//! [`SinkFactory`], keyed by the connection id it assigned.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Record written in place of the data when a transfer is cut short.
pub const ERROR_RECORD: &[u8] = b"ERROR";

/// An append-only consumer of in-order stream bytes.
pub trait ByteSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// The stream ended cleanly.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// The stream was cut short; replace the contents with [`ERROR_RECORD`].
    fn abort(&mut self) -> io::Result<()>;
}

/// Creates the sink for a newly accepted connection.
pub trait SinkFactory {
    fn open(&mut self, conn_id: u16) -> io::Result<Box<dyn ByteSink>>;
}

// ---------------------------------------------------------------------------
// Null sink
// ---------------------------------------------------------------------------

/// Discards everything. Used by the sending side, which receives no data.
#[derive(Debug, Default)]
pub struct NullSink;

impl ByteSink for NullSink {
    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn abort(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File sinks
// ---------------------------------------------------------------------------

/// Writes the stream to a file.
///
/// Writes are plain buffered `std::fs` calls made from the event loop. Each
/// call carries at most one segment, so they stay short enough not to stall
/// the runtime.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: BufWriter<File>,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn abort(&mut self) -> io::Result<()> {
        // Reopening truncates whatever was delivered so far. The old writer's
        // buffer must not be flushed into the truncated file.
        let truncated = BufWriter::new(File::create(&self.path)?);
        let (_old, _unflushed) = std::mem::replace(&mut self.file, truncated).into_parts();
        self.file.write_all(ERROR_RECORD)?;
        self.file.flush()
    }
}

/// Opens `<dir>/<conn_id>.file` for each accepted connection.
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    dir: PathBuf,
}

impl DirectorySinks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, conn_id: u16) -> PathBuf {
        self.dir.join(format!("{conn_id}.file"))
    }
}

impl SinkFactory for DirectorySinks {
    fn open(&mut self, conn_id: u16) -> io::Result<Box<dyn ByteSink>> {
        let sink = FileSink::create(self.path_for(conn_id))?;
        log::debug!("conn {conn_id}: writing to {}", sink.path().display());
        Ok(Box::new(sink))
    }
}

// ---------------------------------------------------------------------------
// In-memory sinks
// ---------------------------------------------------------------------------

/// What an in-memory sink has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub finished: bool,
    pub aborted: bool,
}

/// A cloneable in-memory sink; every clone shares the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Captured>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured stream.
    pub fn captured(&self) -> Captured {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        // A panic while holding the lock leaves plain bytes behind, still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.lock().bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.lock().finished = true;
        Ok(())
    }

    fn abort(&mut self) -> io::Result<()> {
        let mut captured = self.lock();
        captured.bytes = ERROR_RECORD.to_vec();
        captured.aborted = true;
        Ok(())
    }
}

/// Hands out a [`MemorySink`] per connection id and keeps a handle to each.
#[derive(Debug, Clone, Default)]
pub struct MemorySinks {
    sinks: Arc<Mutex<HashMap<u16, MemorySink>>>,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conn_id: u16) -> Option<MemorySink> {
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&conn_id)
            .cloned()
    }
}

impl SinkFactory for MemorySinks {
    fn open(&mut self, conn_id: u16) -> io::Result<Box<dyn ByteSink>> {
        let sink = MemorySink::new();
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(conn_id, sink.clone());
        Ok(Box::new(sink))
    }
}
