//! # I/O Module
//!
//! Log-structured access to the underlying storage. Data is written,
//! append-only, into a [`LogSink`] and read back through a [`LogSource`].
//!
//! ## Design Overview
//!
//! The [`Env`] trait is the substrate: it creates append-only and
//! random-access files, answers size queries, and supplies the clock.
//! [`FsEnv`] is the default filesystem implementation (random-access
//! reads are served from a memory map); [`MemEnv`] keeps whole files in
//! shared byte vectors and backs the unit tests.
//!
//! Sinks and sources are reference-counted shared resources: they are
//! created before a writer or reader is constructed, retained by it (via
//! `Arc`), and released when the last holder drops. A sink may be shared
//! across memtable partitions; [`LogSink::lock`] exposes the internal
//! mutex so a multi-block flush can keep the logical offset and the write
//! atomic with respect to other partitions.
//!
//! ## Write buffering
//!
//! A sink accumulates appends in memory until `min_buf` bytes are
//! pending, then pushes them down in one write; `max_buf` caps how much
//! is ever buffered. The *logical* offset ([`LogSink::ltell`]) advances
//! on accept, so handles computed from it are correct regardless of
//! buffering. `lsync`/`lclose` drain the buffer.
//!
//! ## Rotation
//!
//! With [`RotationType::ExtCtrl`] the caller drives rotation by index:
//! [`LogSink::lrotate`] closes the current piece and redirects future
//! writes to `<base>.<index>`. Logical offsets continue monotonically
//! across pieces, and [`LogSource`] stitches the pieces back together so
//! readers see one contiguous log. Blocks never straddle a rotation
//! boundary because rotation only happens between table flushes.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace};

use crate::error::{Error, Result};

// ------------------------------------------------------------------------------------------------
// Env abstraction
// ------------------------------------------------------------------------------------------------

/// An append-only file created by an [`Env`].
pub trait WritableFile: Send {
    /// Appends bytes at the end of the file.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Pushes application buffers down to the OS.
    fn flush(&mut self) -> io::Result<()>;

    /// Forces durable storage.
    fn sync(&mut self) -> io::Result<()>;
}

/// A read-only file supporting positioned reads.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `n` bytes starting at `offset`. Short reads happen
    /// only at end of file.
    fn read(&self, offset: u64, n: usize) -> io::Result<Vec<u8>>;
}

/// Storage substrate used by writers and readers.
pub trait Env: Send + Sync {
    /// Microseconds since the UNIX epoch.
    fn now_micros(&self) -> u64;

    /// Sleeps the calling thread.
    fn sleep_micros(&self, micros: u64);

    /// Recursively creates a directory.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates (truncating) an append-only file.
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;

    /// Opens a file for positioned reads.
    fn new_random_access_file(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>>;

    /// Size of a file in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// True when `path` names an existing file.
    fn file_exists(&self, path: &Path) -> bool;
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ------------------------------------------------------------------------------------------------
// Filesystem Env
// ------------------------------------------------------------------------------------------------

/// Default [`Env`] over the local filesystem.
///
/// Random-access files are memory-mapped, so repeated block reads avoid
/// syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEnv;

struct FsWritableFile {
    file: std::fs::File,
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.file.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

struct FsRandomAccessFile {
    // Empty files cannot be mapped on every platform.
    map: Option<memmap2::Mmap>,
}

impl RandomAccessFile for FsRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> io::Result<Vec<u8>> {
        let data: &[u8] = match &self.map {
            Some(map) => map,
            None => &[],
        };
        let offset = offset.min(data.len() as u64) as usize;
        let end = offset.saturating_add(n).min(data.len());
        Ok(data[offset..end].to_vec())
    }
}

impl Env for FsEnv {
    fn now_micros(&self) -> u64 {
        unix_micros()
    }

    fn sleep_micros(&self, micros: u64) {
        std::thread::sleep(std::time::Duration::from_micros(micros));
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(FsWritableFile { file }))
    }

    fn new_random_access_file(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
        let file = std::fs::File::open(path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // Safety: the map is read-only and the format treats the file
            // as immutable once a reader is opened.
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };
        Ok(Box::new(FsRandomAccessFile { map }))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ------------------------------------------------------------------------------------------------
// In-memory Env
// ------------------------------------------------------------------------------------------------

type MemFile = Arc<RwLock<Vec<u8>>>;

/// [`Env`] keeping every file in a shared byte vector.
///
/// Writers and readers opened from the same `MemEnv` observe the same
/// contents, which lets tests exercise the full write/read pipeline
/// without touching disk.
#[derive(Default, Clone)]
pub struct MemEnv {
    files: Arc<Mutex<HashMap<PathBuf, MemFile>>>,
}

impl MemEnv {
    /// Creates an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to a file's bytes, for corruption-injection tests.
    pub fn file(&self, path: &Path) -> Option<MemFile> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

struct MemWritableFile {
    data: MemFile,
}

impl WritableFile for MemWritableFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.write().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MemRandomAccessFile {
    data: MemFile,
}

impl RandomAccessFile for MemRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> io::Result<Vec<u8>> {
        let data = self.data.read().unwrap();
        let offset = offset.min(data.len() as u64) as usize;
        let end = offset.saturating_add(n).min(data.len());
        Ok(data[offset..end].to_vec())
    }
}

impl Env for MemEnv {
    fn now_micros(&self) -> u64 {
        unix_micros()
    }

    fn sleep_micros(&self, micros: u64) {
        std::thread::sleep(std::time::Duration::from_micros(micros));
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file: MemFile = Arc::default();
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Arc::clone(&file));
        Ok(Box::new(MemWritableFile { data: file }))
    }

    fn new_random_access_file(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
        let file = self
            .file(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such in-memory file"))?;
        Ok(Box::new(MemRandomAccessFile { data: file }))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        let file = self
            .file(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such in-memory file"))?;
        let len = file.read().unwrap().len() as u64;
        Ok(len)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

// ------------------------------------------------------------------------------------------------
// Log sink
// ------------------------------------------------------------------------------------------------

/// Whether and how a log is split into pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationType {
    /// Keep the whole log in one file.
    #[default]
    NoRotation,
    /// Rotation driven by the caller through [`LogSink::lrotate`].
    ExtCtrl,
}

/// Options for opening a [`LogSink`].
#[derive(Clone, Default)]
pub struct SinkOptions {
    /// Accumulate at least this many bytes before writing. Zero disables
    /// buffering.
    pub min_buf: usize,
    /// Never hold more than this many bytes in the buffer.
    pub max_buf: usize,
    /// Log rotation behavior.
    pub rotation: RotationType,
}

/// Append-only handle on one log, shared by reference counting.
pub struct LogSink {
    state: Mutex<SinkState>,
}

/// Mutable sink state, exposed through [`LogSink::lock`] so callers can
/// perform an offset read and a write as one critical section.
pub struct SinkState {
    env: Arc<dyn Env>,
    base: PathBuf,
    filename: PathBuf,
    rotation: RotationType,
    file: Option<Box<dyn WritableFile>>,
    buf: Vec<u8>,
    min_buf: usize,
    max_buf: usize,
    /// Logical write offset; monotonic across rotation.
    offset: u64,
}

/// Name of rotation piece `index` of the log at `base`.
pub(crate) fn piece_path(base: &Path, index: u32) -> PathBuf {
    if index == 0 {
        base.to_path_buf()
    } else {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{index:04}"));
        PathBuf::from(name)
    }
}

impl LogSink {
    /// Creates the log's first piece and returns a shared handle.
    pub fn open(env: Arc<dyn Env>, base: impl Into<PathBuf>, options: SinkOptions) -> Result<Arc<Self>> {
        let base = base.into();
        let filename = piece_path(&base, 0);
        let file = env.new_writable_file(&filename)?;
        debug!(path = %filename.display(), "opened log sink");
        Ok(Arc::new(Self {
            state: Mutex::new(SinkState {
                env,
                base,
                filename,
                rotation: options.rotation,
                file: Some(file),
                buf: Vec::new(),
                min_buf: options.min_buf,
                max_buf: options.max_buf.max(options.min_buf),
                offset: 0,
            }),
        }))
    }

    /// Locks the sink for a multi-operation critical section.
    pub fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap()
    }

    /// Current logical write offset.
    pub fn ltell(&self) -> u64 {
        self.lock().offset
    }

    /// Appends `data`, advancing the logical offset on success.
    pub fn lwrite(&self, data: &[u8]) -> Result<()> {
        self.lock().write(data)
    }

    /// Drains buffers and forces durable storage.
    pub fn lsync(&self) -> Result<()> {
        self.lock().sync()
    }

    /// Closes the log; no further writes are accepted.
    pub fn lclose(&self, sync: bool) -> Result<()> {
        self.lock().close(sync)
    }

    /// Closes the current piece and redirects future writes to piece
    /// `index`.
    pub fn lrotate(&self, index: u32, sync: bool) -> Result<()> {
        self.lock().rotate(index, sync)
    }
}

impl SinkState {
    /// Logical offset, buffered bytes included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends `data` through the buffering layer.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::AlreadyClosed);
        }
        if self.min_buf == 0 {
            self.push_down(data)?;
        } else {
            if self.buf.len() + data.len() > self.max_buf {
                self.drain_buffer()?;
            }
            if data.len() >= self.max_buf {
                // Oversized writes bypass the buffer entirely.
                self.push_down(data)?;
            } else {
                self.buf.extend_from_slice(data);
                if self.buf.len() >= self.min_buf {
                    self.drain_buffer()?;
                }
            }
        }
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Drains buffers and syncs the current piece.
    pub fn sync(&mut self) -> Result<()> {
        self.drain_buffer()?;
        match self.file.as_mut() {
            Some(file) => {
                file.sync()?;
                Ok(())
            }
            None => Err(Error::AlreadyClosed),
        }
    }

    fn push_down(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::AlreadyClosed)?;
        file.append(data)?;
        file.flush()?;
        Ok(())
    }

    fn drain_buffer(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.buf);
        let result = self.push_down(&pending);
        if result.is_err() {
            // Keep the bytes so a retry does not lose data.
            self.buf = pending;
        }
        result
    }

    /// Closes the sink.
    pub fn close(&mut self, sync: bool) -> Result<()> {
        self.drain_buffer()?;
        match self.file.as_mut() {
            Some(file) => {
                if sync {
                    file.sync()?;
                }
                self.file = None;
                trace!(path = %self.filename.display(), "closed log sink");
                Ok(())
            }
            None => Err(Error::AlreadyClosed),
        }
    }

    /// Switches writing to rotation piece `index`.
    pub fn rotate(&mut self, index: u32, sync: bool) -> Result<()> {
        if self.rotation != RotationType::ExtCtrl {
            return Err(Error::assertion_failed("log rotation is not enabled"));
        }
        self.drain_buffer()?;
        if let Some(file) = self.file.as_mut() {
            if sync {
                file.sync()?;
            }
        } else {
            return Err(Error::AlreadyClosed);
        }
        let next = piece_path(&self.base, index);
        let file = self.env.new_writable_file(&next)?;
        debug!(path = %next.display(), offset = self.offset, "rotated log sink");
        self.filename = next;
        self.file = Some(file);
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if state.file.is_some() {
                if let Err(err) = state.close(true) {
                    error!(error = %err, "failed to close log sink on drop");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Log source
// ------------------------------------------------------------------------------------------------

/// What the log holds, which decides the read strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    /// Data blocks; random access expected, pieces stay on disk.
    Data,
    /// Index blocks; the whole log is prefetched and cached in memory.
    Index,
}

enum SourceInner {
    /// Entire log resident in memory.
    Cached(Vec<u8>),
    /// On-disk pieces with their starting logical offsets.
    Files(Vec<(u64, u64, Box<dyn RandomAccessFile>)>),
}

/// Read-only handle on one log, shared by reference counting.
///
/// Rotated logs appear as a single contiguous byte range: piece
/// boundaries are invisible to callers because logical offsets continued
/// monotonically while writing.
pub struct LogSource {
    inner: SourceInner,
    size: u64,
    reads: std::sync::atomic::AtomicU64,
}

impl LogSource {
    /// Opens the log at `base`, stitching rotated pieces in order.
    pub fn open(env: &Arc<dyn Env>, base: &Path, log_type: LogType) -> Result<Arc<Self>> {
        let mut pieces = Vec::new();
        let mut index = 0u32;
        loop {
            let path = piece_path(base, index);
            if !env.file_exists(&path) {
                break;
            }
            pieces.push(path);
            index += 1;
        }
        if pieces.is_empty() {
            return Err(Error::from(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log not found: {}", base.display()),
            )));
        }

        let source = match log_type {
            LogType::Index => {
                let mut all = Vec::new();
                for path in &pieces {
                    let len = env.file_size(path)? as usize;
                    let file = env.new_random_access_file(path)?;
                    let data = file.read(0, len)?;
                    if data.len() != len {
                        return Err(Error::corruption("short read caching index log"));
                    }
                    all.extend_from_slice(&data);
                }
                let size = all.len() as u64;
                Self {
                    inner: SourceInner::Cached(all),
                    size,
                    reads: Default::default(),
                }
            }
            LogType::Data => {
                let mut files = Vec::new();
                let mut start = 0u64;
                for path in &pieces {
                    let len = env.file_size(path)?;
                    let file = env.new_random_access_file(path)?;
                    files.push((start, len, file));
                    start += len;
                }
                Self {
                    inner: SourceInner::Files(files),
                    size: start,
                    reads: Default::default(),
                }
            }
        };
        debug!(
            path = %base.display(),
            pieces = pieces.len(),
            size = source.size,
            "opened log source"
        );
        Ok(Arc::new(source))
    }

    /// Total logical size of the log.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of `read` calls served, for cost accounting in tests and
    /// stats.
    pub fn read_count(&self) -> u64 {
        self.reads.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Reads up to `n` bytes at logical offset `offset`.
    ///
    /// Short reads happen at end of log; reads never span a rotation
    /// boundary (blocks are written entirely inside one piece).
    pub fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        self.reads
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        match &self.inner {
            SourceInner::Cached(data) => {
                let offset = offset.min(data.len() as u64) as usize;
                let end = offset.saturating_add(n).min(data.len());
                Ok(data[offset..end].to_vec())
            }
            SourceInner::Files(files) => {
                for (start, len, file) in files {
                    if offset >= *start && offset < start + len {
                        return Ok(file.read(offset - start, n)?);
                    }
                }
                Ok(Vec::new())
            }
        }
    }
}
