//! # Reader Module
//!
//! The read path: [`Dir`] resolves point queries against one partition's
//! pair of logs; [`DirReader`] routes keys across partitions with the
//! same hash the writer used.
//!
//! ## Bootstrap
//!
//! `Dir::open` reads the fixed-width footer off the end of the index
//! log, loads the root meta block it points at, and keeps that block
//! resident. Everything else is fetched on demand.
//!
//! ## Point lookup
//!
//! For each epoch, a `get` walks the epoch's tables through the root
//! meta block (seeking `epoch_key(epoch, table)` and reusing the
//! iterator position between consecutive tables). For every table it:
//!
//! 1. prunes by the handle's `[smallest_key, largest_key]` bounds,
//! 2. consults the bloom filter, skipping the table on a definite miss
//!    (filter read errors degrade to "may match" — a false positive is
//!    always safe, a false negative never is),
//! 3. loads the index block, locates the candidate data block by binary
//!    search (`unique_keys`) or linear scan,
//! 4. reads the data block and hands matching values to the saver.
//!
//! With `unique_keys` the lookup stops at the first match; otherwise it
//! collects every match in `(epoch, table, insertion)` order.
//!
//! ## Parallel reads
//!
//! With `parallel_reads` each epoch becomes one task on the reader pool.
//! Savers append `(epoch varint, length-prefixed value)` records into a
//! shared scratch buffer under a mutex; after all tasks drain, the
//! records are stably sorted by epoch and concatenated, which makes the
//! result byte-identical to the serial order. Tasks hold a reference to
//! the reader's shared core, so the underlying log sources stay alive
//! until the last task completes.


use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, info};

use crate::block::{Block, BlockIter};
use crate::encoding::{
    get_length_prefixed_slice, get_varint32, hash, put_length_prefixed_slice, put_varint32,
    unmask_crc, BLOCK_TRAILER_SIZE,
};
use crate::error::{Error, Result};
use crate::filter::bloom_key_may_match;
use crate::io::{LogSource, LogType};
use crate::layout::{epoch_key, BlockHandle, Footer, TableHandle, PARTITION_HASH_SEED};
use crate::options::DirOptions;
use crate::writer::{index_log_name, DATA_LOG_NAME};

// ------------------------------------------------------------------------------------------------
// Block reading
// ------------------------------------------------------------------------------------------------

/// Reads one block body, optionally verifying its trailer checksum.
fn read_block(source: &LogSource, options: &DirOptions, handle: &BlockHandle) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let m = if options.skip_checksums {
        n
    } else {
        n + BLOCK_TRAILER_SIZE
    };
    let mut data = source.read(handle.offset, m)?;
    if data.len() != m {
        return Err(Error::corruption("truncated block read"));
    }

    if !options.skip_checksums && options.verify_checksums {
        let stored = unmask_crc(crate::encoding::decode_fixed32(&data[n + 1..]));
        let actual = crate::encoding::crc32c_value(&data[..n + 1]);
        if stored != actual {
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    data.truncate(n);
    Ok(data)
}

// ------------------------------------------------------------------------------------------------
// Directory reader (one partition)
// ------------------------------------------------------------------------------------------------

struct DirInner {
    options: DirOptions,
    data: Arc<LogSource>,
    indx: Arc<LogSource>,
    /// Root meta block, resident for the reader's lifetime.
    epochs: Block,
    num_epochs: u32,
}

/// Point-query reader over one partition's data and index logs.
pub struct Dir {
    inner: Arc<DirInner>,
}

/// Shared state of one parallel read call.
struct GetContext {
    pending: Mutex<u32>,
    done_cv: Condvar,
    scratch: Mutex<ParaBuffer>,
    error: Mutex<Option<Error>>,
}

/// Epoch-tagged values collected by parallel savers.
#[derive(Default)]
struct ParaBuffer {
    buffer: Vec<u8>,
    offsets: Vec<u32>,
}

impl Dir {
    /// Bootstraps a reader from the trailing footer of the index log.
    pub fn open(options: DirOptions, data: Arc<LogSource>, indx: Arc<LogSource>) -> Result<Dir> {
        let footer_len = Footer::ENCODE_LEN as u64;
        if indx.size() < footer_len {
            return Err(Error::corruption("index log too short to be valid"));
        }
        let tail = indx.read(indx.size() - footer_len, Footer::ENCODE_LEN)?;
        let footer = Footer::decode_from(&tail)?;

        let contents = read_block(&indx, &options, &footer.epoch_index_handle)?;
        let epochs = Block::new(contents)?;

        debug!(num_epochs = footer.num_epochs, "opened directory partition");
        Ok(Dir {
            inner: Arc::new(DirInner {
                options,
                data,
                indx,
                epochs,
                num_epochs: footer.num_epochs,
            }),
        })
    }

    /// Number of epochs recorded in the footer.
    pub fn num_epochs(&self) -> u32 {
        self.inner.num_epochs
    }

    /// Returns the concatenation of every value stored under `key`, in
    /// `(epoch, table, insertion)` order. Missing keys yield an empty
    /// result.
    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        if self.inner.options.parallel_reads {
            self.read_parallel(key)
        } else {
            let mut dst = Vec::new();
            let mut epoch_iter = self.inner.epochs.iter();
            for epoch in 0..self.inner.num_epochs {
                self.inner.get(key, epoch, &mut epoch_iter, &mut |value| {
                    dst.extend_from_slice(value)
                })?;
            }
            Ok(dst)
        }
    }

    fn read_parallel(&self, key: &[u8]) -> Result<Vec<u8>> {
        let ctx = Arc::new(GetContext {
            pending: Mutex::new(0),
            done_cv: Condvar::new(),
            scratch: Mutex::new(ParaBuffer::default()),
            error: Mutex::new(None),
        });

        for epoch in 0..self.inner.num_epochs {
            *ctx.pending.lock().unwrap() += 1;

            let inner = Arc::clone(&self.inner);
            let ctx = Arc::clone(&ctx);
            let key = key.to_vec();
            let task = move || {
                let poisoned = ctx.error.lock().unwrap().is_some();
                if !poisoned {
                    let mut epoch_iter = inner.epochs.iter();
                    let mut saver = |value: &[u8]| {
                        let mut scratch = ctx.scratch.lock().unwrap();
                        let scratch = &mut *scratch;
                        scratch.offsets.push(scratch.buffer.len() as u32);
                        put_varint32(&mut scratch.buffer, epoch);
                        put_length_prefixed_slice(&mut scratch.buffer, value);
                    };
                    if let Err(err) = inner.get(&key, epoch, &mut epoch_iter, &mut saver) {
                        ctx.error.lock().unwrap().get_or_insert(err);
                    }
                }
                let mut pending = ctx.pending.lock().unwrap();
                *pending -= 1;
                drop(pending);
                ctx.done_cv.notify_all();
            };

            if let Some(pool) = &self.inner.options.reader_pool {
                pool.execute(task);
            } else if self.inner.options.allow_env_threads {
                std::thread::spawn(task);
            } else {
                task();
            }
        }

        // Wait for every fanned-out epoch task to conclude.
        let mut pending = ctx.pending.lock().unwrap();
        while *pending > 0 {
            pending = ctx.done_cv.wait(pending).unwrap();
        }
        drop(pending);

        if let Some(err) = ctx.error.lock().unwrap().take() {
            return Err(err);
        }

        let ParaBuffer {
            buffer,
            mut offsets,
        } = std::mem::take(&mut *ctx.scratch.lock().unwrap());

        // Stable sort restores epoch order; ties keep task append order,
        // which within one epoch is already table/insertion order.
        offsets.sort_by_key(|&offset| {
            let mut input = &buffer[offset as usize..];
            get_varint32(&mut input).unwrap_or(u32::MAX)
        });

        let mut dst = Vec::new();
        for &offset in &offsets {
            let mut input = &buffer[offset as usize..];
            let _epoch = get_varint32(&mut input);
            if let Some(value) = get_length_prefixed_slice(&mut input) {
                dst.extend_from_slice(value);
            }
        }
        Ok(dst)
    }
}

impl DirInner {
    /// Looks `key` up in every table of `epoch`, reusing the meta-block
    /// iterator position between consecutive tables.
    fn get(
        &self,
        key: &[u8],
        epoch: u32,
        epoch_iter: &mut BlockIter<'_>,
        saver: &mut dyn FnMut(&[u8]),
    ) -> Result<bool> {
        let mut found_any = false;
        let mut table = 0u32;
        loop {
            let target = epoch_key(epoch, table);
            if !epoch_iter.valid() || epoch_iter.key() != target {
                epoch_iter.seek(&target);
                if !epoch_iter.valid() {
                    break; // Past the last table of the directory
                }
                if epoch_iter.key() != target {
                    break; // No such table in this epoch
                }
            }

            let mut handle_bytes = epoch_iter.value();
            let handle = TableHandle::decode_from(&mut handle_bytes)?;
            epoch_iter.next();

            if self.fetch_table(key, &handle, saver)? {
                found_any = true;
                if self.options.unique_keys {
                    break;
                }
            }
            table += 1;
        }
        epoch_iter.status()?;
        Ok(found_any)
    }

    /// Checks the filter block; read failures count as a possible match.
    fn filter_may_match(&self, key: &[u8], handle: &BlockHandle) -> bool {
        match read_block(&self.indx, &self.options, handle) {
            Ok(contents) => bloom_key_may_match(key, &contents),
            Err(_) => true,
        }
    }

    /// Looks `key` up in one table.
    fn fetch_table(
        &self,
        key: &[u8],
        handle: &TableHandle,
        saver: &mut dyn FnMut(&[u8]),
    ) -> Result<bool> {
        // Prune by key bounds, then by the bloom filter.
        if key < handle.smallest_key.as_slice() || key > handle.largest_key.as_slice() {
            return Ok(false);
        }
        let filter_handle = handle.filter_handle();
        if filter_handle.size != 0 && !self.filter_may_match(key, &filter_handle) {
            return Ok(false);
        }

        let contents = read_block(&self.indx, &self.options, &handle.index_handle())?;
        let index_block = Block::new(contents)?;
        let mut index_iter = index_block.iter();
        if self.options.unique_keys {
            index_iter.seek(key); // Binary search over separators
        } else {
            index_iter.seek_to_first();
            while index_iter.valid() && key > index_iter.key() {
                index_iter.next();
            }
        }

        let mut found = false;
        let mut exhausted = false;
        while index_iter.valid() {
            let mut handle_bytes = index_iter.value();
            let block_handle = BlockHandle::decode_from(&mut handle_bytes)?;
            found |= self.fetch_block(key, &block_handle, saver, &mut exhausted)?;
            if exhausted {
                break;
            }
            index_iter.next();
        }
        index_iter.status()?;
        Ok(found)
    }

    /// Scans one data block for `key`. Sets `exhausted` once a key
    /// larger than `key` proves nothing further can match.
    fn fetch_block(
        &self,
        key: &[u8],
        handle: &BlockHandle,
        saver: &mut dyn FnMut(&[u8]),
        exhausted: &mut bool,
    ) -> Result<bool> {
        *exhausted = false;
        let contents = read_block(&self.data, &self.options, handle)?;
        let block = Block::new(contents)?;
        let mut iter = block.iter();
        if self.options.unique_keys {
            iter.seek(key);
        } else {
            iter.seek_to_first();
            while iter.valid() && key > iter.key() {
                iter.next();
            }
        }

        let mut found = false;
        while iter.valid() {
            if iter.key() == key {
                saver(iter.value());
                found = true;
                if self.options.unique_keys {
                    *exhausted = true;
                    break;
                }
            } else {
                debug_assert!(iter.key() > key);
                *exhausted = true;
                break;
            }
            iter.next();
        }
        iter.status()?;
        Ok(found)
    }
}

// ------------------------------------------------------------------------------------------------
// Partitioned reader facade
// ------------------------------------------------------------------------------------------------

/// Partitioned front end matching [`DirWriter`](crate::writer::DirWriter).
pub struct DirReader {
    parts_mask: u32,
    parts: Vec<Dir>,
}

impl std::fmt::Debug for DirReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirReader")
            .field("parts_mask", &self.parts_mask)
            .field("num_parts", &self.parts.len())
            .finish()
    }
}

impl DirReader {
    /// Opens every partition of the directory at `dirname`.
    pub fn open(options: DirOptions, dirname: impl AsRef<Path>) -> Result<Self> {
        let dir = dirname.as_ref();
        let env = &options.env;
        let data = LogSource::open(env, &dir.join(DATA_LOG_NAME), LogType::Data)?;

        let num_parts = 1u32 << options.lg_parts;
        let mut parts = Vec::with_capacity(num_parts as usize);
        for part in 0..num_parts {
            let indx = LogSource::open(env, &dir.join(index_log_name(part)), LogType::Index)?;
            parts.push(Dir::open(options.clone(), Arc::clone(&data), indx)?);
        }

        info!(
            path = %dir.display(),
            parts = num_parts,
            "opened indexed directory for reading"
        );
        Ok(Self {
            parts_mask: num_parts - 1,
            parts,
        })
    }

    /// Reads every value stored under `key`, concatenated in write
    /// order. Missing keys yield an empty result.
    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let part = (hash(key, PARTITION_HASH_SEED) & self.parts_mask) as usize;
        self.parts[part].read(key)
    }

    /// Largest epoch count across partitions.
    pub fn num_epochs(&self) -> u32 {
        self.parts.iter().map(Dir::num_epochs).max().unwrap_or(0)
    }

    /// The partition readers, for callers that need per-partition
    /// control.
    pub fn partitions(&self) -> &[Dir] {
        &self.parts
    }
}
