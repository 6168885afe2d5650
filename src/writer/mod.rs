//! # Writer Module
//!
//! The write path: [`DirLogger`] drives one memtable partition through
//! double buffering and background compaction; [`DirWriter`] fans a
//! directory out over `1 << lg_parts` partitions that share one data log.
//!
//! ## Write-path state machine
//!
//! Each partition cycles through three states:
//!
//! ```text
//!            add / flush                swap (imm := mem)
//! Ready ────────────────► buffer full ───────────────────► Compacting
//!   ▲                                                          │
//!   └──────────────────────────────────────────────────────────┘
//!                 compaction drains imm, signals waiters
//! ```
//!
//! - Producers append into the active buffer (`mem`). When it crosses
//!   the utilization threshold, the buffers swap: the full one becomes
//!   the immutable input of a compaction and the spare takes over.
//! - At most one compaction is in flight per partition. While one runs,
//!   a second swap waits on the partition's condition variable (or fails
//!   with `BufferFull` in non-blocking mode).
//! - Epoch-flush and finalize requests ride as flags on the immutable
//!   buffer and are honored by the compaction that drains it.
//!
//! The swap is atomic with respect to producers: they hold the partition
//! mutex, so they observe either the old buffer or the new one, never a
//! half-swapped state.
//!
//! ## Compaction
//!
//! A compaction sorts the immutable buffer, streams it into the
//! partition's [`TableLogger`] (feeding the bloom filter along the way),
//! seals the table, and optionally seals the epoch or finalizes the
//! directory. It runs on the configured pool, on a detached thread when
//! `allow_env_threads` is set, or inline on the caller's thread — a
//! legitimate configuration for single-threaded embedding.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, info, trace};

use crate::encoding::{hash, varint_length};
use crate::error::{Error, Result};
use crate::filter::{BloomBlock, Filter};
use crate::io::{LogSink, RotationType, SinkOptions};
use crate::layout::PARTITION_HASH_SEED;
use crate::memtable::WriteBuffer;
use crate::options::{DirOptions, FlushOptions};
use crate::table::TableLogger;

/// Name of the index log of partition `part`.
pub(crate) fn index_log_name(part: u32) -> String {
    format!("index-p{part:02x}.log")
}

/// Name of the data log shared by all partitions.
pub(crate) const DATA_LOG_NAME: &str = "data.log";

// ------------------------------------------------------------------------------------------------
// Compaction statistics
// ------------------------------------------------------------------------------------------------

/// Byte counters accumulated across compactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    /// Bytes appended to the data log.
    pub data_size: u64,
    /// Bytes appended to the index log.
    pub index_size: u64,
    /// Number of completed compactions.
    pub num_compactions: u64,
}

// ------------------------------------------------------------------------------------------------
// Directory logger
// ------------------------------------------------------------------------------------------------

struct LoggerState {
    /// Active buffer receiving appends.
    mem: WriteBuffer,
    /// Idle buffer ready to take over at the next swap.
    spare: Option<WriteBuffer>,
    /// Full buffer waiting for (or undergoing) compaction.
    imm: Option<WriteBuffer>,
    imm_is_epoch_flush: bool,
    imm_is_final: bool,

    /// Taken by the running compaction, returned when it completes.
    table: Option<TableLogger>,
    filter: Option<BloomBlock>,

    has_bg_compaction: bool,
    num_flush_requested: u32,
    num_flush_completed: u32,

    /// Latched copy of the table logger status.
    status: Result<()>,
    stats: CompactionStats,
}

struct LoggerInner {
    options: DirOptions,
    /// Entry capacity of each of the two buffers.
    entries_per_buf: u32,
    /// Byte capacity of each of the two buffers.
    buf_bytes: usize,
    state: Mutex<LoggerState>,
    work_cv: Condvar,
}

/// Double-buffered writer for one memtable partition.
pub struct DirLogger {
    inner: Arc<LoggerInner>,
    data: Arc<LogSink>,
    indx: Arc<LogSink>,
}

impl DirLogger {
    /// Binds a logger to its sinks and sizes its buffers.
    ///
    /// Per-partition budget is `memtable_buffer / 2^lg_parts` minus the
    /// compaction staging reserve; the entry estimate assumes the
    /// configured key/value size hints and accounts for double buffering
    /// plus the bloom bits each entry costs.
    pub fn new(options: DirOptions, data: Arc<LogSink>, indx: Arc<LogSink>) -> Self {
        let overhead_per_entry = varint_length(options.key_size as u64)
            + varint_length(options.value_size as u64)
            + std::mem::size_of::<u32>();
        let bytes_per_entry = options.key_size + options.value_size + overhead_per_entry;
        let bits_per_entry = 8 * bytes_per_entry;
        let total_bits_per_entry = options.bf_bits_per_key + 2 * bits_per_entry;

        let parts = 1usize << options.lg_parts;
        let table_buffer = (options.memtable_buffer / parts).saturating_sub(options.block_buffer);
        // A degenerate budget still gets one entry per buffer so the
        // swap loop always makes progress.
        let entries_per_buf =
            (((8.0 * table_buffer as f64) / total_bits_per_entry as f64).ceil() as u32).max(1);
        let buf_bytes =
            entries_per_buf as usize * (bytes_per_entry - std::mem::size_of::<u32>());

        let mut bf_bits = entries_per_buf as usize * options.bf_bits_per_key;
        if bf_bits > 0 && bf_bits < 64 {
            // Tiny filters false-positive wildly; enforce a floor.
            bf_bits = 64;
        }
        let bf_bytes = (bf_bits + 7) / 8;

        debug!(
            buffers = 2 * parts,
            entries_per_buf,
            buf_bytes,
            bf_bytes,
            "sized memtable partition"
        );

        let mut mem = WriteBuffer::new();
        mem.reserve(entries_per_buf, buf_bytes);
        let mut spare = WriteBuffer::new();
        spare.reserve(entries_per_buf, buf_bytes);

        let filter = (options.bf_bits_per_key != 0)
            .then(|| BloomBlock::new(options.bf_bits_per_key, bf_bytes));
        let table = TableLogger::new(options.clone(), Arc::clone(&data), Arc::clone(&indx));

        let inner = Arc::new(LoggerInner {
            options,
            entries_per_buf,
            buf_bytes,
            state: Mutex::new(LoggerState {
                mem,
                spare: Some(spare),
                imm: None,
                imm_is_epoch_flush: false,
                imm_is_final: false,
                table: Some(table),
                filter,
                has_bg_compaction: false,
                num_flush_requested: 0,
                num_flush_completed: 0,
                status: Ok(()),
                stats: CompactionStats::default(),
            }),
            work_cv: Condvar::new(),
        });

        Self { inner, data, indx }
    }

    /// Appends one entry to the active buffer, swapping and scheduling a
    /// compaction first if the buffer is full.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let state = self.inner.state.lock().unwrap();
        let (mut state, run_inline) = LoggerInner::prepare(&self.inner, state, false, false, false)?;
        state.mem.add(key, value);
        drop(state);
        if run_inline {
            self.inner.background_compaction();
        }
        Ok(())
    }

    /// Forces a buffer swap and (optionally) waits for its compaction.
    ///
    /// With `dry_run` only the ability to flush right now is checked.
    /// `epoch_flush` seals the epoch after the flushed table, `finalize`
    /// finalizes the directory. In non-blocking mode an occupied
    /// immutable buffer surfaces as [`Error::BufferFull`].
    pub fn flush(&self, flush_options: FlushOptions) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();

        // Wait for buffer space.
        while state.imm.is_some() || state.has_bg_compaction {
            if flush_options.dry_run || self.inner.options.non_blocking {
                return Err(Error::BufferFull);
            }
            state = self.inner.work_cv.wait(state).unwrap();
        }

        if flush_options.dry_run {
            return state.status.clone(); // Status check only
        }

        state.num_flush_requested += 1;
        let ticket = state.num_flush_requested;
        let (state, run_inline) = LoggerInner::prepare(
            &self.inner,
            state,
            true,
            flush_options.epoch_flush,
            flush_options.finalize,
        )?;
        let mut state = state;
        if run_inline {
            drop(state);
            self.inner.background_compaction();
            state = self.inner.state.lock().unwrap();
        }
        if !flush_options.no_wait {
            while state.num_flush_completed < ticket {
                state = self.inner.work_cv.wait(state).unwrap();
            }
            return state.status.clone();
        }
        Ok(())
    }

    /// Blocks until no compaction is running, then reports the latched
    /// status.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        while state.status.is_ok() && (state.imm.is_some() || state.has_bg_compaction) {
            state = self.inner.work_cv.wait(state).unwrap();
        }
        state.status.clone()
    }

    /// Syncs and closes both log sinks.
    ///
    /// Sinks are reference counted and normally close with their last
    /// holder; this forces an early durable close.
    pub fn pre_close(&self) -> Result<()> {
        self.data.lclose(true)?;
        self.indx.lclose(true)
    }

    /// Compaction byte counters so far.
    pub fn stats(&self) -> CompactionStats {
        self.inner.state.lock().unwrap().stats
    }

    /// Entry capacity of one write buffer.
    pub fn entries_per_buffer(&self) -> u32 {
        self.inner.entries_per_buf
    }

    /// Byte capacity of one write buffer.
    pub fn buffer_bytes(&self) -> usize {
        self.inner.buf_bytes
    }

    /// Approximate allocated footprint of buffers and staging areas.
    pub fn memory_usage(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        let mut total = state.mem.memory_usage();
        if let Some(spare) = &state.spare {
            total += spare.memory_usage();
        }
        if let Some(imm) = &state.imm {
            total += imm.memory_usage();
        }
        if let Some(table) = &state.table {
            total += table.memory_usage();
        }
        if let Some(filter) = &state.filter {
            total += filter.memory_usage();
        }
        total
    }
}

impl Drop for DirLogger {
    fn drop(&mut self) {
        // Let any in-flight compaction drain before the sinks go away.
        let mut state = self.inner.state.lock().unwrap();
        while state.has_bg_compaction {
            state = self.inner.work_cv.wait(state).unwrap();
        }
    }
}

impl LoggerInner {
    /// The core write-path loop.
    ///
    /// Returns the re-acquired guard plus a flag telling the caller to
    /// run the compaction inline (no pool configured, env threads
    /// disallowed).
    fn prepare<'a>(
        inner: &Arc<LoggerInner>,
        mut state: MutexGuard<'a, LoggerState>,
        mut force: bool,
        mut epoch_flush: bool,
        mut finalize: bool,
    ) -> Result<(MutexGuard<'a, LoggerState>, bool)> {
        let threshold = (inner.buf_bytes as f64 * inner.options.memtable_util) as usize;
        let mut run_inline = false;
        loop {
            if let Err(err) = &state.status {
                return Err(err.clone());
            }
            if !force && state.mem.current_buffer_size() < threshold {
                break; // Room in the active buffer
            }
            if state.imm.is_some() || state.has_bg_compaction {
                if inner.options.non_blocking {
                    return Err(Error::BufferFull);
                }
                state = inner.work_cv.wait(state).unwrap();
                continue;
            }

            // Swap to the spare buffer and hand the full one to
            // compaction.
            force = false;
            let spare = state.spare.take().expect("spare buffer present while idle");
            let full = std::mem::replace(&mut state.mem, spare);
            state.imm = Some(full);
            if epoch_flush {
                state.imm_is_epoch_flush = true;
            }
            epoch_flush = false;
            if finalize {
                state.imm_is_final = true;
            }
            finalize = false;
            run_inline |= LoggerInner::schedule_compaction(inner, &mut state);
        }
        Ok((state, run_inline))
    }

    /// Dispatches the pending compaction. Returns true when the caller
    /// must run it inline.
    fn schedule_compaction(inner: &Arc<LoggerInner>, state: &mut LoggerState) -> bool {
        if state.has_bg_compaction || state.imm.is_none() {
            return false;
        }
        state.has_bg_compaction = true;

        if let Some(pool) = &inner.options.compaction_pool {
            let task_inner = Arc::clone(inner);
            pool.execute(move || task_inner.background_compaction());
            false
        } else if inner.options.allow_env_threads {
            let task_inner = Arc::clone(inner);
            std::thread::spawn(move || task_inner.background_compaction());
            false
        } else {
            true
        }
    }

    /// Drains the immutable buffer into the table logger.
    ///
    /// Runs without the state lock: the buffer, table logger, and filter
    /// are moved out under the lock and returned when done.
    fn background_compaction(&self) {
        let (mut buffer, is_epoch_flush, is_final, mut table, mut filter) = {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.has_bg_compaction);
            let buffer = state.imm.take().expect("immutable buffer scheduled");
            let is_epoch_flush = state.imm_is_epoch_flush;
            let is_final = state.imm_is_final;
            state.imm_is_epoch_flush = false;
            state.imm_is_final = false;
            let table = state.table.take().expect("table logger available");
            let filter = state.filter.take();
            (buffer, is_epoch_flush, is_final, table, filter)
        };

        let started = self.options.env.now_micros();
        let start_stats = table.output_stats();

        if let Some(f) = filter.as_mut() {
            f.reset();
        }
        buffer.finish_and_sort();
        {
            let mut iter = buffer.iter();
            iter.seek_to_first();
            while iter.valid() {
                if let Some(f) = filter.as_mut() {
                    f.add_key(iter.key());
                }
                table.add(iter.key(), iter.value());
                if !table.ok() {
                    break;
                }
                iter.next();
            }
        }
        if table.ok() {
            table.end_table(filter.as_mut().map(|f| f as &mut dyn Filter));
            if is_epoch_flush {
                table.make_epoch();
            }
            if is_final {
                let _ = table.finish();
            }
        }

        let end_stats = table.output_stats();
        let elapsed = self.options.env.now_micros().saturating_sub(started);
        trace!(
            entries = buffer.num_entries(),
            micros = elapsed,
            epoch_flush = is_epoch_flush,
            finalize = is_final,
            "memtable compaction finished"
        );
        buffer.reset();

        let mut state = self.state.lock().unwrap();
        state.stats.data_size +=
            (end_stats.total_data_size() - start_stats.total_data_size()) as u64;
        state.stats.index_size +=
            (end_stats.total_index_size() - start_stats.total_index_size()) as u64;
        state.stats.num_compactions += 1;
        state.status = table.status();
        state.table = Some(table);
        state.filter = filter;
        state.spare = Some(buffer);
        state.num_flush_completed += 1;
        state.has_bg_compaction = false;
        debug_assert!(state.imm.is_none());
        drop(state);
        self.work_cv.notify_all();
    }
}

// ------------------------------------------------------------------------------------------------
// Partitioned writer facade
// ------------------------------------------------------------------------------------------------

/// Partitioned front end over one directory.
///
/// Routes each key to one of `1 << lg_parts` [`DirLogger`] partitions by
/// seed hash. All partitions append data blocks to one shared data log
/// (serialized by the sink's internal lock); each partition owns its
/// index log.
pub struct DirWriter {
    options: DirOptions,
    parts_mask: u32,
    parts: Vec<DirLogger>,
    data: Arc<LogSink>,
    indexes: Vec<Arc<LogSink>>,
}

impl DirWriter {
    /// Creates the directory's log files and one logger per partition.
    pub fn open(options: DirOptions, dirname: impl AsRef<Path>) -> Result<Self> {
        let dir = dirname.as_ref();
        let env = Arc::clone(&options.env);
        env.create_dir_all(dir)?;

        let num_parts = 1u32 << options.lg_parts;
        let data = LogSink::open(
            Arc::clone(&env),
            dir.join(DATA_LOG_NAME),
            SinkOptions {
                min_buf: options.min_data_buffer,
                max_buf: options.data_buffer,
                rotation: RotationType::NoRotation,
            },
        )?;

        let mut parts = Vec::with_capacity(num_parts as usize);
        let mut indexes = Vec::with_capacity(num_parts as usize);
        for part in 0..num_parts {
            let indx = LogSink::open(
                Arc::clone(&env),
                dir.join(index_log_name(part)),
                SinkOptions {
                    min_buf: options.min_index_buffer,
                    max_buf: options.index_buffer,
                    rotation: RotationType::NoRotation,
                },
            )?;
            indexes.push(Arc::clone(&indx));
            parts.push(DirLogger::new(options.clone(), Arc::clone(&data), indx));
        }

        info!(
            path = %dir.display(),
            parts = num_parts,
            "opened indexed directory for writing"
        );
        Ok(Self {
            options,
            parts_mask: num_parts - 1,
            parts,
            data,
            indexes,
        })
    }

    fn partition(&self, key: &[u8]) -> usize {
        (hash(key, PARTITION_HASH_SEED) & self.parts_mask) as usize
    }

    /// Appends one entry to the partition owning `key`.
    ///
    /// In non-blocking mode a full partition surfaces as
    /// [`Error::BufferFull`]; with `slowdown_micros` configured, the
    /// writer first sleeps to give compaction a chance to catch up.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::assertion_failed("empty key"));
        }
        match self.parts[self.partition(key)].add(key, value) {
            Err(err) if err.is_buffer_full() && self.options.slowdown_micros > 0 => {
                self.options.env.sleep_micros(self.options.slowdown_micros);
                Err(err)
            }
            result => result,
        }
    }

    /// Flushes every partition's active buffer.
    pub fn flush(&self) -> Result<()> {
        for part in &self.parts {
            part.flush(FlushOptions::default())?;
        }
        Ok(())
    }

    /// Flushes every partition and seals the current epoch.
    pub fn epoch_flush(&self) -> Result<()> {
        for part in &self.parts {
            part.flush(FlushOptions {
                epoch_flush: true,
                ..Default::default()
            })?;
        }
        Ok(())
    }

    /// Flushes and finalizes every partition, then closes the logs.
    /// The directory accepts no further writes.
    pub fn finish(&self) -> Result<()> {
        for part in &self.parts {
            part.flush(FlushOptions {
                finalize: true,
                ..Default::default()
            })?;
        }
        self.data.lclose(true)?;
        for indx in &self.indexes {
            indx.lclose(true)?;
        }
        info!("finalized indexed directory");
        Ok(())
    }

    /// Blocks until no partition has a compaction in flight.
    pub fn wait(&self) -> Result<()> {
        for part in &self.parts {
            part.wait()?;
        }
        Ok(())
    }

    /// Aggregated compaction counters across partitions.
    pub fn compaction_stats(&self) -> CompactionStats {
        let mut total = CompactionStats::default();
        for part in &self.parts {
            let stats = part.stats();
            total.data_size += stats.data_size;
            total.index_size += stats.index_size;
            total.num_compactions += stats.num_compactions;
        }
        total
    }

    /// Approximate allocated footprint across partitions.
    pub fn memory_usage(&self) -> usize {
        self.parts.iter().map(DirLogger::memory_usage).sum()
    }

    /// The partition loggers, for callers that need per-partition
    /// control.
    pub fn partitions(&self) -> &[DirLogger] {
        &self.parts
    }
}
