//! # Table Module
//!
//! [`TableLogger`] assembles already-sorted key/value streams into the
//! two-log on-disk layout: data blocks go to the data log, index blocks,
//! filter blocks, the root meta block, and the footer go to the index
//! log.
//!
//! ## Assembly pipeline
//!
//! ```text
//! add ──► data block (restart 16) ──► end_block ──► staging buffer
//!                                        │
//!                                        └─► pending index entry
//! staging full ──► commit: one locked write to the data log,
//!                  buffer-relative handles re-based to absolute offsets
//! end_table ──► index block + filter block ──► index log
//!               table handle ──► meta block @ epoch_key(epoch, table)
//! make_epoch ──► seals the epoch, resets per-epoch counters
//! finish ──► root meta block + optional tail padding + footer
//! ```
//!
//! A block's index entry is not emitted at `end_block`: the separator key
//! between the closed block and the next one can only be computed when
//! the next key arrives (or the table ends, where the short successor of
//! the last key is used instead).
//!
//! ## Guarantees
//!
//! - Keys fed to [`add`](TableLogger::add) must be non-decreasing within
//!   a table (strictly increasing with `unique_keys`); violations fail
//!   the logger permanently.
//! - The first non-OK status is sticky: every later operation is a no-op
//!   returning the latched error.
//! - `smallest_key`/`largest_key` bounds stored in each
//!   [`TableHandle`](crate::layout::TableHandle) are tight: the exact
//!   first key, and a short successor of the last key.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{BlockBuilder, DATA_BLOCK_RESTART_INTERVAL, NON_DATA_BLOCK_RESTART_INTERVAL};
use crate::encoding::{
    get_length_prefixed_slice, put_length_prefixed_slice, BLOCK_TRAILER_SIZE,
};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::io::LogSink;
use crate::layout::{
    epoch_key, find_short_successor, find_shortest_separator, BlockHandle, Footer, TableHandle,
    MAX_EPOCHS, MAX_TABLES_PER_EPOCH,
};
use crate::options::DirOptions;

// ------------------------------------------------------------------------------------------------
// Output statistics
// ------------------------------------------------------------------------------------------------

/// Byte counters for everything a [`TableLogger`] has emitted.
///
/// `final_*` sizes include trailers and padding; their plain counterparts
/// are raw block bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStats {
    /// Footer bytes written.
    pub footer_size: usize,
    /// Data block bytes written, trailers and padding included.
    pub final_data_size: usize,
    /// Raw data block body bytes.
    pub data_size: usize,
    /// Root meta block bytes written, trailer included.
    pub final_meta_size: usize,
    /// Raw root meta block body bytes.
    pub meta_size: usize,
    /// Index block bytes written, trailers included.
    pub final_index_size: usize,
    /// Raw index block body bytes.
    pub index_size: usize,
    /// Filter block bytes written, trailers included.
    pub final_filter_size: usize,
    /// Raw filter block body bytes.
    pub filter_size: usize,
    /// User value bytes accepted.
    pub value_size: usize,
    /// User key bytes accepted.
    pub key_size: usize,
}

impl OutputStats {
    /// Total bytes contributed to the index log.
    pub fn total_index_size(&self) -> usize {
        self.final_index_size + self.final_filter_size + self.final_meta_size + self.footer_size
    }

    /// Total bytes contributed to the data log.
    pub fn total_data_size(&self) -> usize {
        self.final_data_size
    }
}

// ------------------------------------------------------------------------------------------------
// Table logger
// ------------------------------------------------------------------------------------------------

/// Writes table contents into a pair of log sinks.
pub struct TableLogger {
    options: DirOptions,
    status: Result<()>,

    smallest_key: Vec<u8>,
    largest_key: Vec<u8>,
    last_key: Vec<u8>,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    meta_block: BlockBuilder,

    /// Finalized data blocks awaiting one locked write to the data log.
    staging: Vec<u8>,
    /// Separator/handle pairs whose offsets are still staging-relative.
    uncommitted_indexes: Vec<u8>,
    num_uncommitted_index: usize,
    num_uncommitted_data: usize,

    pending_index_entry: bool,
    pending_index_handle: BlockHandle,
    pending_meta_entry: bool,
    pending_meta_handle: TableHandle,

    num_tables: u32,
    num_epochs: u32,

    data_sink: Arc<LogSink>,
    indx_sink: Arc<LogSink>,
    finished: bool,

    output_stats: OutputStats,
}

impl TableLogger {
    /// Binds a logger to its data and index sinks.
    pub fn new(options: DirOptions, data_sink: Arc<LogSink>, indx_sink: Arc<LogSink>) -> Self {
        let mut data_block = BlockBuilder::new(DATA_BLOCK_RESTART_INTERVAL);
        data_block.reserve(options.block_size);
        let mut index_block = BlockBuilder::new(NON_DATA_BLOCK_RESTART_INTERVAL);
        index_block.reserve(4 << 10);
        let mut meta_block = BlockBuilder::new(NON_DATA_BLOCK_RESTART_INTERVAL);
        meta_block.reserve(4 << 10);

        let mut staging = Vec::new();
        staging.reserve(options.block_buffer);

        Self {
            options,
            status: Ok(()),
            smallest_key: Vec::new(),
            largest_key: Vec::new(),
            last_key: Vec::new(),
            data_block,
            index_block,
            meta_block,
            staging,
            uncommitted_indexes: Vec::with_capacity(1 << 10),
            num_uncommitted_index: 0,
            num_uncommitted_data: 0,
            pending_index_entry: false,
            pending_index_handle: BlockHandle::default(),
            pending_meta_entry: false,
            pending_meta_handle: TableHandle::default(),
            num_tables: 0,
            num_epochs: 0,
            data_sink,
            indx_sink,
            finished: false,
            output_stats: OutputStats::default(),
        }
    }

    /// True until the first failure.
    pub fn ok(&self) -> bool {
        self.status.is_ok()
    }

    /// The latched status.
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    /// Byte counters for everything emitted so far.
    pub fn output_stats(&self) -> OutputStats {
        self.output_stats
    }

    /// Number of sealed epochs.
    pub fn num_epochs(&self) -> u32 {
        self.num_epochs
    }

    fn fail(&mut self, err: Error) {
        if self.status.is_ok() {
            self.status = Err(err);
        }
    }

    /// Accepts the next entry of the current table.
    ///
    /// Keys must compare `>=` the previous key (`>` with `unique_keys`);
    /// empty keys and out-of-order keys fail the logger.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        if self.finished {
            self.fail(Error::assertion_failed("add after finish"));
            return;
        }
        if !self.ok() {
            return;
        }
        if key.is_empty() {
            self.fail(Error::assertion_failed("empty key"));
            return;
        }
        if !self.last_key.is_empty() {
            if key < self.last_key.as_slice() {
                self.fail(Error::assertion_failed("keys added out of order"));
                return;
            }
            if self.options.unique_keys && key == self.last_key.as_slice() {
                self.fail(Error::assertion_failed("duplicate key"));
                return;
            }
        }
        if self.smallest_key.is_empty() {
            self.smallest_key = key.to_vec();
        }
        self.largest_key.clear();
        self.largest_key.extend_from_slice(key);

        // Commit the index entry left pending by the last end_block, now
        // that a separator below the incoming key can be chosen.
        if self.pending_index_entry {
            find_shortest_separator(&mut self.last_key, key);
            put_length_prefixed_slice(&mut self.uncommitted_indexes, &self.last_key);
            self.pending_index_handle
                .encode_to(&mut self.uncommitted_indexes);
            self.pending_index_entry = false;
            self.num_uncommitted_index += 1;
        }

        // Flush staged blocks once another full block might not fit.
        if self.staging.len() + self.options.block_size > self.options.block_buffer {
            self.commit();
            if !self.ok() {
                return;
            }
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.output_stats.key_size += key.len();
        self.output_stats.value_size += value.len();

        self.data_block.add(key, value);
        let cutoff = (self.options.block_size as f64 * self.options.block_util) as usize;
        if self.data_block.current_size_estimate() + BLOCK_TRAILER_SIZE >= cutoff {
            self.end_block();
        }
    }

    /// Seals the open data block into the staging buffer.
    pub fn end_block(&mut self) {
        if self.finished {
            self.fail(Error::assertion_failed("end_block after finish"));
            return;
        }
        if self.data_block.is_empty() || !self.ok() {
            return;
        }

        let block_size = self.data_block.finish().len();
        let pad_to = self.options.block_padding.then_some(self.options.block_size);
        let final_contents = self
            .data_block
            .finalize(!self.options.skip_checksums, pad_to);
        let final_size = final_contents.len();

        let block_offset = self.staging.len() as u64;
        self.staging.extend_from_slice(final_contents);
        self.data_block.reset();

        self.output_stats.final_data_size += final_size;
        self.output_stats.data_size += block_size;

        debug_assert!(!self.pending_index_entry);
        self.pending_index_handle = BlockHandle::new(block_offset, block_size as u64);
        self.pending_index_entry = true;
        self.num_uncommitted_data += 1;
        trace!(size = block_size, padded = final_size, "sealed data block");
    }

    /// Writes the staging buffer to the data log under its lock and
    /// re-bases pending index handles to absolute offsets.
    fn commit(&mut self) {
        if self.staging.is_empty() || !self.ok() {
            return;
        }

        // The data log may be shared across partitions: reading the
        // offset and appending must be one critical section.
        let write_result = {
            let mut sink = self.data_sink.lock();
            let offset = sink.offset();
            sink.write(&self.staging).map(|()| offset)
        };
        let base = match write_result {
            Ok(offset) => offset,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        let mut committed = 0;
        let mut encoded = Vec::new();
        let mut input: &[u8] = &self.uncommitted_indexes;
        while !input.is_empty() {
            let Some(separator) = get_length_prefixed_slice(&mut input) else {
                break;
            };
            let handle = match BlockHandle::decode_from(&mut input) {
                Ok(handle) => BlockHandle::new(base + handle.offset, handle.size),
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };
            encoded.clear();
            handle.encode_to(&mut encoded);
            self.index_block.add(separator, &encoded);
            committed += 1;
        }

        debug_assert_eq!(committed, self.num_uncommitted_index);
        debug_assert_eq!(self.num_uncommitted_data, self.num_uncommitted_index);
        self.num_uncommitted_data = 0;
        self.num_uncommitted_index = 0;
        self.uncommitted_indexes.clear();
        self.staging.clear();
    }

    /// Seals the current table: flushes the open block, writes the index
    /// block and the optional filter block to the index log, and records
    /// the table handle in the meta block.
    pub fn end_table(&mut self, mut filter: Option<&mut dyn Filter>) {
        if self.finished {
            self.fail(Error::assertion_failed("end_table after finish"));
            return;
        }

        self.end_block();
        if !self.ok() {
            return;
        }

        // The final block's separator is a short successor of the last
        // key: no further key exists to separate against.
        if self.pending_index_entry {
            find_short_successor(&mut self.last_key);
            put_length_prefixed_slice(&mut self.uncommitted_indexes, &self.last_key);
            self.pending_index_handle
                .encode_to(&mut self.uncommitted_indexes);
            self.pending_index_entry = false;
            self.num_uncommitted_index += 1;
        }

        self.commit();
        if !self.ok() {
            return;
        }
        if self.index_block.is_empty() {
            return; // Empty table
        }

        let index_size = self.index_block.finish().len();
        let index_offset = self.indx_sink.ltell();
        {
            let contents = self.index_block.finalize(!self.options.skip_checksums, None);
            self.output_stats.final_index_size += contents.len();
            if let Err(err) = self.indx_sink.lwrite(contents) {
                self.fail(err);
                return;
            }
        }
        self.output_stats.index_size += index_size;

        let filter_offset = self.indx_sink.ltell();
        let mut filter_size = 0;
        if let Some(filter) = filter.as_mut() {
            filter_size = filter.finish().len();
            let contents = filter.finalize(!self.options.skip_checksums);
            self.output_stats.final_filter_size += contents.len();
            if let Err(err) = self.indx_sink.lwrite(contents) {
                self.fail(err);
                return;
            }
            self.output_stats.filter_size += filter_size;
        }

        self.index_block.reset();
        self.pending_meta_handle = TableHandle {
            filter_offset,
            filter_size: filter_size as u64,
            offset: index_offset,
            size: index_size as u64,
            smallest_key: Vec::new(),
            largest_key: Vec::new(),
        };
        debug_assert!(!self.pending_meta_entry);
        self.pending_meta_entry = true;

        if self.num_tables >= MAX_TABLES_PER_EPOCH {
            self.fail(Error::assertion_failed("too many tables"));
        } else {
            self.pending_meta_handle.smallest_key = std::mem::take(&mut self.smallest_key);
            find_short_successor(&mut self.largest_key);
            self.pending_meta_handle.largest_key = std::mem::take(&mut self.largest_key);
            let mut encoding = Vec::new();
            self.pending_meta_handle.encode_to(&mut encoding);
            self.meta_block
                .add(&epoch_key(self.num_epochs, self.num_tables), &encoding);
            self.pending_meta_entry = false;
        }

        if self.ok() {
            debug!(
                epoch = self.num_epochs,
                table = self.num_tables,
                index_bytes = index_size,
                filter_bytes = filter_size,
                "sealed table"
            );
            self.smallest_key.clear();
            self.largest_key.clear();
            self.last_key.clear();
            self.num_tables += 1;
        }
    }

    /// Seals the current epoch. A no-op when the epoch holds no tables.
    pub fn make_epoch(&mut self) {
        if self.finished {
            self.fail(Error::assertion_failed("make_epoch after finish"));
            return;
        }
        self.end_table(None);
        if !self.ok() {
            return;
        }
        if self.num_tables == 0 {
            return; // Empty epoch
        }
        if self.num_epochs >= MAX_EPOCHS {
            self.fail(Error::assertion_failed("too many epochs"));
            return;
        }
        debug!(epoch = self.num_epochs, tables = self.num_tables, "sealed epoch");
        self.num_tables = 0;
        self.num_epochs += 1;
    }

    /// Alias for [`make_epoch`](TableLogger::make_epoch).
    pub fn end_epoch(&mut self) {
        self.make_epoch();
    }

    /// Seals the last epoch, writes the root meta block and the footer.
    /// The logger accepts no further writes afterwards.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            self.fail(Error::assertion_failed("already finished"));
            return self.status();
        }
        self.make_epoch();
        self.finished = true;
        if !self.ok() {
            return self.status();
        }
        debug_assert!(!self.pending_meta_entry);

        let meta_size = self.meta_block.finish().len();
        let meta_offset = self.indx_sink.ltell();
        {
            let contents = self.meta_block.finalize(!self.options.skip_checksums, None);
            self.output_stats.final_meta_size += contents.len();
            if let Err(err) = self.indx_sink.lwrite(contents) {
                self.fail(err);
                return self.status();
            }
        }
        self.output_stats.meta_size += meta_size;

        let footer = Footer {
            epoch_index_handle: BlockHandle::new(meta_offset, meta_size as u64),
            num_epochs: self.num_epochs,
        };
        let footer_buf = footer.encode();

        if self.options.tail_padding && self.options.index_buffer > 0 {
            // Bring the pre-footer size up to a write-size boundary.
            let total = self.indx_sink.ltell();
            let overflow = (total % self.options.index_buffer as u64) as usize;
            if overflow != 0 {
                let padding = vec![0u8; self.options.index_buffer - overflow];
                if let Err(err) = self.indx_sink.lwrite(&padding) {
                    self.fail(err);
                    return self.status();
                }
            }
        }

        if let Err(err) = self.indx_sink.lwrite(&footer_buf) {
            self.fail(err);
            return self.status();
        }
        self.output_stats.footer_size += footer_buf.len();
        debug!(
            epochs = self.num_epochs,
            index_bytes = self.output_stats.total_index_size(),
            data_bytes = self.output_stats.total_data_size(),
            "finalized directory logs"
        );
        self.status()
    }

    /// Allocation footprint of the staging buffers.
    pub fn memory_usage(&self) -> usize {
        self.staging.capacity() + self.uncommitted_indexes.capacity()
    }
}
