//! # Options Module
//!
//! Configuration for directory writers and readers. One [`DirOptions`]
//! value is shared (cloned) by every component of a directory instance;
//! a writer and the reader that later opens its output must agree on the
//! format-affecting fields (`block_size`, `block_padding`,
//! `bf_bits_per_key`, `unique_keys`, checksum switches).

use std::fmt;
use std::sync::Arc;

use crate::io::{Env, FsEnv};
use crate::pool::ThreadPool;

/// Tuning knobs for one indexed directory.
#[derive(Clone)]
pub struct DirOptions {
    /// Approximate bytes of user data packed per data block. Also the
    /// alignment unit when `block_padding` is on. Default: 32K.
    pub block_size: usize,

    /// Fill factor applied to `block_size` before a data block is cut.
    /// Default: 0.996.
    pub block_util: f64,

    /// Zero-pad each data block so the next one starts at a multiple of
    /// `block_size` in the data log. Default: true.
    pub block_padding: bool,

    /// Bytes of finalized data blocks staged in memory per partition
    /// before one locked flush to the (possibly shared) data log.
    /// Default: 2M.
    pub block_buffer: usize,

    /// Max write buffering inside the data log sink. Default: 4M.
    pub data_buffer: usize,

    /// Min bytes accumulated before the data log sink writes. Default: 1M.
    pub min_data_buffer: usize,

    /// Max write buffering inside each index log sink. Also the
    /// alignment unit for `tail_padding`. Default: 2M.
    pub index_buffer: usize,

    /// Min bytes accumulated before an index log sink writes.
    /// Default: 1M.
    pub min_index_buffer: usize,

    /// Pad the index log before the footer so the pre-footer size is a
    /// multiple of `index_buffer`. Default: false.
    pub tail_padding: bool,

    /// Total in-memory budget for all memtable partitions, double
    /// buffering included. Default: 32M.
    pub memtable_buffer: usize,

    /// Fill factor applied to a partition's buffer before a swap is
    /// forced. Default: 0.97.
    pub memtable_util: f64,

    /// Log2 of the number of memtable partitions. Default: 0.
    pub lg_parts: u32,

    /// Estimated key size used for buffer sizing. Default: 8.
    pub key_size: usize,

    /// Estimated value size used for buffer sizing. Default: 32.
    pub value_size: usize,

    /// Keys are unique: point reads binary-search index blocks and stop
    /// at the first match. Default: true.
    pub unique_keys: bool,

    /// Bloom filter budget per key; zero disables filters. Default: 8.
    pub bf_bits_per_key: usize,

    /// Write zeroed checksums instead of real ones. Default: false.
    pub skip_checksums: bool,

    /// Verify block checksums on read. Default: false.
    pub verify_checksums: bool,

    /// Fail writes with `BufferFull` instead of waiting for compaction.
    /// Default: false.
    pub non_blocking: bool,

    /// Voluntary writer sleep when buffer space runs out; zero disables.
    /// Default: 0.
    pub slowdown_micros: u64,

    /// Fan reads out with one task per epoch. Default: false.
    pub parallel_reads: bool,

    /// Permit detached threads when no pool is configured; otherwise
    /// tasks run inline on the caller. Default: false.
    pub allow_env_threads: bool,

    /// Pool for background compactions. Default: none (inline).
    pub compaction_pool: Option<Arc<ThreadPool>>,

    /// Pool for parallel per-epoch reads. Default: none (inline).
    pub reader_pool: Option<Arc<ThreadPool>>,

    /// Storage substrate.
    pub env: Arc<dyn Env>,
}

impl Default for DirOptions {
    fn default() -> Self {
        Self {
            block_size: 32 << 10,
            block_util: 0.996,
            block_padding: true,
            block_buffer: 2 << 20,
            data_buffer: 4 << 20,
            min_data_buffer: 1 << 20,
            index_buffer: 2 << 20,
            min_index_buffer: 1 << 20,
            tail_padding: false,
            memtable_buffer: 32 << 20,
            memtable_util: 0.97,
            lg_parts: 0,
            key_size: 8,
            value_size: 32,
            unique_keys: true,
            bf_bits_per_key: 8,
            skip_checksums: false,
            verify_checksums: false,
            non_blocking: false,
            slowdown_micros: 0,
            parallel_reads: false,
            allow_env_threads: false,
            compaction_pool: None,
            reader_pool: None,
            env: Arc::new(FsEnv),
        }
    }
}

impl fmt::Debug for DirOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pools and the env are trait-object handles without Debug; every
        // plain field is listed.
        f.debug_struct("DirOptions")
            .field("block_size", &self.block_size)
            .field("block_util", &self.block_util)
            .field("block_padding", &self.block_padding)
            .field("block_buffer", &self.block_buffer)
            .field("data_buffer", &self.data_buffer)
            .field("min_data_buffer", &self.min_data_buffer)
            .field("index_buffer", &self.index_buffer)
            .field("min_index_buffer", &self.min_index_buffer)
            .field("tail_padding", &self.tail_padding)
            .field("memtable_buffer", &self.memtable_buffer)
            .field("memtable_util", &self.memtable_util)
            .field("lg_parts", &self.lg_parts)
            .field("key_size", &self.key_size)
            .field("value_size", &self.value_size)
            .field("unique_keys", &self.unique_keys)
            .field("bf_bits_per_key", &self.bf_bits_per_key)
            .field("skip_checksums", &self.skip_checksums)
            .field("verify_checksums", &self.verify_checksums)
            .field("non_blocking", &self.non_blocking)
            .field("slowdown_micros", &self.slowdown_micros)
            .field("parallel_reads", &self.parallel_reads)
            .field("allow_env_threads", &self.allow_env_threads)
            .finish_non_exhaustive()
    }
}

/// Per-call flags for [`DirLogger::flush`](crate::writer::DirLogger::flush).
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOptions {
    /// Only check whether a flush could start right now; schedule
    /// nothing.
    pub dry_run: bool,

    /// Return once the flush is scheduled instead of waiting for the
    /// compaction to complete.
    pub no_wait: bool,

    /// Seal the current epoch after the flushed table.
    pub epoch_flush: bool,

    /// Finalize the directory after this flush; no further writes.
    pub finalize: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let options = DirOptions::default();
        assert!(options.block_util > 0.0 && options.block_util <= 1.0);
        assert!(options.memtable_util > 0.0 && options.memtable_util <= 1.0);
        assert!(options.block_size <= options.block_buffer);
        assert!(options.min_data_buffer <= options.data_buffer);
        assert!(options.min_index_buffer <= options.index_buffer);
        assert!(options.unique_keys);
    }

    #[test]
    fn test_flush_options_default() {
        let flush = FlushOptions::default();
        assert!(!flush.dry_run && !flush.no_wait && !flush.epoch_flush && !flush.finalize);
    }
}
