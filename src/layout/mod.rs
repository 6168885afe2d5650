//! # Layout Module
//!
//! The pointer structures that make a finished index log self-describing:
//!
//! - [`BlockHandle`] — offset/size pair locating one block,
//! - [`TableHandle`] — index and filter handles plus tight key bounds for
//!   one table,
//! - [`Footer`] — the fixed-width trailer of the index log,
//! - [`epoch_key`] — the canonical `(epoch, table)` encoding used as the
//!   key of the root meta block,
//! - the bytewise separator/successor helpers that keep index keys short.
//!
//! # Footer layout
//!
//! ```text
//! [epoch_index_handle: varint64 pair, zero-padded to 20 bytes]
//! [num_epochs: u32 LE]
//! [magic: u64 LE]
//! ```
//!
//! The footer is always exactly [`Footer::ENCODE_LEN`] bytes; the reader
//! bootstraps by reading exactly that many bytes off the end of the index
//! log.


use crate::encoding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, get_varint64, put_fixed32,
    put_fixed64, put_length_prefixed_slice, put_varint64,
};
use crate::error::{Error, Result};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Upper bound on epochs per directory.
pub const MAX_EPOCHS: u32 = 9999;

/// Upper bound on tables within one epoch.
pub const MAX_TABLES_PER_EPOCH: u32 = 9999;

/// Identifies a well-formed index log footer.
pub const FOOTER_MAGIC: u64 = 0x95f5_3d4a_27cc_bd19;

/// Seed for routing keys to memtable partitions.
pub(crate) const PARTITION_HASH_SEED: u32 = 0x9e37_79b9;

// ------------------------------------------------------------------------------------------------
// Block handle
// ------------------------------------------------------------------------------------------------

/// Location of one block inside a log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    /// Byte offset of the block body.
    pub offset: u64,
    /// Size of the block body, trailer excluded.
    pub size: u64,
}

impl BlockHandle {
    /// Worst-case encoded size: two maximum-width varint64 values.
    pub const MAX_ENCODED_LEN: usize = 10 + 10;

    /// Creates a handle.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Appends the varint encoding.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Decodes a handle, advancing `input`.
    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let offset = get_varint64(input)
            .ok_or_else(|| Error::corruption("bad block handle offset"))?;
        let size = get_varint64(input)
            .ok_or_else(|| Error::corruption("bad block handle size"))?;
        Ok(Self { offset, size })
    }
}

// ------------------------------------------------------------------------------------------------
// Table handle
// ------------------------------------------------------------------------------------------------

/// Per-table entry of the root meta block.
///
/// Locates the table's index block and optional filter block inside the
/// index log, and carries tight key bounds so readers can prune whole
/// tables without touching them. `filter_size == 0` means the table was
/// written without a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableHandle {
    /// Offset of the filter block in the index log.
    pub filter_offset: u64,
    /// Size of the filter block body, zero when absent.
    pub filter_size: u64,
    /// Offset of the index block in the index log.
    pub offset: u64,
    /// Size of the index block body.
    pub size: u64,
    /// First key added to the table.
    pub smallest_key: Vec<u8>,
    /// Short successor of the last key added to the table.
    pub largest_key: Vec<u8>,
}

impl TableHandle {
    /// Appends the varint + length-prefixed encoding.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.filter_offset);
        put_varint64(dst, self.filter_size);
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
        put_length_prefixed_slice(dst, &self.smallest_key);
        put_length_prefixed_slice(dst, &self.largest_key);
    }

    /// Decodes a handle, advancing `input`.
    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let err = || Error::corruption("bad table handle");
        let filter_offset = get_varint64(input).ok_or_else(err)?;
        let filter_size = get_varint64(input).ok_or_else(err)?;
        let offset = get_varint64(input).ok_or_else(err)?;
        let size = get_varint64(input).ok_or_else(err)?;
        let smallest_key = get_length_prefixed_slice(input).ok_or_else(err)?.to_vec();
        let largest_key = get_length_prefixed_slice(input).ok_or_else(err)?.to_vec();
        Ok(Self {
            filter_offset,
            filter_size,
            offset,
            size,
            smallest_key,
            largest_key,
        })
    }

    /// Handle of the table's filter block.
    pub fn filter_handle(&self) -> BlockHandle {
        BlockHandle::new(self.filter_offset, self.filter_size)
    }

    /// Handle of the table's index block.
    pub fn index_handle(&self) -> BlockHandle {
        BlockHandle::new(self.offset, self.size)
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Fixed-width trailer of the index log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    /// Location of the root meta block (the epoch index).
    pub epoch_index_handle: BlockHandle,
    /// Number of sealed epochs.
    pub num_epochs: u32,
}

impl Footer {
    /// Exact encoded size; readers read exactly this many trailing bytes.
    pub const ENCODE_LEN: usize = BlockHandle::MAX_ENCODED_LEN + 4 + 8;

    /// Encodes the footer into its fixed-width form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODE_LEN);
        self.epoch_index_handle.encode_to(&mut buf);
        buf.resize(BlockHandle::MAX_ENCODED_LEN, 0);
        put_fixed32(&mut buf, self.num_epochs);
        put_fixed64(&mut buf, FOOTER_MAGIC);
        debug_assert_eq!(buf.len(), Self::ENCODE_LEN);
        buf
    }

    /// Decodes and validates a footer.
    pub fn decode_from(input: &[u8]) -> Result<Self> {
        if input.len() != Self::ENCODE_LEN {
            return Err(Error::corruption(format!(
                "footer must be {} bytes, got {}",
                Self::ENCODE_LEN,
                input.len()
            )));
        }
        let magic = decode_fixed64(&input[Self::ENCODE_LEN - 8..]);
        if magic != FOOTER_MAGIC {
            return Err(Error::corruption("bad footer magic"));
        }
        let mut handle_bytes = &input[..BlockHandle::MAX_ENCODED_LEN];
        let epoch_index_handle = BlockHandle::decode_from(&mut handle_bytes)?;
        let num_epochs = decode_fixed32(&input[BlockHandle::MAX_ENCODED_LEN..]);
        Ok(Self {
            epoch_index_handle,
            num_epochs,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Epoch keys
// ------------------------------------------------------------------------------------------------

/// Canonical key of table `table` in epoch `epoch` inside the root meta
/// block.
///
/// Big-endian fixed-width integers, so bytewise order equals
/// `(epoch, table)` order.
pub fn epoch_key(epoch: u32, table: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&epoch.to_be_bytes());
    key[4..].copy_from_slice(&table.to_be_bytes());
    key
}

// ------------------------------------------------------------------------------------------------
// Separator / successor helpers
// ------------------------------------------------------------------------------------------------

/// Shortens `start` in place to the shortest key `s` with
/// `start <= s < limit` under bytewise order.
///
/// Leaves `start` unchanged when one key is a prefix of the other or no
/// shorter separator exists.
pub fn find_shortest_separator(start: &mut Vec<u8>, limit: &[u8]) {
    let min_len = start.len().min(limit.len());
    let mut diff = 0;
    while diff < min_len && start[diff] == limit[diff] {
        diff += 1;
    }

    if diff >= min_len {
        // One is a prefix of the other; no shortening possible.
        return;
    }
    let byte = start[diff];
    if byte < 0xff && byte + 1 < limit[diff] {
        start[diff] = byte + 1;
        start.truncate(diff + 1);
        debug_assert!(start.as_slice() < limit);
    }
}

/// Shortens `key` in place to a short key `s >= key` under bytewise order.
pub fn find_short_successor(key: &mut Vec<u8>) {
    for i in 0..key.len() {
        if key[i] != 0xff {
            key[i] += 1;
            key.truncate(i + 1);
            return;
        }
    }
    // All 0xff: the key is its own successor.
}
