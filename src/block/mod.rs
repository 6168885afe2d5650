//! # Block Module
//!
//! The self-contained unit of key/value and index data inside the log
//! files.
//!
//! # On-disk layout
//!
//! ```text
//! [entry 1]
//! [entry 2]
//! ...
//! [entry N]
//! [restart point 1: u32 LE]
//! ...
//! [restart point M: u32 LE]
//! [num restarts: u32 LE]
//! ( [compression_type: u8][masked_crc32c: u32 LE]  -- appended by finalize )
//! ( [zero padding]                                 -- data blocks only )
//! ```
//!
//! Each entry shares a prefix with its predecessor:
//!
//! ```text
//! [shared_len: varint32][non_shared_len: varint32][value_len: varint32]
//! [key suffix][value]
//! ```
//!
//! Every `restart_interval`-th entry starts a fresh run with
//! `shared_len = 0`; the absolute offsets of those entries form the
//! trailing restart array, which is what makes binary search possible.
//! Data blocks use interval 16; index and meta blocks use interval 1 so
//! every entry is directly addressable.
//!
//! # Guarantees
//!
//! - Keys inside a block are non-decreasing (enforced upstream by the
//!   table logger, checked here in debug builds).
//! - A decoded block validates its restart array bounds before any entry
//!   is touched; malformed entries surface as `Corruption` through the
//!   iterator status rather than panicking.

#[cfg(test)]
mod tests;

use crate::encoding::{
    crc32c_extend, crc32c_value, decode_fixed32, get_varint32, mask_crc, put_fixed32,
    put_varint32, NO_COMPRESSION,
};
use crate::error::{Error, Result};

/// Restart interval for data blocks.
pub const DATA_BLOCK_RESTART_INTERVAL: usize = 16;

/// Restart interval for index, filter-index, and meta blocks.
pub const NON_DATA_BLOCK_RESTART_INTERVAL: usize = 1;

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Incrementally builds one block.
///
/// Call [`add`](BlockBuilder::add) with non-decreasing keys, then
/// [`finish`](BlockBuilder::finish) to seal the entry area and restart
/// array, then [`finalize`](BlockBuilder::finalize) to append the trailer
/// (and optional padding). [`reset`](BlockBuilder::reset) prepares the
/// builder for the next block without releasing its allocation.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    /// Creates a builder emitting a restart point every
    /// `restart_interval` entries.
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        Self {
            restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Pre-allocates `bytes` of entry space.
    pub fn reserve(&mut self, bytes: usize) {
        self.buffer.reserve(bytes);
    }

    /// Clears all state so the builder can assemble the next block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Appends one entry. Keys must arrive in non-decreasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.buffer.is_empty() || key >= &self.last_key[..]);

        let mut shared = 0;
        if self.counter >= self.restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        } else {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// True before the first [`add`](BlockBuilder::add) since the last
    /// reset.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the block body if sealed now (restart array included,
    /// trailer excluded).
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Seals the entry area by appending the restart array. Returns the
    /// block body.
    pub fn finish(&mut self) -> &[u8] {
        debug_assert!(!self.finished);
        for i in 0..self.restarts.len() {
            let restart = self.restarts[i];
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Appends the block trailer after [`finish`](BlockBuilder::finish)
    /// and returns the complete on-disk bytes.
    ///
    /// With `checksums` unset the trailer checksum field is written as
    /// zero. With `pad_to` set the result is right-padded with zeros up
    /// to the next multiple of `pad_to`, so that consecutive data blocks
    /// start at aligned offsets in the data log.
    pub fn finalize(&mut self, checksums: bool, pad_to: Option<usize>) -> &[u8] {
        debug_assert!(self.finished);
        let body_len = self.buffer.len();
        self.buffer.push(NO_COMPRESSION);
        let masked = if checksums {
            let crc = crc32c_extend(
                crc32c_value(&self.buffer[..body_len]),
                &[NO_COMPRESSION],
            );
            mask_crc(crc)
        } else {
            0
        };
        put_fixed32(&mut self.buffer, masked);

        if let Some(align) = pad_to {
            if align > 0 {
                let target = self.buffer.len().div_ceil(align) * align;
                self.buffer.resize(target, 0);
            }
        }
        &self.buffer
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A decoded block body (trailer already stripped and verified).
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Wraps block contents, validating the restart array bounds.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too short for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let restart_area = (num_restarts as usize)
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| Error::corruption("restart count overflow"))?;
        if restart_area > data.len() {
            return Err(Error::corruption("restart array exceeds block size"));
        }
        let restart_offset = data.len() - restart_area;
        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Total size of the block body in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        let offset = self.restart_offset + index as usize * 4;
        decode_fixed32(&self.data[offset..]) as usize
    }

    /// Opens a cursor positioned before the first entry.
    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            block: self,
            current: self.restart_offset,
            restart_index: 0,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            valid: false,
            status: Ok(()),
        }
    }
}

/// Cursor over the entries of one [`Block`].
///
/// All positioning methods leave the cursor invalid when they run off
/// either end; decoding failures additionally latch a `Corruption` status.
pub struct BlockIter<'a> {
    block: &'a Block,
    /// Offset of the current entry, or `restart_offset` when invalid.
    current: usize,
    restart_index: u32,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    valid: bool,
    status: Result<()>,
}

impl<'a> BlockIter<'a> {
    /// True when the cursor rests on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// First decoding error observed, if any.
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    /// Key of the current entry.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.key
    }

    /// Value of the current entry.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    /// Positions on the first entry, if any.
    pub fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.valid = false;
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    /// Positions on the last entry, if any.
    pub fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.valid = false;
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {}
    }

    /// Positions on the first entry whose key is `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.valid = false;
            return;
        }

        // Binary search over restart points: find the last restarting
        // entry with a key strictly less than the target.
        let mut left: u32 = 0;
        let mut right: u32 = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.restart_key(mid) {
                Some(key) if key < target => left = mid,
                Some(_) => right = mid - 1,
                None => {
                    self.corrupt("bad restart entry");
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.key.as_slice() >= target {
                return;
            }
        }
    }

    /// Advances to the next entry.
    pub fn next(&mut self) {
        debug_assert!(self.valid);
        self.parse_next_entry();
    }

    /// Steps back to the previous entry; invalidates at the front.
    pub fn prev(&mut self) {
        debug_assert!(self.valid);
        let original = self.current;

        // Back up to the restart run containing an earlier entry.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.valid = false;
                self.current = self.block.restart_offset;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        // Walk forward until the entry right before the original one.
        while self.parse_next_entry() && self.next_entry_offset() < original {}
    }

    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        let offset = self.block.restart_point(index);
        self.current = offset;
        self.value_offset = offset;
        self.value_len = 0;
        self.valid = false;
    }

    /// Decodes the key of the entry at restart point `index`, which by
    /// construction shares nothing with its predecessor.
    fn restart_key(&self, index: u32) -> Option<&'a [u8]> {
        let block: &'a Block = self.block;
        let offset = block.restart_point(index);
        let mut input = block.data.get(offset..block.restart_offset)?;
        let shared = get_varint32(&mut input)?;
        let non_shared = get_varint32(&mut input)? as usize;
        let _value_len = get_varint32(&mut input)?;
        if shared != 0 || input.len() < non_shared {
            return None;
        }
        Some(&input[..non_shared])
    }

    fn corrupt(&mut self, msg: &str) {
        self.valid = false;
        self.current = self.block.restart_offset;
        if self.status.is_ok() {
            self.status = Err(Error::corruption(msg));
        }
    }

    fn parse_next_entry(&mut self) -> bool {
        let block: &'a Block = self.block;
        let offset = self.next_entry_offset();
        if offset >= block.restart_offset {
            // Ran off the end; park after the last entry.
            self.valid = false;
            self.current = block.restart_offset;
            return false;
        }

        let mut input = &block.data[offset..block.restart_offset];
        let before = input.len();
        let header = (
            get_varint32(&mut input),
            get_varint32(&mut input),
            get_varint32(&mut input),
        );
        let (Some(shared), Some(non_shared), Some(value_len)) = header else {
            self.corrupt("truncated entry header");
            return false;
        };
        let (shared, non_shared, value_len) =
            (shared as usize, non_shared as usize, value_len as usize);
        if shared > self.key.len() {
            self.corrupt("shared prefix longer than previous key");
            return false;
        }
        if input.len() < non_shared + value_len {
            self.corrupt("entry overruns block body");
            return false;
        }

        let header_len = before - input.len();
        self.key.truncate(shared);
        self.key.extend_from_slice(&input[..non_shared]);
        self.current = offset;
        self.value_offset = offset + header_len + non_shared;
        self.value_len = value_len;
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        self.valid = true;
        true
    }
}
