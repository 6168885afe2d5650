//! # Memtable Module
//!
//! The in-memory write buffer feeding compaction.
//!
//! ## Design Invariants
//!
//! - Entries are appended unsorted as `[len-prefixed key][len-prefixed
//!   value]` into one flat byte arena; a parallel offset vector remembers
//!   where each entry starts.
//! - [`finish_and_sort`](WriteBuffer::finish_and_sort) stable-sorts the
//!   offset vector by key bytes, so duplicate keys keep their insertion
//!   order.
//! - After finishing, the buffer is read-only until
//!   [`reset`](WriteBuffer::reset); further `add` calls are a bug in the
//!   caller.
//!
//! ## Flush Semantics
//!
//! Compaction drains the buffer through [`WriteBufferIter`], a cursor over
//! the sorted offsets. The cursor only supports positioning at either end
//! and stepping — compaction scans forward, so keyed seeks are
//! intentionally unsupported.
//!
//! Buffers are owned by the directory logger and reused across
//! compactions via `reset`, which keeps both allocations.

#[cfg(test)]
mod tests;

use crate::encoding::{get_length_prefixed_slice, put_length_prefixed_slice};

// ------------------------------------------------------------------------------------------------
// Write buffer
// ------------------------------------------------------------------------------------------------

/// Append-then-sort key/value arena.
pub struct WriteBuffer {
    buffer: Vec<u8>,
    offsets: Vec<u32>,
    num_entries: u32,
    finished: bool,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            offsets: Vec::new(),
            num_entries: 0,
            finished: false,
        }
    }

    /// Pre-allocates room for `num_entries` entries totalling
    /// `buffer_size` bytes.
    pub fn reserve(&mut self, num_entries: u32, buffer_size: usize) {
        self.buffer.reserve(buffer_size);
        self.offsets.reserve(num_entries as usize);
    }

    /// Appends one entry. Keys must be non-empty.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(!key.is_empty());
        let offset = self.buffer.len() as u32;
        put_length_prefixed_slice(&mut self.buffer, key);
        put_length_prefixed_slice(&mut self.buffer, value);
        self.offsets.push(offset);
        self.num_entries += 1;
    }

    /// Bytes of entry data currently buffered.
    pub fn current_buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of entries appended since the last reset.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Allocated footprint of the arena and offset vector.
    pub fn memory_usage(&self) -> usize {
        self.buffer.capacity() + self.offsets.capacity() * std::mem::size_of::<u32>()
    }

    /// Sorts entries by key and freezes the buffer.
    ///
    /// The sort is stable: duplicate keys stay in insertion order, which
    /// is what makes multi-value reads return values in write order.
    pub fn finish_and_sort(&mut self) {
        debug_assert!(!self.finished);
        let buffer = std::mem::take(&mut self.buffer);
        self.offsets
            .sort_by(|&a, &b| Self::key_at(&buffer, a).cmp(Self::key_at(&buffer, b)));
        self.buffer = buffer;
        self.finished = true;
    }

    /// Clears the buffer for reuse, keeping allocations.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.offsets.clear();
        self.num_entries = 0;
        self.finished = false;
    }

    /// Opens a cursor over the sorted entries.
    ///
    /// Only meaningful after [`finish_and_sort`](Self::finish_and_sort).
    pub fn iter(&self) -> WriteBufferIter<'_> {
        debug_assert!(self.finished);
        WriteBufferIter {
            buffer: &self.buffer,
            offsets: &self.offsets,
            cursor: -1,
        }
    }

    fn key_at(buffer: &[u8], offset: u32) -> &[u8] {
        let mut input = &buffer[offset as usize..];
        get_length_prefixed_slice(&mut input).expect("write buffer entry is self-consistent")
    }
}

// ------------------------------------------------------------------------------------------------
// Cursor
// ------------------------------------------------------------------------------------------------

/// Cursor over a sorted [`WriteBuffer`].
///
/// Forward/backward stepping only; keyed `seek` is unsupported because
/// compaction always drains the whole buffer in order.
pub struct WriteBufferIter<'a> {
    buffer: &'a [u8],
    offsets: &'a [u32],
    cursor: i64,
}

impl<'a> WriteBufferIter<'a> {
    /// True when the cursor rests on an entry.
    pub fn valid(&self) -> bool {
        self.cursor >= 0 && (self.cursor as usize) < self.offsets.len()
    }

    /// Positions on the smallest key.
    pub fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    /// Positions on the largest key.
    pub fn seek_to_last(&mut self) {
        self.cursor = self.offsets.len() as i64 - 1;
    }

    /// Advances towards larger keys.
    pub fn next(&mut self) {
        self.cursor += 1;
    }

    /// Steps towards smaller keys.
    pub fn prev(&mut self) {
        self.cursor -= 1;
    }

    /// Key of the current entry.
    pub fn key(&self) -> &'a [u8] {
        debug_assert!(self.valid());
        let mut input = &self.buffer[self.offsets[self.cursor as usize] as usize..];
        get_length_prefixed_slice(&mut input).expect("write buffer entry is self-consistent")
    }

    /// Value of the current entry.
    pub fn value(&self) -> &'a [u8] {
        debug_assert!(self.valid());
        let mut input = &self.buffer[self.offsets[self.cursor as usize] as usize..];
        let _key = get_length_prefixed_slice(&mut input);
        get_length_prefixed_slice(&mut input).expect("write buffer entry is self-consistent")
    }
}
