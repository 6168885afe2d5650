//! # Filter Module
//!
//! Per-table bloom filter block.
//!
//! # On-disk layout
//!
//! ```text
//! [bit array: `bytes` bytes][k: u8]
//! ( [compression_type: u8][masked_crc32c: u32 LE]  -- appended by finalize )
//! ```
//!
//! The probe count `k` travels inside the filter so readers can decode
//! filters produced with different `bits_per_key` settings. Membership
//! probing uses a single seeded hash expanded by double hashing: the
//! delta between probes is the hash rotated right by 17 bits.
//!
//! # Degradation rules
//!
//! A filter shorter than two bytes, or one whose stored `k` exceeds 30,
//! is treated as "may match" — short or future-encoded filters must never
//! suppress a real key. The same applies upstream when the filter block
//! cannot be read at all: a false positive costs one wasted block read, a
//! false negative loses data.

#[cfg(test)]
mod tests;

use crate::encoding::{crc32c_extend, crc32c_value, hash, mask_crc, put_fixed32, NO_COMPRESSION};

/// Seed for the bloom hash.
pub(crate) const BLOOM_HASH_SEED: u32 = 0xbc9f_1d34;

fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, BLOOM_HASH_SEED)
}

// ------------------------------------------------------------------------------------------------
// Capability trait
// ------------------------------------------------------------------------------------------------

/// The capability set the table logger needs from a filter block.
pub trait Filter {
    /// Registers a key with the filter under construction.
    fn add_key(&mut self, key: &[u8]);

    /// Seals the filter and returns its contents without the trailer.
    fn finish(&mut self) -> &[u8];

    /// Appends the block trailer and returns the complete on-disk bytes.
    fn finalize(&mut self, checksums: bool) -> &[u8];
}

// ------------------------------------------------------------------------------------------------
// Bloom filter block
// ------------------------------------------------------------------------------------------------

/// A fixed-budget bloom filter reused across compactions via
/// [`reset`](BloomBlock::reset).
pub struct BloomBlock {
    bits_per_key: usize,
    bytes: usize,
    space: Vec<u8>,
    bits: u32,
    k: u32,
    finished: bool,
}

impl BloomBlock {
    /// Creates a filter with a fixed byte budget.
    ///
    /// `bits_per_key` drives the probe count; `bytes` is the size of the
    /// bit array (the encoded filter is one byte longer).
    pub fn new(bits_per_key: usize, bytes: usize) -> Self {
        let mut filter = Self {
            bits_per_key,
            bytes,
            space: Vec::with_capacity(bytes + 1 + crate::encoding::BLOCK_TRAILER_SIZE),
            bits: 0,
            k: 0,
            finished: false,
        };
        filter.reset();
        filter
    }

    /// Clears all bits and re-arms the filter for the next table.
    pub fn reset(&mut self) {
        self.finished = false;
        self.space.clear();
        self.space.resize(self.bytes, 0);
        self.k = (self.bits_per_key as f64 * std::f64::consts::LN_2).round() as u32;
        self.k = self.k.clamp(1, 30);
        // Remember the probe count inside the filter itself.
        self.space.push(self.k as u8);
        self.bits = 8 * self.bytes as u32;
    }

    /// Probe count currently encoded in the filter.
    pub fn probes(&self) -> u32 {
        self.k
    }

    /// Backing buffer capacity, for memory accounting.
    pub fn memory_usage(&self) -> usize {
        self.space.capacity()
    }
}

impl Filter for BloomBlock {
    fn add_key(&mut self, key: &[u8]) {
        debug_assert!(!self.finished);
        if self.bits == 0 {
            return;
        }
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..self.k {
            let bit = h % self.bits;
            self.space[(bit / 8) as usize] |= 1 << (bit % 8);
            h = h.wrapping_add(delta);
        }
    }

    fn finish(&mut self) -> &[u8] {
        debug_assert!(!self.finished);
        self.finished = true;
        &self.space
    }

    fn finalize(&mut self, checksums: bool) -> &[u8] {
        debug_assert!(self.finished);
        let body_len = self.space.len();
        self.space.push(NO_COMPRESSION);
        let masked = if checksums {
            let crc = crc32c_extend(crc32c_value(&self.space[..body_len]), &[NO_COMPRESSION]);
            mask_crc(crc)
        } else {
            0
        };
        put_fixed32(&mut self.space, masked);
        &self.space
    }
}

// ------------------------------------------------------------------------------------------------
// Membership probing
// ------------------------------------------------------------------------------------------------

/// Probes a decoded filter for `key`.
///
/// Returns `false` only when the key is definitely absent.
pub fn bloom_key_may_match(key: &[u8], filter: &[u8]) -> bool {
    if filter.len() < 2 {
        return true; // Too short to mean anything
    }
    let bits = ((filter.len() - 1) * 8) as u32;

    // Use the encoded k so filters written with other parameters stay
    // readable.
    let k = u32::from(filter[filter.len() - 1]);
    if k > 30 {
        return true; // Reserved for future encodings
    }

    let mut h = bloom_hash(key);
    let delta = h.rotate_right(17);
    for _ in 0..k {
        let bit = h % bits;
        if filter[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
            return false;
        }
        h = h.wrapping_add(delta);
    }
    true
}
