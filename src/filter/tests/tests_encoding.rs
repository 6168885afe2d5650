#[cfg(test)]
mod tests {
    use crate::encoding::BLOCK_TRAILER_SIZE;
    use crate::filter::{bloom_key_may_match, BloomBlock, Filter};

    #[test]
    fn test_encoded_layout() {
        let mut bloom = BloomBlock::new(10, 32);
        bloom.add_key(b"key");
        let encoded = bloom.finish().to_vec();

        // Bit array plus the trailing probe count byte.
        assert_eq!(encoded.len(), 32 + 1);
        assert_eq!(u32::from(encoded[32]), bloom.probes());
    }

    #[test]
    fn test_finalize_appends_trailer() {
        let mut bloom = BloomBlock::new(10, 32);
        bloom.add_key(b"key");
        let body_len = bloom.finish().len();
        let full = bloom.finalize(true).len();
        assert_eq!(full, body_len + BLOCK_TRAILER_SIZE);
    }

    #[test]
    fn test_short_filter_is_may_match() {
        assert!(bloom_key_may_match(b"key", b""));
        assert!(bloom_key_may_match(b"key", &[0x01]));
    }

    #[test]
    fn test_unknown_probe_count_is_may_match() {
        // k = 31 is reserved; must degrade to a match.
        let mut filter = vec![0u8; 16];
        filter.push(31);
        assert!(bloom_key_may_match(b"key", &filter));
    }

    #[test]
    fn test_corrupted_bits_never_panic() {
        let mut bloom = BloomBlock::new(10, 16);
        bloom.add_key(b"key");
        let mut encoded = bloom.finish().to_vec();
        for byte in encoded.iter_mut() {
            *byte ^= 0xa5;
        }
        // Result is unspecified, but probing stays safe.
        let _ = bloom_key_may_match(b"key", &encoded);
    }

    #[test]
    fn test_readers_use_embedded_probe_count() {
        // Write with one bits-per-key setting, read blind.
        let mut writer = BloomBlock::new(16, 64);
        writer.add_key(b"alpha");
        writer.add_key(b"beta");
        let encoded = writer.finish().to_vec();

        assert!(bloom_key_may_match(b"alpha", &encoded));
        assert!(bloom_key_may_match(b"beta", &encoded));
    }
}
