#[cfg(test)]
mod tests {
    use crate::block::{Block, BlockBuilder, DATA_BLOCK_RESTART_INTERVAL};
    use crate::encoding::{decode_fixed32, unmask_crc, BLOCK_TRAILER_SIZE, NO_COMPRESSION};

    fn build(entries: &[(&[u8], &[u8])], interval: usize) -> Vec<u8> {
        let mut builder = BlockBuilder::new(interval);
        for (k, v) in entries {
            builder.add(k, v);
        }
        builder.finish().to_vec()
    }

    #[test]
    fn test_empty_builder() {
        let builder = BlockBuilder::new(DATA_BLOCK_RESTART_INTERVAL);
        assert!(builder.is_empty());
        // Restart array slot plus its count.
        assert_eq!(builder.current_size_estimate(), 8);
    }

    #[test]
    fn test_single_entry_roundtrip() {
        let body = build(&[(b"apple", b"red")], 16);
        let block = Block::new(body).unwrap();
        let mut iter = block.iter();
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"apple");
        assert_eq!(iter.value(), b"red");
        iter.next();
        assert!(!iter.valid());
    }

    #[test]
    fn test_prefix_compression_shrinks_entries() {
        let compressed = build(
            &[(b"prefix_aaa", b"1"), (b"prefix_bbb", b"2"), (b"prefix_ccc", b"3")],
            16,
        );
        let restarted = build(
            &[(b"prefix_aaa", b"1"), (b"prefix_bbb", b"2"), (b"prefix_ccc", b"3")],
            1,
        );
        // Interval 1 rewrites the full key for every entry, interval 16
        // shares the common prefix.
        assert!(compressed.len() < restarted.len());
    }

    #[test]
    fn test_restart_interval_one_keeps_full_keys() {
        let body = build(&[(b"aa", b"1"), (b"ab", b"2"), (b"ac", b"3")], 1);
        let block = Block::new(body).unwrap();
        let mut iter = block.iter();
        iter.seek(b"ab");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"ab");
        assert_eq!(iter.value(), b"2");
    }

    #[test]
    fn test_duplicate_keys_are_preserved() {
        let body = build(&[(b"k", b"X"), (b"k", b"Y"), (b"k", b"Z")], 16);
        let block = Block::new(body).unwrap();
        let mut iter = block.iter();
        iter.seek_to_first();
        let mut values = Vec::new();
        while iter.valid() {
            assert_eq!(iter.key(), b"k");
            values.extend_from_slice(iter.value());
            iter.next();
        }
        assert_eq!(values, b"XYZ");
    }

    #[test]
    fn test_finalize_appends_trailer() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"key", b"value");
        let body_len = builder.finish().len();
        let full = builder.finalize(true, None);

        assert_eq!(full.len(), body_len + BLOCK_TRAILER_SIZE);
        assert_eq!(full[body_len], NO_COMPRESSION);
        // Trailer checksum covers body plus the compression byte.
        let stored = unmask_crc(decode_fixed32(&full[body_len + 1..]));
        let expected = crate::encoding::crc32c_value(&full[..body_len + 1]);
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_finalize_without_checksums_zeroes_field() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"key", b"value");
        builder.finish();
        let full = builder.finalize(false, None);
        let body_len = full.len() - BLOCK_TRAILER_SIZE;
        assert_eq!(decode_fixed32(&full[body_len + 1..]), 0);
    }

    #[test]
    fn test_finalize_pads_to_alignment() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"key", b"value");
        builder.finish();
        let full = builder.finalize(true, Some(512));
        assert_eq!(full.len(), 512);
        assert!(full[full.len() - 1] == 0);
    }

    #[test]
    fn test_finalize_pads_oversized_to_next_multiple() {
        let mut builder = BlockBuilder::new(16);
        let big = vec![7u8; 700];
        builder.add(b"key", &big);
        builder.finish();
        let full = builder.finalize(true, Some(512));
        assert_eq!(full.len(), 1024);
    }

    #[test]
    fn test_reset_reuses_builder() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"aaa", b"1");
        builder.finish();
        builder.finalize(true, None);

        builder.reset();
        assert!(builder.is_empty());
        builder.add(b"bbb", b"2");
        let block = Block::new(builder.finish().to_vec()).unwrap();
        let mut iter = block.iter();
        iter.seek_to_first();
        assert_eq!(iter.key(), b"bbb");
    }

    #[test]
    fn test_size_estimate_tracks_growth() {
        let mut builder = BlockBuilder::new(2);
        let mut last = builder.current_size_estimate();
        for i in 0..10u32 {
            builder.add(format!("key{i:04}").as_bytes(), b"v");
            let now = builder.current_size_estimate();
            assert!(now > last);
            last = now;
        }
        assert_eq!(builder.finish().len(), last);
    }
}
