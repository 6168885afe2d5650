#[cfg(test)]
mod tests {
    use crate::block::{Block, BlockBuilder};

    fn sample_block(n: u32, interval: usize) -> Block {
        let mut builder = BlockBuilder::new(interval);
        for i in 0..n {
            let key = format!("key{i:05}");
            let value = format!("value{i:05}");
            builder.add(key.as_bytes(), value.as_bytes());
        }
        Block::new(builder.finish().to_vec()).unwrap()
    }

    #[test]
    fn test_forward_scan_sees_all_entries() {
        let block = sample_block(100, 16);
        let mut iter = block.iter();
        iter.seek_to_first();
        let mut count = 0;
        while iter.valid() {
            assert_eq!(iter.key(), format!("key{count:05}").as_bytes());
            assert_eq!(iter.value(), format!("value{count:05}").as_bytes());
            count += 1;
            iter.next();
        }
        assert_eq!(count, 100);
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_seek_to_last() {
        for interval in [1, 2, 16] {
            let block = sample_block(37, interval);
            let mut iter = block.iter();
            iter.seek_to_last();
            assert!(iter.valid(), "interval {interval}");
            assert_eq!(iter.key(), b"key00036");
        }
    }

    #[test]
    fn test_seek_exact_and_between() {
        let block = sample_block(100, 16);
        let mut iter = block.iter();

        iter.seek(b"key00042");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key00042");

        // Between two keys lands on the next larger one.
        iter.seek(b"key00042x");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key00043");

        // Before the first key lands on the first.
        iter.seek(b"aaa");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key00000");

        // After the last key invalidates.
        iter.seek(b"zzz");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_seek_every_key() {
        for interval in [1, 3, 16] {
            let block = sample_block(64, interval);
            let mut iter = block.iter();
            for i in 0..64 {
                let key = format!("key{i:05}");
                iter.seek(key.as_bytes());
                assert!(iter.valid(), "interval {interval} key {i}");
                assert_eq!(iter.key(), key.as_bytes());
            }
        }
    }

    #[test]
    fn test_prev_walks_backwards() {
        let block = sample_block(50, 16);
        let mut iter = block.iter();
        iter.seek_to_last();
        let mut expected = 49i32;
        while iter.valid() {
            assert_eq!(iter.key(), format!("key{expected:05}").as_bytes());
            expected -= 1;
            iter.prev();
        }
        assert_eq!(expected, -1);
    }

    #[test]
    fn test_prev_across_restart_boundary() {
        let block = sample_block(20, 4);
        let mut iter = block.iter();
        iter.seek(b"key00008");
        assert!(iter.valid());
        iter.prev();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key00007");
    }

    #[test]
    fn test_next_then_prev_is_identity() {
        let block = sample_block(30, 7);
        let mut iter = block.iter();
        iter.seek(b"key00015");
        iter.next();
        assert_eq!(iter.key(), b"key00016");
        iter.prev();
        assert_eq!(iter.key(), b"key00015");
    }

    #[test]
    fn test_empty_block_iterates_nothing() {
        let mut builder = BlockBuilder::new(16);
        let block = Block::new(builder.finish().to_vec()).unwrap();
        let mut iter = block.iter();
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }
}
