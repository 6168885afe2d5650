#[cfg(test)]
mod tests {
    use crate::memtable::WriteBuffer;

    #[test]
    fn test_unordered_input_comes_out_sorted() {
        let mut buf = WriteBuffer::new();
        for key in ["cherry", "apple", "banana", "date", "apricot"] {
            buf.add(key.as_bytes(), b"v");
        }
        buf.finish_and_sort();

        let mut iter = buf.iter();
        iter.seek_to_first();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(String::from_utf8(iter.key().to_vec()).unwrap());
            iter.next();
        }
        assert_eq!(keys, ["apple", "apricot", "banana", "cherry", "date"]);
    }

    #[test]
    fn test_sort_is_bytewise() {
        let mut buf = WriteBuffer::new();
        buf.add(b"b", b"1");
        buf.add(b"B", b"2");
        buf.add(b"a\xff", b"3");
        buf.add(b"a", b"4");
        buf.finish_and_sort();

        let mut iter = buf.iter();
        iter.seek_to_first();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"B".to_vec(), b"a".to_vec(), b"a\xff".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_duplicate_keys_keep_insertion_order() {
        let mut buf = WriteBuffer::new();
        buf.add(b"dup", b"first");
        buf.add(b"aaa", b"-");
        buf.add(b"dup", b"second");
        buf.add(b"zzz", b"-");
        buf.add(b"dup", b"third");
        buf.finish_and_sort();

        let mut iter = buf.iter();
        iter.seek_to_first();
        iter.next(); // skip "aaa"
        let mut values = Vec::new();
        while iter.valid() && iter.key() == b"dup" {
            values.push(iter.value().to_vec());
            iter.next();
        }
        assert_eq!(values, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    fn test_large_random_sort() {
        use rand::{seq::SliceRandom, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);

        let mut keys: Vec<String> = (0..2000).map(|i| format!("key{i:06}")).collect();
        keys.shuffle(&mut rng);

        let mut buf = WriteBuffer::new();
        for key in &keys {
            buf.add(key.as_bytes(), key.as_bytes());
        }
        buf.finish_and_sort();

        let mut iter = buf.iter();
        iter.seek_to_first();
        let mut prev: Option<Vec<u8>> = None;
        let mut count = 0;
        while iter.valid() {
            if let Some(p) = &prev {
                assert!(p.as_slice() < iter.key());
            }
            assert_eq!(iter.key(), iter.value());
            prev = Some(iter.key().to_vec());
            count += 1;
            iter.next();
        }
        assert_eq!(count, 2000);
    }
}
