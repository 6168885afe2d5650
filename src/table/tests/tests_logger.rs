#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use crate::error::Error;
    use crate::io::{Env, LogSink, MemEnv, SinkOptions};
    use crate::options::DirOptions;
    use crate::table::TableLogger;

    fn logger_with_env(mut options: DirOptions) -> (MemEnv, TableLogger) {
        let mem = MemEnv::new();
        let env: Arc<dyn Env> = Arc::new(mem.clone());
        options.env = Arc::clone(&env);
        let data = LogSink::open(Arc::clone(&env), "data.log", SinkOptions::default()).unwrap();
        let indx = LogSink::open(env, "index.log", SinkOptions::default()).unwrap();
        (mem, TableLogger::new(options, data, indx))
    }

    fn small_options() -> DirOptions {
        DirOptions {
            block_size: 256,
            block_buffer: 4 << 10,
            block_padding: false,
            bf_bits_per_key: 0,
            ..Default::default()
        }
    }

    fn file_len(mem: &MemEnv, path: &str) -> usize {
        mem.file(Path::new(path)).unwrap().read().unwrap().len()
    }

    #[test]
    fn test_sorted_stream_is_accepted() {
        let (_mem, mut logger) = logger_with_env(small_options());
        for i in 0..100u32 {
            logger.add(format!("key{i:05}").as_bytes(), b"value");
            assert!(logger.ok());
        }
        logger.end_table(None);
        assert!(logger.finish().is_ok());
    }

    #[test]
    fn test_out_of_order_key_latches_error() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"banana", b"1");
        logger.add(b"apple", b"2");
        assert!(!logger.ok());
        assert!(matches!(logger.status(), Err(Error::AssertionFailed(_))));

        // The status is sticky: later well-formed calls keep failing.
        logger.add(b"cherry", b"3");
        assert!(matches!(logger.status(), Err(Error::AssertionFailed(_))));
        assert!(logger.finish().is_err());
    }

    #[test]
    fn test_duplicate_keys_rejected_when_unique() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"same", b"1");
        logger.add(b"same", b"2");
        assert!(!logger.ok());
    }

    #[test]
    fn test_duplicate_keys_allowed_when_not_unique() {
        let mut options = small_options();
        options.unique_keys = false;
        let (_mem, mut logger) = logger_with_env(options);
        logger.add(b"same", b"1");
        logger.add(b"same", b"2");
        assert!(logger.ok());
        assert!(logger.finish().is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"", b"value");
        assert!(!logger.ok());
    }

    #[test]
    fn test_double_finish_fails() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"key", b"value");
        assert!(logger.finish().is_ok());
        let second = logger.finish();
        assert!(matches!(second, Err(Error::AssertionFailed(_))));
    }

    #[test]
    fn test_add_after_finish_fails() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"key", b"value");
        logger.finish().unwrap();
        logger.add(b"later", b"value");
        assert!(!logger.ok());
    }

    #[test]
    fn test_empty_epochs_are_skipped() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.make_epoch();
        logger.make_epoch();
        assert!(logger.ok());
        logger.add(b"key", b"value");
        logger.make_epoch();
        logger.make_epoch(); // Nothing new: no empty epoch recorded
        logger.finish().unwrap();
        assert_eq!(logger.num_epochs(), 1);
    }

    #[test]
    fn test_epoch_counter_advances() {
        let (_mem, mut logger) = logger_with_env(small_options());
        logger.add(b"a", b"1");
        logger.make_epoch();
        logger.add(b"b", b"2");
        logger.make_epoch();
        logger.add(b"c", b"3");
        logger.finish().unwrap();
        assert_eq!(logger.num_epochs(), 3);
    }

    #[test]
    fn test_output_stats_accumulate() {
        let (mem, mut logger) = logger_with_env(small_options());
        for i in 0..200u32 {
            logger.add(format!("key{i:06}").as_bytes(), &[0x5a; 64]);
        }
        logger.finish().unwrap();

        let stats = logger.output_stats();
        assert_eq!(stats.key_size, 200 * 9);
        assert_eq!(stats.value_size, 200 * 64);
        assert!(stats.data_size > 0);
        assert!(stats.final_data_size >= stats.data_size);
        assert!(stats.index_size > 0);
        assert!(stats.meta_size > 0);
        assert!(stats.footer_size > 0);

        // The logs hold exactly what the stats claim.
        assert_eq!(file_len(&mem, "data.log"), stats.total_data_size());
        assert_eq!(file_len(&mem, "index.log"), stats.total_index_size());
    }

    #[test]
    fn test_block_padding_aligns_data_log() {
        let mut options = small_options();
        options.block_padding = true;
        options.block_size = 512;
        let (mem, mut logger) = logger_with_env(options);
        for i in 0..300u32 {
            logger.add(format!("key{i:06}").as_bytes(), &[1u8; 32]);
        }
        logger.finish().unwrap();

        let len = file_len(&mem, "data.log");
        assert!(len > 0);
        assert_eq!(len % 512, 0);
    }

    #[test]
    fn test_tail_padding_aligns_index_log() {
        use crate::layout::Footer;

        let mut options = small_options();
        options.tail_padding = true;
        options.index_buffer = 1024;
        options.min_index_buffer = 0;
        let (mem, mut logger) = logger_with_env(options);
        logger.add(b"solo", b"value");
        logger.finish().unwrap();

        let len = file_len(&mem, "index.log");
        assert_eq!((len - Footer::ENCODE_LEN) % 1024, 0);
    }
}
