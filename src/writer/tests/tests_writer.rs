#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::error::Error;
    use crate::io::MemEnv;
    use crate::options::DirOptions;
    use crate::reader::DirReader;
    use crate::writer::{index_log_name, DirWriter};

    fn mem_options(env: &MemEnv) -> DirOptions {
        DirOptions {
            block_size: 512,
            block_buffer: 4 << 10,
            block_padding: false,
            memtable_buffer: 64 << 10,
            env: Arc::new(env.clone()),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_partition_roundtrip() {
        let env = MemEnv::new();
        let options = mem_options(&env);
        let writer = DirWriter::open(options.clone(), "dir").unwrap();
        writer.append(b"apple", b"1").unwrap();
        writer.append(b"banana", b"2").unwrap();
        writer.append(b"cherry", b"3").unwrap();
        writer.finish().unwrap();

        let reader = DirReader::open(options, "dir").unwrap();
        assert_eq!(reader.read(b"banana").unwrap(), b"2");
        assert_eq!(reader.read(b"date").unwrap(), b"");
    }

    #[test]
    fn test_partitioned_layout_creates_one_index_log_each() {
        let env = MemEnv::new();
        let mut options = mem_options(&env);
        options.lg_parts = 2;
        let writer = DirWriter::open(options.clone(), "dir").unwrap();
        for i in 0..200u32 {
            writer
                .append(format!("key{i:05}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        writer.finish().unwrap();

        assert!(env.file(Path::new("dir/data.log")).is_some());
        for part in 0..4 {
            let name = format!("dir/{}", index_log_name(part));
            assert!(env.file(Path::new(&name)).is_some(), "{name} missing");
        }

        let reader = DirReader::open(options, "dir").unwrap();
        for i in 0..200u32 {
            assert_eq!(
                reader.read(format!("key{i:05}").as_bytes()).unwrap(),
                format!("v{i}").as_bytes(),
                "key{i:05}"
            );
        }
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let env = MemEnv::new();
        let writer = DirWriter::open(mem_options(&env), "dir").unwrap();
        assert!(matches!(
            writer.append(b"", b"value"),
            Err(Error::AssertionFailed(_))
        ));
    }

    #[test]
    fn test_epoch_flush_broadcasts_to_partitions() {
        let env = MemEnv::new();
        let mut options = mem_options(&env);
        options.lg_parts = 1;
        let writer = DirWriter::open(options.clone(), "dir").unwrap();

        for i in 0..50u32 {
            writer
                .append(format!("first{i:03}").as_bytes(), b"a")
                .unwrap();
        }
        writer.epoch_flush().unwrap();
        for i in 0..50u32 {
            writer
                .append(format!("second{i:03}").as_bytes(), b"b")
                .unwrap();
        }
        writer.finish().unwrap();

        let reader = DirReader::open(options, "dir").unwrap();
        assert_eq!(reader.num_epochs(), 2);
        assert_eq!(reader.read(b"first007").unwrap(), b"a");
        assert_eq!(reader.read(b"second042").unwrap(), b"b");
    }

    #[test]
    fn test_concurrent_producers() {
        use crate::pool::ThreadPool;

        let env = MemEnv::new();
        let mut options = mem_options(&env);
        options.lg_parts = 1;
        options.compaction_pool = Some(Arc::new(ThreadPool::new(2)));
        let writer = Arc::new(DirWriter::open(options.clone(), "dir").unwrap());

        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                for i in 0..250u32 {
                    let key = format!("p{producer}-key{i:05}");
                    writer.append(key.as_bytes(), key.as_bytes()).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        writer.finish().unwrap();
        assert!(writer.compaction_stats().num_compactions >= 2);

        let reader = DirReader::open(options, "dir").unwrap();
        for producer in 0..4u32 {
            for i in (0..250u32).step_by(31) {
                let key = format!("p{producer}-key{i:05}");
                assert_eq!(reader.read(key.as_bytes()).unwrap(), key.as_bytes());
            }
        }
    }

    #[test]
    fn test_slowdown_sleeps_before_reporting_buffer_full() {
        let env = MemEnv::new();
        let options = DirOptions {
            block_size: 256,
            block_buffer: 512,
            block_padding: false,
            memtable_buffer: 1536,
            key_size: 16,
            value_size: 16,
            bf_bits_per_key: 0,
            non_blocking: true,
            slowdown_micros: 20_000,
            compaction_pool: Some(Arc::new(crate::pool::ThreadPool::new(1))),
            env: Arc::new(env.clone()),
            ..Default::default()
        };

        // Park the worker so buffers stay occupied.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        options
            .compaction_pool
            .as_ref()
            .unwrap()
            .execute(move || {
                let _ = gate_rx.recv();
            });

        let writer = DirWriter::open(options.clone(), "dir").unwrap();
        let part = &writer.partitions()[0];
        let threshold = (part.buffer_bytes() as f64 * 0.97).ceil() as usize;

        // Fill both buffers through the facade.
        let mut fill = |salt: u32| {
            let mut written = 0;
            let mut i = 0u32;
            while written < threshold {
                let key = format!("k{salt}-{i:010}");
                part.add(key.as_bytes(), b"0123456789abcdef").unwrap();
                written += 2 + key.len() + 16;
                i += 1;
            }
        };
        fill(0);
        part.flush(crate::options::FlushOptions {
            no_wait: true,
            ..Default::default()
        })
        .unwrap();
        fill(1);

        let started = Instant::now();
        let err = writer.append(b"blocked-key-0000", b"0123456789abcdef");
        assert!(matches!(err, Err(Error::BufferFull)));
        assert!(started.elapsed().as_micros() >= 20_000);

        gate_tx.send(()).unwrap();
    }
}
