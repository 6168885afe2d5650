#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::io::{Env, FsEnv, MemEnv};

    #[test]
    fn test_mem_env_write_then_read() {
        let env = MemEnv::new();
        let path = Path::new("dir/file.log");

        let mut file = env.new_writable_file(path).unwrap();
        file.append(b"hello ").unwrap();
        file.append(b"world").unwrap();
        file.sync().unwrap();

        assert!(env.file_exists(path));
        assert_eq!(env.file_size(path).unwrap(), 11);

        let reader = env.new_random_access_file(path).unwrap();
        assert_eq!(reader.read(0, 11).unwrap(), b"hello world");
        assert_eq!(reader.read(6, 5).unwrap(), b"world");
        // Reads past the end come back short, not as errors.
        assert_eq!(reader.read(6, 100).unwrap(), b"world");
        assert_eq!(reader.read(100, 5).unwrap(), b"");
    }

    #[test]
    fn test_mem_env_missing_file() {
        let env = MemEnv::new();
        assert!(!env.file_exists(Path::new("nope")));
        assert!(env.new_random_access_file(Path::new("nope")).is_err());
        assert!(env.file_size(Path::new("nope")).is_err());
    }

    #[test]
    fn test_mem_env_is_shared() {
        let env = MemEnv::new();
        let clone = env.clone();
        let path = Path::new("shared.log");
        let mut file = env.new_writable_file(path).unwrap();
        file.append(b"data").unwrap();
        assert_eq!(clone.file_size(path).unwrap(), 4);
    }

    #[test]
    fn test_fs_env_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let env: Arc<dyn Env> = Arc::new(FsEnv);
        let path = tmp.path().join("file.log");

        let mut file = env.new_writable_file(&path).unwrap();
        file.append(b"0123456789").unwrap();
        file.flush().unwrap();
        file.sync().unwrap();
        drop(file);

        assert!(env.file_exists(&path));
        assert_eq!(env.file_size(&path).unwrap(), 10);

        let reader = env.new_random_access_file(&path).unwrap();
        assert_eq!(reader.read(3, 4).unwrap(), b"3456");
        assert_eq!(reader.read(8, 10).unwrap(), b"89");
    }

    #[test]
    fn test_fs_env_empty_file_reads() {
        let tmp = TempDir::new().unwrap();
        let env = FsEnv;
        let path = tmp.path().join("empty.log");
        let file = env.new_writable_file(&path).unwrap();
        drop(file);

        let reader = env.new_random_access_file(&path).unwrap();
        assert_eq!(reader.read(0, 10).unwrap(), b"");
    }

    #[test]
    fn test_clock_is_monotonic_enough() {
        let env = FsEnv;
        let a = env.now_micros();
        env.sleep_micros(1_000);
        let b = env.now_micros();
        assert!(b > a);
    }
}
