use std::sync::Arc;

use tierfs::vfs::{Backend, MemoryBackend, MkdirOptions, WriteOptions};

/// Route crate logs through the env-filtered subscriber; repeated
/// calls are fine, only the first registration wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a backend with a small populated namespace.
///
/// ```text
/// /home/user/readme.txt   "hello from tierfs"
/// /home/user/data.bin     [0..=63]
/// /home/user/notes/a.md   "# a"
/// /home/user/notes/b.md   "# b"
/// /etc/config.toml        "key = \"value\""
/// /tmp                    (empty directory)
/// ```
pub async fn sample_fs() -> Arc<MemoryBackend> {
    init_tracing();
    let fs = Arc::new(MemoryBackend::new());
    for dir in ["/home", "/home/user", "/home/user/notes", "/etc", "/tmp"] {
        fs.mkdir(dir, MkdirOptions::default()).await.expect("mkdir fixture dir");
    }
    fs.write_file("/home/user/readme.txt", b"hello from tierfs", WriteOptions::default())
        .await
        .expect("write readme");
    let data: Vec<u8> = (0u8..=63).collect();
    fs.write_file("/home/user/data.bin", &data, WriteOptions::default())
        .await
        .expect("write data.bin");
    fs.write_file("/home/user/notes/a.md", b"# a", WriteOptions::default())
        .await
        .expect("write a.md");
    fs.write_file("/home/user/notes/b.md", b"# b", WriteOptions::default())
        .await
        .expect("write b.md");
    fs.write_file("/etc/config.toml", b"key = \"value\"", WriteOptions::default())
        .await
        .expect("write config");
    fs
}
