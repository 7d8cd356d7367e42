//! Backend contract for the virtual filesystem.
//!
//! A backend exposes a POSIX-shaped, path-addressed operation set. Every
//! operation is asynchronous and reports failures through the errno
//! taxonomy in [`crate::errno`]. The in-memory reference implementation
//! lives in [`memory`].

pub mod handle;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errno::FsResult;

pub use handle::{FileHandle, OpenFlags};
pub use memory::MemoryBackend;

/// Maximum symlink chain length before resolution fails with `ELOOP`.
pub const MAX_SYMLINK_DEPTH: usize = 40;

/// Namespace node kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// The `S_IFMT` bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::File => crate::consts::S_IFREG,
            FileKind::Directory => crate::consts::S_IFDIR,
            FileKind::Symlink => crate::consts::S_IFLNK,
            FileKind::BlockDevice => crate::consts::S_IFBLK,
            FileKind::CharDevice => crate::consts::S_IFCHR,
            FileKind::Fifo => crate::consts::S_IFIFO,
            FileKind::Socket => crate::consts::S_IFSOCK,
        }
    }
}

/// Stat record for a namespace node. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub kind: FileKind,
    /// 12-bit permission + special bits (no type bits).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
}

impl Stats {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Full mode word including the `S_IFMT` type bits.
    pub fn full_mode(&self) -> u32 {
        self.kind.type_bits() | self.mode
    }
}

/// Directory entry with a cheap type classification (no stat call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub name: String,
    pub kind: FileKind,
}

/// Storage tier of a node or page. The warm tier is the local durable
/// store; cold lives only in the remote object store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Warm,
    Cold,
}

/// Creation strategy for [`Backend::write_file`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WriteFlag {
    /// Create or replace.
    #[default]
    Write,
    /// Create; fail `EEXIST` when the path already exists.
    WriteExclusive,
    /// Append, creating the file when absent.
    Append,
}

/// Options accepted by [`Backend::write_file`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub flag: WriteFlag,
    pub tier: Option<Tier>,
}

/// Outcome of a [`Backend::write_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes_written: usize,
    pub tier: Tier,
}

/// Options accepted by [`Backend::mkdir`].
#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
    pub recursive: bool,
    pub mode: Option<u32>,
}

/// Options accepted by [`Backend::rmdir`].
#[derive(Debug, Clone, Default)]
pub struct RmdirOptions {
    pub recursive: bool,
}

/// The pluggable backend contract.
///
/// Implementations must honour POSIX errnos: absent parent `ENOENT`,
/// wrong kind `EISDIR`/`ENOTDIR`, existing-exclusive `EEXIST`,
/// non-empty removal `ENOTEMPTY`, bad handle `EBADF`, symlink loops
/// `ELOOP`, cross-device rename `EXDEV`, read-only mount `EROFS`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a whole file. `ENOENT` when absent, `EISDIR` on a directory.
    async fn read_file(&self, path: &str) -> FsResult<Bytes>;

    /// Create or replace a file according to the write flag.
    async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> FsResult<WriteOutcome>;

    /// Append to a file, creating it when absent. The parent must exist.
    async fn append_file(&self, path: &str, data: &[u8]) -> FsResult<()>;

    /// Remove a file or symlink. `EISDIR` on a directory.
    async fn unlink(&self, path: &str) -> FsResult<()>;

    /// Atomically move a node, rewriting descendant paths for directories.
    async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()>;

    /// Copy a file's bytes and mode. `COPYFILE_EXCL` forbids overwrite.
    async fn copy_file(&self, src: &str, dest: &str, flags: u32) -> FsResult<()>;

    /// Create a directory. Non-recursive creation of an existing path
    /// is `EEXIST`; recursive creation of an existing directory succeeds.
    async fn mkdir(&self, path: &str, options: MkdirOptions) -> FsResult<()>;

    /// Remove a directory. Non-recursive removal of a non-empty
    /// directory is `ENOTEMPTY`.
    async fn rmdir(&self, path: &str, options: RmdirOptions) -> FsResult<()>;

    /// Child names of a directory, stable within a single call.
    async fn readdir(&self, path: &str) -> FsResult<Vec<String>>;

    /// Child entries with cheap type classification.
    async fn readdir_types(&self, path: &str) -> FsResult<Vec<Dirent>>;

    /// Stat, dereferencing a terminal symlink.
    async fn stat(&self, path: &str) -> FsResult<Stats>;

    /// Stat without dereferencing a terminal symlink.
    async fn lstat(&self, path: &str) -> FsResult<Stats>;

    /// Existence probe; never fails.
    async fn exists(&self, path: &str) -> bool;

    /// Permission probe against the `F_OK`/`R_OK`/`W_OK`/`X_OK` mask.
    async fn access(&self, path: &str, mode: u32) -> FsResult<()>;

    /// Update permission bits; advances `ctime`.
    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()>;

    /// Update ownership; advances `ctime`.
    async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()>;

    /// Set access and modification times; advances `ctime`.
    async fn utimes(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()>;

    /// Create a symbolic link at `path` pointing at `target`.
    async fn symlink(&self, target: &str, path: &str) -> FsResult<()>;

    /// Create a hard link to an existing file.
    async fn link(&self, existing: &str, new_path: &str) -> FsResult<()>;

    /// Read a symlink's target without resolving it.
    async fn readlink(&self, path: &str) -> FsResult<String>;

    /// Resolve every symlink in the path, bounded by
    /// [`MAX_SYMLINK_DEPTH`]; `ELOOP` past the bound.
    async fn realpath(&self, path: &str) -> FsResult<String>;

    /// Create a uniquely named directory from the prefix, mode `0o700`.
    async fn mkdtemp(&self, prefix: &str) -> FsResult<String>;

    /// Open a file handle enforcing `O_EXCL`, `O_TRUNC`, `O_DIRECTORY`
    /// and `O_NOFOLLOW`.
    async fn open(&self, path: &str, flags: u32, mode: u32) -> FsResult<Box<dyn FileHandle>>;

    /// True when the backend distinguishes storage tiers.
    fn supports_tiering(&self) -> bool {
        false
    }

    /// Tier of a node; single-tier backends report warm.
    async fn get_tier(&self, _path: &str) -> FsResult<Tier> {
        Ok(Tier::Warm)
    }

    /// Move a node toward the warm tier; no-op on single-tier backends.
    async fn promote(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    /// Move a node toward the cold tier; no-op on single-tier backends.
    async fn demote(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }
}
