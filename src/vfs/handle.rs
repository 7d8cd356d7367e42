//! Open file handles: flags, position semantics, and the handle trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::consts;
use crate::errno::FsResult;

use super::Stats;

/// Decoded open flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Read access: `O_RDONLY` or `O_RDWR`.
    pub fn readable(self) -> bool {
        self.0 & consts::O_WRONLY == 0
    }

    /// Write access: `O_WRONLY` or `O_RDWR`.
    pub fn writable(self) -> bool {
        self.0 & (consts::O_WRONLY | consts::O_RDWR) != 0
    }

    pub fn append(self) -> bool {
        self.0 & consts::O_APPEND != 0
    }

    pub fn create(self) -> bool {
        self.0 & consts::O_CREAT != 0
    }

    pub fn exclusive(self) -> bool {
        self.0 & consts::O_EXCL != 0
    }

    pub fn truncate(self) -> bool {
        self.0 & consts::O_TRUNC != 0
    }

    pub fn sync(self) -> bool {
        self.0 & consts::O_SYNC != 0
    }

    pub fn directory(self) -> bool {
        self.0 & consts::O_DIRECTORY != 0
    }

    pub fn nofollow(self) -> bool {
        self.0 & consts::O_NOFOLLOW != 0
    }
}

/// An open file handle.
///
/// A handle is owned by its opener; `close` invalidates it and any
/// further operation fails `EBADF`. A positioned read or write leaves
/// the current position untouched; an unpositioned one advances it by
/// the transferred byte count. A handle opened with `O_APPEND` writes
/// at the current end of file regardless of position.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Path the handle was opened at.
    fn path(&self) -> &str;

    /// Flags the handle was opened with.
    fn flags(&self) -> OpenFlags;

    /// Monotone epoch assigned at open time.
    fn epoch(&self) -> u64;

    /// Read up to `len` bytes at `position` (or the current position).
    async fn read(&self, len: usize, position: Option<u64>) -> FsResult<Bytes>;

    /// Write bytes at `position` (or the current position / EOF in
    /// append mode); returns the byte count written.
    async fn write(&self, data: &[u8], position: Option<u64>) -> FsResult<usize>;

    /// Read the whole file from byte zero, ignoring the position.
    async fn read_all(&self) -> FsResult<Bytes>;

    /// Replace the file's contents entirely.
    async fn write_all(&self, data: &[u8]) -> FsResult<usize>;

    /// Stat the underlying file.
    async fn stat(&self) -> FsResult<Stats>;

    /// Update permission bits; advances `ctime`.
    async fn chmod(&self, mode: u32) -> FsResult<()>;

    /// Update ownership; advances `ctime`.
    async fn chown(&self, uid: u32, gid: u32) -> FsResult<()>;

    /// Shrink or zero-extend to `len` bytes.
    ///
    /// Negative lengths fail `EINVAL`; a read-only handle fails
    /// `EBADF`; `mtime` advances; a position past the new size is
    /// clamped to it.
    async fn truncate(&self, len: i64) -> FsResult<()>;

    /// Flush data and metadata. A no-op for volatile backends.
    async fn sync(&self) -> FsResult<()>;

    /// Flush data only.
    async fn datasync(&self) -> FsResult<()>;

    /// Invalidate the handle. A second close fails `EBADF`.
    async fn close(&self) -> FsResult<()>;
}

impl std::fmt::Debug for dyn FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path())
            .field("flags", &self.flags())
            .field("epoch", &self.epoch())
            .finish()
    }
}
