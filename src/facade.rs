//! Filesystem façade: the POSIX-shaped surface over a backend.
//!
//! The façade applies the frozen configuration (mount root, read-only
//! mode, default encoding), handles text encodings on string I/O, and
//! exposes the glob/grep/find drivers rooted at the mount.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::config::{Encoding, FsConfig};
use crate::errno::{ErrnoKind, FsError, FsResult};
use crate::find::{self, FindError, FindOptions};
use crate::fspath;
use crate::glob::{self, GlobError, GlobOptions};
use crate::grep::{self, GrepError, GrepMatch, GrepOptions};
use crate::vfs::{
    Backend, Dirent, FileHandle, MkdirOptions, RmdirOptions, Stats, Tier, WriteOptions,
    WriteOutcome,
};
use crate::walk::TraversalEntry;

/// Decode stored bytes into a string per the encoding.
pub fn decode_bytes(encoding: Encoding, data: &[u8]) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
        Encoding::Ascii => data.iter().map(|&b| (b & 0x7f) as char).collect(),
        Encoding::Base64 => BASE64.encode(data),
        Encoding::Hex => hex::encode(data),
        Encoding::Latin1 => data.iter().map(|&b| b as char).collect(),
    }
}

/// Encode a string into bytes per the encoding; `EINVAL` on malformed
/// base64 or hex input.
pub fn encode_text(encoding: Encoding, text: &str) -> FsResult<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Ascii => Ok(text.chars().map(|c| (c as u32 & 0x7f) as u8).collect()),
        Encoding::Base64 => BASE64
            .decode(text.trim())
            .map_err(|_| FsError::new(ErrnoKind::Einval).syscall("write").path(text.to_string())),
        Encoding::Hex => hex::decode(text)
            .map_err(|_| FsError::new(ErrnoKind::Einval).syscall("write").path(text.to_string())),
        Encoding::Latin1 => Ok(text.chars().map(|c| (c as u32 & 0xff) as u8).collect()),
    }
}

/// The filesystem façade.
pub struct FileSystem {
    backend: Arc<dyn Backend>,
    config: FsConfig,
}

impl FileSystem {
    pub fn new(backend: Arc<dyn Backend>, config: FsConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Resolve a caller path under the mount root.
    fn abs(&self, path: &str) -> String {
        let normalized = fspath::normalize(path);
        if self.config.root_path() == "/" {
            normalized
        } else {
            format!("{}{}", self.config.root_path(), if normalized == "/" { "" } else { &normalized })
        }
    }

    fn writable(&self, syscall: &'static str, path: &str) -> FsResult<()> {
        if self.config.read_only() {
            Err(FsError::new(ErrnoKind::Erofs).syscall(syscall).path(path))
        } else {
            Ok(())
        }
    }

    pub async fn read_file(&self, path: &str) -> FsResult<Bytes> {
        self.backend.read_file(&self.abs(path)).await
    }

    /// Read a file and decode it with the given (or configured)
    /// encoding.
    pub async fn read_to_string(
        &self,
        path: &str,
        encoding: Option<Encoding>,
    ) -> FsResult<String> {
        let data = self.read_file(path).await?;
        Ok(decode_bytes(encoding.unwrap_or(self.config.encoding()), &data))
    }

    pub async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> FsResult<WriteOutcome> {
        self.writable("open", path)?;
        self.backend.write_file(&self.abs(path), data, options).await
    }

    /// Encode a string with the given (or configured) encoding and
    /// write it.
    pub async fn write_string(
        &self,
        path: &str,
        text: &str,
        encoding: Option<Encoding>,
    ) -> FsResult<WriteOutcome> {
        let data = encode_text(encoding.unwrap_or(self.config.encoding()), text)?;
        self.write_file(path, &data, WriteOptions::default()).await
    }

    pub async fn append_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        self.writable("open", path)?;
        self.backend.append_file(&self.abs(path), data).await
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        self.writable("unlink", path)?;
        self.backend.unlink(&self.abs(path)).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        self.writable("rename", old_path)?;
        self.backend.rename(&self.abs(old_path), &self.abs(new_path)).await
    }

    pub async fn copy_file(&self, src: &str, dest: &str, flags: u32) -> FsResult<()> {
        self.writable("copyfile", dest)?;
        self.backend.copy_file(&self.abs(src), &self.abs(dest), flags).await
    }

    pub async fn mkdir(&self, path: &str, options: MkdirOptions) -> FsResult<()> {
        self.writable("mkdir", path)?;
        let options = MkdirOptions {
            recursive: options.recursive || self.config.recursive(),
            ..options
        };
        self.backend.mkdir(&self.abs(path), options).await
    }

    pub async fn rmdir(&self, path: &str, options: RmdirOptions) -> FsResult<()> {
        self.writable("rmdir", path)?;
        self.backend.rmdir(&self.abs(path), options).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.backend.readdir(&self.abs(path)).await
    }

    pub async fn readdir_types(&self, path: &str) -> FsResult<Vec<Dirent>> {
        self.backend.readdir_types(&self.abs(path)).await
    }

    pub async fn stat(&self, path: &str) -> FsResult<Stats> {
        self.backend.stat(&self.abs(path)).await
    }

    pub async fn lstat(&self, path: &str) -> FsResult<Stats> {
        self.backend.lstat(&self.abs(path)).await
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.backend.exists(&self.abs(path)).await
    }

    pub async fn access(&self, path: &str, mode: u32) -> FsResult<()> {
        self.backend.access(&self.abs(path), mode).await
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.writable("chmod", path)?;
        self.backend.chmod(&self.abs(path), mode).await
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.writable("chown", path)?;
        self.backend.chown(&self.abs(path), uid, gid).await
    }

    pub async fn utimes(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()> {
        self.writable("utime", path)?;
        self.backend.utimes(&self.abs(path), atime_ms, mtime_ms).await
    }

    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.writable("symlink", path)?;
        self.backend.symlink(target, &self.abs(path)).await
    }

    pub async fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        self.writable("link", new_path)?;
        self.backend.link(&self.abs(existing), &self.abs(new_path)).await
    }

    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        self.backend.readlink(&self.abs(path)).await
    }

    pub async fn realpath(&self, path: &str) -> FsResult<String> {
        self.backend.realpath(&self.abs(path)).await
    }

    pub async fn mkdtemp(&self, prefix: &str) -> FsResult<String> {
        self.writable("mkdtemp", prefix)?;
        self.backend.mkdtemp(&self.abs(prefix)).await
    }

    pub async fn open(&self, path: &str, flags: u32, mode: u32) -> FsResult<Box<dyn FileHandle>> {
        let decoded = crate::vfs::OpenFlags::from_bits(flags);
        if decoded.writable() || decoded.create() || decoded.truncate() {
            self.writable("open", path)?;
        }
        self.backend.open(&self.abs(path), flags, mode).await
    }

    /// True when the backend distinguishes storage tiers.
    pub fn supports_tiering(&self) -> bool {
        self.backend.supports_tiering()
    }

    pub async fn get_tier(&self, path: &str) -> FsResult<Tier> {
        self.backend.get_tier(&self.abs(path)).await
    }

    pub async fn promote(&self, path: &str) -> FsResult<()> {
        self.backend.promote(&self.abs(path)).await
    }

    pub async fn demote(&self, path: &str) -> FsResult<()> {
        self.backend.demote(&self.abs(path)).await
    }

    /// Glob under the mount; `options.cwd` is taken relative to it.
    pub async fn glob(&self, options: GlobOptions) -> Result<Vec<String>, GlobError> {
        let options = GlobOptions { cwd: self.abs(&options.cwd), ..options };
        glob::glob(self.backend.as_ref(), options).await
    }

    /// Grep under the mount; `options.path` is taken relative to it.
    pub async fn grep(&self, options: GrepOptions) -> Result<Vec<GrepMatch>, GrepError> {
        let options = GrepOptions { path: self.abs(&options.path), ..options };
        grep::grep(self.backend.as_ref(), options).await
    }

    /// Find under the mount; `options.path` is taken relative to it.
    pub async fn find(&self, options: FindOptions) -> Result<Vec<TraversalEntry>, FindError> {
        let options = FindOptions { path: self.abs(&options.path), ..options };
        find::find(self.backend.as_ref(), options).await
    }
}
