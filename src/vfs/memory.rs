//! In-memory reference implementation of the backend contract.
//!
//! The namespace is a flat map keyed by normalized absolute path. File
//! bodies live behind `Arc`s so open handles keep working across
//! rename and unlink. Directory enumeration is derived by prefix scans
//! over the ordered map, which makes `readdir` output sorted and stable.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::consts;
use crate::errno::{ErrnoKind, FsError, FsResult};
use crate::fspath;

use super::handle::{FileHandle, OpenFlags};
use super::{
    Backend, Dirent, FileKind, MkdirOptions, RmdirOptions, Stats, Tier, WriteFlag, WriteOptions,
    WriteOutcome, MAX_SYMLINK_DEPTH,
};

/// Monotone open-epoch source shared by every backend instance.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn fresh_stats(kind: FileKind, mode: u32) -> Stats {
    let now = now_ms();
    Stats {
        kind,
        mode: mode & 0o7777,
        uid: 0,
        gid: 0,
        nlink: 1,
        size: 0,
        atime_ms: now,
        mtime_ms: now,
        ctime_ms: now,
        birthtime_ms: now,
    }
}

#[derive(Debug)]
struct FileInner {
    data: Vec<u8>,
    stats: Stats,
    tier: Tier,
    open_handles: u32,
}

#[derive(Debug)]
struct FileNode {
    inner: RwLock<FileInner>,
}

impl FileNode {
    fn new(mode: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(FileInner {
                data: Vec::new(),
                stats: fresh_stats(FileKind::File, mode),
                tier: Tier::Warm,
                open_handles: 0,
            }),
        })
    }
}

#[derive(Debug)]
enum Entry {
    File(Arc<FileNode>),
    Directory(Stats),
    Symlink { stats: Stats, target: String },
}

type Namespace = BTreeMap<String, Entry>;

/// In-memory backend over a flat normalized-path namespace.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: RwLock<Namespace>,
    read_only: bool,
    temp_counter: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A writable backend containing only the root directory.
    pub fn new() -> Self {
        Self::with_read_only(false)
    }

    /// A backend that fails every mutation with `EROFS`.
    pub fn new_read_only() -> Self {
        Self::with_read_only(true)
    }

    fn with_read_only(read_only: bool) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Entry::Directory(fresh_stats(FileKind::Directory, 0o755)));
        Self { nodes: RwLock::new(nodes), read_only, temp_counter: AtomicU64::new(0) }
    }

    fn ensure_writable(&self, syscall: &'static str, path: &str) -> FsResult<()> {
        if self.read_only {
            Err(FsError::new(ErrnoKind::Erofs).syscall(syscall).path(path))
        } else {
            Ok(())
        }
    }

    fn temp_suffix(&self) -> String {
        let salt = now_ms() as u64;
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut value = salt.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ n.wrapping_mul(0x517c_c1b7_2722_0a95);
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut out = String::with_capacity(6);
        for _ in 0..6 {
            out.push(ALPHABET[(value % 36) as usize] as char);
            value /= 36;
        }
        out
    }
}

/// Resolve symlinks along `path`, bounded by [`MAX_SYMLINK_DEPTH`].
///
/// Non-terminal segments must exist and be directories (after symlink
/// expansion). A missing terminal segment is not an error; callers see
/// the fully resolved candidate path and decide.
fn resolve(
    nodes: &Namespace,
    path: &str,
    follow_terminal: bool,
    syscall: &'static str,
) -> FsResult<String> {
    let normalized = fspath::normalize(path);
    let mut pending: VecDeque<String> = fspath::segments(&normalized).map(String::from).collect();
    let mut resolved = String::from("/");
    let mut depth = 0usize;

    while let Some(segment) = pending.pop_front() {
        let candidate = fspath::join(&resolved, &segment);
        match nodes.get(&candidate) {
            Some(Entry::Symlink { target, .. }) => {
                let terminal = pending.is_empty();
                if terminal && !follow_terminal {
                    resolved = candidate;
                    continue;
                }
                depth += 1;
                if depth > MAX_SYMLINK_DEPTH {
                    return Err(FsError::new(ErrnoKind::Eloop).syscall(syscall).path(path));
                }
                let expanded = if target.starts_with('/') {
                    fspath::normalize(target)
                } else {
                    fspath::join(&resolved, target)
                };
                let mut spliced: VecDeque<String> =
                    fspath::segments(&expanded).map(String::from).collect();
                spliced.extend(pending.drain(..));
                pending = spliced;
                resolved = String::from("/");
            }
            Some(Entry::File(_)) => {
                if !pending.is_empty() {
                    return Err(FsError::enotdir(syscall, path));
                }
                resolved = candidate;
            }
            Some(Entry::Directory(_)) => {
                resolved = candidate;
            }
            None => {
                if !pending.is_empty() {
                    return Err(FsError::enoent(syscall, path));
                }
                resolved = candidate;
            }
        }
    }
    Ok(resolved)
}

/// Resolve `path` and require its parent to be an existing directory.
fn resolve_with_parent(
    nodes: &Namespace,
    path: &str,
    follow_terminal: bool,
    syscall: &'static str,
) -> FsResult<String> {
    let resolved = resolve(nodes, path, follow_terminal, syscall)?;
    let parent = fspath::dirname(&resolved);
    match nodes.get(&parent) {
        Some(Entry::Directory(_)) => Ok(resolved),
        Some(_) => Err(FsError::enotdir(syscall, path)),
        None => Err(FsError::enoent(syscall, path)),
    }
}

fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    }
}

/// Direct child paths of `dir`, in sorted order.
fn children_of(nodes: &Namespace, dir: &str) -> Vec<String> {
    let prefix = child_prefix(dir);
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter(|(key, _)| !key[prefix.len()..].contains('/'))
        .map(|(key, _)| key.clone())
        .collect()
}

/// All descendant paths of `dir` (excluding `dir` itself), sorted.
fn descendants_of(nodes: &Namespace, dir: &str) -> Vec<String> {
    let prefix = child_prefix(dir);
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(key, _)| key.clone())
        .collect()
}

fn touch_dir(nodes: &mut Namespace, dir: &str) {
    if let Some(Entry::Directory(stats)) = nodes.get_mut(dir) {
        let now = now_ms();
        stats.mtime_ms = now;
        stats.ctime_ms = now;
    }
}

async fn stats_of(nodes: &Namespace, path: &str) -> Option<Stats> {
    match nodes.get(path)? {
        Entry::File(node) => {
            let inner = node.inner.read().await;
            let mut stats = inner.stats.clone();
            stats.size = inner.data.len() as u64;
            Some(stats)
        }
        Entry::Directory(stats) => Some(stats.clone()),
        Entry::Symlink { stats, .. } => Some(stats.clone()),
    }
}

fn dirent_kind(entry: &Entry) -> FileKind {
    match entry {
        Entry::File(_) => FileKind::File,
        Entry::Directory(_) => FileKind::Directory,
        Entry::Symlink { .. } => FileKind::Symlink,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read_file(&self, path: &str) -> FsResult<Bytes> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "open")?;
        match nodes.get(&resolved) {
            Some(Entry::File(node)) => {
                let inner = node.inner.read().await;
                Ok(Bytes::copy_from_slice(&inner.data))
            }
            Some(Entry::Directory(_)) => Err(FsError::eisdir("read", path)),
            Some(Entry::Symlink { .. }) => Err(FsError::enoent("open", path)),
            None => Err(FsError::enoent("open", path)),
        }
    }

    async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> FsResult<WriteOutcome> {
        self.ensure_writable("open", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve_with_parent(&nodes, path, true, "open")?;
        let tier = options.tier.unwrap_or(Tier::Warm);

        match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => return Err(FsError::eisdir("open", path)),
            Some(Entry::File(node)) => {
                if options.flag == WriteFlag::WriteExclusive {
                    return Err(FsError::eexist("open", path));
                }
                let node = node.clone();
                drop(nodes);
                let mut inner = node.inner.write().await;
                if options.flag == WriteFlag::Append {
                    inner.data.extend_from_slice(data);
                } else {
                    inner.data = data.to_vec();
                }
                let now = now_ms();
                inner.stats.size = inner.data.len() as u64;
                inner.stats.mtime_ms = now;
                inner.stats.ctime_ms = now;
                inner.tier = tier;
                return Ok(WriteOutcome { bytes_written: data.len(), tier });
            }
            Some(Entry::Symlink { .. }) | None => {}
        }

        debug!(path = resolved.as_str(), bytes = data.len(), "write_file create");
        let node = FileNode::new(options.mode.unwrap_or(0o644));
        {
            let mut inner = node.inner.write().await;
            inner.data = data.to_vec();
            inner.stats.size = data.len() as u64;
            inner.tier = tier;
        }
        let parent = fspath::dirname(&resolved);
        nodes.insert(resolved, Entry::File(node));
        touch_dir(&mut nodes, &parent);
        Ok(WriteOutcome { bytes_written: data.len(), tier })
    }

    async fn append_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        self.ensure_writable("open", path)?;
        let options = WriteOptions { flag: WriteFlag::Append, ..Default::default() };
        self.write_file(path, data, options).await.map(|_| ())
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        self.ensure_writable("unlink", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve(&nodes, path, false, "unlink")?;
        match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => Err(FsError::eisdir("unlink", path)),
            Some(Entry::File(node)) => {
                let node = node.clone();
                nodes.remove(&resolved);
                let parent = fspath::dirname(&resolved);
                touch_dir(&mut nodes, &parent);
                drop(nodes);
                let mut inner = node.inner.write().await;
                inner.stats.nlink = inner.stats.nlink.saturating_sub(1);
                inner.stats.ctime_ms = now_ms();
                Ok(())
            }
            Some(Entry::Symlink { .. }) => {
                nodes.remove(&resolved);
                let parent = fspath::dirname(&resolved);
                touch_dir(&mut nodes, &parent);
                Ok(())
            }
            None => Err(FsError::enoent("unlink", path)),
        }
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        self.ensure_writable("rename", old_path)?;
        let mut nodes = self.nodes.write().await;
        let old = resolve(&nodes, old_path, false, "rename")?;
        let new = resolve_with_parent(&nodes, new_path, false, "rename").map_err(|err| {
            FsError::new(err.kind()).syscall("rename").path(old_path).dest(new_path)
        })?;
        if old == new {
            return Ok(());
        }
        let source_is_dir = match nodes.get(&old) {
            Some(Entry::Directory(_)) => true,
            Some(_) => false,
            None => {
                return Err(FsError::new(ErrnoKind::Enoent)
                    .syscall("rename")
                    .path(old_path)
                    .dest(new_path))
            }
        };
        if source_is_dir && fspath::contains(&old, &new) {
            return Err(FsError::new(ErrnoKind::Einval)
                .syscall("rename")
                .path(old_path)
                .dest(new_path));
        }
        match nodes.get(&new) {
            Some(Entry::Directory(_)) => {
                if !source_is_dir {
                    return Err(FsError::new(ErrnoKind::Eisdir)
                        .syscall("rename")
                        .path(old_path)
                        .dest(new_path));
                }
                if !children_of(&nodes, &new).is_empty() {
                    return Err(FsError::new(ErrnoKind::Enotempty)
                        .syscall("rename")
                        .path(old_path)
                        .dest(new_path));
                }
                nodes.remove(&new);
            }
            Some(_) => {
                if source_is_dir {
                    return Err(FsError::new(ErrnoKind::Enotdir)
                        .syscall("rename")
                        .path(old_path)
                        .dest(new_path));
                }
                nodes.remove(&new);
            }
            None => {}
        }

        debug!(from = old.as_str(), to = new.as_str(), "rename");
        if source_is_dir {
            for descendant in descendants_of(&nodes, &old) {
                let suffix = descendant[old.len()..].to_string();
                if let Some(entry) = nodes.remove(&descendant) {
                    nodes.insert(format!("{new}{suffix}"), entry);
                }
            }
        }
        if let Some(entry) = nodes.remove(&old) {
            nodes.insert(new.clone(), entry);
        }
        let old_parent = fspath::dirname(&old);
        let new_parent = fspath::dirname(&new);
        touch_dir(&mut nodes, &old_parent);
        touch_dir(&mut nodes, &new_parent);
        Ok(())
    }

    async fn copy_file(&self, src: &str, dest: &str, flags: u32) -> FsResult<()> {
        self.ensure_writable("copyfile", dest)?;
        let (data, mode) = {
            let nodes = self.nodes.read().await;
            let resolved = resolve(&nodes, src, true, "copyfile")?;
            match nodes.get(&resolved) {
                Some(Entry::File(node)) => {
                    let inner = node.inner.read().await;
                    (inner.data.clone(), inner.stats.mode)
                }
                Some(Entry::Directory(_)) => {
                    return Err(FsError::new(ErrnoKind::Eisdir)
                        .syscall("copyfile")
                        .path(src)
                        .dest(dest))
                }
                _ => {
                    return Err(FsError::new(ErrnoKind::Enoent)
                        .syscall("copyfile")
                        .path(src)
                        .dest(dest))
                }
            }
        };
        if flags & consts::COPYFILE_EXCL != 0 && self.exists(dest).await {
            return Err(FsError::new(ErrnoKind::Eexist).syscall("copyfile").path(src).dest(dest));
        }
        let options = WriteOptions { mode: Some(mode), ..Default::default() };
        self.write_file(dest, &data, options).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str, options: MkdirOptions) -> FsResult<()> {
        self.ensure_writable("mkdir", path)?;
        let mut nodes = self.nodes.write().await;
        let mode = options.mode.unwrap_or(0o755);
        if options.recursive {
            let resolved = resolve(&nodes, path, true, "mkdir")
                .or_else(|err| {
                    // Intermediate directories may be absent; build the
                    // chain lexically instead.
                    if err.is(ErrnoKind::Enoent) {
                        Ok(fspath::normalize(path))
                    } else {
                        Err(err)
                    }
                })?;
            let mut current = String::from("/");
            for segment in fspath::segments(&resolved).map(String::from).collect::<Vec<_>>() {
                current = fspath::join(&current, &segment);
                match nodes.get(&current) {
                    Some(Entry::Directory(_)) => {}
                    Some(Entry::File(_)) | Some(Entry::Symlink { .. }) => {
                        return Err(FsError::eexist("mkdir", path));
                    }
                    None => {
                        let parent = fspath::dirname(&current);
                        nodes.insert(
                            current.clone(),
                            Entry::Directory(fresh_stats(FileKind::Directory, mode)),
                        );
                        touch_dir(&mut nodes, &parent);
                    }
                }
            }
            return Ok(());
        }
        let resolved = resolve_with_parent(&nodes, path, true, "mkdir")?;
        if nodes.contains_key(&resolved) {
            return Err(FsError::eexist("mkdir", path));
        }
        let parent = fspath::dirname(&resolved);
        nodes.insert(resolved, Entry::Directory(fresh_stats(FileKind::Directory, mode)));
        touch_dir(&mut nodes, &parent);
        Ok(())
    }

    async fn rmdir(&self, path: &str, options: RmdirOptions) -> FsResult<()> {
        self.ensure_writable("rmdir", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve(&nodes, path, false, "rmdir")?;
        if resolved == "/" {
            return Err(FsError::new(ErrnoKind::Eperm).syscall("rmdir").path(path));
        }
        match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => {}
            Some(_) => return Err(FsError::enotdir("rmdir", path)),
            None => return Err(FsError::enoent("rmdir", path)),
        }
        let descendants = descendants_of(&nodes, &resolved);
        if !descendants.is_empty() && !options.recursive {
            return Err(FsError::new(ErrnoKind::Enotempty).syscall("rmdir").path(path));
        }
        for descendant in descendants {
            nodes.remove(&descendant);
        }
        nodes.remove(&resolved);
        let parent = fspath::dirname(&resolved);
        touch_dir(&mut nodes, &parent);
        Ok(())
    }

    async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "scandir")?;
        match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => Ok(children_of(&nodes, &resolved)
                .into_iter()
                .map(|child| fspath::basename(&child))
                .collect()),
            Some(_) => Err(FsError::enotdir("scandir", path)),
            None => Err(FsError::enoent("scandir", path)),
        }
    }

    async fn readdir_types(&self, path: &str) -> FsResult<Vec<Dirent>> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "scandir")?;
        match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => Ok(children_of(&nodes, &resolved)
                .into_iter()
                .filter_map(|child| {
                    nodes.get(&child).map(|entry| Dirent {
                        name: fspath::basename(&child),
                        kind: dirent_kind(entry),
                    })
                })
                .collect()),
            Some(_) => Err(FsError::enotdir("scandir", path)),
            None => Err(FsError::enoent("scandir", path)),
        }
    }

    async fn stat(&self, path: &str) -> FsResult<Stats> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "stat")?;
        stats_of(&nodes, &resolved).await.ok_or_else(|| FsError::enoent("stat", path))
    }

    async fn lstat(&self, path: &str) -> FsResult<Stats> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, false, "lstat")?;
        stats_of(&nodes, &resolved).await.ok_or_else(|| FsError::enoent("lstat", path))
    }

    async fn exists(&self, path: &str) -> bool {
        let nodes = self.nodes.read().await;
        match resolve(&nodes, path, true, "stat") {
            Ok(resolved) => nodes.contains_key(&resolved),
            Err(_) => false,
        }
    }

    async fn access(&self, path: &str, mode: u32) -> FsResult<()> {
        let stats = self
            .stat(path)
            .await
            .map_err(|err| FsError::new(err.kind()).syscall("access").path(path))?;
        if mode == consts::F_OK {
            return Ok(());
        }
        let mut required_ok = true;
        if mode & consts::R_OK != 0 {
            required_ok &= stats.mode & 0o444 != 0;
        }
        if mode & consts::W_OK != 0 {
            required_ok &= stats.mode & 0o222 != 0 && !self.read_only;
        }
        if mode & consts::X_OK != 0 {
            required_ok &= stats.mode & 0o111 != 0;
        }
        if required_ok {
            Ok(())
        } else {
            Err(FsError::new(ErrnoKind::Eacces).syscall("access").path(path))
        }
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.ensure_writable("chmod", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve(&nodes, path, true, "chmod")?;
        match nodes.get_mut(&resolved) {
            Some(Entry::File(node)) => {
                let node = node.clone();
                drop(nodes);
                let mut inner = node.inner.write().await;
                inner.stats.mode = mode & 0o7777;
                inner.stats.ctime_ms = now_ms();
                Ok(())
            }
            Some(Entry::Directory(stats)) | Some(Entry::Symlink { stats, .. }) => {
                stats.mode = mode & 0o7777;
                stats.ctime_ms = now_ms();
                Ok(())
            }
            None => Err(FsError::enoent("chmod", path)),
        }
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.ensure_writable("chown", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve(&nodes, path, true, "chown")?;
        match nodes.get_mut(&resolved) {
            Some(Entry::File(node)) => {
                let node = node.clone();
                drop(nodes);
                let mut inner = node.inner.write().await;
                inner.stats.uid = uid;
                inner.stats.gid = gid;
                inner.stats.ctime_ms = now_ms();
                Ok(())
            }
            Some(Entry::Directory(stats)) | Some(Entry::Symlink { stats, .. }) => {
                stats.uid = uid;
                stats.gid = gid;
                stats.ctime_ms = now_ms();
                Ok(())
            }
            None => Err(FsError::enoent("chown", path)),
        }
    }

    async fn utimes(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()> {
        self.ensure_writable("utime", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve(&nodes, path, true, "utime")?;
        match nodes.get_mut(&resolved) {
            Some(Entry::File(node)) => {
                let node = node.clone();
                drop(nodes);
                let mut inner = node.inner.write().await;
                inner.stats.atime_ms = atime_ms;
                inner.stats.mtime_ms = mtime_ms;
                inner.stats.ctime_ms = now_ms();
                Ok(())
            }
            Some(Entry::Directory(stats)) | Some(Entry::Symlink { stats, .. }) => {
                stats.atime_ms = atime_ms;
                stats.mtime_ms = mtime_ms;
                stats.ctime_ms = now_ms();
                Ok(())
            }
            None => Err(FsError::enoent("utime", path)),
        }
    }

    async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.ensure_writable("symlink", path)?;
        let mut nodes = self.nodes.write().await;
        let resolved = resolve_with_parent(&nodes, path, false, "symlink")?;
        if nodes.contains_key(&resolved) {
            return Err(FsError::eexist("symlink", path));
        }
        let mut stats = fresh_stats(FileKind::Symlink, 0o777);
        stats.size = target.len() as u64;
        let parent = fspath::dirname(&resolved);
        nodes.insert(resolved, Entry::Symlink { stats, target: target.to_string() });
        touch_dir(&mut nodes, &parent);
        Ok(())
    }

    async fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        self.ensure_writable("link", new_path)?;
        let mut nodes = self.nodes.write().await;
        let source = resolve(&nodes, existing, true, "link")?;
        let node = match nodes.get(&source) {
            Some(Entry::File(node)) => node.clone(),
            Some(Entry::Directory(_)) => {
                return Err(FsError::new(ErrnoKind::Eperm)
                    .syscall("link")
                    .path(existing)
                    .dest(new_path))
            }
            _ => {
                return Err(FsError::new(ErrnoKind::Enoent)
                    .syscall("link")
                    .path(existing)
                    .dest(new_path))
            }
        };
        let target = resolve_with_parent(&nodes, new_path, false, "link")?;
        if nodes.contains_key(&target) {
            return Err(FsError::new(ErrnoKind::Eexist)
                .syscall("link")
                .path(existing)
                .dest(new_path));
        }
        let parent = fspath::dirname(&target);
        nodes.insert(target, Entry::File(node.clone()));
        touch_dir(&mut nodes, &parent);
        drop(nodes);
        let mut inner = node.inner.write().await;
        inner.stats.nlink += 1;
        inner.stats.ctime_ms = now_ms();
        Ok(())
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, false, "readlink")?;
        match nodes.get(&resolved) {
            Some(Entry::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FsError::einval("readlink", path)),
            None => Err(FsError::enoent("readlink", path)),
        }
    }

    async fn realpath(&self, path: &str) -> FsResult<String> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "realpath")?;
        if nodes.contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(FsError::enoent("realpath", path))
        }
    }

    async fn mkdtemp(&self, prefix: &str) -> FsResult<String> {
        self.ensure_writable("mkdtemp", prefix)?;
        let mut nodes = self.nodes.write().await;
        let normalized = fspath::normalize(prefix);
        let parent = fspath::dirname(&normalized);
        match nodes.get(&parent) {
            Some(Entry::Directory(_)) => {}
            Some(_) => return Err(FsError::enotdir("mkdtemp", prefix)),
            None => return Err(FsError::enoent("mkdtemp", prefix)),
        }
        // A collision re-rolls the suffix; the space is large enough
        // that a handful of attempts always suffices.
        for _ in 0..32 {
            let candidate = format!("{normalized}{}", self.temp_suffix());
            if !nodes.contains_key(&candidate) {
                nodes.insert(
                    candidate.clone(),
                    Entry::Directory(fresh_stats(FileKind::Directory, 0o700)),
                );
                touch_dir(&mut nodes, &parent);
                return Ok(candidate);
            }
        }
        Err(FsError::eexist("mkdtemp", prefix))
    }

    async fn open(&self, path: &str, flags: u32, mode: u32) -> FsResult<Box<dyn FileHandle>> {
        let flags = OpenFlags::from_bits(flags);
        if flags.writable() || flags.create() || flags.truncate() {
            self.ensure_writable("open", path)?;
        }
        let mut nodes = self.nodes.write().await;
        let resolved = if flags.nofollow() {
            let candidate = resolve(&nodes, path, false, "open")?;
            if matches!(nodes.get(&candidate), Some(Entry::Symlink { .. })) {
                return Err(FsError::new(ErrnoKind::Eloop).syscall("open").path(path));
            }
            candidate
        } else {
            resolve_with_parent(&nodes, path, true, "open")?
        };

        let node = match nodes.get(&resolved) {
            Some(Entry::Directory(_)) => {
                if flags.writable() {
                    return Err(FsError::eisdir("open", path));
                }
                let stats = match stats_of(&nodes, &resolved).await {
                    Some(stats) => stats,
                    None => return Err(FsError::enoent("open", path)),
                };
                return Ok(Box::new(DirHandle {
                    backend_path: resolved,
                    original: path.to_string(),
                    flags,
                    epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
                    stats,
                    closed: Mutex::new(false),
                }));
            }
            Some(Entry::File(node)) => {
                if flags.directory() {
                    return Err(FsError::enotdir("open", path));
                }
                if flags.create() && flags.exclusive() {
                    return Err(FsError::eexist("open", path));
                }
                node.clone()
            }
            Some(Entry::Symlink { .. }) => return Err(FsError::enoent("open", path)),
            None => {
                if !flags.create() || flags.directory() {
                    return Err(FsError::enoent("open", path));
                }
                let parent = fspath::dirname(&resolved);
                if !matches!(nodes.get(&parent), Some(Entry::Directory(_))) {
                    return Err(FsError::enoent("open", path));
                }
                let node = FileNode::new(mode);
                nodes.insert(resolved.clone(), Entry::File(node.clone()));
                touch_dir(&mut nodes, &parent);
                node
            }
        };
        drop(nodes);

        {
            let mut inner = node.inner.write().await;
            if flags.truncate() && flags.writable() {
                inner.data.clear();
                let now = now_ms();
                inner.stats.size = 0;
                inner.stats.mtime_ms = now;
                inner.stats.ctime_ms = now;
            }
            inner.open_handles += 1;
        }

        Ok(Box::new(MemoryHandle {
            node,
            path: path.to_string(),
            flags,
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(HandleState { position: 0, closed: false }),
        }))
    }

    fn supports_tiering(&self) -> bool {
        true
    }

    async fn get_tier(&self, path: &str) -> FsResult<Tier> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "stat")?;
        match nodes.get(&resolved) {
            Some(Entry::File(node)) => Ok(node.inner.read().await.tier),
            Some(_) => Ok(Tier::Warm),
            None => Err(FsError::enoent("stat", path)),
        }
    }

    async fn promote(&self, path: &str) -> FsResult<()> {
        self.set_tier(path, Tier::Warm).await
    }

    async fn demote(&self, path: &str) -> FsResult<()> {
        self.set_tier(path, Tier::Cold).await
    }
}

impl MemoryBackend {
    async fn set_tier(&self, path: &str, tier: Tier) -> FsResult<()> {
        let nodes = self.nodes.read().await;
        let resolved = resolve(&nodes, path, true, "stat")?;
        match nodes.get(&resolved) {
            Some(Entry::File(node)) => {
                node.inner.write().await.tier = tier;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(FsError::enoent("stat", path)),
        }
    }
}

#[derive(Debug)]
struct HandleState {
    position: u64,
    closed: bool,
}

/// Handle over an in-memory file node.
struct MemoryHandle {
    node: Arc<FileNode>,
    path: String,
    flags: OpenFlags,
    epoch: u64,
    state: Mutex<HandleState>,
}

impl MemoryHandle {
    async fn ensure_open(&self) -> FsResult<()> {
        let state = self.state.lock().await;
        if state.closed {
            Err(FsError::ebadf("close"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FileHandle for MemoryHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    async fn read(&self, len: usize, position: Option<u64>) -> FsResult<Bytes> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::ebadf("read"));
        }
        if !self.flags.readable() {
            return Err(FsError::ebadf("read"));
        }
        let inner = self.node.inner.read().await;
        let start = position.unwrap_or(state.position) as usize;
        let end = (start + len).min(inner.data.len());
        let slice = if start >= inner.data.len() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(&inner.data[start..end])
        };
        if position.is_none() {
            state.position += slice.len() as u64;
        }
        Ok(slice)
    }

    async fn write(&self, data: &[u8], position: Option<u64>) -> FsResult<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::ebadf("write"));
        }
        if !self.flags.writable() {
            return Err(FsError::ebadf("write"));
        }
        let mut inner = self.node.inner.write().await;
        let start = if self.flags.append() {
            inner.data.len() as u64
        } else {
            position.unwrap_or(state.position)
        } as usize;
        if inner.data.len() < start + data.len() {
            inner.data.resize(start + data.len(), 0);
        }
        inner.data[start..start + data.len()].copy_from_slice(data);
        let now = now_ms();
        inner.stats.size = inner.data.len() as u64;
        inner.stats.mtime_ms = now;
        inner.stats.ctime_ms = now;
        if position.is_none() {
            state.position = (start + data.len()) as u64;
        }
        Ok(data.len())
    }

    async fn read_all(&self) -> FsResult<Bytes> {
        self.ensure_open().await?;
        if !self.flags.readable() {
            return Err(FsError::ebadf("read"));
        }
        let inner = self.node.inner.read().await;
        Ok(Bytes::copy_from_slice(&inner.data))
    }

    async fn write_all(&self, data: &[u8]) -> FsResult<usize> {
        self.ensure_open().await?;
        if !self.flags.writable() {
            return Err(FsError::ebadf("write"));
        }
        let mut inner = self.node.inner.write().await;
        inner.data = data.to_vec();
        let now = now_ms();
        inner.stats.size = data.len() as u64;
        inner.stats.mtime_ms = now;
        inner.stats.ctime_ms = now;
        Ok(data.len())
    }

    async fn stat(&self) -> FsResult<Stats> {
        self.ensure_open().await?;
        let inner = self.node.inner.read().await;
        let mut stats = inner.stats.clone();
        stats.size = inner.data.len() as u64;
        Ok(stats)
    }

    async fn chmod(&self, mode: u32) -> FsResult<()> {
        self.ensure_open().await?;
        let mut inner = self.node.inner.write().await;
        inner.stats.mode = mode & 0o7777;
        inner.stats.ctime_ms = now_ms();
        Ok(())
    }

    async fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        self.ensure_open().await?;
        let mut inner = self.node.inner.write().await;
        inner.stats.uid = uid;
        inner.stats.gid = gid;
        inner.stats.ctime_ms = now_ms();
        Ok(())
    }

    async fn truncate(&self, len: i64) -> FsResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::ebadf("ftruncate"));
        }
        if !self.flags.writable() {
            return Err(FsError::ebadf("ftruncate"));
        }
        if len < 0 {
            return Err(FsError::einval("ftruncate", self.path.clone()));
        }
        let len = len as usize;
        let mut inner = self.node.inner.write().await;
        inner.data.resize(len, 0);
        let now = now_ms();
        inner.stats.size = len as u64;
        inner.stats.mtime_ms = now;
        inner.stats.ctime_ms = now;
        if state.position > len as u64 {
            state.position = len as u64;
        }
        Ok(())
    }

    async fn sync(&self) -> FsResult<()> {
        self.ensure_open().await
    }

    async fn datasync(&self) -> FsResult<()> {
        self.ensure_open().await
    }

    async fn close(&self) -> FsResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::ebadf("close"));
        }
        state.closed = true;
        drop(state);
        let mut inner = self.node.inner.write().await;
        inner.open_handles = inner.open_handles.saturating_sub(1);
        Ok(())
    }
}

/// Read-only handle over a directory, as produced by `O_DIRECTORY`.
struct DirHandle {
    backend_path: String,
    original: String,
    flags: OpenFlags,
    epoch: u64,
    stats: Stats,
    closed: Mutex<bool>,
}

impl DirHandle {
    async fn ensure_open(&self) -> FsResult<()> {
        if *self.closed.lock().await {
            Err(FsError::ebadf("close"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FileHandle for DirHandle {
    fn path(&self) -> &str {
        &self.original
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    async fn read(&self, _len: usize, _position: Option<u64>) -> FsResult<Bytes> {
        self.ensure_open().await?;
        Err(FsError::eisdir("read", self.backend_path.clone()))
    }

    async fn write(&self, _data: &[u8], _position: Option<u64>) -> FsResult<usize> {
        self.ensure_open().await?;
        Err(FsError::ebadf("write"))
    }

    async fn read_all(&self) -> FsResult<Bytes> {
        self.ensure_open().await?;
        Err(FsError::eisdir("read", self.backend_path.clone()))
    }

    async fn write_all(&self, _data: &[u8]) -> FsResult<usize> {
        self.ensure_open().await?;
        Err(FsError::ebadf("write"))
    }

    async fn stat(&self) -> FsResult<Stats> {
        self.ensure_open().await?;
        Ok(self.stats.clone())
    }

    async fn chmod(&self, _mode: u32) -> FsResult<()> {
        self.ensure_open().await?;
        Err(FsError::ebadf("fchmod"))
    }

    async fn chown(&self, _uid: u32, _gid: u32) -> FsResult<()> {
        self.ensure_open().await?;
        Err(FsError::ebadf("fchown"))
    }

    async fn truncate(&self, _len: i64) -> FsResult<()> {
        self.ensure_open().await?;
        Err(FsError::ebadf("ftruncate"))
    }

    async fn sync(&self) -> FsResult<()> {
        self.ensure_open().await
    }

    async fn datasync(&self) -> FsResult<()> {
        self.ensure_open().await
    }

    async fn close(&self) -> FsResult<()> {
        let mut closed = self.closed.lock().await;
        if *closed {
            return Err(FsError::ebadf("close"));
        }
        *closed = true;
        Ok(())
    }
}
