//! Metadata-driven enumeration over traversal entries.


use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::cancel::OpGuard;
use crate::errno::FsError;
use crate::fspath;
use crate::pattern::{self, MatchOptions};
use crate::vfs::{Backend, FileKind};
use crate::walk::{self, TraversalEntry, TraverseOptions, WalkError};

/// Entry type selector, mirroring `find -type`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FindType {
    File,
    Directory,
    Symlink,
}

impl FindType {
    /// Parse the single-letter selector `f`/`d`/`l`.
    pub fn parse(text: &str) -> Result<Self, FsError> {
        match text {
            "f" => Ok(FindType::File),
            "d" => Ok(FindType::Directory),
            "l" => Ok(FindType::Symlink),
            _ => Err(FsError::einval("find", text)),
        }
    }

    fn accepts(self, kind: FileKind) -> bool {
        matches!(
            (self, kind),
            (FindType::File, FileKind::File)
                | (FindType::Directory, FileKind::Directory)
                | (FindType::Symlink, FileKind::Symlink)
        )
    }
}

/// Size predicate: `+N[K|M|G]` over, `-N[...]` under, `N[...]` exact.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeFilter {
    Over(u64),
    Under(u64),
    Exactly(u64),
}

impl SizeFilter {
    pub fn parse(text: &str) -> Result<Self, FsError> {
        let (shape, rest): (fn(u64) -> SizeFilter, &str) = match text.as_bytes().first() {
            Some(b'+') => (SizeFilter::Over, &text[1..]),
            Some(b'-') => (SizeFilter::Under, &text[1..]),
            _ => (SizeFilter::Exactly, text),
        };
        let (digits, unit) = match rest.as_bytes().last() {
            Some(b'K') | Some(b'k') => (&rest[..rest.len() - 1], 1024u64),
            Some(b'M') | Some(b'm') => (&rest[..rest.len() - 1], 1024 * 1024),
            Some(b'G') | Some(b'g') => (&rest[..rest.len() - 1], 1024 * 1024 * 1024),
            _ => (rest, 1),
        };
        let value: u64 =
            digits.parse().map_err(|_| FsError::einval("find", text.to_string()))?;
        Ok(shape(value * unit))
    }

    fn accepts(self, size: u64) -> bool {
        match self {
            SizeFilter::Over(bound) => size > bound,
            SizeFilter::Under(bound) => size < bound,
            SizeFilter::Exactly(bound) => size == bound,
        }
    }
}

/// Time predicate in whole days: `+N` older, `-N` younger, `N` exact.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeFilter {
    OlderThanDays(u64),
    YoungerThanDays(u64),
    ExactlyDays(u64),
}

impl TimeFilter {
    pub fn parse(text: &str) -> Result<Self, FsError> {
        let (shape, rest): (fn(u64) -> TimeFilter, &str) = match text.as_bytes().first() {
            Some(b'+') => (TimeFilter::OlderThanDays, &text[1..]),
            Some(b'-') => (TimeFilter::YoungerThanDays, &text[1..]),
            _ => (TimeFilter::ExactlyDays, text),
        };
        let value: u64 = rest.parse().map_err(|_| FsError::einval("find", text.to_string()))?;
        Ok(shape(value))
    }

    fn accepts(self, timestamp_ms: i64, now_ms: i64) -> bool {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;
        let age_days = (now_ms - timestamp_ms).max(0) / DAY_MS;
        match self {
            TimeFilter::OlderThanDays(days) => age_days > days as i64,
            TimeFilter::YoungerThanDays(days) => age_days < days as i64,
            TimeFilter::ExactlyDays(days) => age_days == days as i64,
        }
    }
}

/// Find driver options; predicates combine conjunctively.
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub path: String,
    /// Filename glob, matched against the entry name.
    pub name: Option<String>,
    pub kind: Option<FindType>,
    pub size: Option<SizeFilter>,
    pub mtime: Option<TimeFilter>,
    pub atime: Option<TimeFilter>,
    pub ctime: Option<TimeFilter>,
    pub min_depth: Option<usize>,
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    pub token: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            name: None,
            kind: None,
            size: None,
            mtime: None,
            atime: None,
            ctime: None,
            min_depth: None,
            max_depth: None,
            follow_symlinks: false,
            token: None,
            timeout: None,
        }
    }
}

/// Find failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindError {
    Timeout { path: String, timeout_ms: u64 },
    Aborted { path: String },
    Fs(FsError),
}

impl fmt::Display for FindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindError::Timeout { path, timeout_ms } => {
                write!(f, "find in '{path}' timed out after {timeout_ms}ms")
            }
            FindError::Aborted { path } => write!(f, "find in '{path}' aborted"),
            FindError::Fs(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for FindError {}

impl From<FsError> for FindError {
    fn from(err: FsError) -> Self {
        FindError::Fs(err)
    }
}

pub type FindResult<T> = Result<T, FindError>;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Evaluate the predicates over every entry under `options.path`.
pub async fn find(backend: &dyn Backend, options: FindOptions) -> FindResult<Vec<TraversalEntry>> {
    let start = fspath::normalize(&options.path);
    backend.stat(&start).await.map_err(FindError::Fs)?;

    let name_matcher = match &options.name {
        Some(name) => Some(
            pattern::create_matcher(name, MatchOptions { dot: true, nocase: false })
                .map_err(FindError::Fs)?,
        ),
        None => None,
    };
    let needs_stats = options.size.is_some()
        || options.mtime.is_some()
        || options.atime.is_some()
        || options.ctime.is_some();
    let now = now_ms();

    let predicate = {
        let options = options.clone();
        move |entry: &TraversalEntry| -> bool {
            if let Some(matcher) = &name_matcher {
                if !matcher.matches(&entry.name) {
                    return false;
                }
            }
            if let Some(kind) = options.kind {
                if !kind.accepts(entry.kind) {
                    return false;
                }
            }
            if let Some(size) = options.size {
                match entry.size {
                    Some(actual) if size.accepts(actual) => {}
                    _ => return false,
                }
            }
            for (filter, stamp) in [
                (options.mtime, entry.mtime_ms),
                (options.atime, entry.atime_ms),
                (options.ctime, entry.ctime_ms),
            ] {
                if let Some(filter) = filter {
                    match stamp {
                        Some(actual) if filter.accepts(actual, now) => {}
                        _ => return false,
                    }
                }
            }
            true
        }
    };

    let traverse_options = TraverseOptions {
        start_path: start.clone(),
        min_depth: options.min_depth,
        max_depth: options.max_depth,
        include_dot_files: true,
        follow_symlinks: options.follow_symlinks,
        collect_stats: needs_stats,
        filter: Some(Arc::new(predicate)),
        guard: OpGuard::new(options.token.clone(), options.timeout),
        ..Default::default()
    };

    let result = walk::traverse(backend, traverse_options).await;
    if let Some(error) = result.error {
        return Err(match error {
            WalkError::Aborted { path } => FindError::Aborted { path },
            WalkError::Timeout { path, timeout_ms } => FindError::Timeout { path, timeout_ms },
            WalkError::Failed { path, code, .. } => {
                FindError::Fs(FsError::new(code).syscall("scandir").path(path))
            }
        });
    }
    Ok(result.entries)
}
