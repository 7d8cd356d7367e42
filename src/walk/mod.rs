//! Cancellable, depth-bounded traversal over a backend.
//!
//! The engine minimises syscalls: entry types come from dirents, `stat`
//! is only issued for followed symlinks or when the caller asks for
//! stats, and a followed symlink is stat'ed exactly once with the
//! result cached for reuse.


use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::cancel::{Interrupt, OpGuard, Ticker, CHECK_INTERVAL};
use crate::errno::ErrnoKind;
use crate::fspath;
use crate::pattern::{CompiledPatterns, MatchOptions};
use crate::vfs::{Backend, FileKind, Stats};

/// Entry produced by a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEntry {
    pub path: String,
    pub name: String,
    pub kind: FileKind,
    pub depth: usize,
    pub size: Option<u64>,
    pub mtime_ms: Option<i64>,
    pub ctime_ms: Option<i64>,
    pub atime_ms: Option<i64>,
}

/// Progress snapshot handed to the progress callback.
#[derive(Debug, Clone)]
pub struct TraverseProgress {
    pub visited: usize,
    pub collected: usize,
    pub elapsed_ms: u64,
}

/// Per-entry filter; entries rejected here are dropped from the result
/// but their subtrees are still walked.
pub type FilterFn = Arc<dyn Fn(&TraversalEntry) -> bool + Send + Sync>;

/// Progress callback, fired every [`CHECK_INTERVAL`] visited entries.
pub type ProgressFn = Arc<dyn Fn(&TraverseProgress) + Send + Sync>;

/// Descent decision for directories; a `false` skips the subtree
/// without touching the collected entry.
pub type DescendFn = Arc<dyn Fn(&TraversalEntry) -> bool + Send + Sync>;

/// Traversal options.
#[derive(Clone, Default)]
pub struct TraverseOptions {
    pub start_path: String,
    pub min_depth: Option<usize>,
    pub max_depth: Option<usize>,
    pub include_dot_files: bool,
    /// Exact names or `*`-globs; matching directories are skipped
    /// before any stat.
    pub prune_patterns: Vec<String>,
    pub follow_symlinks: bool,
    pub collect_stats: bool,
    pub filter: Option<FilterFn>,
    pub descend: Option<DescendFn>,
    pub progress: Option<ProgressFn>,
    pub guard: OpGuard,
}

/// Failure raised while walking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// The cancellation token fired.
    Aborted { path: String },
    /// The elapsed-time budget ran out.
    Timeout { path: String, timeout_ms: u64 },
    /// A backend error that is not locally recoverable.
    Failed { path: String, code: ErrnoKind, cause: String },
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::Aborted { path } => write!(f, "traversal of '{path}' aborted"),
            WalkError::Timeout { path, timeout_ms } => {
                write!(f, "traversal of '{path}' timed out after {timeout_ms}ms")
            }
            WalkError::Failed { path, code, cause } => {
                write!(f, "traversal failed at '{path}' ({}): {cause}", code.symbol())
            }
        }
    }
}

impl std::error::Error for WalkError {}

/// Traversal outcome; partial on interruption.
#[derive(Debug)]
pub struct TraversalResult {
    pub entries: Vec<TraversalEntry>,
    pub visited: usize,
    pub complete: bool,
    pub error: Option<WalkError>,
    pub duration_ms: u64,
}

struct Walk<'a> {
    backend: &'a dyn Backend,
    options: &'a TraverseOptions,
    prune: CompiledPatterns,
    visited: HashSet<String>,
    symlink_stats: HashMap<String, Stats>,
    entries: Vec<TraversalEntry>,
    seen: usize,
    ticker: Ticker,
}

/// Walk the namespace under `options.start_path`.
///
/// A file start yields at most one entry; a directory start walks the
/// subtree depth-first in the backend's enumeration order. Interruption
/// returns `complete=false` with everything collected so far.
pub async fn traverse(backend: &dyn Backend, options: TraverseOptions) -> TraversalResult {
    let guard = options.guard.clone();
    let start = fspath::normalize(&options.start_path);

    let prune = match CompiledPatterns::compile(
        &options.prune_patterns,
        MatchOptions { dot: true, nocase: false },
    ) {
        Ok(compiled) => compiled,
        Err(err) => {
            return TraversalResult {
                entries: Vec::new(),
                visited: 0,
                complete: false,
                error: Some(WalkError::Failed {
                    path: start,
                    code: err.kind(),
                    cause: err.to_string(),
                }),
                duration_ms: guard.elapsed_ms(),
            }
        }
    };

    let mut walk = Walk {
        backend,
        options: &options,
        prune,
        visited: HashSet::new(),
        symlink_stats: HashMap::new(),
        entries: Vec::new(),
        seen: 0,
        ticker: Ticker::new(),
    };

    let outcome = walk.run(&start, &guard).await;
    let (complete, error) = match outcome {
        Ok(()) => (true, None),
        Err(WalkError::Aborted { path }) => (false, Some(WalkError::Aborted { path })),
        Err(WalkError::Timeout { path, timeout_ms }) => {
            (false, Some(WalkError::Timeout { path, timeout_ms }))
        }
        Err(failed) => (false, Some(failed)),
    };
    TraversalResult {
        entries: walk.entries,
        visited: walk.seen,
        complete,
        error,
        duration_ms: guard.elapsed_ms(),
    }
}

impl Walk<'_> {
    fn interrupt(&self, interrupt: Interrupt, guard: &OpGuard, path: &str) -> WalkError {
        match interrupt {
            Interrupt::Aborted => WalkError::Aborted { path: path.to_string() },
            Interrupt::TimedOut(_) => WalkError::Timeout {
                path: path.to_string(),
                timeout_ms: guard.timeout().map(|t| t.as_millis() as u64).unwrap_or_default(),
            },
        }
    }

    async fn run(&mut self, start: &str, guard: &OpGuard) -> Result<(), WalkError> {
        let start_stats = {
            let lookup = if self.options.follow_symlinks {
                self.backend.stat(start).await
            } else {
                self.backend.lstat(start).await
            };
            lookup.map_err(|err| WalkError::Failed {
                path: start.to_string(),
                code: err.kind(),
                cause: err.to_string(),
            })?
        };

        if start_stats.kind != FileKind::Directory {
            self.seen += 1;
            let name = fspath::basename(start);
            let entry = self.build_entry(start, &name, start_stats.kind, 0, Some(&start_stats));
            self.collect(entry);
            return Ok(());
        }

        let mut stack: Vec<(String, usize)> = vec![(start.to_string(), 0)];
        self.visited.insert(start.to_string());

        while let Some((dir, depth)) = stack.pop() {
            guard.check().map_err(|i| self.interrupt(i, guard, &dir))?;

            let dirents = match self.backend.readdir_types(&dir).await {
                Ok(dirents) => dirents,
                Err(err) if err.is(ErrnoKind::Eacces) => {
                    warn!(path = dir.as_str(), "skipping unreadable subtree");
                    continue;
                }
                Err(err) => {
                    return Err(WalkError::Failed {
                        path: dir.clone(),
                        code: err.kind(),
                        cause: err.to_string(),
                    })
                }
            };

            // Push in reverse so the stack pops children in enumeration
            // order.
            let mut descend: Vec<(String, usize)> = Vec::new();
            for dirent in dirents {
                self.seen += 1;
                self.ticker
                    .tick(guard)
                    .map_err(|i| self.interrupt(i, guard, &dir))?;
                self.report_progress(guard);

                let child_depth = depth + 1;
                let child_path = fspath::join(&dir, &dirent.name);

                if !self.options.include_dot_files && dirent.name.starts_with('.') {
                    trace!(path = child_path.as_str(), "dotfile skipped");
                    continue;
                }
                if dirent.kind == FileKind::Directory
                    && !self.prune.is_empty()
                    && self.prune.match_all(&dirent.name)
                {
                    trace!(path = child_path.as_str(), "pruned");
                    continue;
                }

                let (kind, stats) = self.classify(&child_path, dirent.kind).await;

                let entry =
                    self.build_entry(&child_path, &dirent.name, kind, child_depth, stats.as_ref());
                let within_max =
                    self.options.max_depth.map(|max| child_depth <= max).unwrap_or(true);
                if within_max {
                    self.collect(entry);
                }

                if kind == FileKind::Directory {
                    let mut descend_ok =
                        self.options.max_depth.map(|max| child_depth < max).unwrap_or(true);
                    if descend_ok {
                        if let Some(decide) = &self.options.descend {
                            let probe = self.build_entry(
                                &child_path,
                                &dirent.name,
                                kind,
                                child_depth,
                                stats.as_ref(),
                            );
                            descend_ok = decide(&probe);
                        }
                    }
                    if descend_ok {
                        let key = if dirent.kind == FileKind::Symlink {
                            // Cycle guard for followed symlinks works on
                            // resolved paths.
                            match self.backend.realpath(&child_path).await {
                                Ok(resolved) => resolved,
                                Err(_) => child_path.clone(),
                            }
                        } else {
                            child_path.clone()
                        };
                        if self.visited.insert(key) {
                            descend.push((child_path, child_depth));
                        }
                    }
                }
            }
            for frame in descend.into_iter().rev() {
                stack.push(frame);
            }
        }
        Ok(())
    }

    /// Determine the final kind and (optionally) stats for an entry,
    /// issuing the minimum number of stat calls.
    async fn classify(&mut self, path: &str, dirent_kind: FileKind) -> (FileKind, Option<Stats>) {
        if dirent_kind == FileKind::Symlink && self.options.follow_symlinks {
            if let Some(cached) = self.symlink_stats.get(path) {
                return (cached.kind, Some(cached.clone()));
            }
            match self.backend.stat(path).await {
                Ok(stats) => {
                    self.symlink_stats.insert(path.to_string(), stats.clone());
                    return (stats.kind, Some(stats));
                }
                // Broken link: report the symlink itself.
                Err(_) => return (FileKind::Symlink, None),
            }
        }
        if self.options.collect_stats {
            match self.backend.lstat(path).await {
                Ok(stats) => return (dirent_kind, Some(stats)),
                Err(_) => return (dirent_kind, None),
            }
        }
        (dirent_kind, None)
    }

    fn build_entry(
        &self,
        path: &str,
        name: &str,
        kind: FileKind,
        depth: usize,
        stats: Option<&Stats>,
    ) -> TraversalEntry {
        TraversalEntry {
            path: path.to_string(),
            name: name.to_string(),
            kind,
            depth,
            size: stats.map(|s| s.size),
            mtime_ms: stats.map(|s| s.mtime_ms),
            ctime_ms: stats.map(|s| s.ctime_ms),
            atime_ms: stats.map(|s| s.atime_ms),
        }
    }

    fn collect(&mut self, entry: TraversalEntry) {
        if let Some(min) = self.options.min_depth {
            if entry.depth < min {
                return;
            }
        }
        if let Some(filter) = &self.options.filter {
            if !filter(&entry) {
                return;
            }
        }
        self.entries.push(entry);
    }

    fn report_progress(&self, guard: &OpGuard) {
        if self.seen % CHECK_INTERVAL == 0 {
            if let Some(progress) = &self.options.progress {
                progress(&TraverseProgress {
                    visited: self.seen,
                    collected: self.entries.len(),
                    elapsed_ms: guard.elapsed_ms(),
                });
            }
        }
    }
}
