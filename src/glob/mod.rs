//! Pattern-directed file discovery over a backend.
//!
//! The driver extracts literal prefixes from each pattern and prunes
//! directories that cannot contain matches before descending. Output is
//! sorted and deduplicated; [`glob_stream`] yields matches immediately
//! in traversal order instead.


use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::OpGuard;
use crate::errno::FsError;
use crate::fspath;
use crate::pattern::{self, CompiledPattern, MatchOptions};
use crate::vfs::{Backend, FileKind};
use crate::walk::{self, TraversalEntry, TraverseOptions, WalkError};

/// Glob driver options.
#[derive(Debug, Clone)]
pub struct GlobOptions {
    pub patterns: Vec<String>,
    /// Directory matches are computed relative to; `ENOENT` if absent.
    pub cwd: String,
    /// Ignore patterns, compiled with `dot=true`.
    pub ignore: Vec<String>,
    pub dot: bool,
    pub nocase: bool,
    /// Maximum descent depth below `cwd`.
    pub deep: Option<usize>,
    pub follow_symlinks: bool,
    /// Report only regular files (default).
    pub only_files: bool,
    /// Report only directories; overrides `only_files`.
    pub only_directories: bool,
    /// Emit absolute instead of relative paths.
    pub absolute: bool,
    pub token: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

impl Default for GlobOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            cwd: "/".to_string(),
            ignore: Vec::new(),
            dot: false,
            nocase: false,
            deep: None,
            follow_symlinks: false,
            only_files: true,
            only_directories: false,
            absolute: false,
            token: None,
            timeout: None,
        }
    }
}

/// Glob failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobError {
    Timeout { pattern: String, timeout_ms: u64 },
    Aborted { pattern: String },
    Fs(FsError),
}

impl fmt::Display for GlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobError::Timeout { pattern, timeout_ms } => {
                write!(f, "glob '{pattern}' timed out after {timeout_ms}ms")
            }
            GlobError::Aborted { pattern } => write!(f, "glob '{pattern}' aborted"),
            GlobError::Fs(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for GlobError {}

impl From<FsError> for GlobError {
    fn from(err: FsError) -> Self {
        GlobError::Fs(err)
    }
}

pub type GlobResult<T> = Result<T, GlobError>;

struct Prepared {
    positives: Vec<Arc<CompiledPattern>>,
    negatives: Vec<Arc<CompiledPattern>>,
    ignore: Vec<CompiledPattern>,
    include_dot: bool,
    label: String,
}

fn prepare(options: &GlobOptions) -> GlobResult<Prepared> {
    let match_options = MatchOptions { dot: options.dot, nocase: options.nocase };
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    let mut include_dot = options.dot;
    for raw in &options.patterns {
        let compiled = pattern::cached_pattern(raw, match_options)?;
        include_dot |= compiled.dot();
        if compiled.is_negated() {
            negatives.push(compiled);
        } else {
            positives.push(compiled);
        }
    }
    let mut ignore = Vec::new();
    for raw in &options.ignore {
        ignore.push(pattern::create_matcher(
            raw,
            MatchOptions { dot: true, nocase: options.nocase },
        )?);
    }
    Ok(Prepared {
        positives,
        negatives,
        ignore,
        include_dot,
        label: options.patterns.join(", "),
    })
}

/// True when a directory at `relative` could still contain matches.
fn could_contain_matches(relative: &str, patterns: &[Arc<CompiledPattern>]) -> bool {
    if relative.is_empty() || patterns.is_empty() {
        return true;
    }
    let dir: Vec<&str> = fspath::segments(relative).collect();
    patterns.iter().any(|pattern| {
        let prefix = pattern.literal_prefix();
        if pattern.has_globstar() {
            if prefix.is_empty() {
                return true;
            }
            return prefix_related(&dir, prefix);
        }
        let max = pattern.max_segments();
        if max >= 0 && dir.len() as isize >= max {
            return false;
        }
        if prefix.is_empty() {
            // Brace patterns report no usable prefix; descend.
            return true;
        }
        prefix_related(&dir, prefix)
    })
}

/// Ancestor-of, equal-to, or descendant-of relation on segment vectors.
fn prefix_related(dir: &[&str], prefix: &[String]) -> bool {
    let shared = dir.len().min(prefix.len());
    dir.iter().take(shared).zip(prefix.iter().take(shared)).all(|(a, b)| *a == b.as_str())
}

fn entry_type_ok(kind: FileKind, options: &GlobOptions) -> bool {
    if options.only_directories {
        kind == FileKind::Directory
    } else if options.only_files {
        kind == FileKind::File
    } else {
        true
    }
}

fn entry_matches(prepared: &Prepared, relative: &str) -> bool {
    if relative.is_empty() {
        return false;
    }
    if prepared.positives.iter().all(|pattern| !pattern.matches(relative)) {
        return false;
    }
    // A negated pattern reporting `false` means its body matched.
    if prepared.negatives.iter().any(|pattern| !pattern.matches(relative)) {
        return false;
    }
    if prepared.ignore.iter().any(|pattern| pattern.matches(relative)) {
        return false;
    }
    true
}

fn interrupt_error(error: WalkError, label: &str, timeout: Option<Duration>) -> GlobError {
    match error {
        WalkError::Aborted { .. } => GlobError::Aborted { pattern: label.to_string() },
        WalkError::Timeout { .. } => GlobError::Timeout {
            pattern: label.to_string(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        },
        WalkError::Failed { path, code, .. } => {
            GlobError::Fs(FsError::new(code).syscall("scandir").path(path))
        }
    }
}

/// Collect all matches, sorted ascending and deduplicated.
pub async fn glob(backend: &dyn Backend, options: GlobOptions) -> GlobResult<Vec<String>> {
    let cwd = fspath::normalize(&options.cwd);
    backend.stat(&cwd).await.map_err(GlobError::Fs)?;
    if options.patterns.is_empty() {
        return Ok(Vec::new());
    }
    let prepared = prepare(&options)?;
    debug!(cwd = cwd.as_str(), patterns = prepared.label.as_str(), "glob");

    let descend_patterns = prepared.positives.clone();
    let descend_cwd = cwd.clone();
    let traverse_options = TraverseOptions {
        start_path: cwd.clone(),
        max_depth: options.deep,
        include_dot_files: prepared.include_dot,
        follow_symlinks: options.follow_symlinks,
        descend: Some(Arc::new(move |entry: &TraversalEntry| {
            let relative = fspath::relative(&descend_cwd, &entry.path);
            could_contain_matches(&relative, &descend_patterns)
        })),
        guard: OpGuard::new(options.token.clone(), options.timeout),
        ..Default::default()
    };

    let result = walk::traverse(backend, traverse_options).await;
    if let Some(error) = result.error {
        return Err(interrupt_error(error, &prepared.label, options.timeout));
    }

    let mut matches: Vec<String> = result
        .entries
        .iter()
        .filter(|entry| entry_type_ok(entry.kind, &options))
        .filter_map(|entry| {
            let relative = fspath::relative(&cwd, &entry.path);
            if entry_matches(&prepared, &relative) {
                Some(if options.absolute { entry.path.clone() } else { relative })
            } else {
                None
            }
        })
        .collect();
    matches.sort();
    matches.dedup();
    Ok(matches)
}

/// Stream matches in traversal order, deduplicated incrementally.
///
/// The returned channel yields each match as it is found; a terminal
/// `Err` reports interruption. The sequence is not restartable.
pub fn glob_stream(
    backend: Arc<dyn Backend>,
    options: GlobOptions,
) -> async_channel::Receiver<GlobResult<String>> {
    let (sender, receiver) = async_channel::unbounded();
    tokio::spawn(async move {
        let cwd = fspath::normalize(&options.cwd);
        if let Err(err) = backend.stat(&cwd).await {
            let _ = sender.send(Err(GlobError::Fs(err))).await;
            return;
        }
        if options.patterns.is_empty() {
            return;
        }
        let prepared = match prepare(&options) {
            Ok(prepared) => prepared,
            Err(err) => {
                let _ = sender.send(Err(err)).await;
                return;
            }
        };

        let seen = Mutex::new(HashSet::new());
        let descend_patterns = prepared.positives.clone();
        let descend_cwd = cwd.clone();
        let filter_cwd = cwd.clone();
        let filter_sender = sender.clone();
        let filter_options = options.clone();
        let traverse_options = TraverseOptions {
            start_path: cwd.clone(),
            max_depth: options.deep,
            include_dot_files: prepared.include_dot,
            follow_symlinks: options.follow_symlinks,
            descend: Some(Arc::new(move |entry: &TraversalEntry| {
                let relative = fspath::relative(&descend_cwd, &entry.path);
                could_contain_matches(&relative, &descend_patterns)
            })),
            // Matching rides the per-entry filter so nothing is
            // buffered in the traversal result.
            filter: Some(Arc::new(move |entry: &TraversalEntry| {
                if !entry_type_ok(entry.kind, &filter_options) {
                    return false;
                }
                let relative = fspath::relative(&filter_cwd, &entry.path);
                if entry_matches(&prepared, &relative) {
                    let emitted =
                        if filter_options.absolute { entry.path.clone() } else { relative };
                    if seen.lock().insert(emitted.clone()) {
                        let _ = filter_sender.try_send(Ok(emitted));
                    }
                }
                false
            })),
            guard: OpGuard::new(options.token.clone(), options.timeout),
            ..Default::default()
        };

        let label = options.patterns.join(", ");
        let result = walk::traverse(backend.as_ref(), traverse_options).await;
        if let Some(error) = result.error {
            let _ = sender.send(Err(interrupt_error(error, &label, options.timeout))).await;
        }
    });
    receiver
}
