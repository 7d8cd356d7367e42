//! Streaming content search over backend files.
//!
//! Files are discovered through the traversal engine, sniffed for
//! binary content, then scanned line by line with a circular buffer
//! providing before-context. Unreadable files are skipped silently.


use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::{Interrupt, OpGuard, Ticker};
use crate::errno::{ErrnoKind, FsError};
use crate::fspath;
use crate::pattern::{self, MatchOptions};
use crate::vfs::{Backend, FileKind};
use crate::walk::{self, TraverseOptions, WalkError};

/// Bytes sniffed from the head of each file for binary detection.
pub const BINARY_CHECK_SIZE: usize = 8192;

/// Search pattern: literal text is regex-escaped, regex passes through.
#[derive(Debug, Clone)]
pub enum GrepPattern {
    Literal(String),
    Regex(String),
}

impl GrepPattern {
    fn label(&self) -> &str {
        match self {
            GrepPattern::Literal(text) => text,
            GrepPattern::Regex(source) => source,
        }
    }
}

/// Grep driver options.
#[derive(Debug, Clone)]
pub struct GrepOptions {
    pub pattern: GrepPattern,
    /// File or directory to search.
    pub path: String,
    pub recursive: bool,
    pub ignore_case: bool,
    /// Wrap the pattern in word boundaries.
    pub word_match: bool,
    /// Emit one match per non-matching line instead.
    pub invert: bool,
    /// Stop each file at its first match.
    pub files_only: bool,
    /// Cap on matches per file.
    pub max_count: Option<usize>,
    /// Lines of context before each match.
    pub before: usize,
    /// Lines of context after each match.
    pub after: usize,
    /// Filename filter: `*.ext`, `**/*.ext`, or `*.{a,b}`.
    pub include: Option<String>,
    pub token: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            pattern: GrepPattern::Literal(String::new()),
            path: "/".to_string(),
            recursive: true,
            ignore_case: false,
            word_match: false,
            invert: false,
            files_only: false,
            max_count: None,
            before: 0,
            after: 0,
            include: None,
            token: None,
            timeout: None,
        }
    }
}

/// One match occurrence. `line` and `column` are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub content: String,
    pub matched: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Grep failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrepError {
    Timeout { pattern: String, timeout_ms: u64 },
    Aborted { pattern: String },
    Fs(FsError),
}

impl fmt::Display for GrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrepError::Timeout { pattern, timeout_ms } => {
                write!(f, "grep '{pattern}' timed out after {timeout_ms}ms")
            }
            GrepError::Aborted { pattern } => write!(f, "grep '{pattern}' aborted"),
            GrepError::Fs(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for GrepError {}

impl From<FsError> for GrepError {
    fn from(err: FsError) -> Self {
        GrepError::Fs(err)
    }
}

pub type GrepResult<T> = Result<T, GrepError>;

/// Build the line regex from the options.
fn build_regex(options: &GrepOptions) -> GrepResult<Regex> {
    let core = match &options.pattern {
        GrepPattern::Literal(text) => regex::escape(text),
        GrepPattern::Regex(source) => source.clone(),
    };
    let wrapped = if options.word_match { format!(r"\b(?:{core})\b") } else { core };
    RegexBuilder::new(&wrapped)
        .case_insensitive(options.ignore_case)
        .build()
        .map_err(|_| {
            GrepError::Fs(
                FsError::new(ErrnoKind::Einval)
                    .syscall("grep")
                    .path(options.pattern.label().to_string()),
            )
        })
}

/// Null byte in the head, or >30% non-printable bytes, means binary.
fn is_binary(data: &[u8]) -> bool {
    let head = &data[..data.len().min(BINARY_CHECK_SIZE)];
    if head.is_empty() {
        return false;
    }
    let mut non_printable = 0usize;
    for &byte in head {
        if byte == 0 {
            return true;
        }
        if byte < 32 && byte != b'\t' && byte != b'\n' && byte != b'\r' {
            non_printable += 1;
        }
    }
    non_printable * 100 > head.len() * 30
}

/// True when `name` passes the include filter.
fn include_matches(include: &str, name: &str) -> bool {
    let trimmed = include.strip_prefix("**/").unwrap_or(include);
    pattern::match_path(trimmed, name, MatchOptions { dot: true, nocase: false })
        .unwrap_or(false)
}

fn interrupt_error(interrupt: Interrupt, label: &str, timeout: Option<Duration>) -> GrepError {
    match interrupt {
        Interrupt::Aborted => GrepError::Aborted { pattern: label.to_string() },
        Interrupt::TimedOut(_) => GrepError::Timeout {
            pattern: label.to_string(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        },
    }
}

/// Search files under `options.path` for the pattern.
pub async fn grep(backend: &dyn Backend, options: GrepOptions) -> GrepResult<Vec<GrepMatch>> {
    let regex = build_regex(&options)?;
    let label = options.pattern.label().to_string();
    let start = fspath::normalize(&options.path);
    let guard = OpGuard::new(options.token.clone(), options.timeout);

    let stats = backend.stat(&start).await.map_err(GrepError::Fs)?;
    let files: Vec<String> = if stats.kind != FileKind::Directory {
        vec![start.clone()]
    } else {
        let traverse_options = TraverseOptions {
            start_path: start.clone(),
            max_depth: if options.recursive { None } else { Some(1) },
            include_dot_files: true,
            guard: guard.clone(),
            ..Default::default()
        };
        let result = walk::traverse(backend, traverse_options).await;
        if let Some(error) = result.error {
            return Err(match error {
                WalkError::Aborted { .. } => interrupt_error(Interrupt::Aborted, &label, options.timeout),
                WalkError::Timeout { .. } => {
                    interrupt_error(Interrupt::TimedOut(Duration::ZERO), &label, options.timeout)
                }
                WalkError::Failed { path, code, .. } => {
                    GrepError::Fs(FsError::new(code).syscall("scandir").path(path))
                }
            });
        }
        result
            .entries
            .into_iter()
            .filter(|entry| entry.kind == FileKind::File)
            .filter(|entry| {
                options.include.as_deref().map_or(true, |inc| include_matches(inc, &entry.name))
            })
            .map(|entry| entry.path)
            .collect()
    };

    debug!(pattern = label.as_str(), files = files.len(), "grep scan");
    let mut matches = Vec::new();
    let mut ticker = Ticker::new();
    for file in files {
        let data = match backend.read_file(&file).await {
            Ok(data) => data,
            // Unreadable files are skipped silently.
            Err(_) => continue,
        };
        if is_binary(&data) {
            continue;
        }
        let text = String::from_utf8_lossy(&data);
        scan_file(&file, &text, &regex, &options, &guard, &mut ticker, &mut matches)
            .map_err(|interrupt| interrupt_error(interrupt, &label, options.timeout))?;
    }
    Ok(matches)
}

fn scan_file(
    path: &str,
    text: &str,
    regex: &Regex,
    options: &GrepOptions,
    guard: &OpGuard,
    ticker: &mut Ticker,
    out: &mut Vec<GrepMatch>,
) -> Result<(), Interrupt> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut before: VecDeque<String> = VecDeque::with_capacity(options.before);
    let mut file_count = 0usize;

    for (index, line) in lines.iter().enumerate() {
        ticker.tick(guard)?;
        let line_no = index + 1;
        let capped = |count: usize| options.max_count.map_or(false, |max| count >= max);

        if options.invert {
            if !regex.is_match(line) && !capped(file_count) {
                out.push(GrepMatch {
                    path: path.to_string(),
                    line: line_no,
                    column: 1,
                    content: line.to_string(),
                    matched: String::new(),
                    before: before.iter().cloned().collect(),
                    after: after_context(&lines, index, options.after),
                });
                file_count += 1;
            }
        } else {
            for found in regex.find_iter(line) {
                if capped(file_count) {
                    break;
                }
                out.push(GrepMatch {
                    path: path.to_string(),
                    line: line_no,
                    column: found.start() + 1,
                    content: line.to_string(),
                    matched: found.as_str().to_string(),
                    before: before.iter().cloned().collect(),
                    after: after_context(&lines, index, options.after),
                });
                file_count += 1;
                if options.files_only {
                    return Ok(());
                }
            }
        }

        if capped(file_count) {
            break;
        }
        if options.before > 0 {
            if before.len() == options.before {
                before.pop_front();
            }
            before.push_back(line.to_string());
        }
    }
    Ok(())
}

fn after_context(lines: &[&str], index: usize, after: usize) -> Vec<String> {
    lines
        .iter()
        .skip(index + 1)
        .take(after)
        .map(|line| line.to_string())
        .collect()
}
