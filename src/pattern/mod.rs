//! Glob pattern compilation and matching.
//!
//! Patterns support `*`, `?`, `**`, character classes, nested brace
//! expansion, backslash escapes, and leading `!` negation. Compilation
//! produces either a single anchored regex (no globstar) or one regex
//! per non-globstar segment with `**` handled by a memoised matcher.

mod cache;
mod compile;
mod matcher;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use regex::Regex;

pub use cache::{clear_pattern_cache, match_path, pattern_cache_len};
pub(crate) use cache::cached_pattern;

use crate::errno::FsResult;

/// Options influencing compilation and matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct MatchOptions {
    /// Allow `*`/`?`/`**` to match leading-dot entries.
    pub dot: bool,
    /// Case-insensitive matching.
    pub nocase: bool,
}

/// One pattern segment after splitting on `/`.
#[derive(Debug)]
pub(crate) enum Segment {
    /// A `**` segment matching zero or more path segments.
    Globstar,
    /// Any other segment, compiled to an anchored regex.
    Rx(Regex),
}

/// A single brace-expansion alternative of a pattern.
#[derive(Debug)]
pub(crate) struct Alternative {
    pub(crate) is_literal: bool,
    /// Unescaped literal text; only meaningful when `is_literal`.
    pub(crate) literal: String,
    /// Single anchored regex when the alternative has no globstar.
    pub(crate) whole: Option<Regex>,
    /// Segment matchers when the alternative has a globstar.
    pub(crate) segments: Vec<Segment>,
    /// Longest leading run of wildcard-free segments.
    pub(crate) literal_prefix: Vec<String>,
    pub(crate) min_segments: usize,
    /// `-1` means unbounded (globstar present).
    pub(crate) max_segments: isize,
    pub(crate) has_globstar: bool,
}

/// A compiled glob pattern.
#[derive(Debug)]
pub struct CompiledPattern {
    source: String,
    negated: bool,
    dot: bool,
    nocase: bool,
    alternatives: Vec<Alternative>,
}

impl CompiledPattern {
    /// Compile a pattern with the given options.
    ///
    /// A pattern that starts with `.` or contains `/.` explicitly
    /// targets dotfiles and implies `dot=true` for itself.
    pub fn compile(pattern: &str, options: MatchOptions) -> FsResult<Self> {
        compile::compile(pattern, options)
    }

    /// The pattern text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the pattern is negated with a leading `!`.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// True when every alternative is a plain literal path.
    pub fn is_literal(&self) -> bool {
        self.alternatives.iter().all(|alt| alt.is_literal)
    }

    /// True when any alternative contains a `**` segment.
    pub fn has_globstar(&self) -> bool {
        self.alternatives.iter().any(|alt| alt.has_globstar)
    }

    /// Effective dotfile mode (explicit target or option).
    pub fn dot(&self) -> bool {
        self.dot
    }

    /// Longest wildcard-free leading segments shared semantics: the
    /// prefix of the first alternative (brace patterns report empty).
    pub fn literal_prefix(&self) -> &[String] {
        if self.alternatives.len() == 1 {
            &self.alternatives[0].literal_prefix
        } else {
            &[]
        }
    }

    /// Upper bound on matched segment counts; `-1` when unbounded.
    pub fn max_segments(&self) -> isize {
        let mut max = 0;
        for alt in &self.alternatives {
            if alt.max_segments < 0 {
                return -1;
            }
            max = max.max(alt.max_segments);
        }
        max
    }

    /// Test a path against the pattern, honouring negation.
    pub fn matches(&self, path: &str) -> bool {
        let hit = self.alternatives.iter().any(|alt| matcher::alt_matches(alt, path, self));
        hit != self.negated
    }

    pub(crate) fn options(&self) -> MatchOptions {
        MatchOptions { dot: self.dot, nocase: self.nocase }
    }
}

/// A batch of compiled patterns matched together.
#[derive(Debug, Clone, Default)]
pub struct CompiledPatterns {
    patterns: Vec<Arc<CompiledPattern>>,
}

impl CompiledPatterns {
    /// Compile every pattern once, up front.
    pub fn compile(patterns: &[String], options: MatchOptions) -> FsResult<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            compiled.push(Arc::new(CompiledPattern::compile(pattern, options)?));
        }
        Ok(Self { patterns: compiled })
    }

    /// Number of patterns in the batch.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Index of the first pattern matching `path`, if any.
    ///
    /// Short-circuits on the first hit.
    pub fn first_match(&self, path: &str) -> Option<usize> {
        self.patterns.iter().position(|pattern| pattern.matches(path))
    }

    /// True when any pattern matches `path`.
    pub fn match_all(&self, path: &str) -> bool {
        self.first_match(path).is_some()
    }

    /// The compiled patterns in input order.
    pub fn patterns(&self) -> &[Arc<CompiledPattern>] {
        &self.patterns
    }
}

/// Compile a matcher the caller owns; bypasses the global cache.
pub fn create_matcher(pattern: &str, options: MatchOptions) -> FsResult<CompiledPattern> {
    CompiledPattern::compile(pattern, options)
}
