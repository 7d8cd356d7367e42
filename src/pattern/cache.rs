//! Process-wide LRU cache of compiled patterns.
//!
//! Keyed by `(pattern, dot, nocase)`; initialised on first use and
//! clearable for tests via [`clear_pattern_cache`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::errno::FsResult;

use super::{CompiledPattern, MatchOptions};

/// Default capacity of the global pattern cache.
pub const PATTERN_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pattern: String,
    dot: bool,
    nocase: bool,
}

static CACHE: Lazy<Mutex<LruCache<CacheKey, Arc<CompiledPattern>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(PATTERN_CACHE_CAPACITY).expect("non-zero capacity"),
    ))
});

/// Fetch a compiled pattern through the global cache.
pub(crate) fn cached_pattern(
    pattern: &str,
    options: MatchOptions,
) -> FsResult<Arc<CompiledPattern>> {
    let key =
        CacheKey { pattern: pattern.to_string(), dot: options.dot, nocase: options.nocase };
    if let Some(hit) = CACHE.lock().get(&key) {
        return Ok(hit.clone());
    }
    let compiled = Arc::new(CompiledPattern::compile(pattern, options)?);
    CACHE.lock().put(key, compiled.clone());
    Ok(compiled)
}

/// Match `path` against `pattern`, using the global cache.
pub fn match_path(pattern: &str, path: &str, options: MatchOptions) -> FsResult<bool> {
    Ok(cached_pattern(pattern, options)?.matches(path))
}

/// Drop every cached pattern.
pub fn clear_pattern_cache() {
    CACHE.lock().clear();
}

/// Number of patterns currently cached.
pub fn pattern_cache_len() -> usize {
    CACHE.lock().len()
}
