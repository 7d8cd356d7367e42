#![cfg(test)]

use super::*;

fn matches(pattern: &str, path: &str) -> bool {
    match_path(pattern, path, MatchOptions::default()).expect("pattern compiles")
}

fn matches_with(pattern: &str, path: &str, options: MatchOptions) -> bool {
    match_path(pattern, path, options).expect("pattern compiles")
}

#[test]
fn literal_patterns_use_string_equality() {
    let compiled = create_matcher("src/lib.rs", MatchOptions::default()).unwrap();
    assert!(compiled.is_literal());
    assert!(compiled.matches("src/lib.rs"));
    assert!(!compiled.matches("src/lib.rss"));
    assert!(!compiled.matches("Src/lib.rs"));
}

#[test]
fn literal_nocase() {
    let options = MatchOptions { nocase: true, ..Default::default() };
    assert!(matches_with("README.md", "readme.MD", options));
}

#[test]
fn single_star_stays_within_segment() {
    assert!(matches("*.ts", "index.ts"));
    assert!(!matches("*.ts", "src/index.ts"));
    assert!(matches("src/*.ts", "src/index.ts"));
    assert!(!matches("src/*.ts", "src/nested/index.ts"));
}

#[test]
fn question_mark_matches_one_char() {
    assert!(matches("fil?.txt", "file.txt"));
    assert!(!matches("fil?.txt", "fil.txt"));
    assert!(!matches("fil?.txt", "filee.txt"));
}

#[test]
fn globstar_spans_segments() {
    assert!(matches("src/**/*.ts", "src/a/b/c.ts"));
    assert!(matches("src/**/*.ts", "src/top.ts"));
    assert!(!matches("src/**/*.ts", "lib/a.ts"));
    assert!(matches("**", "deeply/nested/path"));
    assert!(matches("**/c.ts", "a/b/c.ts"));
}

#[test]
fn globstar_respects_dot_rule() {
    assert!(!matches("**/*.ts", ".hidden/a.ts"));
    let options = MatchOptions { dot: true, ..Default::default() };
    assert!(matches_with("**/*.ts", ".hidden/a.ts", options));
}

#[test]
fn dotfile_rule_for_star() {
    assert!(!matches("*.ts", ".hidden.ts"));
    let options = MatchOptions { dot: true, ..Default::default() };
    assert!(matches_with("*.ts", ".hidden.ts", options));
}

#[test]
fn explicit_dot_literal_matches() {
    assert!(matches(".env", ".env"));
    assert!(matches(".*", ".bashrc"));
    assert!(matches("config/.*", "config/.secret"));
}

#[test]
fn pattern_targeting_dotfiles_implies_dot() {
    let compiled = create_matcher(".cache/**", MatchOptions::default()).unwrap();
    assert!(compiled.dot());
    let compiled = create_matcher("src/.hidden/*", MatchOptions::default()).unwrap();
    assert!(compiled.dot());
    let compiled = create_matcher("src/*.ts", MatchOptions::default()).unwrap();
    assert!(!compiled.dot());
}

#[test]
fn brace_alternatives_do_not_imply_dot() {
    // Known carried behaviour: the heuristic looks at the raw pattern,
    // so `{.env,README}` does not set dot mode even though one
    // alternative targets a dotfile.
    let compiled = create_matcher("{.env,README}", MatchOptions::default()).unwrap();
    assert!(!compiled.dot());
    assert!(compiled.matches(".env"));
    assert!(compiled.matches("README"));
}

#[test]
fn character_classes() {
    assert!(matches("file[abc].txt", "filea.txt"));
    assert!(!matches("file[abc].txt", "filed.txt"));
    assert!(matches("file[a-z].txt", "filem.txt"));
    assert!(!matches("file[!abc].txt", "filea.txt"));
    assert!(matches("file[!abc].txt", "filex.txt"));
    assert!(matches("file[^abc].txt", "filex.txt"));
}

#[test]
fn brace_expansion() {
    assert!(matches("*.{ts,js}", "app.ts"));
    assert!(matches("*.{ts,js}", "app.js"));
    assert!(!matches("*.{ts,js}", "app.rs"));
    assert!(matches("src/{a,b}/*.rs", "src/a/lib.rs"));
    assert!(matches("src/{a,b}/*.rs", "src/b/lib.rs"));
}

#[test]
fn nested_brace_expansion() {
    assert!(matches("{a,b{c,d}}.txt", "a.txt"));
    assert!(matches("{a,b{c,d}}.txt", "bc.txt"));
    assert!(matches("{a,b{c,d}}.txt", "bd.txt"));
    assert!(!matches("{a,b{c,d}}.txt", "b.txt"));
}

#[test]
fn escaped_wildcards_are_literal() {
    assert!(matches(r"literal\*.txt", "literal*.txt"));
    assert!(!matches(r"literal\*.txt", "literalx.txt"));
    assert!(matches(r"q\?.md", "q?.md"));
}

#[test]
fn negation_inverts() {
    assert!(!matches("!*.ts", "a.ts"));
    assert!(matches("!*.ts", "a.js"));
}

#[test]
fn double_negation_cancels() {
    for (pattern, path) in [("*.ts", "a.ts"), ("*.ts", "a.js"), ("src/**", "src/x/y")] {
        let plain = matches(pattern, path);
        let double = matches(&format!("!!{pattern}"), path);
        let single = matches(&format!("!{pattern}"), path);
        assert_eq!(double, plain);
        assert_eq!(single, !plain);
    }
}

#[test]
fn segment_bounds_reject_early() {
    let compiled = create_matcher("a/b/c", MatchOptions::default()).unwrap();
    assert!(!compiled.matches("a/b"));
    assert!(!compiled.matches("a/b/c/d"));

    let globstar = create_matcher("a/**/z", MatchOptions::default()).unwrap();
    assert!(globstar.matches("a/z"));
    assert!(globstar.matches("a/b/c/z"));
    assert!(!globstar.matches("a"));
}

#[test]
fn literal_prefix_extraction() {
    let compiled = create_matcher("src/core/**/*.ts", MatchOptions::default()).unwrap();
    assert_eq!(compiled.literal_prefix(), ["src", "core"]);
    assert!(compiled.has_globstar());

    let no_prefix = create_matcher("**/*.ts", MatchOptions::default()).unwrap();
    assert!(no_prefix.literal_prefix().is_empty());
}

#[test]
fn matcher_agrees_with_cached_match() {
    let options = MatchOptions::default();
    let compiled = create_matcher("src/**/*.rs", options).unwrap();
    for path in ["src/a.rs", "src/x/y/b.rs", "lib/a.rs", "src/.h/c.rs"] {
        assert_eq!(compiled.matches(path), matches("src/**/*.rs", path), "path {path}");
    }
}

#[test]
fn compiled_patterns_short_circuit() {
    let batch = CompiledPatterns::compile(
        &["*.md".to_string(), "*.rs".to_string(), "docs/**".to_string()],
        MatchOptions::default(),
    )
    .unwrap();
    assert_eq!(batch.first_match("lib.rs"), Some(1));
    assert_eq!(batch.first_match("README.md"), Some(0));
    assert_eq!(batch.first_match("a.py"), None);
    assert!(batch.match_all("docs/guide/ch1.md"));
}

#[test]
fn global_cache_round_trip() {
    // Other tests share the process-wide cache, so only monotone
    // assertions are safe here.
    clear_pattern_cache();
    assert!(matches("cache-probe-*.txt", "cache-probe-1.txt"));
    assert!(pattern_cache_len() >= 1);
    // Same pattern with different options is a distinct entry.
    let options = MatchOptions { dot: true, ..Default::default() };
    assert!(matches_with("cache-probe-*.txt", "cache-probe-1.txt", options));
    assert!(pattern_cache_len() >= 2);
    // Repeating a cached probe must not error or change the answer.
    assert!(matches("cache-probe-*.txt", "cache-probe-2.txt"));
    clear_pattern_cache();
}

#[test]
fn trailing_slash_is_preserved() {
    assert!(matches("build/", "build/"));
    assert!(!matches("build/", "build"));
}

#[test]
fn runaway_brace_expansion_is_einval() {
    // Eleven groups expand to 2048 alternatives, past the fanout cap.
    let overflow = "{a,b}".repeat(11);
    let err = create_matcher(&overflow, MatchOptions::default()).expect_err("expansion capped");
    assert_eq!(err.kind(), crate::errno::ErrnoKind::Einval);
}
