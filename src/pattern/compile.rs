//! Pattern parsing: negation, brace expansion, segment translation.

use regex::RegexBuilder;

use crate::errno::{ErrnoKind, FsError, FsResult};

use super::{Alternative, CompiledPattern, MatchOptions, Segment};

/// Cap on brace-expansion fanout; beyond this the pattern is rejected.
const MAX_EXPANSIONS: usize = 1024;

pub(super) fn compile(pattern: &str, options: MatchOptions) -> FsResult<CompiledPattern> {
    let (negated, body) = strip_negation(pattern);
    let dot = options.dot || explicitly_matches_dot(body);
    let expanded = expand_braces(body)?;

    let mut alternatives = Vec::with_capacity(expanded.len());
    for alt in &expanded {
        alternatives.push(compile_alternative(alt, dot, options.nocase)?);
    }
    Ok(CompiledPattern {
        source: pattern.to_string(),
        negated,
        dot,
        nocase: options.nocase,
        alternatives,
    })
}

/// Strip leading `!` characters; an odd count negates.
fn strip_negation(pattern: &str) -> (bool, &str) {
    let mut negated = false;
    let mut rest = pattern;
    while let Some(stripped) = rest.strip_prefix('!') {
        negated = !negated;
        rest = stripped;
    }
    (negated, rest)
}

/// Heuristic carried from the original system: a pattern starting with
/// `.` or containing `/.` targets dotfiles explicitly. Brace
/// alternatives like `{.env,README}` do not trip it.
fn explicitly_matches_dot(pattern: &str) -> bool {
    pattern.starts_with('.') || pattern.contains("/.")
}

/// Expand nested `{a,b,c}` alternations into separate patterns.
fn expand_braces(pattern: &str) -> FsResult<Vec<String>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut open = None;
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => {
                if depth == 0 {
                    open = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let start = open.take().unwrap_or(0);
                        return expand_at(&chars, start, i, pattern);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    // No balanced brace group; the pattern stands as-is.
    Ok(vec![pattern.to_string()])
}

fn expand_at(chars: &[char], open: usize, close: usize, pattern: &str) -> FsResult<Vec<String>> {
    let prefix: String = chars[..open].iter().collect();
    let suffix: String = chars[close + 1..].iter().collect();
    let body = &chars[open + 1..close];

    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            '\\' => {
                current.push('\\');
                if i + 1 < body.len() {
                    current.push(body[i + 1]);
                    i += 1;
                }
            }
            '{' => {
                depth += 1;
                current.push('{');
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push('}');
            }
            ',' if depth == 0 => {
                alternatives.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
        i += 1;
    }
    alternatives.push(current);

    let mut out = Vec::new();
    for alt in alternatives {
        let candidate = format!("{prefix}{alt}{suffix}");
        for expanded in expand_braces(&candidate)? {
            out.push(expanded);
            if out.len() > MAX_EXPANSIONS {
                return Err(FsError::new(ErrnoKind::Einval).syscall("glob").path(pattern));
            }
        }
    }
    Ok(out)
}

fn compile_alternative(pattern: &str, dot: bool, nocase: bool) -> FsResult<Alternative> {
    let raw_segments: Vec<&str> = pattern.split('/').collect();
    let is_literal = !has_wildcards(pattern);

    let mut literal_prefix = Vec::new();
    let mut prefix_open = true;
    let mut segments = Vec::new();
    let mut has_globstar = false;
    let mut min_segments = 0usize;

    for segment in &raw_segments {
        if *segment == "**" {
            has_globstar = true;
            prefix_open = false;
            segments.push(Segment::Globstar);
            continue;
        }
        min_segments += 1;
        if prefix_open && !has_wildcards(segment) {
            literal_prefix.push(unescape(segment));
        } else {
            prefix_open = false;
        }
        segments.push(Segment::Rx(segment_regex(segment, dot, nocase, pattern)?));
    }

    let max_segments = if has_globstar { -1 } else { raw_segments.len() as isize };

    let whole = if has_globstar {
        None
    } else {
        let translated: Vec<String> = raw_segments
            .iter()
            .map(|segment| translate_segment(segment, dot))
            .collect::<FsResult<_>>()?;
        let source = format!("^{}$", translated.join("/"));
        Some(build_regex(&source, nocase, pattern)?)
    };

    Ok(Alternative {
        is_literal,
        literal: if is_literal { unescape(pattern) } else { String::new() },
        whole,
        segments,
        literal_prefix,
        min_segments,
        max_segments,
        has_globstar,
    })
}

fn has_wildcards(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '*' | '?' | '[' | '{' => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn segment_regex(segment: &str, dot: bool, nocase: bool, pattern: &str) -> FsResult<regex::Regex> {
    let source = format!("^{}$", translate_segment(segment, dot)?);
    build_regex(&source, nocase, pattern)
}

fn build_regex(source: &str, nocase: bool, pattern: &str) -> FsResult<regex::Regex> {
    RegexBuilder::new(source)
        .case_insensitive(nocase)
        .build()
        .map_err(|_| FsError::new(ErrnoKind::Einval).syscall("glob").path(pattern))
}

/// Translate one pattern segment to regex source (unanchored).
///
/// In default mode a `*` or `?` at the start of the segment must not
/// consume a leading dot; an explicit `.` literal at that position
/// still matches.
pub(super) fn translate_segment(segment: &str, dot: bool) -> FsResult<String> {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let at_start = i == 0;
        match chars[i] {
            '*' => {
                // A run of stars inside one segment collapses to one.
                while i + 1 < chars.len() && chars[i + 1] == '*' {
                    i += 1;
                }
                if at_start && !dot {
                    out.push_str("(?:[^/.][^/]*)?");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => {
                if at_start && !dot {
                    out.push_str("[^/.]");
                } else {
                    out.push_str("[^/]");
                }
            }
            '[' => match parse_class(&chars, i) {
                Some((class, next)) => {
                    out.push_str(&class);
                    i = next;
                    continue;
                }
                None => out.push_str(&regex::escape("[")),
            },
            '\\' => {
                i += 1;
                if i < chars.len() {
                    out.push_str(&regex::escape(&chars[i].to_string()));
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    Ok(out)
}

/// Parse a character class starting at `open`; returns the regex class
/// and the index one past the closing bracket, or `None` when the
/// class never closes.
fn parse_class(chars: &[char], open: usize) -> Option<(String, usize)> {
    let mut i = open + 1;
    let mut body = String::new();
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }
    // A `]` immediately after the opener is a literal member.
    let mut first = true;
    while i < chars.len() {
        let c = chars[i];
        if c == ']' && !first {
            if body.is_empty() {
                return None;
            }
            let prefix = if negated { "^" } else { "" };
            return Some((format!("[{prefix}{body}]"), i + 1));
        }
        first = false;
        match c {
            '\\' => {
                i += 1;
                if i < chars.len() {
                    push_class_char(&mut body, chars[i]);
                }
            }
            '-' => body.push('-'),
            c => push_class_char(&mut body, c),
        }
        i += 1;
    }
    None
}

fn push_class_char(body: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '&' | '~') {
        body.push('\\');
    }
    body.push(c);
}
