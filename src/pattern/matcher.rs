//! Path matching against compiled alternatives.

use super::{Alternative, CompiledPattern, Segment};

pub(crate) fn alt_matches(alt: &Alternative, path: &str, pattern: &CompiledPattern) -> bool {
    let options = pattern.options();
    if alt.is_literal {
        return if options.nocase {
            alt.literal.eq_ignore_ascii_case(path)
        } else {
            alt.literal == path
        };
    }

    let segments: Vec<&str> = path.split('/').collect();
    let count = segments.len();
    if count < alt.min_segments {
        return false;
    }
    if alt.max_segments >= 0 && count as isize > alt.max_segments {
        return false;
    }

    match &alt.whole {
        Some(regex) => regex.is_match(path),
        None => globstar_match(alt, &segments, options.dot),
    }
}

/// Memoised `**` expansion over `(pattern_index, path_index)`.
///
/// Each globstar tries "consume zero" first, then "consume one more
/// path segment". In default mode a globstar will not consume a
/// leading-dot segment.
fn globstar_match(alt: &Alternative, segments: &[&str], dot: bool) -> bool {
    let mut memo = vec![vec![None; segments.len() + 1]; alt.segments.len() + 1];
    step(&alt.segments, segments, 0, 0, dot, &mut memo)
}

fn step(
    pattern: &[Segment],
    path: &[&str],
    pi: usize,
    si: usize,
    dot: bool,
    memo: &mut [Vec<Option<bool>>],
) -> bool {
    if let Some(answer) = memo[pi][si] {
        return answer;
    }
    let answer = if pi == pattern.len() {
        si == path.len()
    } else {
        match &pattern[pi] {
            Segment::Globstar => {
                step(pattern, path, pi + 1, si, dot, memo)
                    || (si < path.len()
                        && (dot || !path[si].starts_with('.'))
                        && step(pattern, path, pi, si + 1, dot, memo))
            }
            Segment::Rx(regex) => {
                si < path.len()
                    && regex.is_match(path[si])
                    && step(pattern, path, pi + 1, si + 1, dot, memo)
            }
        }
    };
    memo[pi][si] = Some(answer);
    answer
}
