//! Small text helpers shared across the analysis pipelines.

/// Collapse all whitespace runs to single spaces and trim.
pub fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First non-empty line of a block of text, for one-line summaries.
pub fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_ws_collapses_runs() {
        assert_eq!(norm_ws("  SELECT   a\n FROM\tt "), "SELECT a FROM t");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn first_line_skips_blanks() {
        assert_eq!(first_line("\n\n  result: ok\nmore"), "result: ok");
    }
}
