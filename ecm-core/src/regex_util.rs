//! Shared regex compatibility helpers.
//!
//! Operator-authored patterns (normalization rule conditions/actions,
//! XMLTV pattern variants) sometimes carry JavaScript-style named groups
//! `(?<name>...)`; the `regex` crate wants `(?P<name>...)`. A pre-pass
//! rewrites the former to the latter, careful not to touch lookaround
//! assertions `(?=...)` / `(?!...)` which share the `(?` prefix.

/// Rewrite `(?<name>` to `(?P<name>`, leaving `(?=`, `(?!`, `(?:`,
/// `(?P<` and plain `(` untouched.
pub fn rewrite_named_groups(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut rest = pattern;
    while !rest.is_empty() {
        if rest.starts_with("(?<") && !rest.starts_with("(?<=") {
            // JS-style named group: `(?<name>...)`. `(?<=...)` is a
            // lookbehind and must be left alone.
            out.push_str("(?P<");
            rest = &rest[3..];
        } else {
            let mut chars = rest.chars();
            let c = chars.next().expect("rest is non-empty");
            out.push(c);
            rest = chars.as_str();
        }
    }
    out
}

/// Compile a pattern after rewriting JS-style named groups.
pub fn compile(pattern: &str) -> Result<regex::Regex, regex::Error> {
    regex::Regex::new(&rewrite_named_groups(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_js_named_group() {
        let rewritten = rewrite_named_groups(r"(?<hour>\d{1,2}):(?<minute>\d{2})");
        assert_eq!(rewritten, r"(?P<hour>\d{1,2}):(?P<minute>\d{2})");
    }

    #[test]
    fn test_leaves_lookbehind_untouched() {
        let rewritten = rewrite_named_groups(r"(?<=foo)bar");
        assert_eq!(rewritten, r"(?<=foo)bar");
    }

    #[test]
    fn test_leaves_lookahead_and_noncapturing_untouched() {
        let rewritten = rewrite_named_groups(r"(?=foo)(?!bar)(?:baz)");
        assert_eq!(rewritten, r"(?=foo)(?!bar)(?:baz)");
    }

    #[test]
    fn test_leaves_native_named_group_untouched() {
        let rewritten = rewrite_named_groups(r"(?P<year>\d{4})");
        assert_eq!(rewritten, r"(?P<year>\d{4})");
    }

    #[test]
    fn test_compile_rewritten_pattern_matches() {
        let re = compile(r"(?<code>[A-Z]{3})\d+").unwrap();
        let caps = re.captures("ESP123").unwrap();
        assert_eq!(&caps["code"], "ESP");
    }

    #[test]
    fn test_mixed_groups_in_one_pattern() {
        let rewritten = rewrite_named_groups(r"(?<month>\d{1,2})/(?<day>\d{1,2})(?=\s)");
        assert_eq!(rewritten, r"(?P<month>\d{1,2})/(?P<day>\d{1,2})(?=\s)");
    }
}
