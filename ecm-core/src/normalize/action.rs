//! Action application for the Normalization Engine (`spec.md` §4.D).

use crate::regex_util;

/// Apply `action_type`/`action_value` to `input`, returning the
/// transformed string. Unrecognized action types and invalid regexes
/// pass the string through unchanged — rule evaluation logs and
/// continues rather than aborting the pipeline.
pub fn apply(action_type: &str, action_value: Option<&str>, input: &str) -> String {
    match action_type {
        "remove" => match action_value {
            Some(needle) if !needle.is_empty() => input.replace(needle, ""),
            _ => input.to_string(),
        },
        "replace" => {
            let Some(value) = action_value else {
                return input.to_string();
            };
            let mut parts = value.splitn(2, "=>");
            let (from, to) = match (parts.next(), parts.next()) {
                (Some(from), Some(to)) => (from, to),
                _ => return input.to_string(),
            };
            input.replace(from, to)
        }
        "regex_replace" => {
            let Some(value) = action_value else {
                return input.to_string();
            };
            let mut parts = value.splitn(2, "=>");
            let (pattern, replacement) = match (parts.next(), parts.next()) {
                (Some(p), Some(r)) => (p, r),
                _ => return input.to_string(),
            };
            match regex_util::compile(pattern) {
                Ok(re) => re.replace_all(input, translate_backrefs(replacement)).into_owned(),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid regex action, passing through");
                    input.to_string()
                }
            }
        }
        "strip_prefix" => match action_value {
            Some(prefix) => input.strip_prefix(prefix).unwrap_or(input).to_string(),
            None => input.to_string(),
        },
        "strip_suffix" => match action_value {
            Some(suffix) => input.strip_suffix(suffix).unwrap_or(input).to_string(),
            None => input.to_string(),
        },
        "normalize_prefix" => normalize_prefix(input),
        other => {
            tracing::warn!(action_type = other, "unknown action type, passing through");
            input.to_string()
        }
    }
}

/// `\1`..`\9` are the only backrefs the `regex` crate's replacement
/// syntax shares with the spec's; `$1` is `regex`'s own syntax, so
/// translate the former into the latter.
fn translate_backrefs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                out.push('$');
                out.push(*d);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Collapse leading whitespace/punctuation up to the first alphanumeric
/// run, leaving the rest of the string untouched.
fn normalize_prefix(input: &str) -> String {
    let trimmed = input.trim_start_matches(|c: char| !c.is_alphanumeric());
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_deletes_all_matches() {
        assert_eq!(apply("remove", Some("HD"), "ESPN HD HD"), "ESPN  ");
    }

    #[test]
    fn test_replace_substitutes_value() {
        assert_eq!(apply("replace", Some("HD=>UHD"), "ESPN HD"), "ESPN UHD");
    }

    #[test]
    fn test_regex_replace_with_backrefs() {
        let out = apply("regex_replace", Some(r"(\w+) HD=>\1 UHD"), "ESPN HD");
        assert_eq!(out, "ESPN UHD");
    }

    #[test]
    fn test_strip_prefix_and_suffix() {
        assert_eq!(apply("strip_prefix", Some("US: "), "US: ESPN"), "ESPN");
        assert_eq!(apply("strip_suffix", Some(" (HD)"), "ESPN (HD)"), "ESPN");
    }

    #[test]
    fn test_normalize_prefix_strips_punctuation() {
        assert_eq!(apply("normalize_prefix", None, "  ** ESPN"), "ESPN");
    }

    #[test]
    fn test_unknown_action_passes_through() {
        assert_eq!(apply("bogus", Some("x"), "ESPN"), "ESPN");
    }
}
