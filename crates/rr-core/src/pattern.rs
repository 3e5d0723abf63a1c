//! Pattern classification and literal escaping
//!
//! URL rule sources are either handed to the engine as a wildcard url filter or
//! as a regex filter. The split is a character heuristic, not a syntax check:
//! a hostname such as `example.com` contains `.` and therefore counts as regex.

use crate::types::MatchKind;

/// Characters that carry meaning in a regular expression.
const REGEX_META: &[char] = &[
    '[', ']', '(', ')', '{', '}', '.', '*', '+', '?', '^', '$', '|', '\\',
];

#[inline]
fn is_regex_meta(c: char) -> bool {
    REGEX_META.contains(&c)
}

/// Decide how a URL rule source is matched by the engine.
pub fn classify(pattern: &str) -> MatchKind {
    if pattern.starts_with('^') || pattern.chars().any(is_regex_meta) {
        MatchKind::Regex
    } else {
        MatchKind::Literal
    }
}

/// Escape regex metacharacters so `text` matches only itself.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if is_regex_meta(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build a regex that matches `text` literally.
pub fn literal_regex(text: &str) -> Result<regex::Regex, regex::Error> {
    regex::Regex::new(&escape_literal(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_literal() {
        assert_eq!(classify("example"), MatchKind::Literal);
        assert_eq!(classify("avatar-management/48"), MatchKind::Literal);
        assert_eq!(classify("https://x"), MatchKind::Literal);
        assert_eq!(classify(""), MatchKind::Literal);
    }

    #[test]
    fn test_classify_regex() {
        assert_eq!(classify("^https://x.com"), MatchKind::Regex);
        assert_eq!(classify("^start"), MatchKind::Regex);
        assert_eq!(classify("example.com"), MatchKind::Regex);
        assert_eq!(classify("*example.com*"), MatchKind::Regex);
        assert_eq!(classify("*avatar-management.*/(48|128|256)$"), MatchKind::Regex);
        assert_eq!(classify("a|b"), MatchKind::Regex);
        assert_eq!(classify("back\\slash"), MatchKind::Regex);
    }

    #[test]
    fn test_classify_each_metachar() {
        for c in REGEX_META {
            let pattern = format!("abc{}def", c);
            assert_eq!(classify(&pattern), MatchKind::Regex, "pattern {pattern}");
        }
        for c in ['-', '/', ':', '=', '&', '%', '#', '@', '~'] {
            let pattern = format!("abc{}def", c);
            assert_eq!(classify(&pattern), MatchKind::Literal, "pattern {pattern}");
        }
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("Hello (World)"), "Hello \\(World\\)");
        assert_eq!(escape_literal("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_literal("plain"), "plain");
        assert_eq!(escape_literal("\\"), "\\\\");
    }

    #[test]
    fn test_literal_regex_matches_itself() {
        let re = literal_regex("Hello (World) [x]+?").unwrap();
        assert!(re.is_match("say Hello (World) [x]+? now"));
        assert!(!re.is_match("Hello World x"));
    }
}
