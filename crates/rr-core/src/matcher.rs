//! Request Matching
//!
//! Evaluates installed filter rules against a request URL the way the
//! browser's declarative engine does. Used by the in-memory filter engine and
//! the CLI to check what a rule set would do; the browser performs the real
//! matching itself.
//!
//! Url filters are lowered to a small op program:
//! - `||` → host anchor (host start or any label start)
//! - `|` at start → start anchor, `|` at end → end anchor
//! - `*` → skip any
//! - `^` → separator (non `[A-Za-z0-9_.%-]` byte or end of URL)
//!
//! Matching is ASCII case-insensitive for both url and regex filters.

use regex::{Regex, RegexBuilder};

use crate::error::FilterInstallError;
use crate::types::{CompiledFilterRule, MatchKind, ResourceType, ResourceTypes};
use crate::url::{find_case_insensitive, host_label_starts, is_at_separator};

// =============================================================================
// Pattern Program
// =============================================================================

/// Url filter opcodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternOp {
    /// Literal bytes that must appear at the current position
    FindLit(String),
    /// Skip any chars (for * wildcard)
    SkipAny,
    /// Separator char or end of URL
    AssertSeparator,
    /// Current position is end of URL
    AssertEnd,
}

/// How the program's first op is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    None,
    Start,
    Host,
}

#[derive(Debug, Clone)]
pub struct UrlFilterProgram {
    pub anchor: Anchor,
    pub ops: Vec<PatternOp>,
}

impl UrlFilterProgram {
    /// Lower a url filter. Returns `None` for filters the engine rejects.
    pub fn parse(filter: &str) -> Option<Self> {
        if filter.is_empty() || !filter.is_ascii() {
            return None;
        }

        let (anchor, mut body) = if let Some(rest) = filter.strip_prefix("||") {
            (Anchor::Host, rest)
        } else if let Some(rest) = filter.strip_prefix('|') {
            (Anchor::Start, rest)
        } else {
            (Anchor::None, filter)
        };

        let mut end_anchor = false;
        if let Some(rest) = body.strip_suffix('|') {
            end_anchor = true;
            body = rest;
        }

        if anchor == Anchor::Host && body.starts_with('*') {
            return None;
        }

        let mut ops = Vec::new();
        let mut literal = String::new();
        for c in body.chars() {
            match c {
                '*' | '^' => {
                    if !literal.is_empty() {
                        ops.push(PatternOp::FindLit(std::mem::take(&mut literal)));
                    }
                    if c == '*' {
                        if ops.last() != Some(&PatternOp::SkipAny) {
                            ops.push(PatternOp::SkipAny);
                        }
                    } else {
                        ops.push(PatternOp::AssertSeparator);
                    }
                }
                '|' => return None,
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            ops.push(PatternOp::FindLit(literal));
        }
        if end_anchor {
            ops.push(PatternOp::AssertEnd);
        }

        Some(Self { anchor, ops })
    }

    pub fn matches(&self, url: &str) -> bool {
        match self.anchor {
            Anchor::Start => run_ops(&self.ops, url, 0),
            Anchor::Host => host_label_starts(url)
                .into_iter()
                .any(|start| run_ops(&self.ops, url, start)),
            Anchor::None => (0..=url.len()).any(|start| run_ops(&self.ops, url, start)),
        }
    }
}

/// Verify `url[pos..]` against the op program, backtracking on wildcards.
fn run_ops(ops: &[PatternOp], url: &str, pos: usize) -> bool {
    let Some((op, rest)) = ops.split_first() else {
        return true;
    };
    let bytes = url.as_bytes();

    match op {
        PatternOp::FindLit(literal) => {
            let end = pos + literal.len();
            end <= bytes.len()
                && bytes[pos..end].eq_ignore_ascii_case(literal.as_bytes())
                && run_ops(rest, url, end)
        }
        PatternOp::SkipAny => {
            // Jump straight to candidate positions of the next literal
            if let Some(PatternOp::FindLit(next)) = rest.first() {
                let mut from = pos;
                while let Some(offset) = find_case_insensitive(&bytes[from..], next.as_bytes()) {
                    if run_ops(rest, url, from + offset) {
                        return true;
                    }
                    from += offset + 1;
                    if from > bytes.len() {
                        break;
                    }
                }
                false
            } else {
                (pos..=bytes.len()).any(|p| run_ops(rest, url, p))
            }
        }
        PatternOp::AssertSeparator => {
            if pos >= bytes.len() {
                run_ops(rest, url, pos)
            } else {
                is_at_separator(url, pos) && run_ops(rest, url, pos + 1)
            }
        }
        PatternOp::AssertEnd => pos == bytes.len() && run_ops(rest, url, pos),
    }
}

// =============================================================================
// Matcher
// =============================================================================

enum Program {
    UrlFilter(UrlFilterProgram),
    Regex(Regex),
}

impl Program {
    fn matches(&self, url: &str) -> bool {
        match self {
            Program::UrlFilter(program) => program.matches(url),
            Program::Regex(regex) => regex.is_match(url),
        }
    }
}

struct MatcherEntry {
    id: u32,
    priority: u32,
    resource_types: ResourceTypes,
    program: Program,
    redirect_url: String,
}

/// Result of matching a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Rule that determined the decision
    pub rule_id: u32,
    pub redirect_url: String,
}

/// Validate a single rule the way the engine would on `addRules`.
pub fn validate_rule(rule: &CompiledFilterRule) -> Result<(), FilterInstallError> {
    compile_entry(rule).map(|_| ())
}

fn compile_entry(rule: &CompiledFilterRule) -> Result<MatcherEntry, FilterInstallError> {
    if rule.id == 0 {
        return Err(FilterInstallError::InvalidId(rule.id));
    }

    let condition = &rule.condition;
    if condition.url_filter.is_some() && condition.regex_filter.is_some() {
        return Err(FilterInstallError::InvalidRule {
            id: rule.id,
            reason: "urlFilter and regexFilter are mutually exclusive".to_string(),
        });
    }

    let redirect_url = rule
        .redirect_to()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| FilterInstallError::InvalidRule {
            id: rule.id,
            reason: "redirect action requires a url".to_string(),
        })?
        .to_string();

    let program = match rule.match_kind() {
        MatchKind::Regex => {
            let pattern = rule.pattern();
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| FilterInstallError::InvalidRegex {
                    id: rule.id,
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            Program::Regex(regex)
        }
        MatchKind::Literal => match condition.url_filter.as_deref() {
            // No filter matches every URL
            None => Program::UrlFilter(UrlFilterProgram {
                anchor: Anchor::None,
                ops: Vec::new(),
            }),
            Some(filter) => Program::UrlFilter(UrlFilterProgram::parse(filter).ok_or_else(
                || FilterInstallError::InvalidUrlFilter {
                    id: rule.id,
                    pattern: filter.to_string(),
                },
            )?),
        },
    };

    let resource_types = if condition.resource_types.is_empty() {
        ResourceTypes::all()
    } else {
        rule.resource_types()
    };

    Ok(MatcherEntry {
        id: rule.id,
        priority: rule.priority,
        resource_types,
        program,
        redirect_url,
    })
}

/// Evaluates a set of installed rules.
#[derive(Default)]
pub struct Matcher {
    entries: Vec<MatcherEntry>,
}

impl Matcher {
    /// Compile `rules`, failing on the first rule the engine would reject.
    pub fn new(rules: &[CompiledFilterRule]) -> Result<Self, FilterInstallError> {
        let mut entries = rules
            .iter()
            .map(compile_entry)
            .collect::<Result<Vec<_>, _>>()?;
        // Highest priority first, then lowest id
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First applicable rule for `url` loaded as `resource_type`.
    pub fn match_request(&self, url: &str, resource_type: ResourceType) -> Option<MatchResult> {
        self.entries
            .iter()
            .filter(|entry| entry.resource_types.contains(resource_type.mask()))
            .find(|entry| entry.program.matches(url))
            .map(|entry| MatchResult {
                rule_id: entry.id,
                redirect_url: entry.redirect_url.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_filter(filter: &str) -> UrlFilterProgram {
        UrlFilterProgram::parse(filter).unwrap()
    }

    fn redirect(id: u32, kind: MatchKind, pattern: &str, to: &str) -> CompiledFilterRule {
        CompiledFilterRule::redirect(id, 1, kind, pattern, to, ResourceTypes::REDIRECTABLE)
    }

    #[test]
    fn test_parse_url_filter() {
        let program = url_filter("||ads^*banner|");
        assert_eq!(program.anchor, Anchor::Host);
        assert_eq!(
            program.ops,
            vec![
                PatternOp::FindLit("ads".to_string()),
                PatternOp::AssertSeparator,
                PatternOp::SkipAny,
                PatternOp::FindLit("banner".to_string()),
                PatternOp::AssertEnd,
            ]
        );
        assert!(UrlFilterProgram::parse("").is_none());
        assert!(UrlFilterProgram::parse("||*foo").is_none());
        assert!(UrlFilterProgram::parse("caf\u{e9}").is_none());
        assert!(UrlFilterProgram::parse("a|b").is_none());
    }

    #[test]
    fn test_substring_filter() {
        let program = url_filter("avatar-management");
        assert!(program.matches("https://ca.slack-edge.com/avatar-management/48"));
        assert!(program.matches("https://x.com/AVATAR-MANAGEMENT"));
        assert!(!program.matches("https://x.com/avatar"));
    }

    #[test]
    fn test_wildcards_and_anchors() {
        assert!(url_filter("abc*d").matches("https://x/abcxxxd"));
        assert!(url_filter("abc*d").matches("https://x/abcd"));
        assert!(!url_filter("abc*d").matches("https://x/abc"));

        assert!(url_filter("|https://a").matches("https://a/x"));
        assert!(!url_filter("|https://a").matches("http://https://a"));

        assert!(url_filter("/end|").matches("https://a/end"));
        assert!(!url_filter("/end|").matches("https://a/end/more"));
    }

    #[test]
    fn test_host_anchor() {
        let program = url_filter("||example^");
        assert!(program.matches("https://example/"));
        assert!(program.matches("https://sub.example/"));
        assert!(!program.matches("https://notexample/"));
        assert!(!program.matches("https://a.com/example/"));
    }

    #[test]
    fn test_separator() {
        let program = url_filter("/img^");
        assert!(program.matches("https://a/img"));
        assert!(program.matches("https://a/img?x=1"));
        assert!(!program.matches("https://a/imgs"));
    }

    #[test]
    fn test_backtracking_literal() {
        // First "ab" candidate fails the end anchor, a later one succeeds
        assert!(url_filter("*ab|").matches("https://x/ab/ab"));
        assert!(url_filter("a*b*c").matches("https://x/a-b-a-b-c"));
    }

    #[test]
    fn test_matcher_first_match_by_id() {
        let matcher = Matcher::new(&[
            redirect(2, MatchKind::Literal, "cdn", "https://second/"),
            redirect(1, MatchKind::Regex, "^https://cdn\\.example", "https://first/"),
        ])
        .unwrap();

        let result = matcher
            .match_request("https://cdn.example/a.png", ResourceType::Image)
            .unwrap();
        assert_eq!(result.rule_id, 1);
        assert_eq!(result.redirect_url, "https://first/");

        let result = matcher
            .match_request("https://other-cdn/a.png", ResourceType::Image)
            .unwrap();
        assert_eq!(result.rule_id, 2);
    }

    #[test]
    fn test_matcher_resource_types() {
        let matcher = Matcher::new(&[redirect(1, MatchKind::Literal, "cdn", "https://x/")]).unwrap();
        assert!(matcher.match_request("https://cdn/a.js", ResourceType::Script).is_none());
        assert!(matcher.match_request("https://cdn/a", ResourceType::Xmlhttprequest).is_some());
    }

    #[test]
    fn test_regex_case_insensitive() {
        let matcher =
            Matcher::new(&[redirect(1, MatchKind::Regex, "example\\.com/(48|128)$", "https://x/")])
                .unwrap();
        assert!(matcher.match_request("https://EXAMPLE.com/128", ResourceType::Image).is_some());
        assert!(matcher.match_request("https://example.com/256", ResourceType::Image).is_none());
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let err = Matcher::new(&[redirect(1, MatchKind::Regex, "(unclosed", "https://x/")]);
        assert!(matches!(err, Err(FilterInstallError::InvalidRegex { id: 1, .. })));

        let err = Matcher::new(&[redirect(0, MatchKind::Literal, "a", "https://x/")]);
        assert!(matches!(err, Err(FilterInstallError::InvalidId(0))));

        let err = Matcher::new(&[redirect(3, MatchKind::Literal, "a", "")]);
        assert!(matches!(err, Err(FilterInstallError::InvalidRule { id: 3, .. })));
    }
}
