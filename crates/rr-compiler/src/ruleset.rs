//! Declarative ruleset output
//!
//! Writes compiled rules as the JSON array the browser accepts both for
//! `updateDynamicRules({addRules})` and for a static rule resource.

use rr_core::matcher::validate_rule;
use rr_core::types::CompiledFilterRule;
use rr_core::FilterInstallError;

/// Serialize compiled rules to a JSON ruleset.
pub fn build_ruleset(rules: &[CompiledFilterRule], pretty: bool) -> String {
    // Plain structs with string keys always serialize
    let result = if pretty {
        serde_json::to_string_pretty(rules)
    } else {
        serde_json::to_string(rules)
    };
    result.unwrap_or_else(|_| "[]".to_string())
}

/// Parse a JSON ruleset back into compiled rules.
pub fn parse_ruleset(text: &str) -> Result<Vec<CompiledFilterRule>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Check every rule the way the engine would, reporting all rejections.
pub fn validate_ruleset(rules: &[CompiledFilterRule]) -> Vec<FilterInstallError> {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id) {
            errors.push(FilterInstallError::DuplicateId(rule.id));
            continue;
        }
        if let Err(e) = validate_rule(rule) {
            errors.push(e);
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use rr_core::types::UrlRule;

    #[test]
    fn test_ruleset_json() {
        let rules = compile(&[
            UrlRule::new("cdn", "https://a/"),
            UrlRule::new("^https://b\\.com", "https://c/"),
        ]);
        let json = build_ruleset(&rules, false);
        assert!(json.starts_with('['));
        assert!(json.contains(r#""urlFilter":"cdn""#));
        assert!(json.contains(r#""regexFilter":"^https://b\\.com""#));
        assert!(json.contains(r#""type":"redirect""#));
        assert_eq!(parse_ruleset(&json).unwrap(), rules);
    }

    #[test]
    fn test_validate_ruleset() {
        let mut rules = compile(&[
            UrlRule::new("ok", "https://a/"),
            UrlRule::new("(broken", "https://b/"),
        ]);
        assert_eq!(validate_ruleset(&rules).len(), 1);

        rules[1] = rules[0].clone();
        assert_eq!(validate_ruleset(&rules), vec![FilterInstallError::DuplicateId(1)]);
    }
}
