//! Declarative request-filtering engine
//!
//! Dynamic rules are replaced through a single `update_dynamic_rules` call
//! that removes and adds in one step. An update that fails validation leaves
//! the installed set untouched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use rr_core::matcher::validate_rule;
use rr_core::types::{CompiledFilterRule, ResourceType};
use rr_core::{FilterInstallError, MatchResult, Matcher};

/// One atomic change to the dynamic rule set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleUpdate {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<CompiledFilterRule>,
}

#[async_trait]
pub trait FilterEngine: Send + Sync {
    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), FilterInstallError>;

    async fn get_dynamic_rules(&self) -> Result<Vec<CompiledFilterRule>, FilterInstallError>;
}

struct EngineState {
    rules: Vec<CompiledFilterRule>,
    matcher: Matcher,
}

/// In-process engine that validates and evaluates rules the way the
/// browser does.
pub struct MemoryFilterEngine {
    state: RwLock<EngineState>,
    updates: AtomicUsize,
    unavailable: AtomicBool,
}

impl Default for MemoryFilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFilterEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState {
                rules: Vec::new(),
                matcher: Matcher::default(),
            }),
            updates: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make subsequent calls fail as if the engine were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful updates applied.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Installed rules in id order.
    pub fn installed(&self) -> Vec<CompiledFilterRule> {
        self.state
            .read()
            .map(|state| state.rules.clone())
            .unwrap_or_default()
    }

    /// Evaluate a request against the installed rules.
    pub fn match_request(&self, url: &str, resource_type: ResourceType) -> Option<MatchResult> {
        let state = self.state.read().ok()?;
        state.matcher.match_request(url, resource_type)
    }

    fn check_available(&self) -> Result<(), FilterInstallError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FilterInstallError::Unavailable(
                "declarative request filtering is not available".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FilterEngine for MemoryFilterEngine {
    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), FilterInstallError> {
        self.check_available()?;

        let mut state = self
            .state
            .write()
            .map_err(|_| FilterInstallError::Unavailable("engine lock poisoned".to_string()))?;

        let removed: HashSet<u32> = update.remove_rule_ids.iter().copied().collect();
        let mut next: Vec<CompiledFilterRule> = state
            .rules
            .iter()
            .filter(|rule| !removed.contains(&rule.id))
            .cloned()
            .collect();

        let mut ids: HashSet<u32> = next.iter().map(|rule| rule.id).collect();
        for rule in &update.add_rules {
            validate_rule(rule)?;
            if !ids.insert(rule.id) {
                return Err(FilterInstallError::DuplicateId(rule.id));
            }
        }
        next.extend(update.add_rules);
        next.sort_by_key(|rule| rule.id);

        let matcher = Matcher::new(&next)?;
        state.rules = next;
        state.matcher = matcher;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_dynamic_rules(&self) -> Result<Vec<CompiledFilterRule>, FilterInstallError> {
        self.check_available()?;
        Ok(self.installed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rr_compiler::compile;
    use rr_core::types::UrlRule;

    #[tokio::test]
    async fn test_replace_rules() {
        let engine = MemoryFilterEngine::new();
        let first = compile(&[UrlRule::new("a.example", "https://x/")]);
        engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: first,
            })
            .await
            .unwrap();
        assert_eq!(engine.installed().len(), 1);

        let second = compile(&[
            UrlRule::new("b.example", "https://y/"),
            UrlRule::new("c.example", "https://z/"),
        ]);
        engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![1],
                add_rules: second,
            })
            .await
            .unwrap();

        let installed = engine.get_dynamic_rules().await.unwrap();
        assert_eq!(installed.len(), 2);
        assert_eq!(installed[0].pattern(), "b.example");
        assert_eq!(engine.update_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_state() {
        let engine = MemoryFilterEngine::new();
        engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: compile(&[UrlRule::new("keep", "https://x/")]),
            })
            .await
            .unwrap();

        let bad = compile(&[UrlRule::new("ok", "https://x/"), UrlRule::new("(unclosed", "https://y/")]);
        let err = engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![1],
                add_rules: bad,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FilterInstallError::InvalidRegex { id: 2, .. }));

        let installed = engine.installed();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].pattern(), "keep");
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let engine = MemoryFilterEngine::new();
        let rules = compile(&[UrlRule::new("a", "https://x/")]);
        engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: rules.clone(),
            })
            .await
            .unwrap();
        let err = engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: rules,
            })
            .await
            .unwrap_err();
        assert_eq!(err, FilterInstallError::DuplicateId(1));
    }

    #[tokio::test]
    async fn test_match_lowest_id() {
        let engine = MemoryFilterEngine::new();
        engine
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: compile(&[
                    UrlRule::new("avatar-management", "https://first/"),
                    UrlRule::new("avatar", "https://second/"),
                ]),
            })
            .await
            .unwrap();

        let hit = engine
            .match_request("https://cdn.example.com/avatar-management/48", ResourceType::Image)
            .unwrap();
        assert_eq!(hit.rule_id, 1);
        assert_eq!(hit.redirect_url, "https://first/");
        let hit = engine
            .match_request("https://cdn.example.com/AVATAR/1", ResourceType::MainFrame)
            .unwrap();
        assert_eq!(hit.rule_id, 2);
        // Scripts are outside the redirect scope
        assert!(engine
            .match_request("https://cdn.example.com/avatar/1", ResourceType::Script)
            .is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let engine = MemoryFilterEngine::new();
        engine.set_unavailable(true);
        assert!(matches!(
            engine.get_dynamic_rules().await,
            Err(FilterInstallError::Unavailable(_))
        ));
    }
}
