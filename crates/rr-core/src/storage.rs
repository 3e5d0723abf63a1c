//! Rule Store schema
//!
//! Key names, typed decoding of raw storage items and the one-time migration
//! from the legacy rule shapes. Everything here is pure: the async storage
//! area lives in `rr-sync`.
//!
//! # Schema versions
//!
//! - v1: `rules: [{sourceUrl, targetUrl}]`, `textRules: [{sourceText, targetText}]`
//! - v2: `urlRules: [{from, to, enabled}]`, `textRules: [{from, to, enabled}]`, `enabled`
//!
//! Readers accept both shapes per entry; writers only ever produce v2.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::types::{LegacyTextRule, LegacyUrlRule, StorageSnapshot, TextRule, UrlRule};

pub const SCHEMA_VERSION: u32 = 2;

/// Storage keys.
pub mod keys {
    pub const URL_RULES: &str = "urlRules";
    pub const TEXT_RULES: &str = "textRules";
    pub const ENABLED: &str = "enabled";
    /// v1 URL rules. Read by migration, never written.
    pub const LEGACY_URL_RULES: &str = "rules";
}

/// Keys read by the background controller in a single storage call.
pub const URL_STATE_KEYS: [&str; 2] = [keys::URL_RULES, keys::ENABLED];
/// Keys read by a content rewriter in a single storage call.
pub const TEXT_STATE_KEYS: [&str; 2] = [keys::TEXT_RULES, keys::ENABLED];
/// Keys inspected by migration.
pub const MIGRATION_KEYS: [&str; 3] = [keys::LEGACY_URL_RULES, keys::URL_RULES, keys::TEXT_RULES];
pub const ALL_KEYS: [&str; 3] = [keys::URL_RULES, keys::TEXT_RULES, keys::ENABLED];

/// Raw key/value items as exchanged with the storage area.
pub type StorageItems = Map<String, Value>;

// =============================================================================
// Rule Shapes
// =============================================================================

/// Shape of a single stored rule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleShape {
    Legacy,
    Current,
}

impl RuleShape {
    pub fn schema_version(self) -> u32 {
        match self {
            RuleShape::Legacy => 1,
            RuleShape::Current => SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum StoredUrlRule {
    Current(UrlRule),
    Legacy(LegacyUrlRule),
}

impl StoredUrlRule {
    fn shape(&self) -> RuleShape {
        match self {
            StoredUrlRule::Current(_) => RuleShape::Current,
            StoredUrlRule::Legacy(_) => RuleShape::Legacy,
        }
    }

    fn into_current(self) -> UrlRule {
        match self {
            StoredUrlRule::Current(rule) => rule,
            StoredUrlRule::Legacy(rule) => rule.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum StoredTextRule {
    Current(TextRule),
    Legacy(LegacyTextRule),
}

impl StoredTextRule {
    fn shape(&self) -> RuleShape {
        match self {
            StoredTextRule::Current(_) => RuleShape::Current,
            StoredTextRule::Legacy(_) => RuleShape::Legacy,
        }
    }

    fn into_current(self) -> TextRule {
        match self {
            StoredTextRule::Current(rule) => rule,
            StoredTextRule::Legacy(rule) => rule.into(),
        }
    }
}

fn decode_list<T: for<'de> Deserialize<'de>>(
    items: &StorageItems,
    key: &str,
) -> Result<Option<Vec<T>>, StorageError> {
    match items.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Vec::<T>::deserialize(value)
            .map(Some)
            .map_err(|e| StorageError::Malformed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

// =============================================================================
// Typed Reads
// =============================================================================

/// URL rules under `urlRules`, or `None` when the key is absent.
pub fn read_url_rules(items: &StorageItems) -> Result<Option<Vec<UrlRule>>, StorageError> {
    let stored: Option<Vec<StoredUrlRule>> = decode_list(items, keys::URL_RULES)?;
    Ok(stored.map(|rules| rules.into_iter().map(StoredUrlRule::into_current).collect()))
}

/// Text rules under `textRules`, or `None` when the key is absent.
/// Entries still in the legacy shape are converted in memory.
pub fn read_text_rules(items: &StorageItems) -> Result<Option<Vec<TextRule>>, StorageError> {
    let stored: Option<Vec<StoredTextRule>> = decode_list(items, keys::TEXT_RULES)?;
    Ok(stored.map(|rules| rules.into_iter().map(StoredTextRule::into_current).collect()))
}

/// The global flag, or `None` when absent.
pub fn read_enabled(items: &StorageItems) -> Result<Option<bool>, StorageError> {
    match items.get(keys::ENABLED) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(enabled)) => Ok(Some(*enabled)),
        Some(other) => Err(StorageError::Malformed {
            key: keys::ENABLED.to_string(),
            reason: format!("expected boolean, found {}", other),
        }),
    }
}

/// Assemble a snapshot, filling absent keys with defaults.
pub fn read_snapshot(items: &StorageItems) -> Result<StorageSnapshot, StorageError> {
    Ok(StorageSnapshot {
        url_rules: read_url_rules(items)?.unwrap_or_default(),
        text_rules: read_text_rules(items)?.unwrap_or_default(),
        enabled: read_enabled(items)?.unwrap_or(true),
    })
}

// =============================================================================
// Typed Writes
// =============================================================================

fn to_value<T: Serialize>(key: &str, value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn url_rules_item(rules: &[UrlRule]) -> Result<StorageItems, StorageError> {
    let mut items = StorageItems::new();
    items.insert(keys::URL_RULES.to_string(), to_value(keys::URL_RULES, &rules)?);
    Ok(items)
}

pub fn text_rules_item(rules: &[TextRule]) -> Result<StorageItems, StorageError> {
    let mut items = StorageItems::new();
    items.insert(keys::TEXT_RULES.to_string(), to_value(keys::TEXT_RULES, &rules)?);
    Ok(items)
}

pub fn enabled_item(enabled: bool) -> StorageItems {
    let mut items = StorageItems::new();
    items.insert(keys::ENABLED.to_string(), Value::Bool(enabled));
    items
}

pub fn snapshot_items(snapshot: &StorageSnapshot) -> Result<StorageItems, StorageError> {
    let mut items = url_rules_item(&snapshot.url_rules)?;
    items.extend(text_rules_item(&snapshot.text_rules)?);
    items.extend(enabled_item(snapshot.enabled));
    Ok(items)
}

// =============================================================================
// Migration
// =============================================================================

/// Writes needed to bring storage to the current schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub writes: StorageItems,
    /// Number of URL rules moved from `rules` to `urlRules`
    pub url_rules_migrated: Option<usize>,
    /// Number of text rules rewritten in place under `textRules`
    pub text_rules_migrated: Option<usize>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Compute the migration for items read with [`MIGRATION_KEYS`].
///
/// URL rules migrate only when `urlRules` is absent and legacy `rules` is
/// present. Text rules migrate when any `textRules` entry is legacy-shaped.
/// Applying the returned writes and planning again yields an empty plan.
pub fn plan_migration(items: &StorageItems) -> Result<MigrationPlan, StorageError> {
    let mut plan = MigrationPlan::default();

    let has_current_url_rules = !matches!(items.get(keys::URL_RULES), None | Some(Value::Null));
    if !has_current_url_rules {
        let legacy: Option<Vec<StoredUrlRule>> = decode_list(items, keys::LEGACY_URL_RULES)?;
        if let Some(legacy) = legacy {
            let rules: Vec<UrlRule> = legacy.into_iter().map(StoredUrlRule::into_current).collect();
            plan.url_rules_migrated = Some(rules.len());
            plan.writes.extend(url_rules_item(&rules)?);
        }
    }

    let text: Option<Vec<StoredTextRule>> = decode_list(items, keys::TEXT_RULES)?;
    if let Some(text) = text {
        if text.iter().any(|rule| rule.shape() == RuleShape::Legacy) {
            let rules: Vec<TextRule> = text.into_iter().map(StoredTextRule::into_current).collect();
            plan.text_rules_migrated = Some(rules.len());
            plan.writes.extend(text_rules_item(&rules)?);
        }
    }

    Ok(plan)
}

/// Detect the schema version of stored items (lowest shape found wins).
pub fn detect_schema_version(items: &StorageItems) -> Result<u32, StorageError> {
    let url: Option<Vec<StoredUrlRule>> = decode_list(items, keys::URL_RULES)?;
    let legacy: Option<Vec<StoredUrlRule>> = decode_list(items, keys::LEGACY_URL_RULES)?;
    let text: Option<Vec<StoredTextRule>> = decode_list(items, keys::TEXT_RULES)?;

    if url.is_none() && legacy.is_some() {
        return Ok(RuleShape::Legacy.schema_version());
    }

    let shapes = url
        .iter()
        .flatten()
        .map(StoredUrlRule::shape)
        .chain(text.iter().flatten().map(StoredTextRule::shape));

    Ok(shapes
        .map(RuleShape::schema_version)
        .min()
        .unwrap_or(SCHEMA_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(value: Value) -> StorageItems {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn apply(store: &mut StorageItems, plan: &MigrationPlan) {
        for (key, value) in &plan.writes {
            store.insert(key.clone(), value.clone());
        }
    }

    #[test]
    fn test_read_snapshot_defaults() {
        let snapshot = read_snapshot(&StorageItems::new()).unwrap();
        assert_eq!(snapshot, StorageSnapshot::default());
    }

    #[test]
    fn test_read_accepts_both_text_shapes() {
        let store = items(json!({
            "textRules": [
                {"from": "a", "to": "b"},
                {"sourceText": "c", "targetText": "d"}
            ]
        }));
        let rules = read_text_rules(&store).unwrap().unwrap();
        assert_eq!(rules, vec![TextRule::new("a", "b"), TextRule::new("c", "d")]);
    }

    #[test]
    fn test_malformed_values() {
        let store = items(json!({"enabled": "yes"}));
        assert!(matches!(
            read_enabled(&store),
            Err(StorageError::Malformed { .. })
        ));

        let store = items(json!({"urlRules": [{"from": 1}]}));
        assert!(read_url_rules(&store).is_err());
    }

    #[test]
    fn test_migrates_legacy_url_rules() {
        let mut store = items(json!({
            "rules": [
                {"sourceUrl": "*old.example*", "targetUrl": "https://new.example/"},
                {"sourceUrl": "^https://a", "targetUrl": "https://b"}
            ]
        }));

        let plan = plan_migration(&store).unwrap();
        assert_eq!(plan.url_rules_migrated, Some(2));
        assert_eq!(plan.text_rules_migrated, None);
        apply(&mut store, &plan);

        let rules = read_url_rules(&store).unwrap().unwrap();
        assert_eq!(rules[0], UrlRule::new("*old.example*", "https://new.example/"));
        assert_eq!(rules[1], UrlRule::new("^https://a", "https://b"));
        // Legacy key is left untouched
        assert!(store.contains_key(keys::LEGACY_URL_RULES));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let mut store = items(json!({
            "rules": [{"sourceUrl": "a", "targetUrl": "b"}],
            "textRules": [{"sourceText": "Hello", "targetText": "Hi"}]
        }));

        let first = plan_migration(&store).unwrap();
        assert!(!first.is_empty());
        apply(&mut store, &first);
        let after_once = store.clone();

        let second = plan_migration(&store).unwrap();
        assert!(second.is_empty());
        apply(&mut store, &second);
        assert_eq!(store, after_once);
    }

    #[test]
    fn test_no_migration_when_current_key_exists() {
        let store = items(json!({
            "rules": [{"sourceUrl": "legacy", "targetUrl": "x"}],
            "urlRules": [{"from": "current", "to": "y"}],
            "textRules": [{"from": "a", "to": "b", "enabled": false}]
        }));
        let plan = plan_migration(&store).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_empty_current_list_blocks_url_migration() {
        let store = items(json!({
            "rules": [{"sourceUrl": "legacy", "targetUrl": "x"}],
            "urlRules": []
        }));
        assert!(plan_migration(&store).unwrap().is_empty());
    }

    #[test]
    fn test_detect_schema_version() {
        let legacy = items(json!({"rules": []}));
        assert_eq!(detect_schema_version(&legacy).unwrap(), 1);

        let mixed = items(json!({
            "urlRules": [{"from": "a", "to": "b"}],
            "textRules": [{"sourceText": "c", "targetText": "d"}]
        }));
        assert_eq!(detect_schema_version(&mixed).unwrap(), 1);

        let current = items(json!({"urlRules": [{"from": "a", "to": "b"}]}));
        assert_eq!(detect_schema_version(&current).unwrap(), SCHEMA_VERSION);
        assert_eq!(detect_schema_version(&StorageItems::new()).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_snapshot_items_roundtrip_keys() {
        let snapshot = StorageSnapshot {
            url_rules: vec![UrlRule::new("a", "b")],
            text_rules: vec![TextRule::new("c", "d")],
            enabled: false,
        };
        let store = snapshot_items(&snapshot).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(read_snapshot(&store).unwrap(), snapshot);
    }
}
