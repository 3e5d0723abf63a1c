//! Export/import file format
//!
//! ```json
//! {"version": "1.0", "timestamp": "2024-01-01T00:00:00Z",
//!  "data": {"urlRules": [...], "textRules": [...], "enabled": true}}
//! ```
//!
//! Import validates the raw JSON before anything is decoded so that a
//! malformed file is rejected whole, with a message naming the bad entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::storage::{self, StorageItems};
use crate::types::{StorageSnapshot, TextRule, UrlRule};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFile {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub data: StorageSnapshot,
}

impl ExportFile {
    pub fn new(data: StorageSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            timestamp,
            data,
        }
    }

    /// Snapshot the rules as of now.
    pub fn now(data: StorageSnapshot) -> Self {
        Self::new(data, Utc::now())
    }

    pub fn to_json_pretty(&self) -> String {
        // Serializing plain data with string keys cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Validated import content. Only keys present in the file are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportData {
    pub url_rules: Option<Vec<UrlRule>>,
    pub text_rules: Option<Vec<TextRule>>,
    pub enabled: Option<bool>,
}

impl ImportData {
    pub fn is_empty(&self) -> bool {
        self.url_rules.is_none() && self.text_rules.is_none() && self.enabled.is_none()
    }

    /// Storage writes for the keys present in the import.
    pub fn to_items(&self) -> Result<StorageItems, ValidationError> {
        let mut items = StorageItems::new();
        let map_err = |e: crate::error::StorageError| ValidationError::Format(e.to_string());
        if let Some(rules) = &self.url_rules {
            items.extend(storage::url_rules_item(rules).map_err(map_err)?);
        }
        if let Some(rules) = &self.text_rules {
            items.extend(storage::text_rules_item(rules).map_err(map_err)?);
        }
        if let Some(enabled) = self.enabled {
            items.extend(storage::enabled_item(enabled));
        }
        Ok(items)
    }
}

/// Parse and validate an export file.
pub fn parse_import(text: &str) -> Result<ImportData, ValidationError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::Json(e.to_string()))?;
    validate_import(&root)
}

/// Validate an already-parsed export file.
pub fn validate_import(root: &Value) -> Result<ImportData, ValidationError> {
    let root = root
        .as_object()
        .ok_or_else(|| ValidationError::Format("expected a JSON object".to_string()))?;

    if let Some(version) = root.get("version") {
        if !version.is_string() {
            return Err(ValidationError::Format("'version' must be a string".to_string()));
        }
    }

    let data = root
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::Format("missing 'data' object".to_string()))?;

    let url_rules = match data.get(storage::keys::URL_RULES) {
        Some(value) => Some(validate_rule_list::<UrlRule>(storage::keys::URL_RULES, value)?),
        None => None,
    };

    let text_rules = match data.get(storage::keys::TEXT_RULES) {
        Some(value) => Some(validate_rule_list::<TextRule>(storage::keys::TEXT_RULES, value)?),
        None => None,
    };

    let enabled = match data.get(storage::keys::ENABLED) {
        Some(Value::Bool(enabled)) => Some(*enabled),
        Some(_) => {
            return Err(ValidationError::Format("'enabled' must be a boolean".to_string()))
        }
        None => None,
    };

    Ok(ImportData {
        url_rules,
        text_rules,
        enabled,
    })
}

fn validate_rule_list<T: for<'de> Deserialize<'de>>(
    list: &'static str,
    value: &Value,
) -> Result<Vec<T>, ValidationError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ValidationError::Format(format!("'{}' must be an array", list)))?;

    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let entry_err = |reason: &str| ValidationError::Entry {
            list,
            index,
            reason: reason.to_string(),
        };

        let object = entry.as_object().ok_or_else(|| entry_err("not an object"))?;
        for field in ["from", "to"] {
            match object.get(field) {
                Some(Value::String(_)) => {}
                Some(_) => return Err(entry_err(&format!("'{}' must be a string", field))),
                None => return Err(entry_err(&format!("missing '{}'", field))),
            }
        }
        if let Some(enabled) = object.get("enabled") {
            if !enabled.is_boolean() {
                return Err(entry_err("'enabled' must be a boolean"));
            }
        }

        let rule = T::deserialize(entry).map_err(|e| entry_err(&e.to_string()))?;
        rules.push(rule);
    }

    Ok(rules)
}
