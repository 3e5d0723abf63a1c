use std::fs;
use std::path::Path;

use serde_json::Value;

use rr_core::exchange::{validate_import, ImportData};
use rr_core::storage::{read_snapshot, StorageItems};
use rr_core::types::StorageSnapshot;

/// Rules input: an export file (`{version, timestamp, data}`) or raw storage
/// items (`{urlRules, textRules, enabled}`, legacy shapes included).
pub fn load_snapshot(path: &Path) -> Result<StorageSnapshot, String> {
    let root = read_json(path)?;
    let snapshot = if root.get("data").is_some() {
        let data = validate_import(&root).map_err(|e| format!("Invalid export file: {}", e))?;
        snapshot_from_import(data)
    } else {
        let items = into_items(root)?;
        read_snapshot(&items).map_err(|e| format!("Invalid storage items: {}", e))?
    };
    log::debug!(
        "Loaded {} URL rules and {} text rules from '{}'",
        snapshot.url_rules.len(),
        snapshot.text_rules.len(),
        path.display()
    );
    Ok(snapshot)
}

pub fn snapshot_from_import(data: ImportData) -> StorageSnapshot {
    StorageSnapshot {
        url_rules: data.url_rules.unwrap_or_default(),
        text_rules: data.text_rules.unwrap_or_default(),
        enabled: data.enabled.unwrap_or(true),
    }
}

pub fn load_items(path: &Path) -> Result<StorageItems, String> {
    into_items(read_json(path)?)
}

fn into_items(root: Value) -> Result<StorageItems, String> {
    match root {
        Value::Object(items) => Ok(items),
        _ => Err("Expected a JSON object of storage items".to_string()),
    }
}

pub fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

fn read_json(path: &Path) -> Result<Value, String> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in '{}': {}", path.display(), e))
}

pub fn write_text(path: &Path, text: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}
