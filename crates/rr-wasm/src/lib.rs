//! WebAssembly bindings for Rerouter

use std::cell::RefCell;

use wasm_bindgen::prelude::*;

use rr_compiler::{build_ruleset, compile_snapshot, CompileOptions, CompileStats};
use rr_core::rewrite::DomError;
use rr_core::storage::{read_snapshot, StorageItems};
use rr_core::types::{CompiledFilterRule, MatchKind, ResourceType, TextRule};
use rr_core::{classify, plan_migration, Matcher, TextRewriter, TextTree};

mod console;

pub use console::init_logging;

/// `NodeFilter.SHOW_TEXT`
const SHOW_TEXT: u32 = 0x4;

thread_local! {
    static MATCHER: RefCell<Option<Matcher>> = const { RefCell::new(None) };
}

// =============================================================================
// Plain helpers (native-testable)
// =============================================================================

fn parse_items(items_json: &str) -> Result<StorageItems, String> {
    serde_json::from_str(items_json).map_err(|e| format!("Invalid storage items: {}", e))
}

/// Compile storage items (`{urlRules, enabled}`, either rule shape) into a
/// JSON ruleset ready for `updateDynamicRules`.
fn compile_items(items_json: &str) -> Result<(Vec<CompiledFilterRule>, CompileStats), String> {
    let items = parse_items(items_json)?;
    let snapshot = read_snapshot(&items).map_err(|e| e.to_string())?;
    Ok(compile_snapshot(&snapshot, &CompileOptions::default()))
}

fn rewrite_text(text: &str, rules_json: &str) -> Result<String, String> {
    let rewriter = text_rewriter(rules_json)?;
    Ok(rewriter
        .rewrite(text)
        .map(|(rewritten, _)| rewritten)
        .unwrap_or_else(|| text.to_string()))
}

fn text_rewriter(rules_json: &str) -> Result<TextRewriter, String> {
    let rules: Vec<TextRule> =
        serde_json::from_str(rules_json).map_err(|e| format!("Invalid text rules: {}", e))?;
    Ok(TextRewriter::new(&rules))
}

fn migration_writes(items_json: &str) -> Result<Option<String>, String> {
    let items = parse_items(items_json)?;
    let plan = plan_migration(&items).map_err(|e| e.to_string())?;
    if plan.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&plan.writes)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn json_to_js(json: &str) -> Result<JsValue, JsValue> {
    js_sys::JSON::parse(json)
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

// =============================================================================
// Background bindings
// =============================================================================

#[wasm_bindgen]
pub fn classify_pattern(pattern: &str) -> String {
    match classify(pattern) {
        MatchKind::Regex => "regex".to_string(),
        MatchKind::Literal => "literal".to_string(),
    }
}

/// Compile `{urlRules, enabled}` storage items.
///
/// Returns `{rules, total, inert, disabled, compiled, regex, literal}` where
/// `rules` is the array to pass as `addRules`.
#[wasm_bindgen]
pub fn compile_url_rules(items_json: &str) -> Result<JsValue, JsValue> {
    let (rules, stats) = compile_items(items_json).map_err(|e| JsValue::from_str(&e))?;
    log::info!("Compiled {} of {} URL rules", stats.compiled, stats.total);

    let js_result = js_sys::Object::new();
    set(&js_result, "rules", &json_to_js(&build_ruleset(&rules, false))?);
    set(&js_result, "total", &JsValue::from(stats.total as u32));
    set(&js_result, "inert", &JsValue::from(stats.inert as u32));
    set(&js_result, "disabled", &JsValue::from(stats.disabled as u32));
    set(&js_result, "compiled", &JsValue::from(stats.compiled as u32));
    set(&js_result, "regex", &JsValue::from(stats.regex as u32));
    set(&js_result, "literal", &JsValue::from(stats.literal as u32));
    Ok(js_result.into())
}

/// Storage writes that bring items read with the migration keys up to date,
/// or `null` when nothing needs migrating.
#[wasm_bindgen]
pub fn plan_storage_migration(items_json: &str) -> Result<JsValue, JsValue> {
    match migration_writes(items_json).map_err(|e| JsValue::from_str(&e))? {
        Some(writes) => json_to_js(&writes),
        None => Ok(JsValue::NULL),
    }
}

/// Load compiled rules for [`match_url`].
#[wasm_bindgen]
pub fn load_rules(items_json: &str) -> Result<u32, JsValue> {
    let (rules, _) = compile_items(items_json).map_err(|e| JsValue::from_str(&e))?;
    let matcher = Matcher::new(&rules).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let count = matcher.len() as u32;
    MATCHER.with(|cell| *cell.borrow_mut() = Some(matcher));
    Ok(count)
}

#[wasm_bindgen]
pub fn is_loaded() -> bool {
    MATCHER.with(|cell| cell.borrow().is_some())
}

/// Evaluate a request against the rules from [`load_rules`].
#[wasm_bindgen]
pub fn match_url(url: &str, request_type: &str) -> JsValue {
    let resource_type = ResourceType::parse(request_type).unwrap_or(ResourceType::Other);
    let result = MATCHER.with(|cell| {
        cell.borrow()
            .as_ref()
            .and_then(|matcher| matcher.match_request(url, resource_type))
    });

    let js_result = js_sys::Object::new();
    match result {
        Some(hit) => {
            set(&js_result, "matched", &JsValue::from(true));
            set(&js_result, "ruleId", &JsValue::from(hit.rule_id));
            set(&js_result, "redirectUrl", &JsValue::from_str(&hit.redirect_url));
        }
        None => {
            set(&js_result, "matched", &JsValue::from(false));
            set(&js_result, "ruleId", &JsValue::from(-1));
        }
    }
    js_result.into()
}

// =============================================================================
// Settings bindings
// =============================================================================

/// Validate an export file. Returns the storage items to write.
#[wasm_bindgen]
pub fn validate_import(text: &str) -> Result<JsValue, JsValue> {
    let data = rr_core::parse_import(text).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let items = data.to_items().map_err(|e| JsValue::from_str(&e.to_string()))?;
    let json = serde_json::to_string(&items).map_err(|e| JsValue::from_str(&e.to_string()))?;
    json_to_js(&json)
}

// =============================================================================
// Content bindings
// =============================================================================

#[wasm_bindgen]
pub fn apply_text_rules(text: &str, rules_json: &str) -> Result<String, JsValue> {
    rewrite_text(text, rules_json).map_err(|e| JsValue::from_str(&e))
}

/// Text nodes under the current document's body.
struct PageText {
    document: web_sys::Document,
}

impl TextTree for PageText {
    fn for_each_text_node(
        &mut self,
        visit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<(), DomError> {
        let Some(body) = self.document.body() else {
            return Ok(());
        };
        let walker = self
            .document
            .create_tree_walker_with_what_to_show(&body, SHOW_TEXT)
            .map_err(|e| DomError::Traversal(format!("{:?}", e)))?;

        while let Some(node) = walker
            .next_node()
            .map_err(|e| DomError::Traversal(format!("{:?}", e)))?
        {
            let Some(text) = node.text_content() else {
                continue;
            };
            if let Some(rewritten) = visit(&text) {
                node.set_text_content(Some(&rewritten));
            }
        }
        Ok(())
    }
}

/// Apply text rules to every text node of the current page.
///
/// Returns `{nodesVisited, nodesRewritten, replacements}`.
#[wasm_bindgen]
pub fn replace_page_text(rules_json: &str) -> Result<JsValue, JsValue> {
    let rewriter = text_rewriter(rules_json).map_err(|e| JsValue::from_str(&e))?;
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| JsValue::from_str("No document available"))?;

    let mut page = PageText { document };
    let stats = rewriter
        .apply(&mut page)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    log::debug!(
        "Replaced text in {} of {} nodes",
        stats.nodes_rewritten,
        stats.nodes_visited
    );

    let js_result = js_sys::Object::new();
    set(&js_result, "nodesVisited", &JsValue::from(stats.nodes_visited as u32));
    set(&js_result, "nodesRewritten", &JsValue::from(stats.nodes_rewritten as u32));
    set(&js_result, "replacements", &JsValue::from(stats.replacements as u32));
    Ok(js_result.into())
}
