//! Rules editor
//!
//! Every mutation re-reads the affected key, applies the edit and writes the
//! key back in one storage call. Only after a successful write are the other
//! contexts told to reload; a failed notification is logged and ignored.

use std::sync::Arc;

use rr_core::exchange::{parse_import, ExportFile, ImportData};
use rr_core::storage::{
    enabled_item, keys, read_snapshot, read_text_rules, read_url_rules, text_rules_item,
    url_rules_item, ALL_KEYS,
};
use rr_core::types::{StorageSnapshot, TextRule, UrlRule};
use rr_core::{Result, ValidationError};

use crate::messages::{MessageTarget, Request};
use crate::storage::StorageArea;

fn check_index(index: usize, len: usize) -> std::result::Result<(), ValidationError> {
    if index >= len {
        return Err(ValidationError::IndexOutOfRange { index, len });
    }
    Ok(())
}

pub struct RulesEditor {
    storage: Arc<dyn StorageArea>,
    background: Option<Arc<dyn MessageTarget>>,
    pages: Vec<Arc<dyn MessageTarget>>,
}

impl RulesEditor {
    pub fn new(storage: Arc<dyn StorageArea>) -> Self {
        Self {
            storage,
            background: None,
            pages: Vec::new(),
        }
    }

    /// Route URL and global notifications to the sync controller.
    pub fn with_background(mut self, background: Arc<dyn MessageTarget>) -> Self {
        self.background = Some(background);
        self
    }

    /// Register a page's content rewriter for text notifications.
    pub fn add_page(&mut self, page: Arc<dyn MessageTarget>) {
        self.pages.push(page);
    }

    pub async fn load(&self) -> Result<StorageSnapshot> {
        let items = self.storage.get(&ALL_KEYS).await?;
        Ok(read_snapshot(&items)?)
    }

    // =========================================================================
    // URL rules
    // =========================================================================

    pub async fn url_rules(&self) -> Result<Vec<UrlRule>> {
        let items = self.storage.get(&[keys::URL_RULES]).await?;
        Ok(read_url_rules(&items)?.unwrap_or_default())
    }

    /// Append a rule; returns its index.
    pub async fn add_url_rule(&self, rule: UrlRule) -> Result<usize> {
        let mut rules = self.url_rules().await?;
        rules.push(rule);
        self.save_url_rules(&rules).await?;
        Ok(rules.len() - 1)
    }

    pub async fn update_url_rule(&self, index: usize, rule: UrlRule) -> Result<()> {
        let mut rules = self.url_rules().await?;
        check_index(index, rules.len())?;
        rules[index] = rule;
        self.save_url_rules(&rules).await
    }

    pub async fn remove_url_rule(&self, index: usize) -> Result<UrlRule> {
        let mut rules = self.url_rules().await?;
        check_index(index, rules.len())?;
        let removed = rules.remove(index);
        self.save_url_rules(&rules).await?;
        Ok(removed)
    }

    /// Flip a rule's `enabled`; returns the new value.
    pub async fn toggle_url_rule(&self, index: usize) -> Result<bool> {
        let mut rules = self.url_rules().await?;
        check_index(index, rules.len())?;
        rules[index].enabled = !rules[index].enabled;
        let now = rules[index].enabled;
        self.save_url_rules(&rules).await?;
        Ok(now)
    }

    async fn save_url_rules(&self, rules: &[UrlRule]) -> Result<()> {
        self.storage.set(url_rules_item(rules)?).await?;
        log::info!("Saved {} URL rules", rules.len());
        self.notify_background(Request::UpdateUrlRules).await;
        Ok(())
    }

    // =========================================================================
    // Text rules
    // =========================================================================

    pub async fn text_rules(&self) -> Result<Vec<TextRule>> {
        let items = self.storage.get(&[keys::TEXT_RULES]).await?;
        Ok(read_text_rules(&items)?.unwrap_or_default())
    }

    pub async fn add_text_rule(&self, rule: TextRule) -> Result<usize> {
        let mut rules = self.text_rules().await?;
        rules.push(rule);
        self.save_text_rules(&rules).await?;
        Ok(rules.len() - 1)
    }

    pub async fn update_text_rule(&self, index: usize, rule: TextRule) -> Result<()> {
        let mut rules = self.text_rules().await?;
        check_index(index, rules.len())?;
        rules[index] = rule;
        self.save_text_rules(&rules).await
    }

    pub async fn remove_text_rule(&self, index: usize) -> Result<TextRule> {
        let mut rules = self.text_rules().await?;
        check_index(index, rules.len())?;
        let removed = rules.remove(index);
        self.save_text_rules(&rules).await?;
        Ok(removed)
    }

    pub async fn toggle_text_rule(&self, index: usize) -> Result<bool> {
        let mut rules = self.text_rules().await?;
        check_index(index, rules.len())?;
        rules[index].enabled = !rules[index].enabled;
        let now = rules[index].enabled;
        self.save_text_rules(&rules).await?;
        Ok(now)
    }

    async fn save_text_rules(&self, rules: &[TextRule]) -> Result<()> {
        self.storage.set(text_rules_item(rules)?).await?;
        log::info!("Saved {} text rules", rules.len());
        self.notify_pages().await;
        Ok(())
    }

    // =========================================================================
    // Global switch, export and import
    // =========================================================================

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.storage.set(enabled_item(enabled)).await?;
        log::info!("Rerouter {}", if enabled { "enabled" } else { "disabled" });
        self.notify_background(Request::ToggleGlobal).await;
        self.notify_pages().await;
        Ok(())
    }

    pub async fn export(&self) -> Result<ExportFile> {
        Ok(ExportFile::now(self.load().await?))
    }

    /// Validate `text` as an export file and write the keys it carries.
    /// An invalid file changes nothing.
    pub async fn import(&self, text: &str) -> Result<ImportData> {
        let data = parse_import(text)?;
        let items = data.to_items()?;
        if items.is_empty() {
            return Ok(data);
        }
        self.storage.set(items).await?;
        log::info!(
            "Imported {} URL rules, {} text rules",
            data.url_rules.as_ref().map_or(0, Vec::len),
            data.text_rules.as_ref().map_or(0, Vec::len)
        );

        if data.url_rules.is_some() || data.enabled.is_some() {
            self.notify_background(Request::UpdateUrlRules).await;
        }
        if data.text_rules.is_some() || data.enabled.is_some() {
            self.notify_pages().await;
        }
        Ok(data)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    async fn notify_background(&self, request: Request) {
        let Some(background) = &self.background else {
            return;
        };
        match background.send(request).await {
            Ok(response) if !response.success => log::warn!(
                "Background rejected {:?}: {}",
                request,
                response.error.unwrap_or_default()
            ),
            Ok(_) => {}
            Err(e) => log::warn!("Could not notify background: {}", e),
        }
    }

    async fn notify_pages(&self) {
        for page in &self.pages {
            match page.send(Request::UpdateTextRules).await {
                Ok(response) if !response.success => log::warn!(
                    "Page failed to update text rules: {}",
                    response.error.unwrap_or_default()
                ),
                Ok(_) => {}
                // Pages without a rewriter (or already closed) are expected
                Err(e) => log::debug!("Could not notify page: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Response;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use rr_core::{Error, MessagingError, StorageError};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<Request>>,
        gone: bool,
    }

    impl Recorder {
        fn gone() -> Self {
            Self {
                received: Mutex::new(Vec::new()),
                gone: true,
            }
        }

        fn received(&self) -> Vec<Request> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageTarget for Recorder {
        async fn send(&self, request: Request) -> std::result::Result<Response, MessagingError> {
            if self.gone {
                return Err(MessagingError::ReceiverGone);
            }
            self.received.lock().unwrap().push(request);
            Ok(Response::ok())
        }
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<Recorder>, Arc<Recorder>, RulesEditor) {
        let storage = Arc::new(MemoryStorage::new());
        let background = Arc::new(Recorder::default());
        let page = Arc::new(Recorder::default());
        let mut editor = RulesEditor::new(storage.clone()).with_background(background.clone());
        editor.add_page(page.clone());
        (storage, background, page, editor)
    }

    #[tokio::test]
    async fn test_url_rule_lifecycle() {
        let (storage, background, page, editor) = setup();

        assert_eq!(editor.add_url_rule(UrlRule::new("a", "https://x/")).await.unwrap(), 0);
        assert_eq!(editor.add_url_rule(UrlRule::new("b", "https://y/")).await.unwrap(), 1);
        assert!(!editor.toggle_url_rule(0).await.unwrap());
        editor
            .update_url_rule(1, UrlRule::new("c", "https://z/"))
            .await
            .unwrap();
        let removed = editor.remove_url_rule(0).await.unwrap();
        assert_eq!(removed.from, "a");
        assert!(!removed.enabled);

        assert_eq!(
            storage.dump()["urlRules"],
            json!([{"from": "c", "to": "https://z/", "enabled": true}])
        );
        assert_eq!(background.received(), vec![Request::UpdateUrlRules; 5]);
        assert!(page.received().is_empty());
    }

    #[tokio::test]
    async fn test_text_rules_notify_pages() {
        let (_storage, background, page, editor) = setup();
        editor.add_text_rule(TextRule::new("Hello", "Hi")).await.unwrap();
        editor.toggle_text_rule(0).await.unwrap();

        assert_eq!(page.received(), vec![Request::UpdateTextRules; 2]);
        assert!(background.received().is_empty());
        assert!(!editor.text_rules().await.unwrap()[0].enabled);
    }

    #[tokio::test]
    async fn test_global_toggle_notifies_both() {
        let (storage, background, page, editor) = setup();
        editor.set_enabled(false).await.unwrap();

        assert_eq!(storage.dump()["enabled"], json!(false));
        assert_eq!(background.received(), vec![Request::ToggleGlobal]);
        assert_eq!(page.received(), vec![Request::UpdateTextRules]);
        assert!(!editor.load().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_blank_rules_are_stored_inert() {
        let (storage, background, page, editor) = setup();

        // A new row starts blank and is filled in one field at a time
        let index = editor.add_url_rule(UrlRule::new("", "")).await.unwrap();
        assert_eq!(index, 0);
        assert_eq!(
            storage.dump()["urlRules"],
            json!([{"from": "", "to": "", "enabled": true}])
        );
        editor.update_url_rule(0, UrlRule::new("a", "")).await.unwrap();
        editor.update_url_rule(0, UrlRule::new("a", "https://x/")).await.unwrap();
        assert_eq!(editor.url_rules().await.unwrap(), vec![UrlRule::new("a", "https://x/")]);
        assert_eq!(background.received(), vec![Request::UpdateUrlRules; 3]);

        editor.add_text_rule(TextRule::new("", "")).await.unwrap();
        assert_eq!(editor.text_rules().await.unwrap(), vec![TextRule::new("", "")]);
        assert!(editor.text_rules().await.unwrap()[0].is_inert());
        assert_eq!(page.received(), vec![Request::UpdateTextRules]);
    }

    #[tokio::test]
    async fn test_rejects_bad_index() {
        let (storage, background, _page, editor) = setup();
        editor.add_url_rule(UrlRule::new("a", "")).await.unwrap();
        assert_eq!(
            editor.remove_url_rule(3).await.unwrap_err(),
            Error::Validation(ValidationError::IndexOutOfRange { index: 3, len: 1 })
        );
        assert_eq!(
            editor.toggle_text_rule(0).await.unwrap_err(),
            Error::Validation(ValidationError::IndexOutOfRange { index: 0, len: 0 })
        );
        assert_eq!(background.received().len(), 1);
        assert_eq!(storage.dump()["urlRules"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_sends_nothing() {
        let (storage, background, _page, editor) = setup();
        storage.set_fail_writes(true);
        let err = editor.add_url_rule(UrlRule::new("a", "https://x/")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Write(_))));
        assert!(background.received().is_empty());
    }

    #[tokio::test]
    async fn test_missing_receivers_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let mut editor =
            RulesEditor::new(storage.clone()).with_background(Arc::new(Recorder::gone()));
        editor.add_page(Arc::new(Recorder::gone()));

        editor.add_url_rule(UrlRule::new("a", "https://x/")).await.unwrap();
        editor.set_enabled(false).await.unwrap();
        assert_eq!(storage.dump()["enabled"], json!(false));
    }

    #[tokio::test]
    async fn test_export_import() {
        let (storage, background, page, editor) = setup();
        editor.add_url_rule(UrlRule::new("a", "https://x/")).await.unwrap();
        editor.add_text_rule(TextRule::new("Hello", "Hi")).await.unwrap();

        let exported = editor.export().await.unwrap();
        assert_eq!(exported.version, "1.0");
        assert_eq!(exported.data.url_rules.len(), 1);
        let text = exported.to_json_pretty();

        let (_, _, _, other) = setup();
        let imported = other.import(&text).await.unwrap();
        assert_eq!(imported.url_rules.unwrap().len(), 1);
        assert_eq!(other.load().await.unwrap(), editor.load().await.unwrap());
        assert_eq!(storage.dump()["textRules"], json!([{"from": "Hello", "to": "Hi", "enabled": true}]));

        // Import of a partial file touches only the keys it carries
        let before = background.received().len();
        editor
            .import(r#"{"version":"1.0","data":{"textRules":[]}}"#)
            .await
            .unwrap();
        assert_eq!(editor.url_rules().await.unwrap().len(), 1);
        assert!(editor.text_rules().await.unwrap().is_empty());
        assert_eq!(background.received().len(), before);
        assert_eq!(page.received().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_import_changes_nothing() {
        let (storage, background, _page, editor) = setup();
        editor.add_url_rule(UrlRule::new("a", "https://x/")).await.unwrap();
        let before = storage.dump();

        let err = editor
            .import(r#"{"version":"1.0","data":{"urlRules":[{"from":"b","to":"c"},{"from":"d"}]}}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Entry { list: "urlRules", index: 1, .. })
        ));
        assert_eq!(storage.dump(), before);
        assert_eq!(background.received().len(), 1);
    }
}
