//! Per-page content rewriter
//!
//! Holds the page's text rules and global switch, runs a whole-document
//! replacement pass on start, on every subtree-insertion batch and whenever
//! the rules are reloaded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use rr_core::rewrite::DomError;
use rr_core::storage::{read_enabled, read_text_rules, TEXT_STATE_KEYS};
use rr_core::types::TextRule;
use rr_core::{Error, MessagingError, PassStats, TextRewriter, TextTree};

use crate::messages::{MessageTarget, Request, Response};
use crate::storage::{StorageArea, StorageChange};

/// One record of a DOM mutation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomMutation {
    ChildList { added_nodes: usize },
    CharacterData,
    Attributes,
}

impl DomMutation {
    fn inserts_nodes(&self) -> bool {
        matches!(self, DomMutation::ChildList { added_nodes } if *added_nodes > 0)
    }
}

#[derive(Debug, Clone)]
pub struct ContentOptions {
    pub channel_capacity: usize,
    /// Reload when another context writes `textRules` or `enabled`.
    /// Off by default: pages are told about changes by message, and
    /// replacement is not idempotent for every rule set.
    pub watch_storage: bool,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            watch_storage: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentStatus {
    pub enabled: bool,
    pub text_rules: Vec<TextRule>,
    pub passes: usize,
    pub last_pass: Option<PassStats>,
}

type Inspect<D> = Box<dyn FnOnce(&mut D) + Send>;

enum Command<D> {
    Message {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Mutations(Vec<DomMutation>),
    Inspect(Inspect<D>),
    Status {
        reply: oneshot::Sender<ContentStatus>,
    },
}

pub struct ContentRewriter<D> {
    storage: Arc<dyn StorageArea>,
    document: D,
    options: ContentOptions,
    text_rules: Vec<TextRule>,
    enabled: bool,
    rewriter: TextRewriter,
    passes: usize,
    last_pass: Option<PassStats>,
}

impl<D> ContentRewriter<D>
where
    D: TextTree + Send + 'static,
{
    pub fn new(storage: Arc<dyn StorageArea>, document: D, options: ContentOptions) -> Self {
        Self {
            storage,
            document,
            options,
            text_rules: Vec::new(),
            enabled: true,
            rewriter: TextRewriter::new(&[]),
            passes: 0,
            last_pass: None,
        }
    }

    /// Start the rewriter task. The initial load and pass run before any
    /// queued command is handled.
    pub fn spawn(self) -> ContentHandle<D> {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let changes = self.storage.subscribe();
        tokio::spawn(self.run(rx, changes));
        ContentHandle { tx }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command<D>>,
        mut changes: broadcast::Receiver<StorageChange>,
    ) {
        match self.reload().await {
            Ok(()) => {
                if let Err(e) = self.run_pass() {
                    log::error!("Error replacing text: {}", e);
                }
            }
            Err(e) => log::error!("Error loading text rules: {}", e),
        }

        let mut watching = self.options.watch_storage;
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                change = changes.recv(), if watching => match change {
                    Ok(change) if !change.touches(&TEXT_STATE_KEYS) => {}
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Err(e) = self.refresh().await {
                            log::error!("Error applying stored text rules: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => watching = false,
                },
            }
        }
    }

    async fn handle(&mut self, command: Command<D>) {
        match command {
            Command::Message { request, reply } => {
                let response = match request {
                    Request::UpdateTextRules => match self.refresh().await {
                        Ok(()) => Response::ok(),
                        Err(e) => {
                            log::error!("Error updating text rules: {}", e);
                            Response::failure(e)
                        }
                    },
                    other => Response::failure(format!("Unsupported action {:?}", other)),
                };
                let _ = reply.send(response);
            }
            Command::Mutations(batch) => {
                if batch.iter().any(DomMutation::inserts_nodes) {
                    if let Err(e) = self.run_pass() {
                        log::error!("Error replacing text: {}", e);
                    }
                }
            }
            Command::Inspect(f) => f(&mut self.document),
            Command::Status { reply } => {
                let _ = reply.send(ContentStatus {
                    enabled: self.enabled,
                    text_rules: self.text_rules.clone(),
                    passes: self.passes,
                    last_pass: self.last_pass,
                });
            }
        }
    }

    async fn reload(&mut self) -> Result<(), Error> {
        let items = self.storage.get(&TEXT_STATE_KEYS).await?;
        self.text_rules = read_text_rules(&items)?.unwrap_or_default();
        self.enabled = read_enabled(&items)?.unwrap_or(true);
        self.rewriter = TextRewriter::new(&self.text_rules);
        log::debug!(
            "Loaded {} text rules ({} active), enabled = {}",
            self.text_rules.len(),
            self.rewriter.len(),
            self.enabled
        );
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), Error> {
        self.reload().await?;
        self.run_pass()?;
        Ok(())
    }

    fn run_pass(&mut self) -> Result<(), DomError> {
        if !self.enabled || self.rewriter.is_empty() {
            return Ok(());
        }
        let stats = self.rewriter.apply(&mut self.document)?;
        log::debug!(
            "Text pass: {} nodes visited, {} rewritten, {} replacements",
            stats.nodes_visited,
            stats.nodes_rewritten,
            stats.replacements
        );
        self.passes += 1;
        self.last_pass = Some(stats);
        Ok(())
    }
}

/// Sender for a page's rewriter task.
pub struct ContentHandle<D> {
    tx: mpsc::Sender<Command<D>>,
}

impl<D> Clone for ContentHandle<D> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<D> ContentHandle<D>
where
    D: Send + 'static,
{
    /// Report a batch of DOM mutations observed on the page.
    pub async fn notify_mutations(&self, batch: Vec<DomMutation>) -> Result<(), MessagingError> {
        self.tx
            .send(Command::Mutations(batch))
            .await
            .map_err(|_| MessagingError::ReceiverGone)
    }

    /// Run `f` against the document on the rewriter task.
    pub async fn with_document<R, F>(&self, f: F) -> Result<R, MessagingError>
    where
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let inspect: Inspect<D> = Box::new(move |document: &mut D| {
            let _ = reply.send(f(document));
        });
        self.tx
            .send(Command::Inspect(inspect))
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)
    }

    pub async fn status(&self) -> Result<ContentStatus, MessagingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)
    }
}

#[async_trait]
impl<D> MessageTarget for ContentHandle<D>
where
    D: Send + 'static,
{
    async fn send(&self, request: Request) -> Result<Response, MessagingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Message { request, reply })
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use rr_core::storage::{enabled_item, text_rules_item};
    use rr_core::TextDocument;
    use serde_json::json;

    fn storage(items: serde_json::Value) -> Arc<MemoryStorage> {
        let items = match items {
            serde_json::Value::Object(map) => map,
            _ => Default::default(),
        };
        Arc::new(MemoryStorage::with_items(items))
    }

    fn spawn(storage: &Arc<MemoryStorage>, document: TextDocument) -> ContentHandle<TextDocument> {
        ContentRewriter::new(storage.clone(), document, ContentOptions::default()).spawn()
    }

    async fn texts(handle: &ContentHandle<TextDocument>) -> Vec<String> {
        handle
            .with_document(|doc: &mut TextDocument| doc.texts().to_vec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_pass() {
        let storage = storage(json!({
            "textRules": [{"from": "Hello", "to": "Hi"}],
            "enabled": true
        }));
        let handle = spawn(&storage, TextDocument::new(["Hello World", "untouched"]));

        assert_eq!(texts(&handle).await, vec!["Hi World", "untouched"]);
        let status = handle.status().await.unwrap();
        assert_eq!(status.passes, 1);
        assert_eq!(
            status.last_pass,
            Some(PassStats {
                nodes_visited: 2,
                nodes_rewritten: 1,
                replacements: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_legacy_text_rules_are_read() {
        let storage = storage(json!({
            "textRules": [{"sourceText": "colour", "targetText": "color"}]
        }));
        let handle = spawn(&storage, TextDocument::new(["a colour"]));
        assert_eq!(texts(&handle).await, vec!["a color"]);
    }

    #[tokio::test]
    async fn test_disabled_leaves_page() {
        let storage = storage(json!({
            "textRules": [{"from": "Hello", "to": "Hi"}],
            "enabled": false
        }));
        let handle = spawn(&storage, TextDocument::new(["Hello World"]));
        handle
            .notify_mutations(vec![DomMutation::ChildList { added_nodes: 1 }])
            .await
            .unwrap();
        assert_eq!(texts(&handle).await, vec!["Hello World"]);
        assert_eq!(handle.status().await.unwrap().passes, 0);
    }

    #[tokio::test]
    async fn test_insertions_trigger_rescan() {
        let storage = storage(json!({"textRules": [{"from": "cat", "to": "dog"}]}));
        let handle = spawn(&storage, TextDocument::without_body());

        handle
            .with_document(|doc: &mut TextDocument| doc.insert(["a cat appears"]))
            .await
            .unwrap();
        // Text-only mutations do not rescan
        handle
            .notify_mutations(vec![DomMutation::CharacterData, DomMutation::ChildList { added_nodes: 0 }])
            .await
            .unwrap();
        assert_eq!(texts(&handle).await, vec!["a cat appears"]);

        handle
            .notify_mutations(vec![DomMutation::Attributes, DomMutation::ChildList { added_nodes: 1 }])
            .await
            .unwrap();
        assert_eq!(texts(&handle).await, vec!["a dog appears"]);
    }

    #[tokio::test]
    async fn test_update_message_reloads() {
        let storage = storage(json!({}));
        let handle = spawn(&storage, TextDocument::new(["Hello (World) is great"]));

        storage
            .set(text_rules_item(&[TextRule::new("Hello (World)", "Hi [Universe]")]).unwrap())
            .await
            .unwrap();
        assert_eq!(handle.send(Request::UpdateTextRules).await.unwrap(), Response::ok());
        assert_eq!(texts(&handle).await, vec!["Hi [Universe] is great"]);

        storage.set(enabled_item(false)).await.unwrap();
        assert!(handle.send(Request::UpdateTextRules).await.unwrap().success);
        assert!(!handle.status().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let storage = storage(json!({}));
        let handle = spawn(&storage, TextDocument::new(["x"]));
        storage.set_fail_reads(true);

        let response = handle.send(Request::UpdateTextRules).await.unwrap();
        assert!(!response.success);
        assert!(handle.send(Request::ToggleGlobal).await.unwrap().error.is_some());
    }
}
