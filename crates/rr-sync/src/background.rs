//! Background sync controller
//!
//! Owns the in-memory mirror of `{urlRules, enabled}` and keeps the filter
//! engine's dynamic rules equal to the compilation of the stored rules. Runs
//! as a single task: requests, install events and storage notifications are
//! handled one at a time to completion, and every handler re-reads storage so
//! the last handled event converges to the last stored state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use rr_compiler::CompileOptions;
use rr_core::storage::{
    enabled_item, keys, plan_migration, read_enabled, read_url_rules, MIGRATION_KEYS, URL_STATE_KEYS,
};
use rr_core::types::UrlRule;
use rr_core::{Error, MessagingError};

use crate::engine::FilterEngine;
use crate::install::{install_filters, InstallReport};
use crate::messages::{MessageTarget, Request, Response};
use crate::storage::{StorageArea, StorageChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub channel_capacity: usize,
    pub compile: CompileOptions,
    /// Reinstall when another context writes `urlRules` or `enabled`
    pub watch_storage: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            compile: CompileOptions::default(),
            watch_storage: true,
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub enabled: bool,
    pub url_rules: Vec<UrlRule>,
}

enum Command {
    Installed {
        reason: InstallReason,
        reply: oneshot::Sender<Result<InstallReport, Error>>,
    },
    Message {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
}

pub struct SyncController {
    storage: Arc<dyn StorageArea>,
    engine: Arc<dyn FilterEngine>,
    options: ControllerOptions,
    state: ControllerState,
    url_rules: Vec<UrlRule>,
    enabled: bool,
}

impl SyncController {
    pub fn new(
        storage: Arc<dyn StorageArea>,
        engine: Arc<dyn FilterEngine>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            storage,
            engine,
            options,
            state: ControllerState::Uninitialized,
            url_rules: Vec::new(),
            enabled: true,
        }
    }

    /// Start the controller task. It stops once every handle is dropped.
    pub fn spawn(self) -> SyncHandle {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let changes = self.storage.subscribe();
        tokio::spawn(self.run(rx, changes));
        SyncHandle { tx }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut changes: broadcast::Receiver<StorageChange>,
    ) {
        let mut watching = self.options.watch_storage;
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                change = changes.recv(), if watching => match change {
                    Ok(change) => {
                        if change.touches(&URL_STATE_KEYS) {
                            self.reload_logged("storage change").await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {} storage notifications, reloading", missed);
                        self.reload_logged("storage change").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => watching = false,
                },
            }
        }
        log::debug!("Sync controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Installed { reason, reply } => {
                let result = self.on_installed(reason).await;
                if let Err(e) = &result {
                    log::error!("Initialization failed: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::Message { request, reply } => {
                let response = self.on_message(request).await;
                let _ = reply.send(response);
            }
            Command::Status { reply } => {
                let _ = reply.send(ControllerStatus {
                    state: self.state,
                    enabled: self.enabled,
                    url_rules: self.url_rules.clone(),
                });
            }
        }
    }

    async fn on_installed(&mut self, reason: InstallReason) -> Result<InstallReport, Error> {
        log::info!("Extension installed/updated ({:?})", reason);

        if let Err(e) = self.migrate().await {
            log::error!("Migration failed: {}", e);
        }

        let items = self.storage.get(&URL_STATE_KEYS).await?;
        if read_enabled(&items)?.is_none() {
            self.storage.set(enabled_item(true)).await?;
        }
        self.state = ControllerState::Ready;
        self.reload().await
    }

    async fn migrate(&self) -> Result<(), Error> {
        let items = self.storage.get(&MIGRATION_KEYS).await?;
        let plan = plan_migration(&items)?;
        if plan.is_empty() {
            return Ok(());
        }
        self.storage.set(plan.writes).await?;
        log::info!(
            "Migrated stored rules to current format (url: {:?}, text: {:?})",
            plan.url_rules_migrated,
            plan.text_rules_migrated
        );
        Ok(())
    }

    async fn on_message(&mut self, request: Request) -> Response {
        match request {
            Request::UpdateUrlRules => match self.reload().await {
                Ok(_) => Response::ok(),
                Err(e) => {
                    log::error!("Error updating URL rules: {}", e);
                    Response::failure(e)
                }
            },
            Request::ToggleGlobal => match self.reload().await {
                Ok(_) => Response::ok_enabled(self.enabled),
                Err(e) => {
                    log::error!("Error toggling global state: {}", e);
                    Response::failure(e)
                }
            },
            Request::UpdateTextRules => Response::failure("Unsupported action 'updateTextRules'"),
        }
    }

    /// Re-read `{urlRules, enabled}` in one call and reinstall.
    async fn reload(&mut self) -> Result<InstallReport, Error> {
        let items = self.storage.get(&URL_STATE_KEYS).await?;
        self.url_rules = read_url_rules(&items)?.unwrap_or_default();
        self.enabled = read_enabled(&items)?.unwrap_or(true);
        log::debug!(
            "Loaded {} URL rules, {} = {}",
            self.url_rules.len(),
            keys::ENABLED,
            self.enabled
        );

        let report = install_filters(
            self.engine.as_ref(),
            &self.url_rules,
            self.enabled,
            &self.options.compile,
        )
        .await?;
        Ok(report)
    }

    async fn reload_logged(&mut self, cause: &str) {
        if let Err(e) = self.reload().await {
            log::error!("Reinstall after {} failed: {}", cause, e);
        }
    }
}

/// Cloneable sender for the controller task.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// Deliver an install/update event and wait for initialization.
    pub async fn installed(&self, reason: InstallReason) -> Result<InstallReport, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Installed { reason, reply })
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)?
    }

    pub async fn status(&self) -> Result<ControllerStatus, MessagingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)
    }
}

#[async_trait]
impl MessageTarget for SyncHandle {
    async fn send(&self, request: Request) -> Result<Response, MessagingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Message { request, reply })
            .await
            .map_err(|_| MessagingError::ReceiverGone)?;
        rx.await.map_err(|_| MessagingError::NoResponse)
    }
}
