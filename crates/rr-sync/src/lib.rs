//! Rerouter Sync
//!
//! The three execution contexts of the extension, each an independent actor:
//!
//! - [`SyncController`] (background) keeps the request-filtering engine in
//!   step with the stored URL rules.
//! - [`ContentRewriter`] (one per page) applies text rules to the page.
//! - [`RulesEditor`] (settings UI) edits stored rules and notifies the others.
//!
//! Storage and the filtering engine are reached through the [`StorageArea`]
//! and [`FilterEngine`] traits so the same logic runs against the browser or
//! the in-memory implementations used by tests and the CLI.

pub mod background;
pub mod content;
pub mod editor;
pub mod engine;
pub mod install;
pub mod messages;
pub mod storage;

pub use background::{ControllerOptions, ControllerState, InstallReason, SyncController, SyncHandle};
pub use content::{ContentHandle, ContentOptions, ContentRewriter, DomMutation};
pub use editor::RulesEditor;
pub use engine::{FilterEngine, MemoryFilterEngine, RuleUpdate};
pub use install::{install_filters, InstallReport};
pub use messages::{MessageTarget, Request, Response};
pub use storage::{MemoryStorage, StorageArea, StorageChange};
