//! Rerouter Core Library
//!
//! This crate provides the rule model shared by every execution context of the
//! Rerouter extension: the background controller, the per-page content
//! rewriter and the rules editor. Everything here is synchronous and free of
//! browser APIs so it can run natively, in tests, and inside wasm.
//!
//! # Modules
//!
//! - `types`: Stored rule shapes and compiled filter descriptors
//! - `pattern`: Literal/regex classification and literal escaping
//! - `rewrite`: Text replacement pass over a document's text nodes
//! - `storage`: Storage keys, typed reads/writes and schema migration
//! - `exchange`: Export/import file format and validation
//! - `url`: Allocation-free URL helpers
//! - `matcher`: Evaluation of compiled filter rules against request URLs
//! - `error`: Error taxonomy

pub mod error;
pub mod exchange;
pub mod matcher;
pub mod pattern;
pub mod rewrite;
pub mod storage;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use error::{Error, FilterInstallError, MessagingError, Result, StorageError, ValidationError};
pub use exchange::{parse_import, ExportFile, ImportData};
pub use matcher::{MatchResult, Matcher};
pub use pattern::{classify, escape_literal};
pub use rewrite::{apply_text_rules, PassStats, TextDocument, TextRewriter, TextTree};
pub use storage::{plan_migration, MigrationPlan, StorageItems};
pub use types::{
    CompiledFilterRule, MatchKind, ResourceType, ResourceTypes, StorageSnapshot, TextRule, UrlRule,
};
