//! Error taxonomy shared by every execution context.

use thiserror::Error;

use crate::rewrite::DomError;

/// Read/write failure on the shared key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage read failed: {0}")]
    Read(String),
    #[error("Storage write failed: {0}")]
    Write(String),
    #[error("Malformed value under key '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// The filtering engine rejected an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterInstallError {
    #[error("Rule {id}: invalid regex filter '{pattern}': {reason}")]
    InvalidRegex {
        id: u32,
        pattern: String,
        reason: String,
    },
    #[error("Rule {id}: invalid url filter '{pattern}'")]
    InvalidUrlFilter { id: u32, pattern: String },
    #[error("Rule {id}: {reason}")]
    InvalidRule { id: u32, reason: String },
    #[error("Duplicate rule id {0}")]
    DuplicateId(u32),
    #[error("Rule id {0} must be positive")]
    InvalidId(u32),
    #[error("Filter engine unavailable: {0}")]
    Unavailable(String),
}

/// A cross-context message could not be delivered or answered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    #[error("Receiving end does not exist")]
    ReceiverGone,
    #[error("Receiver dropped the request without responding")]
    NoResponse,
    #[error("Receiver failed: {0}")]
    Failed(String),
}

/// Malformed import file or rule shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid JSON: {0}")]
    Json(String),
    #[error("Invalid file format: {0}")]
    Format(String),
    #[error("Invalid {list} entry at index {index}: {reason}")]
    Entry {
        list: &'static str,
        index: usize,
        reason: String,
    },
    #[error("Rule index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    FilterInstall(#[from] FilterInstallError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

pub type Result<T> = std::result::Result<T, Error>;
