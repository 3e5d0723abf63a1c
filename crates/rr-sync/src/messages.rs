//! Cross-context message protocol
//!
//! Requests serialize as `{"action": "<name>"}`; every request is answered
//! with exactly one [`Response`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rr_core::MessagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// URL rules changed; recompile and reinstall
    UpdateUrlRules,
    /// Global switch flipped
    ToggleGlobal,
    /// Text rules changed; reload and rescan the page
    UpdateTextRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn ok_enabled(enabled: bool) -> Self {
        Self {
            success: true,
            enabled: Some(enabled),
            error: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            enabled: None,
            error: Some(error.to_string()),
        }
    }
}

/// Anything that can receive a [`Request`] and answer it.
#[async_trait]
pub trait MessageTarget: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, MessagingError>;
}
