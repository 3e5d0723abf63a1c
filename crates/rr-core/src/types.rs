//! Core type definitions for Rerouter
//!
//! Rule shapes as persisted in the synced store, and the compiled filter
//! descriptors handed to the browser's declarative request-filtering engine.
//! Field names serialize in camelCase to match the stored JSON.

use serde::{Deserialize, Serialize};

// =============================================================================
// Stored Rules
// =============================================================================

fn default_true() -> bool {
    true
}

/// A URL redirect rule. Identity is its position in the rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRule {
    /// Source pattern (url filter or regex, see [`crate::pattern::classify`])
    pub from: String,
    /// Destination URL
    pub to: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl UrlRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            enabled: true,
        }
    }

    /// Empty `from` or `to` makes a rule inert.
    #[inline]
    pub fn is_inert(&self) -> bool {
        self.from.is_empty() || self.to.is_empty()
    }

    /// Whether the rule takes part in compilation.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_inert()
    }
}

/// A literal text replacement rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRule {
    /// Literal search text
    pub from: String,
    /// Replacement text
    pub to: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TextRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            enabled: true,
        }
    }

    #[inline]
    pub fn is_inert(&self) -> bool {
        self.from.is_empty() || self.to.is_empty()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_inert()
    }
}

/// Legacy URL rule shape, only ever read during migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUrlRule {
    pub source_url: String,
    pub target_url: String,
}

/// Legacy text rule shape, only ever read during migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTextRule {
    pub source_text: String,
    pub target_text: String,
}

impl From<LegacyUrlRule> for UrlRule {
    fn from(rule: LegacyUrlRule) -> Self {
        UrlRule::new(rule.source_url, rule.target_url)
    }
}

impl From<LegacyTextRule> for TextRule {
    fn from(rule: LegacyTextRule) -> Self {
        TextRule::new(rule.source_text, rule.target_text)
    }
}

/// The unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    #[serde(default)]
    pub url_rules: Vec<UrlRule>,
    #[serde(default)]
    pub text_rules: Vec<TextRule>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for StorageSnapshot {
    fn default() -> Self {
        Self {
            url_rules: Vec::new(),
            text_rules: Vec::new(),
            enabled: true,
        }
    }
}

// =============================================================================
// Resource Types (bit mask for condition scoping)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u16 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME = 1 << 1;
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const OTHER = 1 << 12;

        /// Types a redirect rule applies to unless configured otherwise
        const REDIRECTABLE = Self::IMAGE.bits()
            | Self::MAIN_FRAME.bits()
            | Self::SUB_FRAME.bits()
            | Self::XMLHTTPREQUEST.bits();
    }
}

/// A single resource type as named by the filtering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Other,
}

impl ResourceType {
    /// Engine declaration order.
    /// Sorted by engine name, the order rulesets list them in.
    pub const ALL: [ResourceType; 13] = [
        Self::CspReport,
        Self::Font,
        Self::Image,
        Self::MainFrame,
        Self::Media,
        Self::Object,
        Self::Other,
        Self::Ping,
        Self::Script,
        Self::Stylesheet,
        Self::SubFrame,
        Self::Websocket,
        Self::Xmlhttprequest,
    ];

    pub fn mask(self) -> ResourceTypes {
        match self {
            Self::MainFrame => ResourceTypes::MAIN_FRAME,
            Self::SubFrame => ResourceTypes::SUB_FRAME,
            Self::Stylesheet => ResourceTypes::STYLESHEET,
            Self::Script => ResourceTypes::SCRIPT,
            Self::Image => ResourceTypes::IMAGE,
            Self::Font => ResourceTypes::FONT,
            Self::Object => ResourceTypes::OBJECT,
            Self::Xmlhttprequest => ResourceTypes::XMLHTTPREQUEST,
            Self::Ping => ResourceTypes::PING,
            Self::CspReport => ResourceTypes::CSP_REPORT,
            Self::Media => ResourceTypes::MEDIA,
            Self::Websocket => ResourceTypes::WEBSOCKET,
            Self::Other => ResourceTypes::OTHER,
        }
    }

    /// Parse from browser resource type string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main_frame" | "document" => Some(Self::MainFrame),
            "sub_frame" | "subdocument" => Some(Self::SubFrame),
            "stylesheet" | "css" => Some(Self::Stylesheet),
            "script" | "js" => Some(Self::Script),
            "image" | "img" => Some(Self::Image),
            "font" => Some(Self::Font),
            "object" => Some(Self::Object),
            "xmlhttprequest" | "xhr" => Some(Self::Xmlhttprequest),
            "ping" => Some(Self::Ping),
            "csp_report" => Some(Self::CspReport),
            "media" => Some(Self::Media),
            "websocket" | "ws" => Some(Self::Websocket),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl ResourceTypes {
    /// Expand the mask into engine names, sorted by name.
    pub fn to_list(self) -> Vec<ResourceType> {
        ResourceType::ALL
            .iter()
            .copied()
            .filter(|ty| self.contains(ty.mask()))
            .collect()
    }

    pub fn from_list(types: &[ResourceType]) -> Self {
        types
            .iter()
            .fold(ResourceTypes::empty(), |mask, ty| mask | ty.mask())
    }
}

// =============================================================================
// Compiled Filter Rules
// =============================================================================

/// How a source pattern is handed to the filtering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Wildcard url filter (`*`, `|`, `||`, `^`)
    Literal,
    /// Regular expression filter
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAction {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
}

/// Declarative filter rule. Never persisted; rebuilt on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFilterRule {
    /// 1-based position among compiled rules
    pub id: u32,
    pub priority: u32,
    pub action: FilterAction,
    pub condition: FilterCondition,
}

impl CompiledFilterRule {
    /// Build a redirect rule for `pattern` classified as `kind`.
    pub fn redirect(
        id: u32,
        priority: u32,
        kind: MatchKind,
        pattern: &str,
        redirect_to: &str,
        resource_types: ResourceTypes,
    ) -> Self {
        let (url_filter, regex_filter) = match kind {
            MatchKind::Literal => (Some(pattern.to_string()), None),
            MatchKind::Regex => (None, Some(pattern.to_string())),
        };
        Self {
            id,
            priority,
            action: FilterAction {
                kind: ActionType::Redirect,
                redirect: Some(Redirect {
                    url: redirect_to.to_string(),
                }),
            },
            condition: FilterCondition {
                url_filter,
                regex_filter,
                resource_types: resource_types.to_list(),
            },
        }
    }

    pub fn match_kind(&self) -> MatchKind {
        if self.condition.regex_filter.is_some() {
            MatchKind::Regex
        } else {
            MatchKind::Literal
        }
    }

    pub fn pattern(&self) -> &str {
        self.condition
            .regex_filter
            .as_deref()
            .or(self.condition.url_filter.as_deref())
            .unwrap_or("")
    }

    pub fn redirect_to(&self) -> Option<&str> {
        self.action.redirect.as_ref().map(|r| r.url.as_str())
    }

    pub fn resource_types(&self) -> ResourceTypes {
        ResourceTypes::from_list(&self.condition.resource_types)
    }
}
