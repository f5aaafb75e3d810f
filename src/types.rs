//! Core quarantine types
//!
//! All serialized types use camelCase JSON for wire compatibility with the
//! user-facing surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an isolation context, assigned by the host
pub type ContextId = String;

/// Identifier of a user-facing surface (tab)
pub type SurfaceId = u64;

/// Identifier of one network operation, unique per host session
pub type OperationId = String;

/// Quarantine state of an isolation context
///
/// Ordered: `None < Open < Closing < Closed`, so "closing or greater" is a
/// plain comparison.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum LockStatus {
    /// Not managed by this system (absence of an entry)
    #[default]
    None,
    /// Network allowed
    Open,
    /// Cut-off requested, operations still in flight
    Closing,
    /// Cut-off complete
    Closed,
}

impl LockStatus {
    /// Whether network cut-off has been requested (closing or closed)
    pub fn is_locked(self) -> bool {
        self >= LockStatus::Closing
    }

    /// Whether this context is managed at all
    pub fn is_managed(self) -> bool {
        self != LockStatus::None
    }

    /// Whether moving from `self` to `next` is a reachable transition
    ///
    /// Reachable: identity, `None → Open`, `Open → Closing`, `Open → Closed`,
    /// `Closing → Closed`, and any status back to `None` on teardown.
    pub fn can_transition_to(self, next: LockStatus) -> bool {
        use LockStatus::*;
        self == next
            || matches!(
                (self, next),
                (None, Open) | (Open, Closing) | (Open, Closed) | (Closing, Closed) | (_, None)
            )
    }

    /// Stable lowercase tag, used by the context naming convention
    pub fn as_str(self) -> &'static str {
        match self {
            LockStatus::None => "none",
            LockStatus::Open => "open",
            LockStatus::Closing => "closing",
            LockStatus::Closed => "closed",
        }
    }

    /// Parse a tag produced by [`LockStatus::as_str`]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "none" => Some(LockStatus::None),
            "open" => Some(LockStatus::Open),
            "closing" => Some(LockStatus::Closing),
            "closed" => Some(LockStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of outbound network operation, as reported by the interception hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[serde(alias = "document")]
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Imageset,
    Font,
    Object,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    Ping,
    Beacon,
    CspReport,
    Media,
    #[serde(rename = "websocket")]
    WebSocket,
    WebManifest,
    #[serde(other)]
    Other,
}

impl OperationKind {
    /// Host tag for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::MainFrame => "main_frame",
            OperationKind::SubFrame => "sub_frame",
            OperationKind::Stylesheet => "stylesheet",
            OperationKind::Script => "script",
            OperationKind::Image => "image",
            OperationKind::Imageset => "imageset",
            OperationKind::Font => "font",
            OperationKind::Object => "object",
            OperationKind::XmlHttpRequest => "xmlhttprequest",
            OperationKind::Ping => "ping",
            OperationKind::Beacon => "beacon",
            OperationKind::CspReport => "csp_report",
            OperationKind::Media => "media",
            OperationKind::WebSocket => "websocket",
            OperationKind::WebManifest => "web_manifest",
            OperationKind::Other => "other",
        }
    }

    /// Persistent, bidirectional channel that outlives a single request
    pub fn is_long_lived_channel(self) -> bool {
        matches!(self, OperationKind::WebSocket)
    }
}

impl From<&str> for OperationKind {
    /// Unknown host tags map to [`OperationKind::Other`]
    fn from(tag: &str) -> Self {
        match tag {
            "main_frame" | "document" => OperationKind::MainFrame,
            "sub_frame" => OperationKind::SubFrame,
            "stylesheet" => OperationKind::Stylesheet,
            "script" => OperationKind::Script,
            "image" => OperationKind::Image,
            "imageset" => OperationKind::Imageset,
            "font" => OperationKind::Font,
            "object" => OperationKind::Object,
            "xmlhttprequest" => OperationKind::XmlHttpRequest,
            "ping" => OperationKind::Ping,
            "beacon" => OperationKind::Beacon,
            "csp_report" => OperationKind::CspReport,
            "media" => OperationKind::Media,
            "websocket" => OperationKind::WebSocket,
            "web_manifest" => OperationKind::WebManifest,
            _ => OperationKind::Other,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification about one network operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationEvent {
    Open,
    Completed,
    Error,
    Redirect,
    Blocked,
}

impl OperationEvent {
    pub fn is_open(self) -> bool {
        self == OperationEvent::Open
    }
}

/// Verdict for one outbound operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Visual marker the host shows for an isolation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    /// Host color name (e.g., "green", "red")
    pub color: String,

    /// Host icon name (e.g., "fence")
    pub icon: String,
}

impl Marker {
    pub fn new(color: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            icon: icon.into(),
        }
    }
}

/// An isolation context as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub id: ContextId,
    pub name: String,
    pub marker: Marker,
}

/// A user-facing surface as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub context_id: ContextId,

    /// Whether this surface currently has focus
    #[serde(default)]
    pub active: bool,
}

/// Filter for host context queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextFilter {
    /// Only contexts whose name starts with this prefix
    pub name_prefix: Option<String>,
}

impl ContextFilter {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
        }
    }

    pub fn matches(&self, info: &ContextInfo) -> bool {
        self.name_prefix
            .as_deref()
            .map_or(true, |p| info.name.starts_with(p))
    }
}
