//! Canonical message model shared by every adapter.
//!
//! All platform payloads converge on [`CanonicalMessage`] before entering
//! the pipeline; agent replies come back as [`CanonicalResponse`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Telegram Bot API (long-polling).
    Telegram,
    /// Zalo unofficial session API (cookie login).
    Zalo,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Telegram => f.write_str("telegram"),
            Platform::Zalo => f.write_str("zalo"),
        }
    }
}

/// Closed set of message content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    Text,
    /// Photo or image.
    Image,
    /// Document / generic file.
    File,
    /// Voice or audio clip.
    Audio,
    /// Video clip.
    Video,
    /// Sticker.
    Sticker,
    /// Geographic location.
    Location,
}

/// Routing and provenance metadata attached to a canonical message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Conversation identifier used to route the reply back.
    pub thread_id: String,
    /// Free-form platform-specific fields (message ids, chat type, ...).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Platform-agnostic inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Most specific identifier the wire offered, or a timestamp string.
    pub id: String,
    /// Renderable content; placeholder like `[Photo]` for media-only payloads.
    pub content: String,
    /// Sender identifier; `"unknown"` until validated, then never forwarded.
    pub sender_id: String,
    /// Sender display name, if the wire carried one.
    pub sender_name: Option<String>,
    /// Message timestamp; now() when the wire value is absent or unparsable.
    pub timestamp: DateTime<Utc>,
    /// Originating platform.
    pub platform: Platform,
    /// Content kind.
    pub message_type: MessageType,
    /// Routing metadata.
    pub metadata: MessageMetadata,
}

/// Agent reply consumed by an adapter's send path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// Reply content.
    pub content: String,
    /// Content kind the adapter should dispatch as.
    pub message_type: MessageType,
    /// Optional platform hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CanonicalResponse {
    /// Plain-text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            metadata: None,
        }
    }
}

/// Best-effort user profile from a platform lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalUser {
    /// Platform user identifier.
    pub id: String,
    /// Display name, if known.
    pub name: Option<String>,
    /// Username / handle, if the platform has one.
    pub username: Option<String>,
}
