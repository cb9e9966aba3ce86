//! Platform adapters — one live connection per external chat service.
//!
//! Each adapter owns its connection handle and health record, normalizes
//! inbound wire payloads into [`CanonicalMessage`]s, and drives a periodic
//! health-check loop with inline reconnection. Two concrete variants:
//! [`telegram::TelegramAdapter`] (long-polling bot API) and
//! [`zalo::ZaloAdapter`] (cookie-based session API).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::health::HealthSnapshot;
use crate::types::{CanonicalMessage, CanonicalResponse, CanonicalUser, Platform};

pub mod telegram;
pub mod zalo;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Health-check interval, in seconds.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Fixed backoff before a reconnection attempt, in seconds.
pub const RECONNECT_BACKOFF_SECS: u64 = 30;

/// Maximum inbound content length accepted by the validation gate.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Sender-id placeholder used when the wire carried no sender.
pub const UNKNOWN_SENDER_ID: &str = "unknown";

/// Sender-name placeholder used when the wire carried no sender name.
pub const UNKNOWN_SENDER_NAME: &str = "Unknown Sender";

/// Reply sent straight back to the user when their message is rejected or
/// processing fails. Bypasses the orchestrator.
pub const APOLOGY_REPLY: &str = "Sorry, I could not process your message.";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Adapter error taxonomy.
///
/// Only `Configuration` and `Connection` cross the adapter boundary from
/// `connect()`. `Transient` feeds the health loop, `Critical` triggers a
/// forced shutdown, `Send` is returned to whoever called `send_message`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Missing or invalid credentials. Fatal, never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Connection handshake failed. The half-built instance must be discarded.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation attempted without a live connection.
    #[error("not connected")]
    NotConnected,

    /// Network blip. Recorded in health state, resolved by the reconnect loop.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Auth/permission failure at runtime. Retrying cannot succeed.
    #[error("critical transport error: {0}")]
    Critical(String),

    /// Outbound delivery failed.
    #[error("send failed: {0}")]
    Send(String),
}

impl AdapterError {
    /// Whether this error should shut the adapter down immediately instead
    /// of waiting for the health-check/reconnect loop.
    pub fn is_critical(&self) -> bool {
        matches!(self, AdapterError::Critical(_) | AdapterError::Configuration(_))
    }
}

/// Partition a transport-level HTTP error into transient vs critical.
///
/// Auth and permission statuses are terminal; everything else (timeouts,
/// resets, dropped connections, server hiccups) waits for the next check.
pub(crate) fn classify_transport_error(e: &reqwest::Error) -> AdapterError {
    if let Some(status) = e.status() {
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return AdapterError::Critical(format!("HTTP {status}"));
        }
    }
    AdapterError::Transient(e.to_string())
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Adapter lifecycle state.
///
/// `Uninitialized → Connecting → Connected → {Degraded ↔ Reconnecting} →
/// ShutDown`. `ShutDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Created, `connect()` not yet called.
    Uninitialized,
    /// Handshake in progress.
    Connecting,
    /// Live and healthy.
    Connected,
    /// At least one health check failed; below the reconnect threshold.
    Degraded,
    /// Failure threshold crossed; reconnection in progress or pending.
    Reconnecting,
    /// Torn down. Terminal — the instance is never reused.
    ShutDown,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdapterState::Uninitialized => "uninitialized",
            AdapterState::Connecting => "connecting",
            AdapterState::Connected => "connected",
            AdapterState::Degraded => "degraded",
            AdapterState::Reconnecting => "reconnecting",
            AdapterState::ShutDown => "shut_down",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Inbound handler registration
// ---------------------------------------------------------------------------

/// Future returned by an inbound-message handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Inbound-message handler. Single-subscriber: a later registration
/// replaces the former.
pub type MessageHandler = Arc<dyn Fn(CanonicalMessage) -> HandlerFuture + Send + Sync>;

/// Run the registered handler as a detached task, capturing and logging
/// its failure instead of dropping it silently.
pub(crate) fn spawn_handler(handler: MessageHandler, msg: CanonicalMessage) {
    let platform = msg.platform;
    let message_id = msg.id.clone();
    tokio::spawn(async move {
        if let Err(e) = handler(msg).await {
            warn!(%platform, message_id, error = %e, "inbound handler failed");
        }
    });
}

// ---------------------------------------------------------------------------
// Validation gate
// ---------------------------------------------------------------------------

/// Why an inbound message was rejected before reaching the orchestrator.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationReject {
    /// Content empty after trimming.
    EmptyContent,
    /// Sender never resolved past the `"unknown"` placeholder.
    UnknownSender,
    /// Content exceeds [`MAX_MESSAGE_CHARS`].
    TooLong(usize),
}

impl std::fmt::Display for ValidationReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationReject::EmptyContent => f.write_str("empty content"),
            ValidationReject::UnknownSender => f.write_str("unresolved sender"),
            ValidationReject::TooLong(n) => write!(f, "content too long ({n} chars)"),
        }
    }
}

/// Gate applied after normalization, before the orchestrator sees the
/// message. Rejected messages get an apology reply through the adapter.
pub fn validate_inbound(msg: &CanonicalMessage) -> Result<(), ValidationReject> {
    if msg.content.trim().is_empty() {
        return Err(ValidationReject::EmptyContent);
    }
    if msg.sender_id == UNKNOWN_SENDER_ID {
        return Err(ValidationReject::UnknownSender);
    }
    let len = msg.content.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationReject::TooLong(len));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Common operation set for platform adapters.
///
/// Optional capabilities (user lookup) return an absent result rather than
/// being probed for existence at runtime.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Establish the external session, register the inbound listener, and
    /// start the health-check loop.
    ///
    /// On failure the instance must be discarded — partial state is not
    /// safe to reuse.
    async fn connect(self: Arc<Self>) -> Result<(), AdapterError>;

    /// Graceful teardown. Idempotent; tolerates transport failures during
    /// teardown (logged, never raised). No health tick fires after return.
    async fn disconnect(&self);

    /// Immediate teardown from error paths. Same end state as
    /// [`PlatformAdapter::disconnect`]; safe even when `connect()` never
    /// finished.
    async fn force_shutdown(&self);

    /// Send a reply to `destination` (the canonical `metadata.thread_id`).
    ///
    /// Fails with [`AdapterError::NotConnected`] when there is no live
    /// connection. Content dispatches per `message_type`; kinds the
    /// transport cannot carry fall back to a plain-text send.
    async fn send_message(
        &self,
        destination: &str,
        response: &CanonicalResponse,
    ) -> Result<(), AdapterError>;

    /// Register the single inbound handler, replacing any previous one.
    async fn on_message(&self, handler: MessageHandler);

    /// Best-effort user lookup. `None` when the transport has no profile
    /// endpoint or the user is unknown.
    async fn get_user(&self, user_id: &str) -> Option<CanonicalUser>;

    /// Point-in-time health snapshot for external reporting.
    async fn health(&self) -> HealthSnapshot;

    /// Current lifecycle state.
    async fn state(&self) -> AdapterState;

    /// Webhook entry point: normalize, gate, and dispatch a raw payload as
    /// if the adapter's own listener had delivered it.
    async fn ingest_raw(&self, payload: serde_json::Value);
}
