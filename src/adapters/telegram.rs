//! Telegram Bot API adapter — long-polling variant.
//!
//! Polls `getUpdates` for incoming messages, normalizes them into
//! [`CanonicalMessage`]s, and sends replies via the typed Bot API send
//! endpoints. A 60-second health loop probes `getMe` and the poll task,
//! reconnecting after the failure threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::health::{ConnectionHealth, HealthSnapshot};
use crate::types::{
    CanonicalMessage, CanonicalResponse, CanonicalUser, MessageMetadata, MessageType, Platform,
};

use super::{
    classify_transport_error, spawn_handler, validate_inbound, AdapterError, AdapterState,
    MessageHandler, PlatformAdapter, APOLOGY_REPLY, HEALTH_CHECK_INTERVAL_SECS,
    RECONNECT_BACKOFF_SECS, UNKNOWN_SENDER_ID, UNKNOWN_SENDER_NAME,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Telegram adapter configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API token.
    pub bot_token: String,
    /// Long-poll timeout for `getUpdates`, in seconds.
    pub poll_timeout_seconds: u32,
}

// ---------------------------------------------------------------------------
// Telegram API types (minimal subset)
// ---------------------------------------------------------------------------

/// Generic Telegram Bot API response wrapper.
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Telegram `Update` object.
#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

/// Telegram `Message` object (subset of fields we use).
#[derive(Debug, Default, Deserialize)]
struct TelegramMessage {
    message_id: Option<i64>,
    from: Option<TelegramUser>,
    chat: Option<TelegramChat>,
    date: Option<i64>,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<TelegramPhotoSize>>,
    document: Option<TelegramDocument>,
    audio: Option<TelegramAudio>,
    voice: Option<TelegramAudio>,
    video: Option<TelegramVideo>,
    sticker: Option<TelegramSticker>,
    location: Option<TelegramLocation>,
}

/// Telegram `User` object.
#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
}

impl TelegramUser {
    fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.username.clone(),
        }
    }
}

/// Telegram `Chat` object.
#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    first_name: Option<String>,
    username: Option<String>,
}

/// One size entry of a Telegram photo.
#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
}

/// Telegram `Document` object.
#[derive(Debug, Deserialize)]
struct TelegramDocument {
    file_id: String,
    file_name: Option<String>,
}

/// Telegram `Audio` / `Voice` object.
#[derive(Debug, Deserialize)]
struct TelegramAudio {
    file_id: String,
}

/// Telegram `Video` object.
#[derive(Debug, Deserialize)]
struct TelegramVideo {
    file_id: String,
}

/// Telegram `Sticker` object.
#[derive(Debug, Deserialize)]
struct TelegramSticker {
    file_id: String,
    emoji: Option<String>,
}

/// Telegram `Location` object.
#[derive(Debug, Deserialize)]
struct TelegramLocation {
    latitude: f64,
    longitude: f64,
}

// ---------------------------------------------------------------------------
// Payload shape parser
// ---------------------------------------------------------------------------

/// The two Telegram payload shapes in circulation: a full `Update` envelope
/// (long-poll batches, most webhook setups) and a bare `Message` object
/// (older webhook configurations).
#[derive(Debug)]
enum TelegramPayload {
    /// `{"update_id": ..., "message": {...}}`
    Update(TelegramUpdate),
    /// A flat `Message` object with no envelope.
    Bare(TelegramMessage),
}

impl TelegramPayload {
    /// Classify a raw JSON payload by the presence of the `update_id`
    /// envelope field, then deserialize the matching shape.
    fn parse(value: serde_json::Value) -> Option<Self> {
        if value.get("update_id").is_some() {
            match serde_json::from_value::<TelegramUpdate>(value) {
                Ok(update) => Some(TelegramPayload::Update(update)),
                Err(e) => {
                    warn!(error = %e, "unparsable Telegram update envelope");
                    None
                }
            }
        } else {
            match serde_json::from_value::<TelegramMessage>(value) {
                Ok(msg) => Some(TelegramPayload::Bare(msg)),
                Err(e) => {
                    warn!(error = %e, "unparsable bare Telegram message");
                    None
                }
            }
        }
    }

    fn into_message(self) -> Option<TelegramMessage> {
        match self {
            TelegramPayload::Update(update) => update.message,
            TelegramPayload::Bare(msg) => Some(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

/// Base URL for the Telegram Bot API.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Extra seconds added to the HTTP timeout beyond the long-poll timeout,
/// so the TCP socket stays open while Telegram holds the request.
const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Sleep after a transient poll error before the next `getUpdates` call.
const POLL_RETRY_DELAY_SECS: u64 = 5;

/// Mutable adapter state. Owned exclusively by this instance.
struct Inner {
    state: AdapterState,
    health: ConnectionHealth,
    handler: Option<MessageHandler>,
    shutdown: bool,
    poll_task: Option<JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
    last_activity: Option<DateTime<Utc>>,
}

/// What the health loop does after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    /// Keep ticking.
    Continue,
    /// Failure threshold crossed: run the reconnection procedure.
    Reconnect,
    /// Shut down or shutting down: stop the loop.
    Stop,
}

/// Apply one liveness-probe outcome to the adapter state.
///
/// A success restores `Connected`. A transient failure degrades, and
/// crossing the failure threshold requests reconnection — at most one
/// reconnection per tick. A critical failure (revoked token) stops the
/// loop; the caller performs the forced shutdown.
fn evaluate_probe(inner: &mut Inner, probe: &Result<(), AdapterError>) -> TickAction {
    if inner.shutdown {
        return TickAction::Stop;
    }
    match probe {
        Ok(()) => {
            inner.health.update(true, None);
            inner.state = AdapterState::Connected;
            TickAction::Continue
        }
        Err(e) if e.is_critical() => {
            inner.health.update(false, Some(&e.to_string()));
            TickAction::Stop
        }
        Err(e) => {
            warn!(error = %e, "Telegram health check failed");
            inner.health.update(false, Some(&e.to_string()));
            if inner.health.needs_reconnect() {
                inner.state = AdapterState::Reconnecting;
                TickAction::Reconnect
            } else {
                inner.state = AdapterState::Degraded;
                TickAction::Continue
            }
        }
    }
}

/// Telegram Bot API adapter.
pub struct TelegramAdapter {
    config: TelegramConfig,
    client: reqwest::Client,
    inner: Mutex<Inner>,
}

impl TelegramAdapter {
    /// Create an adapter in the `Uninitialized` state.
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            inner: Mutex::new(Inner {
                state: AdapterState::Uninitialized,
                health: ConnectionHealth::default(),
                handler: None,
                shutdown: false,
                poll_task: None,
                health_task: None,
                last_activity: None,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Bot API calls
    // ------------------------------------------------------------------

    /// Call a Bot API method and unwrap the response envelope.
    async fn call_api<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, AdapterError> {
        let url = format!("{TELEGRAM_API_BASE}/bot{}/{method}", self.config.bot_token);

        let resp = self
            .client
            .post(&url)
            .json(&params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        let body: TelegramResponse<T> = resp
            .json()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;

        if !body.ok {
            let desc = body
                .description
                .unwrap_or_else(|| format!("HTTP {status}"));
            // 401/404 on the Bot API means a bad token; retrying cannot help.
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::NOT_FOUND
            {
                return Err(AdapterError::Critical(desc));
            }
            return Err(AdapterError::Transient(desc));
        }

        body.result
            .ok_or_else(|| AdapterError::Transient("empty API result".to_owned()))
    }

    /// Verify the token via `getMe`.
    async fn handshake(&self) -> Result<(), AdapterError> {
        let me: serde_json::Value = self
            .call_api("getMe", serde_json::json!({}), Duration::from_secs(10))
            .await?;
        debug!(bot = ?me.get("username"), "Telegram handshake succeeded");
        Ok(())
    }

    /// Call `getUpdates` with the long-poll timeout.
    async fn poll_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>, AdapterError> {
        let mut params = serde_json::json!({
            "timeout": self.config.poll_timeout_seconds,
        });
        if let Some(off) = offset {
            params["offset"] = serde_json::Value::from(off);
        }
        let timeout = Duration::from_secs(
            u64::from(self.config.poll_timeout_seconds).saturating_add(POLL_TIMEOUT_MARGIN_SECS),
        );
        self.call_api("getUpdates", params, timeout).await
    }

    // ------------------------------------------------------------------
    // Inbound path
    // ------------------------------------------------------------------

    /// Normalize a Telegram message into the canonical shape.
    ///
    /// Never fails: every missing field has a defined fallback. Content
    /// kind is chosen by richest-first priority (document > photo > audio >
    /// video > sticker > location > text).
    fn normalize(&self, msg: &TelegramMessage) -> CanonicalMessage {
        let id = msg
            .message_id
            .map(|m| m.to_string())
            .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());

        let (sender_id, sender_name) = match &msg.from {
            Some(user) => (user.id.to_string(), user.display_name()),
            None => (
                UNKNOWN_SENDER_ID.to_owned(),
                Some(UNKNOWN_SENDER_NAME.to_owned()),
            ),
        };

        let timestamp = msg
            .date
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let caption = msg.caption.clone();
        let mut extra = serde_json::Map::new();

        let (message_type, content) = if let Some(doc) = &msg.document {
            extra.insert("file_id".to_owned(), doc.file_id.clone().into());
            let content = caption
                .or_else(|| doc.file_name.clone())
                .unwrap_or_else(|| "[Document]".to_owned());
            (MessageType::File, content)
        } else if let Some(photos) = &msg.photo {
            if let Some(largest) = photos.last() {
                extra.insert("file_id".to_owned(), largest.file_id.clone().into());
            }
            (MessageType::Image, caption.unwrap_or_else(|| "[Photo]".to_owned()))
        } else if let Some(audio) = msg.audio.as_ref().or(msg.voice.as_ref()) {
            extra.insert("file_id".to_owned(), audio.file_id.clone().into());
            (MessageType::Audio, caption.unwrap_or_else(|| "[Audio]".to_owned()))
        } else if let Some(video) = &msg.video {
            extra.insert("file_id".to_owned(), video.file_id.clone().into());
            (MessageType::Video, caption.unwrap_or_else(|| "[Video]".to_owned()))
        } else if let Some(sticker) = &msg.sticker {
            extra.insert("file_id".to_owned(), sticker.file_id.clone().into());
            let content = sticker
                .emoji
                .clone()
                .unwrap_or_else(|| "[Sticker]".to_owned());
            (MessageType::Sticker, content)
        } else if let Some(loc) = &msg.location {
            extra.insert("latitude".to_owned(), loc.latitude.into());
            extra.insert("longitude".to_owned(), loc.longitude.into());
            (MessageType::Location, "[Location]".to_owned())
        } else {
            (MessageType::Text, msg.text.clone().unwrap_or_default())
        };

        // Reply routing: the chat id, falling back to the sender id.
        let thread_id = msg
            .chat
            .as_ref()
            .map(|c| c.id.to_string())
            .unwrap_or_else(|| sender_id.clone());

        if let Some(mid) = msg.message_id {
            extra.insert("message_id".to_owned(), mid.into());
        }

        CanonicalMessage {
            id,
            content,
            sender_id,
            sender_name,
            timestamp,
            platform: Platform::Telegram,
            message_type,
            metadata: MessageMetadata {
                thread_id,
                extra: serde_json::Value::Object(extra),
            },
        }
    }

    /// Gate a normalized message and hand it to the registered handler.
    ///
    /// Rejections get an apology straight back through this adapter; the
    /// orchestrator never sees them.
    async fn process_inbound(&self, msg: CanonicalMessage) {
        if let Err(reject) = validate_inbound(&msg) {
            warn!(platform = %msg.platform, reason = %reject, "inbound message rejected");
            if !msg.metadata.thread_id.is_empty() {
                let apology = CanonicalResponse::text(APOLOGY_REPLY);
                if let Err(e) = self.send_message(&msg.metadata.thread_id, &apology).await {
                    warn!(error = %e, "failed to send rejection apology");
                }
            }
            return;
        }

        let handler = { self.inner.lock().await.handler.clone() };
        match handler {
            Some(handler) => spawn_handler(handler, msg),
            None => debug!("no inbound handler registered, dropping message"),
        }
    }

    /// Main polling loop. Exits on shutdown or a critical transport error.
    async fn poll_loop(self: Arc<Self>) {
        let mut offset: Option<i64> = None;

        loop {
            if self.inner.lock().await.shutdown {
                break;
            }

            match self.poll_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id.saturating_add(1));
                        if let Some(msg) = update.message {
                            let canonical = self.normalize(&msg);
                            debug!(message_id = %canonical.id, "normalized Telegram update");
                            self.process_inbound(canonical).await;
                        }
                    }
                }
                Err(e) if e.is_critical() => {
                    warn!(error = %e, "critical Telegram transport error, shutting down");
                    self.force_shutdown().await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Telegram poll error");
                    self.inner.lock().await.health.update(false, Some(&e.to_string()));
                    tokio::time::sleep(Duration::from_secs(POLL_RETRY_DELAY_SECS)).await;
                }
            }
        }
        info!("Telegram poll loop stopped");
    }

    // ------------------------------------------------------------------
    // Health loop
    // ------------------------------------------------------------------

    /// Verify the connection handle and inbound listener are still alive.
    ///
    /// Keeps the error typed so the loop can tell a dead token apart from
    /// a network blip.
    async fn probe_liveness(&self) -> Result<(), AdapterError> {
        {
            let inner = self.inner.lock().await;
            match &inner.poll_task {
                Some(task) if !task.is_finished() => {}
                _ => {
                    return Err(AdapterError::Transient(
                        "inbound listener not running".to_owned(),
                    ))
                }
            }
        }
        self.handshake().await
    }

    /// Periodic health loop. Ticks are strictly sequential: a tick's body,
    /// including any reconnection it triggers, completes before the next
    /// tick can fire. A critical probe error shuts the adapter down
    /// instead of feeding the retry cycle.
    async fn health_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        loop {
            interval.tick().await;

            let probe = self.probe_liveness().await;
            let action = {
                let mut inner = self.inner.lock().await;
                evaluate_probe(&mut inner, &probe)
            };

            match action {
                TickAction::Continue => {}
                TickAction::Reconnect => {
                    tokio::time::sleep(Duration::from_secs(RECONNECT_BACKOFF_SECS)).await;
                    self.reconnect().await;
                }
                TickAction::Stop => {
                    if let Err(e) = &probe {
                        if e.is_critical() {
                            warn!(error = %e, "critical Telegram health failure, shutting down");
                            self.force_shutdown().await;
                        }
                    }
                    break;
                }
            }
        }
        info!("Telegram health loop stopped");
    }

    /// Reconnection procedure: best-effort listener teardown, fresh
    /// handshake, fresh poll loop. The caller has already applied the
    /// fixed backoff. A transient failure leaves the adapter in
    /// `Reconnecting` for the next tick to retry; a critical one (revoked
    /// token) shuts the adapter down for good.
    async fn reconnect(self: &Arc<Self>) {
        let attempts = {
            let mut inner = self.inner.lock().await;
            inner.health.record_reconnect_attempt();
            inner.health.reconnect_attempts()
        };
        info!(attempts, "Telegram reconnection attempt starting");

        // Stop the existing listener, best-effort.
        {
            let mut inner = self.inner.lock().await;
            if inner.shutdown {
                return;
            }
            if let Some(task) = inner.poll_task.take() {
                task.abort();
            }
        }

        match self.handshake().await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if inner.shutdown {
                    return;
                }
                inner.poll_task = Some(tokio::spawn(Arc::clone(self).poll_loop()));
                inner.health.update(true, None);
                inner.state = AdapterState::Connected;
                info!("Telegram reconnection succeeded");
            }
            Err(e) if e.is_critical() => {
                warn!(error = %e, "Telegram token rejected during reconnection, shutting down");
                self.force_shutdown().await;
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.health.update(false, Some(&e.to_string()));
                warn!(error = %e, "Telegram reconnection failed, will retry next tick");
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Shared teardown. Idempotent; no pending health tick fires after
    /// this returns.
    async fn shutdown_inner(&self, forced: bool) {
        let mut inner = self.inner.lock().await;
        if inner.state == AdapterState::ShutDown {
            return;
        }
        inner.shutdown = true;
        inner.state = AdapterState::ShutDown;
        inner.health.mark_disconnected();

        if let Some(task) = inner.health_task.take() {
            task.abort();
        }
        if let Some(task) = inner.poll_task.take() {
            task.abort();
        }

        if forced {
            warn!(last_activity = ?inner.last_activity, "Telegram adapter force-shut down");
        } else {
            info!(last_activity = ?inner.last_activity, "Telegram adapter disconnected");
        }
    }
}

#[async_trait]
impl PlatformAdapter for TelegramAdapter {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn connect(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == AdapterState::ShutDown {
                return Err(AdapterError::Connection(
                    "adapter already shut down".to_owned(),
                ));
            }
            inner.state = AdapterState::Connecting;
        }

        if self.config.bot_token.trim().is_empty() {
            return Err(AdapterError::Configuration("empty bot token".to_owned()));
        }

        self.handshake()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let mut inner = self.inner.lock().await;
        inner.poll_task = Some(tokio::spawn(Arc::clone(&self).poll_loop()));
        inner.health_task = Some(tokio::spawn(Arc::clone(&self).health_loop()));
        inner.health.update(true, None);
        inner.state = AdapterState::Connected;
        info!("Telegram adapter connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shutdown_inner(false).await;
    }

    async fn force_shutdown(&self) {
        self.shutdown_inner(true).await;
    }

    async fn send_message(
        &self,
        destination: &str,
        response: &CanonicalResponse,
    ) -> Result<(), AdapterError> {
        {
            let inner = self.inner.lock().await;
            if inner.state == AdapterState::ShutDown || !inner.health.is_connected() {
                return Err(AdapterError::NotConnected);
            }
        }

        // Typed dispatch: each supported kind maps to its Bot API method;
        // kinds Telegram cannot address directly fall back to text.
        let (method, payload_key) = match response.message_type {
            MessageType::Text | MessageType::Location => ("sendMessage", "text"),
            MessageType::Image => ("sendPhoto", "photo"),
            MessageType::File => ("sendDocument", "document"),
            MessageType::Audio => ("sendAudio", "audio"),
            MessageType::Video => ("sendVideo", "video"),
            MessageType::Sticker => ("sendSticker", "sticker"),
        };

        let params = serde_json::json!({
            "chat_id": destination,
            payload_key: response.content,
        });

        let result: Result<serde_json::Value, AdapterError> = self
            .call_api(method, params, Duration::from_secs(30))
            .await;

        match result {
            Ok(_) => {
                let mut inner = self.inner.lock().await;
                inner.last_activity = Some(Utc::now());
                debug!(destination, method, "Telegram message sent");
                Ok(())
            }
            Err(e) => {
                warn!(destination, error = %e, "Telegram send failed");
                Err(AdapterError::Send(e.to_string()))
            }
        }
    }

    async fn on_message(&self, handler: MessageHandler) {
        let mut inner = self.inner.lock().await;
        if inner.handler.is_some() {
            debug!("replacing existing Telegram inbound handler");
        }
        inner.handler = Some(handler);
    }

    async fn get_user(&self, user_id: &str) -> Option<CanonicalUser> {
        let params = serde_json::json!({ "chat_id": user_id });
        let chat: TelegramChat = match self
            .call_api("getChat", params, Duration::from_secs(10))
            .await
        {
            Ok(chat) => chat,
            Err(e) => {
                debug!(user_id, error = %e, "Telegram user lookup failed");
                return None;
            }
        };
        Some(CanonicalUser {
            id: chat.id.to_string(),
            name: chat.first_name,
            username: chat.username,
        })
    }

    async fn health(&self) -> HealthSnapshot {
        self.inner.lock().await.health.snapshot()
    }

    async fn state(&self) -> AdapterState {
        self.inner.lock().await.state
    }

    async fn ingest_raw(&self, payload: serde_json::Value) {
        let Some(parsed) = TelegramPayload::parse(payload) else {
            return;
        };
        let Some(msg) = parsed.into_message() else {
            debug!("Telegram payload carried no message");
            return;
        };
        let canonical = self.normalize(&msg);
        self.process_inbound(canonical).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_adapter() -> TelegramAdapter {
        TelegramAdapter::new(TelegramConfig {
            bot_token: "test-token".to_owned(),
            poll_timeout_seconds: 30,
        })
    }

    fn wire_message(json: serde_json::Value) -> TelegramMessage {
        serde_json::from_value(json).expect("valid wire message")
    }

    // -- payload shape parser --

    #[test]
    fn parse_classifies_update_envelope() {
        let value = serde_json::json!({
            "update_id": 7,
            "message": { "message_id": 1, "text": "hi" }
        });
        assert!(matches!(
            TelegramPayload::parse(value),
            Some(TelegramPayload::Update(_))
        ));
    }

    #[test]
    fn parse_classifies_bare_message() {
        let value = serde_json::json!({ "message_id": 1, "text": "hi" });
        assert!(matches!(
            TelegramPayload::parse(value),
            Some(TelegramPayload::Bare(_))
        ));
    }

    #[test]
    fn parse_update_without_message_yields_none_message() {
        let value = serde_json::json!({ "update_id": 9 });
        let parsed = TelegramPayload::parse(value).expect("parses");
        assert!(parsed.into_message().is_none());
    }

    // -- normalization --

    #[test]
    fn normalize_text_message() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 42,
            "from": { "id": 1001, "first_name": "Bob" },
            "chat": { "id": 555 },
            "date": 1_700_000_000,
            "text": "hi"
        }));

        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.id, "42");
        assert_eq!(canonical.content, "hi");
        assert_eq!(canonical.sender_id, "1001");
        assert_eq!(canonical.sender_name.as_deref(), Some("Bob"));
        assert_eq!(canonical.message_type, MessageType::Text);
        assert_eq!(canonical.platform, Platform::Telegram);
        assert_eq!(canonical.metadata.thread_id, "555");
        assert_eq!(canonical.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn normalize_photo_only_message() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "photo": [ { "file_id": "small" }, { "file_id": "large" } ]
        }));

        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.message_type, MessageType::Image);
        assert_eq!(canonical.content, "[Photo]");
        // Largest size wins.
        assert_eq!(canonical.metadata.extra["file_id"], "large");
    }

    #[test]
    fn normalize_caption_overrides_placeholder() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "caption": "vacation pic",
            "photo": [ { "file_id": "f" } ]
        }));
        assert_eq!(adapter.normalize(&msg).content, "vacation pic");
    }

    #[test]
    fn normalize_document_beats_photo() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "document": { "file_id": "d", "file_name": "report.pdf" },
            "photo": [ { "file_id": "p" } ]
        }));
        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.message_type, MessageType::File);
        assert_eq!(canonical.content, "report.pdf");
    }

    #[test]
    fn normalize_voice_maps_to_audio() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "voice": { "file_id": "v" }
        }));
        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.message_type, MessageType::Audio);
        assert_eq!(canonical.content, "[Audio]");
    }

    #[test]
    fn normalize_sticker_uses_emoji() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "sticker": { "file_id": "s", "emoji": "😀" }
        }));
        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.message_type, MessageType::Sticker);
        assert_eq!(canonical.content, "😀");
    }

    #[test]
    fn normalize_location() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "location": { "latitude": 10.5, "longitude": 106.7 }
        }));
        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.message_type, MessageType::Location);
        assert_eq!(canonical.content, "[Location]");
        assert_eq!(canonical.metadata.extra["latitude"], 10.5);
    }

    #[test]
    fn normalize_missing_sender_falls_back_to_unknown() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "chat": { "id": 2 },
            "text": "anonymous"
        }));
        let canonical = adapter.normalize(&msg);
        assert_eq!(canonical.sender_id, UNKNOWN_SENDER_ID);
        assert_eq!(canonical.sender_name.as_deref(), Some(UNKNOWN_SENDER_NAME));
        // The gate must then reject it.
        assert!(validate_inbound(&canonical).is_err());
    }

    #[test]
    fn normalize_missing_id_falls_back_to_timestamp() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "from": { "id": 2, "first_name": "A" },
            "chat": { "id": 2 },
            "text": "no id"
        }));
        let canonical = adapter.normalize(&msg);
        assert!(!canonical.id.is_empty());
        assert!(canonical.id.parse::<i64>().is_ok(), "id should be numeric: {}", canonical.id);
    }

    #[test]
    fn normalize_missing_chat_routes_to_sender() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 77, "first_name": "A" },
            "text": "hi"
        }));
        assert_eq!(adapter.normalize(&msg).metadata.thread_id, "77");
    }

    #[test]
    fn normalize_full_name() {
        let adapter = make_adapter();
        let msg = wire_message(serde_json::json!({
            "message_id": 1,
            "from": { "id": 2, "first_name": "Ada", "last_name": "Lovelace" },
            "chat": { "id": 2 },
            "text": "hi"
        }));
        assert_eq!(
            adapter.normalize(&msg).sender_name.as_deref(),
            Some("Ada Lovelace")
        );
    }

    // -- lifecycle --

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let adapter = make_adapter();
        let err = adapter
            .send_message("1", &CanonicalResponse::text("hi"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AdapterError::NotConnected));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_terminal() {
        let adapter = Arc::new(make_adapter());
        adapter.force_shutdown().await;
        assert_eq!(adapter.state().await, AdapterState::ShutDown);

        // Second teardown is a no-op.
        adapter.disconnect().await;
        assert_eq!(adapter.state().await, AdapterState::ShutDown);

        // Sends keep failing after shutdown.
        let err = adapter
            .send_message("1", &CanonicalResponse::text("hi"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AdapterError::NotConnected));
    }

    #[tokio::test]
    async fn connect_after_shutdown_is_rejected() {
        let adapter = Arc::new(make_adapter());
        adapter.force_shutdown().await;
        let err = Arc::clone(&adapter).connect().await.expect_err("must fail");
        assert!(matches!(err, AdapterError::Connection(_)));
    }

    #[tokio::test]
    async fn connect_with_empty_token_is_configuration_error() {
        let adapter = Arc::new(TelegramAdapter::new(TelegramConfig {
            bot_token: "  ".to_owned(),
            poll_timeout_seconds: 30,
        }));
        let err = Arc::clone(&adapter).connect().await.expect_err("must fail");
        assert!(matches!(err, AdapterError::Configuration(_)));
    }

    #[tokio::test]
    async fn on_message_replaces_previous_handler() {
        let adapter = make_adapter();
        let first: MessageHandler = Arc::new(|_| Box::pin(async { Ok(()) }));
        let second: MessageHandler = Arc::new(|_| Box::pin(async { Ok(()) }));
        adapter.on_message(first).await;
        adapter.on_message(second.clone()).await;
        let inner = adapter.inner.lock().await;
        let registered = inner.handler.as_ref().expect("handler registered");
        assert!(Arc::ptr_eq(registered, &second));
    }

    // -- health ticks --

    #[tokio::test]
    async fn failure_threshold_requests_reconnect_exactly_once() {
        use crate::health::MAX_CONSECUTIVE_FAILURES;

        let adapter = make_adapter();
        let mut inner = adapter.inner.lock().await;
        inner.health.update(true, None);
        inner.state = AdapterState::Connected;

        let failure: Result<(), AdapterError> =
            Err(AdapterError::Transient("probe timeout".to_owned()));
        for _ in 0..MAX_CONSECUTIVE_FAILURES.saturating_sub(1) {
            assert_eq!(evaluate_probe(&mut inner, &failure), TickAction::Continue);
            assert_eq!(inner.state, AdapterState::Degraded);
        }

        // The fifth consecutive failure crosses the threshold: one
        // reconnection request for this tick, no more.
        assert_eq!(evaluate_probe(&mut inner, &failure), TickAction::Reconnect);
        assert_eq!(inner.state, AdapterState::Reconnecting);

        // A successful probe on the next tick restores the adapter.
        assert_eq!(evaluate_probe(&mut inner, &Ok(())), TickAction::Continue);
        assert_eq!(inner.state, AdapterState::Connected);
        assert!(inner.health.is_healthy());
    }

    #[tokio::test]
    async fn critical_probe_error_stops_the_loop() {
        let adapter = make_adapter();
        let mut inner = adapter.inner.lock().await;
        inner.health.update(true, None);
        inner.state = AdapterState::Connected;

        let revoked: Result<(), AdapterError> =
            Err(AdapterError::Critical("Unauthorized".to_owned()));
        assert_eq!(evaluate_probe(&mut inner, &revoked), TickAction::Stop);
        assert_eq!(
            inner.health.snapshot().last_error.as_deref(),
            Some("critical transport error: Unauthorized")
        );
    }

    #[tokio::test]
    async fn shutdown_flag_stops_the_loop_before_any_update() {
        let adapter = make_adapter();
        let mut inner = adapter.inner.lock().await;
        inner.shutdown = true;
        assert_eq!(evaluate_probe(&mut inner, &Ok(())), TickAction::Stop);
        assert!(!inner.health.is_connected());
    }
}
