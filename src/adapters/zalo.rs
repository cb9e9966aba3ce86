//! Zalo adapter — cookie-based unofficial session API variant.
//!
//! Logs in with cookie/IMEI/user-agent against a session bridge, long-polls
//! `/events/poll` for inbound messages, and sends replies as plain text
//! (the session API has no typed media sends and no profile endpoint).

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

/// Zalo adapter configuration.
#[derive(Debug, Clone)]
pub struct ZaloConfig {
    /// Base URL of the session bridge.
    pub base_url: String,
    /// Session cookie captured from a logged-in web client.
    pub cookie: String,
    /// Device IMEI the session was registered with.
    pub imei: String,
    /// User-agent string the session was registered with.
    pub user_agent: String,
}

impl ZaloConfig {
    fn validate(&self) -> Result<(), AdapterError> {
        for (name, value) in [
            ("cookie", &self.cookie),
            ("imei", &self.imei),
            ("user_agent", &self.user_agent),
        ] {
            if value.trim().is_empty() {
                return Err(AdapterError::Configuration(format!("empty {name}")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bridge API types
// ---------------------------------------------------------------------------

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout for `/events/poll` requests.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Sleep after a transient poll error before the next poll.
const POLL_RETRY_DELAY_SECS: u64 = 5;

/// Response envelope from the session bridge HTTP API.
#[derive(Debug, Deserialize)]
struct BridgeResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Connection status reported by the bridge.
#[derive(Debug, Deserialize)]
struct BridgeStatus {
    connected: bool,
}

// ---------------------------------------------------------------------------
// Payload shape parser
// ---------------------------------------------------------------------------

/// Inbound Zalo event fields common to both wire shapes.
///
/// `content` may be a bare string or an object carrying `text`/`title`;
/// `ts` may be a number or a string of milliseconds. Both are historical
/// wire variations, not errors.
#[derive(Debug, Default, Deserialize)]
struct ZaloEvent {
    #[serde(rename = "msgId")]
    msg_id: Option<String>,
    #[serde(rename = "cliMsgId")]
    cli_msg_id: Option<String>,
    #[serde(rename = "uidFrom")]
    uid_from: Option<String>,
    #[serde(rename = "dName")]
    d_name: Option<String>,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "msgType")]
    msg_type: Option<String>,
    content: Option<serde_json::Value>,
    ts: Option<serde_json::Value>,
}

/// The two Zalo payload shapes in circulation: a `data` envelope (current
/// bridge builds) and the legacy flat event.
#[derive(Debug)]
enum ZaloPayload {
    /// `{"data": { ...event fields... }}`
    Envelope(ZaloEvent),
    /// Flat event fields at the top level.
    Legacy(ZaloEvent),
}

impl ZaloPayload {
    /// Classify by presence of a nested `data` object, then deserialize
    /// the matching shape.
    fn parse(value: serde_json::Value) -> Option<Self> {
        if let Some(data) = value.get("data") {
            if data.is_object() {
                return match serde_json::from_value::<ZaloEvent>(data.clone()) {
                    Ok(event) => Some(ZaloPayload::Envelope(event)),
                    Err(e) => {
                        warn!(error = %e, "unparsable Zalo envelope payload");
                        None
                    }
                };
            }
        }
        match serde_json::from_value::<ZaloEvent>(value) {
            Ok(event) => Some(ZaloPayload::Legacy(event)),
            Err(e) => {
                warn!(error = %e, "unparsable legacy Zalo payload");
                None
            }
        }
    }

    fn into_event(self) -> ZaloEvent {
        match self {
            ZaloPayload::Envelope(event) | ZaloPayload::Legacy(event) => event,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

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
/// Same contract as the Telegram variant: success restores `Connected`,
/// a transient failure degrades (reconnecting once the threshold is
/// crossed, at most once per tick), a critical failure (expired session)
/// stops the loop and the caller shuts the adapter down.
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
            warn!(error = %e, "Zalo health check failed");
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

/// Zalo session-API adapter.
pub struct ZaloAdapter {
    config: ZaloConfig,
    client: reqwest::Client,
    inner: Mutex<Inner>,
}

impl ZaloAdapter {
    /// Create an adapter in the `Uninitialized` state.
    pub fn new(config: ZaloConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            config,
            client,
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
    // Bridge API calls
    // ------------------------------------------------------------------

    /// Run the cookie/IMEI/user-agent login handshake.
    async fn login(&self) -> Result<(), AdapterError> {
        let url = format!("{}/login", self.config.base_url);
        let body = serde_json::json!({
            "cookie": self.config.cookie,
            "imei": self.config.imei,
            "user_agent": self.config.user_agent,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AdapterError::Critical(format!("login rejected: HTTP {status}")));
        }

        let body: BridgeResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;

        if !body.success {
            return Err(AdapterError::Transient(
                body.error.unwrap_or_else(|| "login failed".to_owned()),
            ));
        }

        debug!("Zalo session handshake succeeded");
        Ok(())
    }

    /// Ask the bridge whether the session is still live.
    async fn session_status(&self) -> Result<bool, AdapterError> {
        let url = format!("{}/status", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AdapterError::Critical(format!("session expired: HTTP {status}")));
        }

        let body: BridgeResponse<BridgeStatus> = resp
            .json()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;
        Ok(body.data.is_some_and(|s| s.connected))
    }

    /// Long-poll one batch of raw inbound events.
    async fn poll_events(&self) -> Result<Vec<serde_json::Value>, AdapterError> {
        let url = format!("{}/events/poll", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AdapterError::Critical(format!("session expired: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::Transient(format!("poll returned HTTP {status}")));
        }

        resp.json()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))
    }

    /// Send a typing indicator. Fire-and-forget: cosmetic, never blocks
    /// delivery.
    async fn send_typing(&self, thread_id: &str) {
        let url = format!("{}/typing", self.config.base_url);
        let body = serde_json::json!({ "thread_id": thread_id });
        let _ = self.client.post(&url).json(&body).send().await;
    }

    // ------------------------------------------------------------------
    // Inbound path
    // ------------------------------------------------------------------

    /// Normalize a Zalo event into the canonical shape.
    ///
    /// Never fails: every missing field has a defined fallback.
    fn normalize(&self, event: &ZaloEvent) -> CanonicalMessage {
        let id = event
            .msg_id
            .clone()
            .or_else(|| event.cli_msg_id.clone())
            .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());

        let sender_id = event
            .uid_from
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER_ID.to_owned());
        let sender_name = Some(
            event
                .d_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNKNOWN_SENDER_NAME.to_owned()),
        );

        let timestamp = event
            .ts
            .as_ref()
            .and_then(parse_millis)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let text = event.content.as_ref().and_then(content_text);

        let (message_type, placeholder) = match event.msg_type.as_deref() {
            Some("share.file") => (MessageType::File, "[File]"),
            Some("chat.photo") => (MessageType::Image, "[Photo]"),
            Some("chat.voice") => (MessageType::Audio, "[Audio]"),
            Some("chat.video.msg") => (MessageType::Video, "[Video]"),
            Some("chat.sticker") => (MessageType::Sticker, "[Sticker]"),
            Some("chat.location") => (MessageType::Location, "[Location]"),
            _ => (MessageType::Text, ""),
        };
        let content = text.unwrap_or_else(|| placeholder.to_owned());

        let thread_id = event
            .thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| sender_id.clone());

        let mut extra = serde_json::Map::new();
        if let Some(mt) = &event.msg_type {
            extra.insert("msg_type".to_owned(), mt.clone().into());
        }
        if let Some(cli) = &event.cli_msg_id {
            extra.insert("cli_msg_id".to_owned(), cli.clone().into());
        }

        CanonicalMessage {
            id,
            content,
            sender_id,
            sender_name,
            timestamp,
            platform: Platform::Zalo,
            message_type,
            metadata: MessageMetadata {
                thread_id,
                extra: serde_json::Value::Object(extra),
            },
        }
    }

    /// Gate a normalized message and hand it to the registered handler.
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

    /// Main event-poll loop. Exits on shutdown or a critical transport error.
    async fn poll_loop(self: Arc<Self>) {
        loop {
            if self.inner.lock().await.shutdown {
                break;
            }

            match self.poll_events().await {
                Ok(events) => {
                    for raw in events {
                        let Some(parsed) = ZaloPayload::parse(raw) else {
                            continue;
                        };
                        let canonical = self.normalize(&parsed.into_event());
                        debug!(message_id = %canonical.id, "normalized Zalo event");
                        self.process_inbound(canonical).await;
                    }
                }
                Err(e) if e.is_critical() => {
                    warn!(error = %e, "critical Zalo transport error, shutting down");
                    self.force_shutdown().await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Zalo poll error");
                    self.inner.lock().await.health.update(false, Some(&e.to_string()));
                    tokio::time::sleep(Duration::from_secs(POLL_RETRY_DELAY_SECS)).await;
                }
            }
        }
        info!("Zalo poll loop stopped");
    }

    // ------------------------------------------------------------------
    // Health loop
    // ------------------------------------------------------------------

    /// Verify the session and inbound listener are still alive.
    ///
    /// Keeps the error typed so the loop can tell an expired session
    /// apart from a network blip.
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
        match self.session_status().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AdapterError::Transient(
                "session reports disconnected".to_owned(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Periodic health loop; ticks are strictly sequential and any
    /// reconnection runs inside the tick body. A critical probe error
    /// shuts the adapter down instead of feeding the retry cycle.
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
                            warn!(error = %e, "critical Zalo health failure, shutting down");
                            self.force_shutdown().await;
                        }
                    }
                    break;
                }
            }
        }
        info!("Zalo health loop stopped");
    }

    /// Reconnection procedure: best-effort listener teardown, fresh
    /// login, fresh poll loop. The caller has already applied the fixed
    /// backoff. A transient failure leaves the adapter in `Reconnecting`
    /// for the next tick to retry; a critical one (rejected credentials)
    /// shuts the adapter down for good.
    async fn reconnect(self: &Arc<Self>) {
        let attempts = {
            let mut inner = self.inner.lock().await;
            inner.health.record_reconnect_attempt();
            inner.health.reconnect_attempts()
        };
        info!(attempts, "Zalo reconnection attempt starting");

        {
            let mut inner = self.inner.lock().await;
            if inner.shutdown {
                return;
            }
            if let Some(task) = inner.poll_task.take() {
                task.abort();
            }
        }

        match self.login().await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if inner.shutdown {
                    return;
                }
                inner.poll_task = Some(tokio::spawn(Arc::clone(self).poll_loop()));
                inner.health.update(true, None);
                inner.state = AdapterState::Connected;
                info!("Zalo reconnection succeeded");
            }
            Err(e) if e.is_critical() => {
                warn!(error = %e, "Zalo credentials rejected during reconnection, shutting down");
                self.force_shutdown().await;
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.health.update(false, Some(&e.to_string()));
                warn!(error = %e, "Zalo reconnection failed, will retry next tick");
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
            warn!(last_activity = ?inner.last_activity, "Zalo adapter force-shut down");
        } else {
            info!(last_activity = ?inner.last_activity, "Zalo adapter disconnected");
        }
    }
}

/// Extract renderable text from a Zalo `content` value, which may be a
/// bare string or an object carrying `text`/`title`.
fn content_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("title"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned),
        _ => None,
    }
}

/// Parse a millisecond timestamp that may arrive as a number or a string.
fn parse_millis(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl PlatformAdapter for ZaloAdapter {
    fn platform(&self) -> Platform {
        Platform::Zalo
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

        self.config.validate()?;

        self.login()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let mut inner = self.inner.lock().await;
        inner.poll_task = Some(tokio::spawn(Arc::clone(&self).poll_loop()));
        inner.health_task = Some(tokio::spawn(Arc::clone(&self).health_loop()));
        inner.health.update(true, None);
        inner.state = AdapterState::Connected;
        info!("Zalo adapter connected");
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

        self.send_typing(destination).await;

        // The session API only carries text; every other kind falls back to
        // a plain-text send of the content.
        let url = format!("{}/send", self.config.base_url);
        let body = serde_json::json!({
            "thread_id": destination,
            "text": response.content,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(destination, error = %e, "Zalo send failed");
                AdapterError::Send(e.to_string())
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            warn!(destination, %status, "Zalo send rejected: {body_text}");
            return Err(AdapterError::Send(format!("HTTP {status}")));
        }

        let mut inner = self.inner.lock().await;
        inner.last_activity = Some(Utc::now());
        debug!(destination, "Zalo message sent");
        Ok(())
    }

    async fn on_message(&self, handler: MessageHandler) {
        let mut inner = self.inner.lock().await;
        if inner.handler.is_some() {
            debug!("replacing existing Zalo inbound handler");
        }
        inner.handler = Some(handler);
    }

    /// The session API has no profile endpoint; lookups are always absent.
    async fn get_user(&self, _user_id: &str) -> Option<CanonicalUser> {
        None
    }

    async fn health(&self) -> HealthSnapshot {
        self.inner.lock().await.health.snapshot()
    }

    async fn state(&self) -> AdapterState {
        self.inner.lock().await.state
    }

    async fn ingest_raw(&self, payload: serde_json::Value) {
        let Some(parsed) = ZaloPayload::parse(payload) else {
            return;
        };
        let canonical = self.normalize(&parsed.into_event());
        self.process_inbound(canonical).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
