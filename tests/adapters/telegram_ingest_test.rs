//! End-to-end ingest tests for the Telegram adapter: raw payload in,
//! canonical message out through the registered handler. No network —
//! payloads enter via the webhook entry point.

use std::sync::Arc;
use std::time::Duration;

use switchboard::adapters::telegram::{TelegramAdapter, TelegramConfig};
use switchboard::adapters::{MessageHandler, PlatformAdapter};
use switchboard::types::{CanonicalMessage, MessageType, Platform};
use tokio::sync::mpsc;

fn adapter() -> Arc<TelegramAdapter> {
    Arc::new(TelegramAdapter::new(TelegramConfig {
        bot_token: "test-token".to_owned(),
        poll_timeout_seconds: 30,
    }))
}

/// Register a capturing handler and return the receiving end.
async fn capture(adapter: &Arc<TelegramAdapter>) -> mpsc::Receiver<CanonicalMessage> {
    let (tx, rx) = mpsc::channel(4);
    let handler: MessageHandler = Arc::new(move |msg| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(msg).await.ok();
            Ok(())
        })
    });
    adapter.on_message(handler).await;
    rx
}

async fn recv(rx: &mut mpsc::Receiver<CanonicalMessage>) -> Option<CanonicalMessage> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn update_envelope_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "from": { "id": 1001, "first_name": "Bob" },
                "chat": { "id": 555 },
                "date": 1_700_000_000,
                "text": "hi"
            }
        }))
        .await;

    let msg = recv(&mut rx).await.expect("handler invoked");
    assert_eq!(msg.sender_id, "1001");
    assert_eq!(msg.sender_name.as_deref(), Some("Bob"));
    assert_eq!(msg.content, "hi");
    assert_eq!(msg.message_type, MessageType::Text);
    assert_eq!(msg.platform, Platform::Telegram);
    assert_eq!(msg.metadata.thread_id, "555");
}

#[tokio::test]
async fn bare_message_shape_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "message_id": 7,
            "from": { "id": 2, "first_name": "Ann" },
            "chat": { "id": 2 },
            "text": "flat shape"
        }))
        .await;

    let msg = recv(&mut rx).await.expect("handler invoked");
    assert_eq!(msg.content, "flat shape");
}

#[tokio::test]
async fn photo_payload_gets_placeholder_content() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "update_id": 2,
            "message": {
                "message_id": 8,
                "from": { "id": 3, "first_name": "Cam" },
                "chat": { "id": 3 },
                "photo": [ { "file_id": "abc" } ]
            }
        }))
        .await;

    let msg = recv(&mut rx).await.expect("handler invoked");
    assert_eq!(msg.message_type, MessageType::Image);
    assert_eq!(msg.content, "[Photo]");
}

#[tokio::test]
async fn missing_sender_never_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 9,
                "chat": { "id": 4 },
                "text": "anonymous"
            }
        }))
        .await;

    assert!(recv(&mut rx).await.is_none(), "rejected message forwarded");
}

#[tokio::test]
async fn oversized_content_never_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    let long = "x".repeat(5000);
    adapter
        .ingest_raw(serde_json::json!({
            "update_id": 4,
            "message": {
                "message_id": 10,
                "from": { "id": 5, "first_name": "Dee" },
                "chat": { "id": 5 },
                "text": long
            }
        }))
        .await;

    assert!(recv(&mut rx).await.is_none(), "oversized message forwarded");
}

#[tokio::test]
async fn garbage_payload_is_dropped_without_panic() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter.ingest_raw(serde_json::json!("not an object")).await;
    adapter.ingest_raw(serde_json::json!({ "update_id": 5 })).await;

    assert!(recv(&mut rx).await.is_none());
}
