//! End-to-end ingest tests for the Zalo adapter, covering both wire
//! shapes (envelope and legacy flat).

use std::sync::Arc;
use std::time::Duration;

use switchboard::adapters::zalo::{ZaloAdapter, ZaloConfig};
use switchboard::adapters::{MessageHandler, PlatformAdapter};
use switchboard::types::{CanonicalMessage, MessageType, Platform};
use tokio::sync::mpsc;

fn adapter() -> Arc<ZaloAdapter> {
    Arc::new(ZaloAdapter::new(ZaloConfig {
        base_url: "http://127.0.0.1:3002".to_owned(),
        cookie: "session=abc".to_owned(),
        imei: "imei-1".to_owned(),
        user_agent: "Mozilla/5.0".to_owned(),
    }))
}

async fn capture(adapter: &Arc<ZaloAdapter>) -> mpsc::Receiver<CanonicalMessage> {
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
async fn envelope_shape_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "data": {
                "msgId": "m1",
                "uidFrom": "u1",
                "dName": "Bob",
                "threadId": "t1",
                "content": "hi",
                "ts": "1700000000000"
            }
        }))
        .await;

    let msg = recv(&mut rx).await.expect("handler invoked");
    assert_eq!(msg.sender_id, "u1");
    assert_eq!(msg.sender_name.as_deref(), Some("Bob"));
    assert_eq!(msg.content, "hi");
    assert_eq!(msg.platform, Platform::Zalo);
    assert_eq!(msg.metadata.thread_id, "t1");
}

#[tokio::test]
async fn legacy_flat_shape_reaches_handler() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "msgId": "m2",
            "uidFrom": "u2",
            "content": { "text": "nested text" }
        }))
        .await;

    let msg = recv(&mut rx).await.expect("handler invoked");
    assert_eq!(msg.content, "nested text");
    assert_eq!(msg.metadata.thread_id, "u2");
}

#[tokio::test]
async fn photo_event_gets_placeholder() {
    let adapter = adapter();
    let mut rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({
            "data": {
                "msgId": "m3",
                "uidFrom": "u3",
                "msgType": "chat.photo",
                "content": { "href": "https://cdn.example/x.jpg" }
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
        .ingest_raw(serde_json::json!({ "msgId": "m4", "content": "anonymous" }))
        .await;

    assert!(recv(&mut rx).await.is_none(), "rejected message forwarded");
}

#[tokio::test]
async fn later_handler_replaces_earlier_one() {
    let adapter = adapter();
    let mut first_rx = capture(&adapter).await;
    let mut second_rx = capture(&adapter).await;

    adapter
        .ingest_raw(serde_json::json!({ "msgId": "m5", "uidFrom": "u5", "content": "hi" }))
        .await;

    assert!(recv(&mut first_rx).await.is_none(), "replaced handler ran");
    assert!(recv(&mut second_rx).await.is_some(), "active handler skipped");
}
