//! Validation-gate behavior over the public adapter API.

use chrono::Utc;
use switchboard::adapters::{
    validate_inbound, ValidationReject, MAX_MESSAGE_CHARS, UNKNOWN_SENDER_ID,
};
use switchboard::types::{CanonicalMessage, MessageMetadata, MessageType, Platform};

fn message(content: &str, sender_id: &str) -> CanonicalMessage {
    CanonicalMessage {
        id: "1".to_owned(),
        content: content.to_owned(),
        sender_id: sender_id.to_owned(),
        sender_name: Some("Bob".to_owned()),
        timestamp: Utc::now(),
        platform: Platform::Zalo,
        message_type: MessageType::Text,
        metadata: MessageMetadata {
            thread_id: "t1".to_owned(),
            extra: serde_json::Value::Null,
        },
    }
}

#[test]
fn accepts_ordinary_message() {
    assert!(validate_inbound(&message("hello there", "u1")).is_ok());
}

#[test]
fn rejects_whitespace_only_content() {
    assert_eq!(
        validate_inbound(&message(" \t\n ", "u1")),
        Err(ValidationReject::EmptyContent)
    );
}

#[test]
fn rejects_placeholder_sender() {
    assert_eq!(
        validate_inbound(&message("hello", UNKNOWN_SENDER_ID)),
        Err(ValidationReject::UnknownSender)
    );
}

#[test]
fn ceiling_is_inclusive() {
    let at_limit = "a".repeat(MAX_MESSAGE_CHARS);
    assert!(validate_inbound(&message(&at_limit, "u1")).is_ok());

    let mut over_limit = at_limit;
    over_limit.push('a');
    assert!(matches!(
        validate_inbound(&message(&over_limit, "u1")),
        Err(ValidationReject::TooLong(_))
    ));
}

#[test]
fn ceiling_counts_chars_not_bytes() {
    // Multi-byte characters: 4096 of them stay within the limit.
    let content = "é".repeat(MAX_MESSAGE_CHARS);
    assert!(validate_inbound(&message(&content, "u1")).is_ok());
}
