//! Switchboard — a chat-platform-to-agent bridge.
//!
//! Receives inbound messages from heterogeneous transports (long-polling bot
//! APIs, cookie-based session APIs, webhooks), normalizes them into one
//! canonical shape, forwards them to an AI-agent backend, and relays the
//! reply back to the originating platform.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod adapters;
pub mod agent;
pub mod health;
pub mod orchestrator;
pub mod registry;
