//! Outbound transport to the AI-agent backend.
//!
//! The orchestrator talks to the agent through [`AgentTransport`]; the
//! default implementation is an HTTP client against the agent service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{CanonicalMessage, CanonicalResponse};

/// HTTP connect timeout for the agent client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for agent calls. The agent enforces its own
/// processing deadline; this only bounds a hung transport.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Agent-facing collaborator interface.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Forward a canonical message; the reply feeds the adapter send path.
    async fn send_message(&self, message: &CanonicalMessage) -> anyhow::Result<CanonicalResponse>;

    /// Whether the agent backend is reachable.
    async fn health_check(&self) -> bool;
}

/// Response envelope from the agent HTTP API.
#[derive(Debug, Deserialize)]
struct AgentEnvelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// HTTP client for the agent backend.
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    /// Create a client pointing at the given base URL.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, base_url }
    }

    /// Base URL of the agent backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AgentTransport for HttpAgentClient {
    async fn send_message(&self, message: &CanonicalMessage) -> anyhow::Result<CanonicalResponse> {
        let url = format!("{}/message", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(message)
            .send()
            .await
            .context("agent request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("agent returned HTTP {status}");
        }

        let body: AgentEnvelope<CanonicalResponse> = resp
            .json()
            .await
            .context("failed to parse agent response")?;

        if !body.success {
            anyhow::bail!(
                "agent error: {}",
                body.error.unwrap_or_else(|| "unknown".to_owned())
            );
        }

        let response = body
            .data
            .context("agent response carried no data")?;
        debug!(message_id = %message.id, "agent reply received");
        Ok(response)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
