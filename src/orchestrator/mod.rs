//! Orchestrator — fans inbound messages to the agent and replies back out.
//!
//! Registers the same inbound handler on every active adapter. Agent
//! failures become a user-visible apology, never a crash of the adapter
//! loop. Shutdown force-shuts every adapter, logging rather than
//! rethrowing, so one failing adapter never blocks cleanup of the rest.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{MessageHandler, PlatformAdapter, APOLOGY_REPLY};
use crate::agent::AgentTransport;
use crate::registry::AdapterRegistry;
use crate::types::CanonicalResponse;

/// Owns the adapter registry and the agent transport.
pub struct Orchestrator {
    registry: Arc<AdapterRegistry>,
    agent: Arc<dyn AgentTransport>,
    echo_mode: bool,
}

impl Orchestrator {
    /// Build an orchestrator. With `echo_mode` the agent is bypassed and
    /// input content is returned verbatim (testing aid).
    pub fn new(
        registry: Arc<AdapterRegistry>,
        agent: Arc<dyn AgentTransport>,
        echo_mode: bool,
    ) -> Self {
        Self {
            registry,
            agent,
            echo_mode,
        }
    }

    /// The adapter registry this orchestrator owns.
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Register the inbound handler on every currently active adapter.
    pub async fn attach_handlers(&self) {
        for adapter in self.registry.all().await {
            let platform = adapter.platform();
            let handler = Self::make_handler(
                Arc::clone(&adapter),
                Arc::clone(&self.agent),
                self.echo_mode,
            );
            adapter.on_message(handler).await;
            info!(%platform, "inbound handler registered");
        }
    }

    /// Build the handler closure for one adapter. The reply is routed back
    /// through the originating adapter using the message's
    /// `metadata.thread_id` as destination.
    fn make_handler(
        adapter: Arc<dyn PlatformAdapter>,
        agent: Arc<dyn AgentTransport>,
        echo_mode: bool,
    ) -> MessageHandler {
        Arc::new(move |msg| {
            let adapter = Arc::clone(&adapter);
            let agent = Arc::clone(&agent);
            Box::pin(async move {
                let response = if echo_mode {
                    debug!(message_id = %msg.id, "echo mode, returning input verbatim");
                    CanonicalResponse::text(msg.content.clone())
                } else {
                    match agent.send_message(&msg).await {
                        Ok(response) => response,
                        Err(e) => {
                            warn!(message_id = %msg.id, error = %e, "agent call failed");
                            CanonicalResponse::text(APOLOGY_REPLY)
                        }
                    }
                };

                adapter
                    .send_message(&msg.metadata.thread_id, &response)
                    .await
                    .map_err(|e| anyhow::anyhow!("reply send failed: {e}"))
            })
        })
    }

    /// Shut down every active adapter and clear the registry.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down all adapters");
        self.registry.shutdown_all().await;
    }
}
