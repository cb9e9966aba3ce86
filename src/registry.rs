//! Single-active-adapter guard.
//!
//! One slot per platform, owned by whoever holds the registry (the
//! orchestrator) — never ambient global state. The check-reuse /
//! replace-unhealthy / create-connect-register sequence runs under one
//! mutex so concurrent callers cannot race for the same platform.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::adapters::{AdapterError, PlatformAdapter};
use crate::health::HealthSnapshot;
use crate::types::Platform;

/// Process-wide adapter slots, one per platform.
#[derive(Default)]
pub struct AdapterRegistry {
    slots: Mutex<HashMap<Platform, Arc<dyn PlatformAdapter>>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live adapter for `platform`, creating or replacing as
    /// needed.
    ///
    /// A healthy existing instance is returned unchanged — no new
    /// connection is made. An unhealthy or shut-down instance is
    /// force-shut and replaced. A freshly built instance is fully
    /// connected before it is registered; on connect failure the
    /// half-built instance is force-shut and the error returned, so a
    /// partially-live instance is never exposed.
    pub async fn acquire<F>(
        &self,
        platform: Platform,
        build: F,
    ) -> Result<Arc<dyn PlatformAdapter>, AdapterError>
    where
        F: FnOnce() -> Arc<dyn PlatformAdapter>,
    {
        let mut slots = self.slots.lock().await;

        if let Some(existing) = slots.get(&platform) {
            if existing.health().await.is_healthy {
                info!(%platform, "reusing healthy adapter instance");
                return Ok(Arc::clone(existing));
            }
            warn!(%platform, "replacing unhealthy adapter instance");
            existing.force_shutdown().await;
            slots.remove(&platform);
        }

        let adapter = build();
        match Arc::clone(&adapter).connect().await {
            Ok(()) => {
                info!(%platform, "adapter connected and registered");
                slots.insert(platform, Arc::clone(&adapter));
                Ok(adapter)
            }
            Err(e) => {
                warn!(%platform, error = %e, "adapter connect failed, discarding instance");
                adapter.force_shutdown().await;
                Err(e)
            }
        }
    }

    /// Current adapter for `platform`, if one is registered.
    pub async fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.slots.lock().await.get(&platform).map(Arc::clone)
    }

    /// All registered adapters.
    pub async fn all(&self) -> Vec<Arc<dyn PlatformAdapter>> {
        self.slots.lock().await.values().map(Arc::clone).collect()
    }

    /// Per-platform health snapshots for the external HTTP surface.
    pub async fn health_report(&self) -> Vec<(Platform, HealthSnapshot)> {
        let slots = self.slots.lock().await;
        let mut report = Vec::with_capacity(slots.len());
        for (platform, adapter) in slots.iter() {
            report.push((*platform, adapter.health().await));
        }
        report
    }

    /// Force-shut every adapter and clear the slots. Per-adapter failures
    /// cannot occur here (`force_shutdown` never raises), so one adapter
    /// never blocks cleanup of the others.
    pub async fn shutdown_all(&self) {
        let mut slots = self.slots.lock().await;
        for (platform, adapter) in slots.drain() {
            info!(%platform, "shutting down adapter");
            adapter.force_shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterState, MessageHandler};
    use crate::health::ConnectionHealth;
    use crate::types::{CanonicalResponse, CanonicalUser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scriptable adapter double: connects successfully or not, reports a
    /// fixed health verdict, counts lifecycle calls.
    struct StubAdapter {
        platform: Platform,
        healthy: std::sync::Mutex<bool>,
        connect_ok: bool,
        connects: AtomicU32,
        shutdowns: AtomicU32,
    }

    impl StubAdapter {
        fn healthy(platform: Platform) -> Arc<Self> {
            Arc::new(Self {
                platform,
                healthy: std::sync::Mutex::new(true),
                connect_ok: true,
                connects: AtomicU32::new(0),
                shutdowns: AtomicU32::new(0),
            })
        }

        fn failing(platform: Platform) -> Arc<Self> {
            Arc::new(Self {
                platform,
                healthy: std::sync::Mutex::new(false),
                connect_ok: false,
                connects: AtomicU32::new(0),
                shutdowns: AtomicU32::new(0),
            })
        }

        fn mark_unhealthy(&self) {
            *self.healthy.lock().expect("lock") = false;
        }
    }

    #[async_trait]
    impl PlatformAdapter for StubAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn connect(self: Arc<Self>) -> Result<(), AdapterError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.connect_ok {
                Ok(())
            } else {
                Err(AdapterError::Connection("stub refuses".to_owned()))
            }
        }

        async fn disconnect(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        async fn force_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        async fn send_message(
            &self,
            _destination: &str,
            _response: &CanonicalResponse,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn on_message(&self, _handler: MessageHandler) {}

        async fn get_user(&self, _user_id: &str) -> Option<CanonicalUser> {
            None
        }

        async fn health(&self) -> HealthSnapshot {
            let mut health = ConnectionHealth::default();
            if *self.healthy.lock().expect("lock") {
                health.update(true, None);
            }
            health.snapshot()
        }

        async fn state(&self) -> AdapterState {
            AdapterState::Connected
        }

        async fn ingest_raw(&self, _payload: serde_json::Value) {}
    }

    #[tokio::test]
    async fn acquire_twice_returns_same_instance() {
        let registry = AdapterRegistry::new();
        let stub = StubAdapter::healthy(Platform::Telegram);

        let first = registry
            .acquire(Platform::Telegram, || stub.clone())
            .await
            .expect("first acquire");
        let second = registry
            .acquire(Platform::Telegram, || {
                panic!("builder must not run for a healthy existing instance")
            })
            .await
            .expect("second acquire");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stub.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhealthy_instance_is_replaced() {
        let registry = AdapterRegistry::new();
        let old = StubAdapter::healthy(Platform::Zalo);
        registry
            .acquire(Platform::Zalo, || old.clone())
            .await
            .expect("acquire");

        old.mark_unhealthy();
        let replacement = StubAdapter::healthy(Platform::Zalo);
        let current = registry
            .acquire(Platform::Zalo, || replacement.clone())
            .await
            .expect("replacement acquire");

        assert_eq!(old.shutdowns.load(Ordering::SeqCst), 1);
        let replacement_dyn: Arc<dyn PlatformAdapter> = replacement;
        assert!(Arc::ptr_eq(&current, &replacement_dyn));
    }

    #[tokio::test]
    async fn failed_connect_discards_instance_and_clears_slot() {
        let registry = AdapterRegistry::new();
        let stub = StubAdapter::failing(Platform::Telegram);

        let result = registry.acquire(Platform::Telegram, || stub.clone()).await;
        assert!(matches!(result, Err(AdapterError::Connection(_))));
        assert_eq!(stub.shutdowns.load(Ordering::SeqCst), 1);
        assert!(registry.get(Platform::Telegram).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_all_drains_every_slot() {
        let registry = AdapterRegistry::new();
        let tg = StubAdapter::healthy(Platform::Telegram);
        let zl = StubAdapter::healthy(Platform::Zalo);
        registry
            .acquire(Platform::Telegram, || tg.clone())
            .await
            .expect("acquire tg");
        registry
            .acquire(Platform::Zalo, || zl.clone())
            .await
            .expect("acquire zl");

        registry.shutdown_all().await;
        assert!(registry.all().await.is_empty());
        assert_eq!(tg.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(zl.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_report_covers_all_platforms() {
        let registry = AdapterRegistry::new();
        registry
            .acquire(Platform::Telegram, || StubAdapter::healthy(Platform::Telegram))
            .await
            .expect("acquire");

        let report = registry.health_report().await;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].0, Platform::Telegram);
        assert!(report[0].1.is_healthy);
    }
}
