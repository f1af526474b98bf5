use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use praetor_types::{events, normalize_server_key, BotEvent, EngineStatus};

use crate::bridge::PageAgent;
use crate::config::ConfigStore;
use crate::engine::BotEngine;
use crate::event_bus::EventBus;
use crate::farm::FarmIntelligence;
use crate::now_ms;
use crate::storage::Storage;

/// One engine plus its bound page. The page must be bound before `start`.
pub struct BotInstance {
    pub engine: Arc<BotEngine>,
    page: Mutex<Option<Arc<dyn PageAgent>>>,
}

impl BotInstance {
    pub async fn bound_page(&self) -> Option<Arc<dyn PageAgent>> {
        self.page.lock().await.clone()
    }
}

/// Owns every bot instance, one per server key; routes control commands and
/// keeps the registry stamped.
pub struct Supervisor {
    storage: Arc<Storage>,
    config_store: ConfigStore,
    bus: EventBus,
    intel: Arc<dyn FarmIntelligence>,
    instances: RwLock<HashMap<String, Arc<BotInstance>>>,
}

impl Supervisor {
    pub fn new(
        storage: Arc<Storage>,
        config_store: ConfigStore,
        bus: EventBus,
        intel: Arc<dyn FarmIntelligence>,
    ) -> Self {
        Self {
            storage,
            config_store,
            bus,
            intel,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub async fn get_or_create(&self, server_key: &str) -> Arc<BotInstance> {
        let key = normalize_server_key(server_key);
        if let Some(existing) = self.instances.read().await.get(&key) {
            return Arc::clone(existing);
        }
        let mut instances = self.instances.write().await;
        // Raced creations resolve to whichever instance landed first.
        if let Some(existing) = instances.get(&key) {
            return Arc::clone(existing);
        }
        let engine = Arc::new(BotEngine::new(
            key.clone(),
            Arc::clone(&self.storage),
            self.config_store.clone(),
            self.bus.clone(),
            Arc::clone(&self.intel),
        ));
        let instance = Arc::new(BotInstance {
            engine,
            page: Mutex::new(None),
        });
        instances.insert(key, Arc::clone(&instance));
        instance
    }

    pub async fn get(&self, server_key: &str) -> Option<Arc<BotInstance>> {
        let key = normalize_server_key(server_key);
        self.instances.read().await.get(&key).cloned()
    }

    /// Attach a controlled page. Must happen before `start`.
    pub async fn bind_page(&self, server_key: &str, page: Arc<dyn PageAgent>) {
        let instance = self.get_or_create(server_key).await;
        *instance.page.lock().await = Some(page);
    }

    pub async fn start(&self, server_key: &str) -> anyhow::Result<()> {
        let key = normalize_server_key(server_key);
        let instance = self.get_or_create(&key).await;
        let page = instance
            .bound_page()
            .await
            .ok_or_else(|| anyhow::anyhow!("no page bound for {key}; call bind_page first"))?;
        if let Err(err) = self.storage.touch_registry_entry(&key, now_ms()).await {
            warn!("registry stamp failed for {key}: {err:#}");
        }
        instance.engine.start(page).await
    }

    pub async fn stop(&self, server_key: &str) {
        if let Some(instance) = self.get(server_key).await {
            instance.engine.stop().await;
        }
    }

    pub async fn pause(&self, server_key: &str) {
        if let Some(instance) = self.get(server_key).await {
            instance.engine.pause().await;
        }
    }

    pub async fn resume(&self, server_key: &str) {
        if let Some(instance) = self.get(server_key).await {
            instance.engine.resume().await;
        }
    }

    /// With a key, stop that instance; without, stop every instance. Other
    /// instances keep running when one goes down.
    pub async fn emergency_stop(&self, server_key: Option<&str>, reason: &str) {
        match server_key {
            Some(key) => {
                if let Some(instance) = self.get(key).await {
                    instance.engine.emergency_stop(reason).await;
                }
            }
            None => {
                let all: Vec<Arc<BotInstance>> =
                    self.instances.read().await.values().cloned().collect();
                for instance in all {
                    instance.engine.emergency_stop(reason).await;
                }
            }
        }
    }

    /// Stop the engine, close its page (errors swallowed), forget the key.
    pub async fn remove(&self, server_key: &str) -> bool {
        let key = normalize_server_key(server_key);
        let Some(instance) = self.instances.write().await.remove(&key) else {
            return false;
        };
        instance.engine.stop().await;
        if let Some(page) = instance.page.lock().await.take() {
            if let Err(err) = page.close().await {
                warn!("page close for {key} failed (ignored): {err:#}");
            }
        }
        self.bus.emit(BotEvent::new(
            events::BOT_REMOVED,
            json!({"serverKey": key}),
        ));
        true
    }

    pub async fn list_active(&self) -> Vec<EngineStatus> {
        let instances: Vec<(String, Arc<BotInstance>)> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut out = Vec::with_capacity(instances.len());
        for (_, instance) in instances {
            out.push(instance.engine.status());
        }
        out.sort_by(|a, b| a.server_key.cmp(&b.server_key));
        out
    }

    /// Best-effort stop of everything; used at shutdown.
    pub async fn stop_all(&self) {
        let all: Vec<Arc<BotInstance>> = self.instances.read().await.values().cloned().collect();
        for instance in all {
            info!("stopping {}", instance.engine.server_key());
            instance.engine.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::farm::NullFarmIntelligence;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct IdlePage {
        closed: AtomicBool,
        dispatches: SyncMutex<u64>,
    }

    impl IdlePage {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
                dispatches: SyncMutex::new(0),
            })
        }
    }

    #[async_trait]
    impl PageAgent for IdlePage {
        async fn dispatch(&self, _message: Value) -> anyhow::Result<Value> {
            *self.dispatches.lock() += 1;
            // A logged-out page: the engine scans and then leaves it alone.
            Ok(json!({"success": true, "data": {"loggedIn": false}}))
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn supervisor() -> (tempfile::TempDir, Supervisor) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(Storage::new(dir.path()).await.expect("storage"));
        let config_store = ConfigStore::new(Arc::clone(&storage));
        let supervisor = Supervisor::new(
            storage,
            config_store,
            EventBus::new(),
            Arc::new(NullFarmIntelligence),
        );
        (dir, supervisor)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_key() {
        let (_dir, supervisor) = supervisor().await;
        let a = supervisor.get_or_create("TS1.Example.com").await;
        let b = supervisor.get_or_create("ts1.example.com").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(supervisor.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn start_requires_a_bound_page() {
        let (_dir, supervisor) = supervisor().await;
        supervisor.get_or_create("ts1.example.com").await;
        assert!(supervisor.start("ts1.example.com").await.is_err());
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let (_dir, supervisor) = supervisor().await;
        supervisor
            .bind_page("ts1.example.com", IdlePage::new())
            .await;
        supervisor.start("ts1.example.com").await.expect("start");
        let instance = supervisor.get("ts1.example.com").await.expect("instance");
        assert!(instance.engine.is_running().await);

        // Starting again is a warning-level no-op.
        supervisor.start("ts1.example.com").await.expect("restart");

        supervisor.stop("ts1.example.com").await;
        assert!(!instance.engine.is_running().await);

        // The registry was stamped on start.
        let registry = supervisor.storage().load_registry().await;
        assert!(registry.servers.contains_key("ts1.example.com"));
    }

    #[tokio::test]
    async fn remove_stops_the_engine_and_closes_the_page() {
        let (_dir, supervisor) = supervisor().await;
        let page = IdlePage::new();
        supervisor.bind_page("ts1.example.com", page.clone()).await;
        supervisor.start("ts1.example.com").await.expect("start");
        assert!(supervisor.remove("ts1.example.com").await);
        assert!(page.closed.load(Ordering::SeqCst));
        assert!(supervisor.get("ts1.example.com").await.is_none());
        assert!(!supervisor.remove("ts1.example.com").await);
    }

    #[tokio::test]
    async fn emergency_stop_without_a_key_halts_every_instance() {
        let (_dir, supervisor) = supervisor().await;
        for key in ["a.example.com", "b.example.com"] {
            supervisor.bind_page(key, IdlePage::new()).await;
            supervisor.start(key).await.expect("start");
        }
        supervisor.emergency_stop(None, "operator abort").await;
        for status in supervisor.list_active().await {
            assert!(status.emergency_stopped, "{} not stopped", status.server_key);
        }
        // The reason is durable.
        let record: praetor_types::EmergencyRecord = supervisor
            .storage()
            .read_json(crate::storage::EMERGENCY_KEY)
            .await
            .expect("read")
            .expect("record");
        assert_eq!(record.reason, "operator abort");
    }
}
