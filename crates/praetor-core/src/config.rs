use std::sync::Arc;

use serde_json::{Map, Value};

use praetor_types::BotConfig;

use crate::storage::{config_key, Storage};

/// Per-server configuration store. Stored JSON is merged over the built-in
/// defaults at load time, so sparse files and old layouts keep working.
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<Storage>,
}

impl ConfigStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn load(&self, server_key: &str) -> anyhow::Result<BotConfig> {
        let merged = self.load_value(server_key).await?;
        Ok(serde_json::from_value(merged).unwrap_or_default())
    }

    /// The effective config as JSON: defaults with the stored file on top.
    pub async fn load_value(&self, server_key: &str) -> anyhow::Result<Value> {
        let mut merged = serde_json::to_value(BotConfig::default())?;
        if let Some(stored) = self.storage.read_value(&config_key(server_key)).await? {
            deep_merge(&mut merged, &stored);
        }
        Ok(merged)
    }

    /// Merge a patch into the stored file and return the new effective
    /// config. The file keeps only what the user set; defaults stay implicit.
    pub async fn save_patch(&self, server_key: &str, patch: &Value) -> anyhow::Result<Value> {
        let key = config_key(server_key);
        let mut stored = self
            .storage
            .read_value(&key)
            .await?
            .unwrap_or_else(empty_object);
        deep_merge(&mut stored, patch);
        self.storage.write_value(&key, &stored).await?;
        self.load_value(server_key).await
    }

    pub async fn replace(&self, server_key: &str, value: &Value) -> anyhow::Result<Value> {
        self.storage
            .write_value(&config_key(server_key), value)
            .await?;
        self.load_value(server_key).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Recursive merge: objects merge key-by-key, everything else overwrites.
/// Nulls in the overlay are skipped so a sparse patch cannot erase defaults.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
