use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::storage_paths::sanitize_key;

pub const REGISTRY_KEY: &str = "bot_config_registry";
pub const EMERGENCY_KEY: &str = "bot_emergency_stop";
pub const LOGS_KEY: &str = "bot_logs";
const LEGACY_CONFIG_KEY: &str = "bot_config";
const LEGACY_STATE_KEY: &str = "bot_state";
pub const REGISTRY_VERSION: u32 = 2;
pub const LOG_RING_LIMIT: usize = 500;

pub fn config_key(server_key: &str) -> String {
    format!("bot_config__{server_key}")
}

pub fn state_key(server_key: &str) -> String {
    format!("bot_state__{server_key}")
}

pub fn farm_cycle_key(server_key: &str) -> String {
    format!("farm_cycle__{server_key}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub last_used_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRegistry {
    #[serde(default)]
    pub servers: HashMap<String, RegistryEntry>,
    pub version: u32,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            version: REGISTRY_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: String,
    pub message: String,
    pub at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub performed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
    #[serde(default)]
    pub copied: Vec<String>,
}

/// Flat key/value store over one directory: each key is a JSON file,
/// written atomically via temp-file + rename. Per-server content is
/// namespaced by key name, so concurrent engines never touch the same file.
pub struct Storage {
    base: PathBuf,
}

impl Storage {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)
            .await
            .with_context(|| format!("creating storage dir {}", base.display()))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{}.json", sanitize_key(key)))
    }

    pub async fn read_value(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!("discarding corrupt storage entry {key}: {err}");
                Ok(None)
            }
        }
    }

    pub async fn write_value(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let payload = serde_json::to_string_pretty(value)?;
        let tmp = self
            .base
            .join(format!(".{}.tmp-{}", sanitize_key(key), Uuid::new_v4()));
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("committing {}", path.display()))?;
        Ok(())
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.read_value(key).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(err) => {
                    tracing::warn!("storage entry {key} failed to parse: {err}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.write_value(key, &serde_json::to_value(value)?).await
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }

    pub async fn load_registry(&self) -> ServerRegistry {
        self.read_json::<ServerRegistry>(REGISTRY_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub async fn save_registry(&self, registry: &ServerRegistry) -> anyhow::Result<()> {
        self.write_json(REGISTRY_KEY, registry).await
    }

    /// Stamp a server into the registry, creating the entry on first use.
    pub async fn touch_registry_entry(&self, server_key: &str, now_ms: u64) -> anyhow::Result<()> {
        let mut registry = self.load_registry().await;
        let entry = registry.servers.entry(server_key.to_string()).or_default();
        if entry.label.is_empty() {
            entry.label = server_key.to_string();
        }
        entry.last_used_ms = now_ms;
        self.save_registry(&registry).await
    }

    pub async fn append_log(&self, record: LogRecord) -> anyhow::Result<()> {
        let mut ring: Vec<LogRecord> = self.read_json(LOGS_KEY).await?.unwrap_or_default();
        ring.push(record);
        if ring.len() > LOG_RING_LIMIT {
            let excess = ring.len() - LOG_RING_LIMIT;
            ring.drain(0..excess);
        }
        self.write_json(LOGS_KEY, &ring).await
    }

    pub async fn load_logs(&self) -> Vec<LogRecord> {
        self.read_json(LOGS_KEY).await.ok().flatten().unwrap_or_default()
    }

    pub async fn clear_logs(&self) -> anyhow::Result<()> {
        self.write_json(LOGS_KEY, &Vec::<LogRecord>::new()).await
    }

    /// One-time move from the single-server layout to the registry layout.
    /// Safe to call on every boot: once the registry file exists this is a
    /// no-op, so a second run leaves the store byte-identical.
    pub async fn migrate_legacy_layout(&self) -> anyhow::Result<MigrationReport> {
        if self.read_value(REGISTRY_KEY).await?.is_some() {
            return Ok(MigrationReport::default());
        }
        let Some(legacy_config) = self.read_value(LEGACY_CONFIG_KEY).await? else {
            // Fresh install: just seed an empty registry.
            self.save_registry(&ServerRegistry::default()).await?;
            return Ok(MigrationReport::default());
        };

        let server_key = legacy_config
            .get("serverKey")
            .or_else(|| legacy_config.get("server"))
            .and_then(|v| v.as_str())
            .map(praetor_types::normalize_server_key)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown_server".to_string());

        let mut copied = Vec::new();
        self.write_value(&config_key(&server_key), &legacy_config)
            .await?;
        copied.push(config_key(&server_key));
        if let Some(legacy_state) = self.read_value(LEGACY_STATE_KEY).await? {
            self.write_value(&state_key(&server_key), &legacy_state)
                .await?;
            copied.push(state_key(&server_key));
        }

        let mut registry = ServerRegistry::default();
        registry.servers.insert(
            server_key.clone(),
            RegistryEntry {
                label: server_key.clone(),
                last_used_ms: 0,
            },
        );
        self.save_registry(&registry).await?;

        tracing::info!("migrated legacy single-server layout under key {server_key}");
        Ok(MigrationReport {
            performed: true,
            server_key: Some(server_key),
            copied,
        })
    }
}
