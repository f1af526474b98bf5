use serde::{Deserialize, Serialize};

use crate::Task;

/// Supervised execution state of one bot instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Stopped,
    Active,
    Paused,
    EmergencyStopped,
}

impl Lifecycle {
    pub fn is_running(self) -> bool {
        matches!(self, Lifecycle::Active | Lifecycle::Paused)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_failed: u64,
    #[serde(default)]
    pub farm_raids_sent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at_ms: Option<u64>,
}

/// Full status snapshot served to the frontend and stamped onto
/// `statusUpdate` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub server_key: String,
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub stats: EngineStats,
    #[serde(default)]
    pub actions_this_hour: u32,
    #[serde(default)]
    pub hour_reset_at_ms: u64,
    #[serde(default)]
    pub queue_depth: usize,
    #[serde(default)]
    pub cooldown_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action_at_ms: Option<u64>,
    #[serde(default)]
    pub emergency_stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_reason: Option<String>,
}

impl EngineStatus {
    pub fn stopped(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            lifecycle: Lifecycle::Stopped,
            stats: EngineStats::default(),
            actions_this_hour: 0,
            hour_reset_at_ms: 0,
            queue_depth: 0,
            cooldown_count: 0,
            next_action_at_ms: None,
            emergency_stopped: false,
            emergency_reason: None,
        }
    }
}

/// What survives a process restart for one engine: counters, the rate
/// window, and a snapshot of the task queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEngineState {
    #[serde(default)]
    pub stats: EngineStats,
    #[serde(default)]
    pub actions_this_hour: u32,
    #[serde(default)]
    pub hour_reset_at_ms: u64,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Last emergency-stop reason, persisted process-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRecord {
    pub server_key: String,
    pub reason: String,
    pub at_ms: u64,
}
