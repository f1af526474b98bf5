use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event published on the in-process bus and mirrored to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    pub at_ms: u64,
}

impl BotEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            at_ms: Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}

// Well-known event names. Use as `praetor_types::events::TASK_COMPLETED`.
pub const OVERFLOW_IMMINENT: &str = "overflow:imminent";
pub const ATTACK_INCOMING: &str = "attack:incoming";
pub const QUEST_CLAIMABLE: &str = "quest:claimable";
pub const RESOURCES_LOW: &str = "resources:low";
pub const TASK_COMPLETED: &str = "task:completed";
pub const TASK_FAILED: &str = "task:failed";
pub const SCAN_COMPLETE: &str = "scan:complete";
pub const PHASE_CHANGED: &str = "phase:changed";
pub const CROP_CRISIS: &str = "crop:crisis";

pub const BOT_STARTED: &str = "bot:started";
pub const BOT_STOPPED: &str = "bot:stopped";
pub const BOT_PAUSED: &str = "bot:paused";
pub const BOT_RESUMED: &str = "bot:resumed";
pub const BOT_REMOVED: &str = "bot:removed";
pub const EMERGENCY_STOP: &str = "emergencyStop";
pub const STATUS_UPDATE: &str = "statusUpdate";
pub const GAME_STATE: &str = "gameState";
