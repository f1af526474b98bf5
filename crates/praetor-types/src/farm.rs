use serde::{Deserialize, Serialize};

use crate::FarmConfig;

/// States of the farming cycle. Persisted as part of the cycle record so a
/// restarted process can pick up where the previous one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FarmState {
    Idle,
    NavRally,
    ClickTab,
    WaitTab,
    SendLists,
    #[serde(rename = "SCAN_RERAID")]
    ScanReRaid,
    #[serde(rename = "SEND_RERAID")]
    SendReRaid,
    NavHome,
    Recovering,
    Failed,
}

impl FarmState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FarmState::Idle | FarmState::Failed)
    }
}

pub const DEFAULT_FARM_CYCLE_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSendResult {
    #[serde(default)]
    pub sent: u32,
    #[serde(default)]
    pub skipped: u32,
}

/// One farm-list slot whose bounty icon reported "full" after the send; a
/// candidate for an immediate follow-up raid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReRaidTarget {
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The persisted cycle record. Written after every state transition and
/// after each re-raid cursor advance, so mid-cycle crashes resume in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmCycleRecord {
    pub state: FarmState,
    pub started_at_ms: u64,
    pub last_step_at_ms: u64,
    #[serde(default = "default_cycle_timeout")]
    pub timeout_ms: u64,
    /// Config captured at cycle start; a mid-cycle config save does not
    /// change a running cycle.
    pub config: FarmConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_send: Option<ListSendResult>,
    #[serde(default)]
    pub re_raid_targets: Vec<ReRaidTarget>,
    /// Persisted before each target attempt; resume re-sends the target
    /// under the cursor (at-least-once per target).
    #[serde(default)]
    pub re_raid_cursor: usize,
    #[serde(default)]
    pub re_raid_sent: u32,
    #[serde(default)]
    pub re_raid_failed: u32,
}

fn default_cycle_timeout() -> u64 {
    DEFAULT_FARM_CYCLE_TIMEOUT_MS
}

impl FarmCycleRecord {
    pub fn fresh(config: FarmConfig, now_ms: u64) -> Self {
        Self {
            state: FarmState::Idle,
            started_at_ms: now_ms,
            last_step_at_ms: now_ms,
            timeout_ms: DEFAULT_FARM_CYCLE_TIMEOUT_MS,
            config,
            list_send: None,
            re_raid_targets: Vec::new(),
            re_raid_cursor: 0,
            re_raid_sent: 0,
            re_raid_failed: 0,
        }
    }

    /// A record is stale when the cycle stopped advancing longer ago than
    /// its wall-clock budget allows.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_step_at_ms) > self.timeout_ms
    }
}

/// What a finished cycle reports back to the task that ran it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmCycleOutcome {
    pub success: bool,
    #[serde(default)]
    pub sent: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub re_raid_sent: u32,
    #[serde(default)]
    pub re_raid_failed: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Per-target raid outcome handed to the farm-intelligence store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidReport {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub loot: u64,
    #[serde(default)]
    pub bounty_full: bool,
    #[serde(default)]
    pub losses: bool,
    pub at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_uses_last_step_not_cycle_start() {
        let mut record = FarmCycleRecord::fresh(FarmConfig::default(), 0);
        record.state = FarmState::SendLists;
        record.last_step_at_ms = 100_000;
        assert!(!record.is_stale(100_000 + DEFAULT_FARM_CYCLE_TIMEOUT_MS));
        assert!(record.is_stale(100_001 + DEFAULT_FARM_CYCLE_TIMEOUT_MS));
    }

    #[test]
    fn state_names_persist_in_screaming_case() {
        let value = serde_json::to_value(FarmState::SendReRaid).expect("serialize");
        assert_eq!(value, serde_json::json!("SEND_RERAID"));
        let value = serde_json::to_value(FarmState::NavRally).expect("serialize");
        assert_eq!(value, serde_json::json!("NAV_RALLY"));
    }
}
