use std::collections::HashMap;

use praetor_types::{FailReason, TaskKind};

/// Prune expired entries whenever the map grows past this.
const PRUNE_THRESHOLD: usize = 20;

/// Time horizons before an action (optionally per slot) may be considered
/// again. Keys are a task kind (`"upgrade_resource"`) or kind plus slot
/// (`"upgrade_resource:3"`).
#[derive(Debug, Default, Clone)]
pub struct CooldownMap {
    entries: HashMap<String, u64>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cooling(&self, key: &str, now_ms: u64) -> bool {
        self.entries.get(key).is_some_and(|&until| until > now_ms)
    }

    pub fn set(&mut self, key: impl Into<String>, until_ms: u64, now_ms: u64) {
        self.entries.insert(key.into(), until_ms);
        if self.entries.len() > PRUNE_THRESHOLD {
            self.entries.retain(|_, &mut until| until > now_ms);
        }
    }

    pub fn set_for(&mut self, key: impl Into<String>, duration_ms: u64, now_ms: u64) {
        self.set(key, now_ms + duration_ms, now_ms);
    }

    pub fn expiry(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub fn slot_key(kind: TaskKind, slot: u64) -> String {
    format!("{kind}:{slot}")
}

/// Cooldown applied after a task of this kind succeeds.
pub fn success_cooldown_ms(kind: TaskKind) -> u64 {
    match kind {
        TaskKind::UpgradeResource | TaskKind::UpgradeBuilding | TaskKind::BuildNew => 60_000,
        TaskKind::TrainTroops => 120_000,
        TaskKind::SendFarm | TaskKind::SendAttack => 300_000,
        TaskKind::SendHeroAdventure => 180_000,
        TaskKind::ClaimQuest => 300_000,
        _ => 30_000,
    }
}

/// Longer cooldown applied when the page reports a structural refusal; the
/// blocker will not clear for a while, so stop asking.
pub fn hopeless_cooldown_ms(reason: FailReason) -> u64 {
    match reason {
        FailReason::NoAdventure => 600_000,
        FailReason::HeroUnavailable => 300_000,
        FailReason::InsufficientResources => 180_000,
        FailReason::QueueFull => 120_000,
        FailReason::BuildingNotAvailable => 300_000,
        _ => 60_000,
    }
}
