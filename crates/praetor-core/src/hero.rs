use serde_json::json;

use praetor_gamedata::upgrade_cost;
use praetor_types::{
    GameSnapshot, HeroConfig, ResourceKind, Resources, Task, TaskKind,
};

use crate::bridge::PageBridge;
use crate::navigation::{pages, NavigationManager};

/// Wait between claim attempts so a claim that did not help cannot spam the
/// inventory page.
const CLAIM_COOLDOWN_MS: u64 = 300_000;

/// Claims resource crates from the hero inventory, either proactively when
/// stores run low or reactively to unblock a build that failed on missing
/// resources.
pub struct HeroManager {
    cooldown_until_ms: u64,
}

impl HeroManager {
    pub fn new() -> Self {
        Self {
            cooldown_until_ms: 0,
        }
    }

    pub fn is_cooling(&self, now_ms: u64) -> bool {
        now_ms < self.cooldown_until_ms
    }

    /// Claim when any store has dropped below the configured threshold and
    /// the hero is home to hand the crates over.
    pub fn should_proactively_claim(
        &self,
        snapshot: &GameSnapshot,
        config: &HeroConfig,
        now_ms: u64,
    ) -> bool {
        if self.is_cooling(now_ms) || !snapshot.hero.is_home || snapshot.hero.is_dead {
            return false;
        }
        let threshold = config.claim_threshold_pct as i64;
        ResourceKind::ALL.iter().any(|&kind| {
            let capacity = snapshot.resource_capacity.for_kind(kind);
            capacity > 0 && snapshot.resources.get(kind) * 100 < capacity * threshold
        })
    }

    /// Top every store up to the configured fill target.
    pub async fn proactive_claim(
        &mut self,
        bridge: &PageBridge,
        nav: &mut NavigationManager,
        snapshot: &GameSnapshot,
        config: &HeroConfig,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut amounts = Resources::default();
        for kind in ResourceKind::ALL {
            let capacity = snapshot.resource_capacity.for_kind(kind);
            let target = capacity * config.claim_fill_target_pct as i64 / 100;
            amounts.set(kind, (target - snapshot.resources.get(kind)).max(0));
        }
        self.dispatch_claim(bridge, nav, amounts, now_ms).await
    }

    /// Claim exactly what a failed build needs. When the cost cannot be
    /// determined from the task, fall back to half of each store.
    pub async fn try_claim_for_task(
        &mut self,
        bridge: &PageBridge,
        nav: &mut NavigationManager,
        failed_task: &Task,
        snapshot: &GameSnapshot,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        if !snapshot.hero.is_home || snapshot.hero.is_dead {
            return Ok(false);
        }
        let deficit = match task_cost(failed_task, snapshot) {
            Some(cost) => snapshot.resources.deficit_against(&cost),
            None => {
                let mut fallback = Resources::default();
                for kind in ResourceKind::ALL {
                    let half = snapshot.resource_capacity.for_kind(kind) / 2;
                    fallback.set(kind, (half - snapshot.resources.get(kind)).max(0));
                }
                fallback
            }
        };
        self.dispatch_claim(bridge, nav, deficit, now_ms).await
    }

    async fn dispatch_claim(
        &mut self,
        bridge: &PageBridge,
        nav: &mut NavigationManager,
        amounts: Resources,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        if amounts.total() <= 0 {
            return Ok(false);
        }
        self.cooldown_until_ms = now_ms + CLAIM_COOLDOWN_MS;
        nav.goto(bridge, pages::HERO, now_ms).await?;
        let response = bridge
            .execute(
                "claimHeroResources",
                json!({
                    "wood": amounts.wood,
                    "clay": amounts.clay,
                    "iron": amounts.iron,
                    "crop": amounts.crop,
                }),
            )
            .await?;
        Ok(response.is_ok())
    }
}

impl Default for HeroManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Upgrade cost of the thing a failed build-like task was trying to do.
fn task_cost(task: &Task, snapshot: &GameSnapshot) -> Option<Resources> {
    match task.kind {
        TaskKind::UpgradeResource => {
            let field_id = task.params.get("fieldId")?.as_u64()? as u32;
            let field = snapshot.resource_fields.iter().find(|f| f.id == field_id)?;
            let gid = match field.kind {
                ResourceKind::Wood => praetor_gamedata::GID_WOODCUTTER,
                ResourceKind::Clay => praetor_gamedata::GID_CLAY_PIT,
                ResourceKind::Iron => praetor_gamedata::GID_IRON_MINE,
                ResourceKind::Crop => praetor_gamedata::GID_CROPLAND,
            };
            upgrade_cost(gid, field.level + 1)
        }
        TaskKind::UpgradeBuilding => {
            let slot = task.params.get("slot")?.as_u64()? as u32;
            let building = snapshot
                .buildings
                .iter()
                .find(|b| b.slot == slot && !b.empty)?;
            upgrade_cost(building.gid, building.level + 1)
        }
        TaskKind::BuildNew => {
            let gid = task.params.get("gid")?.as_u64()? as u32;
            upgrade_cost(gid, 1)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PageAgent;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use praetor_types::{HeroState, ResourceCapacity, ResourceField, TaskStatus};
    use serde_json::Value;
    use std::sync::Arc;

    struct RecordingAgent {
        dispatches: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl PageAgent for RecordingAgent {
        async fn dispatch(&self, message: Value) -> anyhow::Result<Value> {
            self.dispatches.lock().push(message);
            Ok(serde_json::json!({"success": true, "data": {}}))
        }
    }

    fn harness() -> (Arc<RecordingAgent>, PageBridge, NavigationManager) {
        let agent = Arc::new(RecordingAgent {
            dispatches: Mutex::new(Vec::new()),
        });
        let bridge = PageBridge::new(agent.clone());
        (agent, bridge, NavigationManager::new())
    }

    fn snapshot() -> GameSnapshot {
        GameSnapshot {
            hero: HeroState {
                is_home: true,
                ..HeroState::default()
            },
            resources: Resources::new(100, 4_000, 4_000, 4_000),
            resource_capacity: ResourceCapacity {
                warehouse: 8_000,
                granary: 8_000,
            },
            ..GameSnapshot::default()
        }
    }

    fn claim_payload(agent: &RecordingAgent) -> Option<Value> {
        agent
            .dispatches
            .lock()
            .iter()
            .find(|m| m["action"] == "claimHeroResources")
            .cloned()
    }

    #[test]
    fn proactive_claim_triggers_below_the_threshold() {
        let manager = HeroManager::new();
        let config = HeroConfig::default();
        // Wood at 100/8000 is 1.25%, under the 20% threshold.
        assert!(manager.should_proactively_claim(&snapshot(), &config, 0));

        let mut full = snapshot();
        full.resources = Resources::new(4_000, 4_000, 4_000, 4_000);
        assert!(!manager.should_proactively_claim(&full, &config, 0));

        let mut away = snapshot();
        away.hero.is_home = false;
        assert!(!manager.should_proactively_claim(&away, &config, 0));
    }

    #[tokio::test]
    async fn proactive_claim_fills_to_the_target() {
        let (agent, bridge, mut nav) = harness();
        let mut manager = HeroManager::new();
        let claimed = manager
            .proactive_claim(&bridge, &mut nav, &snapshot(), &HeroConfig::default(), 0)
            .await
            .expect("claim");
        assert!(claimed);
        let payload = claim_payload(&agent).expect("claim dispatched");
        // Fill target is 50% of 8000: wood needs 3900, the rest nothing.
        assert_eq!(payload["params"]["wood"], 3_900);
        assert_eq!(payload["params"]["clay"], 0);
        // A second claim inside the cooldown window is refused upstream.
        assert!(manager.is_cooling(1_000));
    }

    #[tokio::test]
    async fn task_claim_covers_the_exact_deficit() {
        let (agent, bridge, mut nav) = harness();
        let mut manager = HeroManager::new();
        let mut snap = snapshot();
        snap.resources = Resources::new(10, 10, 10, 10);
        snap.resource_fields.push(ResourceField {
            id: 1,
            kind: ResourceKind::Wood,
            level: 1,
            upgrading: false,
        });
        let task = Task {
            id: 7,
            kind: TaskKind::UpgradeResource,
            params: serde_json::json!({"fieldId": 1}),
            priority: 3,
            village_id: None,
            scheduled_for: None,
            status: TaskStatus::Failed,
            retries: 0,
            max_retries: 3,
            error: None,
            created_at: 0,
            last_attempt_at: None,
        };
        let claimed = manager
            .try_claim_for_task(&bridge, &mut nav, &task, &snap, 0)
            .await
            .expect("claim");
        assert!(claimed);
        let payload = claim_payload(&agent).expect("claim dispatched");
        let expected = upgrade_cost(praetor_gamedata::GID_WOODCUTTER, 2).expect("cost");
        assert_eq!(payload["params"]["wood"], expected.wood - 10);
        assert_eq!(payload["params"]["clay"], expected.clay - 10);
    }

    #[tokio::test]
    async fn unknown_cost_falls_back_to_half_stores() {
        let (agent, bridge, mut nav) = harness();
        let mut manager = HeroManager::new();
        let mut snap = snapshot();
        snap.resources = Resources::new(0, 0, 0, 0);
        let task = Task {
            id: 8,
            kind: TaskKind::UpgradeBuilding,
            // Slot 99 is not in the snapshot, so the cost is unknowable.
            params: serde_json::json!({"slot": 99}),
            priority: 4,
            village_id: None,
            scheduled_for: None,
            status: TaskStatus::Failed,
            retries: 0,
            max_retries: 3,
            error: None,
            created_at: 0,
            last_attempt_at: None,
        };
        let claimed = manager
            .try_claim_for_task(&bridge, &mut nav, &task, &snap, 0)
            .await
            .expect("claim");
        assert!(claimed);
        let payload = claim_payload(&agent).expect("claim dispatched");
        assert_eq!(payload["params"]["wood"], 4_000);
        assert_eq!(payload["params"]["crop"], 4_000);
    }

    #[tokio::test]
    async fn nothing_to_claim_sets_no_cooldown() {
        let (agent, bridge, mut nav) = harness();
        let mut manager = HeroManager::new();
        let mut snap = snapshot();
        snap.resources = Resources::new(7_000, 7_000, 7_000, 7_000);
        let claimed = manager
            .proactive_claim(&bridge, &mut nav, &snap, &HeroConfig::default(), 0)
            .await
            .expect("claim");
        assert!(!claimed);
        assert!(claim_payload(&agent).is_none());
        assert!(!manager.is_cooling(1));
    }
}
