use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of work the engine knows how to execute against the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    UpgradeResource,
    UpgradeBuilding,
    BuildNew,
    TrainTroops,
    SendFarm,
    SendAttack,
    SendHeroAdventure,
    ClaimQuest,
    BuildTraps,
    SwitchVillage,
    Navigate,
    EmergencyStop,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::UpgradeResource => "upgrade_resource",
            TaskKind::UpgradeBuilding => "upgrade_building",
            TaskKind::BuildNew => "build_new",
            TaskKind::TrainTroops => "train_troops",
            TaskKind::SendFarm => "send_farm",
            TaskKind::SendAttack => "send_attack",
            TaskKind::SendHeroAdventure => "send_hero_adventure",
            TaskKind::ClaimQuest => "claim_quest",
            TaskKind::BuildTraps => "build_traps",
            TaskKind::SwitchVillage => "switch_village",
            TaskKind::Navigate => "navigate",
            TaskKind::EmergencyStop => "emergency_stop",
        }
    }

    /// Kinds whose failure on missing resources is worth a hero-crate claim.
    pub fn is_build_like(self) -> bool {
        matches!(
            self,
            TaskKind::UpgradeResource | TaskKind::UpgradeBuilding | TaskKind::BuildNew
        )
    }

    /// Kinds that skip the return-home navigation after completing.
    pub fn skips_return_home(self) -> bool {
        matches!(
            self,
            TaskKind::UpgradeResource | TaskKind::Navigate | TaskKind::SwitchVillage
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One unit of work to run against the page. Ids are monotonic per engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub params: Value,
    /// Lower number wins.
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<u64>,
    pub status: TaskStatus,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Task {
    /// Eligible = pending and due.
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_for.map_or(true, |at| at <= now_ms)
    }

    /// Two tasks collide when they share (kind, village) and neither is done.
    pub fn collides_with(&self, kind: TaskKind, village_id: Option<u64>) -> bool {
        !self.status.is_terminal() && self.kind == kind && self.village_id == village_id
    }
}

/// A task the decision engine proposes before it is absorbed into the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProposal {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub params: Value,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<u64>,
}

impl TaskProposal {
    pub fn new(kind: TaskKind, params: Value, priority: i32) -> Self {
        Self {
            kind,
            params,
            priority,
            village_id: None,
            scheduled_for: None,
        }
    }

    pub fn for_village(mut self, village_id: Option<u64>) -> Self {
        self.village_id = village_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(kind: TaskKind, status: TaskStatus, scheduled_for: Option<u64>) -> Task {
        Task {
            id: 1,
            kind,
            params: json!({}),
            priority: 5,
            village_id: None,
            scheduled_for,
            status,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error: None,
            created_at: 0,
            last_attempt_at: None,
        }
    }

    #[test]
    fn eligibility_requires_pending_and_due() {
        assert!(task(TaskKind::SendFarm, TaskStatus::Pending, None).is_eligible(100));
        assert!(task(TaskKind::SendFarm, TaskStatus::Pending, Some(100)).is_eligible(100));
        assert!(!task(TaskKind::SendFarm, TaskStatus::Pending, Some(101)).is_eligible(100));
        assert!(!task(TaskKind::SendFarm, TaskStatus::Running, None).is_eligible(100));
    }

    #[test]
    fn terminal_tasks_never_collide() {
        let done = task(TaskKind::BuildNew, TaskStatus::Completed, None);
        assert!(!done.collides_with(TaskKind::BuildNew, None));
        let live = task(TaskKind::BuildNew, TaskStatus::Pending, None);
        assert!(live.collides_with(TaskKind::BuildNew, None));
        assert!(!live.collides_with(TaskKind::BuildNew, Some(7)));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let value = serde_json::to_value(TaskKind::UpgradeResource).expect("serialize");
        assert_eq!(value, json!("upgrade_resource"));
    }
}
