use serde::{Deserialize, Serialize};
use serde_json::json;

use praetor_gamedata::{
    default_troop_key, trapper_capacity, troop_stats, GID_CRANNY, GID_TRAPPER, GID_WAREHOUSE,
};
use praetor_types::{BotConfig, GameSnapshot, TaskKind, TaskProposal, Tribe};

use crate::{
    infer_phase, rank_candidates, training_allowed, BuildCandidate, CandidateKind, CooldownView,
    Phase, PrereqChain, PrereqOutcome, PrereqResolver, QueueView, StateReader,
};

/// How many ranked candidates the selection pass looks at.
const RANKER_WINDOW: usize = 20;

/// Traps we want available per sighted incoming attack.
const TRAPS_PER_ATTACK: u32 = 20;

pub const PRIORITY_EMERGENCY: i32 = 0;
pub const PRIORITY_CRANNY: i32 = 1;
pub const PRIORITY_TRAPPER: i32 = 2;
pub const PRIORITY_USER_BUILD: i32 = 3;
pub const PRIORITY_RESOURCE: i32 = 3;
pub const PRIORITY_BUILDING: i32 = 4;
pub const PRIORITY_FARM: i32 = 4;
pub const PRIORITY_QUEST: i32 = 5;
pub const PRIORITY_HERO: i32 = 5;
pub const PRIORITY_TROOPS: i32 = 6;

/// What the decision pass hands back to the engine: tasks to absorb plus the
/// analysis the frontend renders.
#[derive(Debug, Clone)]
pub struct Decision {
    pub tasks: Vec<TaskProposal>,
    pub analysis: StrategyAnalysis,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAnalysis {
    pub phase: Phase,
    pub build_candidates: Vec<BuildCandidate>,
    pub prereq_chains: Vec<PrereqChain>,
    pub notes: Vec<String>,
}

/// One full decision pass over a snapshot. Pure: identical inputs produce
/// identical output; the only engine-side state this consults is the queue
/// and cooldown views it is handed.
pub fn evaluate(
    snapshot: &GameSnapshot,
    config: &BotConfig,
    queue: &dyn QueueView,
    cooldowns: &dyn CooldownView,
    now_ms: u64,
) -> Decision {
    let phase = infer_phase(snapshot, config);
    let mut tasks: Vec<TaskProposal> = Vec::new();
    let mut chains: Vec<PrereqChain> = Vec::new();
    let mut notes: Vec<String> = Vec::new();
    let village = snapshot.current_village_id;

    // Safety comes first and short-circuits everything else.
    if snapshot.captcha || snapshot.error {
        let reason = if snapshot.captcha { "captcha" } else { "page_error" };
        return Decision {
            tasks: vec![TaskProposal::new(
                TaskKind::EmergencyStop,
                json!({"reason": reason}),
                PRIORITY_EMERGENCY,
            )],
            analysis: StrategyAnalysis {
                phase,
                build_candidates: Vec::new(),
                prereq_chains: Vec::new(),
                notes: vec![format!("emergency: {reason}")],
            },
            phase,
        };
    }

    let build_queue_full = snapshot.construction_queue.is_full();
    if build_queue_full {
        notes.push("construction queue full".to_string());
    }
    let reader = StateReader::from_snapshot(snapshot);

    // Cranny protection: keep the cranny at or above the warehouse level so
    // raids find empty stores. While the invariant is violated, no other
    // rule family may emit work: the cranny comes first.
    let cranny_violated = cranny_invariant_violated(snapshot);
    if cranny_violated {
        notes.push("cranny below warehouse level".to_string());
    }
    if cranny_violated && !build_queue_full {
        if let Some(task) = cranny_rule(snapshot, queue, cooldowns, village) {
            tasks.push(task);
        }
    }

    if !cranny_violated
        && config.auto_claim_quests
        && snapshot.claimable_quests > 0
        && !queue.has_task_of_kind(TaskKind::ClaimQuest, village)
        && !cooldowns.is_cooling("claim_quest")
    {
        tasks.push(
            TaskProposal::new(
                TaskKind::ClaimQuest,
                json!({"count": snapshot.claimable_quests}),
                PRIORITY_QUEST,
            )
            .for_village(village),
        );
    }

    if !cranny_violated
        && config.auto_trapper
        && config.tribe == Tribe::Gauls
        && snapshot.incoming_attacks > 0
    {
        trapper_rule(
            snapshot,
            &reader,
            queue,
            cooldowns,
            build_queue_full,
            village,
            &mut tasks,
            &mut chains,
        );
    }

    if !cranny_violated && !build_queue_full {
        user_new_build_rule(config, &reader, queue, cooldowns, village, &mut tasks, &mut chains);
    }

    let candidates = rank_candidates(snapshot, config, phase);
    if !cranny_violated && !build_queue_full {
        if let Some(task) = select_upgrade(config, &candidates, queue, cooldowns, village) {
            tasks.push(task);
        }
    }

    if !cranny_violated
        && config.auto_train_troops
        && !queue.has_task_of_kind(TaskKind::TrainTroops, village)
        && !cooldowns.is_cooling("train_troops")
        && snapshot
            .resources
            .covers(&config.troop.min_resource_threshold)
    {
        if let Some(task) = troop_rule(snapshot, config, village) {
            tasks.push(task);
        } else {
            notes.push("troop training blocked by crop balance".to_string());
        }
    }

    if !cranny_violated
        && config.auto_hero_adventure
        && snapshot.hero.is_home
        && !snapshot.hero.is_dead
        && snapshot.hero.has_adventure
        && snapshot.hero.health >= config.hero.min_health
        && !queue.has_any_task_of_kind(TaskKind::SendHeroAdventure)
        && !cooldowns.is_cooling("send_hero_adventure")
    {
        tasks.push(TaskProposal::new(
            TaskKind::SendHeroAdventure,
            json!({}),
            PRIORITY_HERO,
        ));
    }

    if !cranny_violated
        && config.auto_farm
        && !queue.has_any_task_of_kind(TaskKind::SendFarm)
        && !cooldowns.is_cooling("send_farm")
    {
        let last = snapshot.last_farm_time_ms.unwrap_or(0);
        let due = now_ms.saturating_sub(last) >= config.farm.interval_ms;
        if due && snapshot.total_troops() >= config.farm.min_troops {
            tasks.push(
                TaskProposal::new(TaskKind::SendFarm, json!({}), PRIORITY_FARM)
                    .for_village(village),
            );
        }
    }

    let mut build_candidates = candidates;
    build_candidates.truncate(RANKER_WINDOW);
    Decision {
        tasks,
        analysis: StrategyAnalysis {
            phase,
            build_candidates,
            prereq_chains: chains,
            notes,
        },
        phase,
    }
}

/// True while a village with a warehouse lacks a cranny at or above the
/// warehouse level (capped at 10). Every other rule family stays silent
/// until this clears.
fn cranny_invariant_violated(snapshot: &GameSnapshot) -> bool {
    let Some(warehouse) = snapshot.building_by_gid(GID_WAREHOUSE) else {
        return false;
    };
    if warehouse.level == 0 {
        return false;
    }
    match snapshot.building_by_gid(GID_CRANNY) {
        None => true,
        Some(cranny) => cranny.level < warehouse.level && cranny.level < 10,
    }
}

fn cranny_rule(
    snapshot: &GameSnapshot,
    queue: &dyn QueueView,
    cooldowns: &dyn CooldownView,
    village: Option<u64>,
) -> Option<TaskProposal> {
    let warehouse = snapshot.building_by_gid(GID_WAREHOUSE)?;
    if warehouse.level == 0 {
        return None;
    }
    match snapshot.building_by_gid(GID_CRANNY) {
        None => {
            if queue.has_task_of_kind(TaskKind::BuildNew, village) {
                return None;
            }
            let slot = snapshot.empty_slots().next()?.slot;
            if cooldowns.is_cooling(&format!("build_new:{slot}")) {
                return None;
            }
            Some(
                TaskProposal::new(
                    TaskKind::BuildNew,
                    json!({"slot": slot, "gid": GID_CRANNY}),
                    PRIORITY_CRANNY,
                )
                .for_village(village),
            )
        }
        Some(cranny) => {
            if cranny.level >= warehouse.level || cranny.level >= 10 || cranny.upgrading {
                return None;
            }
            if queue.has_task_of_kind(TaskKind::UpgradeBuilding, village)
                || cooldowns.is_cooling(&format!("upgrade_building:{}", cranny.slot))
            {
                return None;
            }
            Some(
                TaskProposal::new(
                    TaskKind::UpgradeBuilding,
                    json!({"slot": cranny.slot, "gid": GID_CRANNY}),
                    PRIORITY_CRANNY,
                )
                .for_village(village),
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn trapper_rule(
    snapshot: &GameSnapshot,
    reader: &StateReader,
    queue: &dyn QueueView,
    cooldowns: &dyn CooldownView,
    build_queue_full: bool,
    village: Option<u64>,
    tasks: &mut Vec<TaskProposal>,
    chains: &mut Vec<PrereqChain>,
) {
    let wanted = snapshot.incoming_attacks * TRAPS_PER_ATTACK;
    match snapshot.building_by_gid(GID_TRAPPER) {
        Some(trapper) => {
            // Refill traps whenever the building stands.
            if !queue.has_task_of_kind(TaskKind::BuildTraps, village)
                && !cooldowns.is_cooling("build_traps")
            {
                tasks.push(
                    TaskProposal::new(
                        TaskKind::BuildTraps,
                        json!({"slot": trapper.slot}),
                        PRIORITY_TRAPPER,
                    )
                    .for_village(village),
                );
            }
            if trapper_capacity(trapper.level) < wanted
                && !trapper.upgrading
                && !build_queue_full
                && !queue.has_task_of_kind(TaskKind::UpgradeBuilding, village)
                && !cooldowns.is_cooling(&format!("upgrade_building:{}", trapper.slot))
            {
                tasks.push(
                    TaskProposal::new(
                        TaskKind::UpgradeBuilding,
                        json!({"slot": trapper.slot, "gid": GID_TRAPPER}),
                        PRIORITY_TRAPPER,
                    )
                    .for_village(village),
                );
            }
        }
        None => {
            if build_queue_full || queue.has_task_of_kind(TaskKind::BuildNew, village) {
                return;
            }
            let (outcome, chain) =
                PrereqResolver::new(reader, PRIORITY_TRAPPER, village).resolve(GID_TRAPPER);
            chains.push(chain);
            if let PrereqOutcome::Action(task) = outcome {
                tasks.push(task);
            }
        }
    }
}

fn user_new_build_rule(
    config: &BotConfig,
    reader: &StateReader,
    queue: &dyn QueueView,
    cooldowns: &dyn CooldownView,
    village: Option<u64>,
    tasks: &mut Vec<TaskProposal>,
    chains: &mut Vec<PrereqChain>,
) {
    let mut selections: Vec<(&String, u32)> = config
        .upgrade_targets
        .iter()
        .filter(|(_, t)| t.enabled && t.is_new_build)
        .filter_map(|(key, t)| t.build_gid.map(|gid| (key, gid)))
        .collect();
    selections.sort_by(|a, b| a.0.cmp(b.0));

    for (_, gid) in selections {
        let (outcome, chain) =
            PrereqResolver::new(reader, PRIORITY_USER_BUILD, village).resolve(gid);
        let actionable = matches!(outcome, PrereqOutcome::Action(_));
        chains.push(chain);
        if let PrereqOutcome::Action(task) = outcome {
            let slot_key = task
                .params
                .get("slot")
                .or_else(|| task.params.get("fieldId"))
                .and_then(|v| v.as_u64())
                .map(|slot| format!("{}:{slot}", task.kind))
                .unwrap_or_else(|| task.kind.to_string());
            if !queue.has_task_of_kind(task.kind, village) && !cooldowns.is_cooling(&slot_key) {
                tasks.push(task);
                return;
            }
        }
        if actionable {
            // The first actionable selection owns this cycle even when the
            // queue already carries it.
            return;
        }
    }
}

fn select_upgrade(
    config: &BotConfig,
    candidates: &[BuildCandidate],
    queue: &dyn QueueView,
    cooldowns: &dyn CooldownView,
    village: Option<u64>,
) -> Option<TaskProposal> {
    let allow_resource = config.auto_upgrade_resources
        && !cooldowns.is_cooling("upgrade_resource")
        && !queue.has_task_of_kind(TaskKind::UpgradeResource, village);
    let allow_building = config.auto_upgrade_buildings
        && !cooldowns.is_cooling("upgrade_building")
        && !queue.has_task_of_kind(TaskKind::UpgradeBuilding, village);
    if !allow_resource && !allow_building {
        return None;
    }

    let user_slots: Vec<(u32, u8)> = config
        .upgrade_targets
        .iter()
        .filter(|(_, t)| t.enabled && !t.is_new_build)
        .filter_map(|(key, t)| key.parse::<u32>().ok().map(|slot| (slot, t.target_level)))
        .collect();
    let restricted = !user_slots.is_empty();

    let eligible = |candidate: &BuildCandidate| -> bool {
        match candidate.kind {
            CandidateKind::Resource if !allow_resource => return false,
            CandidateKind::Building if !allow_building => return false,
            _ => {}
        }
        if restricted {
            match user_slots.iter().find(|(slot, _)| *slot == candidate.slot) {
                Some((_, target_level)) => {
                    if candidate.from_level >= *target_level {
                        return false;
                    }
                }
                None => return false,
            }
        }
        let slot_key = match candidate.kind {
            CandidateKind::Resource => format!("upgrade_resource:{}", candidate.slot),
            CandidateKind::Building => format!("upgrade_building:{}", candidate.slot),
        };
        !cooldowns.is_cooling(&slot_key)
    };

    let window = candidates.iter().take(RANKER_WINDOW);
    let mut fallback: Option<&BuildCandidate> = None;
    for candidate in window.filter(|c| eligible(c)) {
        if candidate.affordable {
            return Some(proposal_for(candidate, village));
        }
        if fallback.is_none() {
            fallback = Some(candidate);
        }
    }
    // Only stretch for an unaffordable upgrade when the user has not pinned
    // the plan to specific slots.
    if restricted {
        return None;
    }
    fallback.map(|c| proposal_for(c, village))
}

fn proposal_for(candidate: &BuildCandidate, village: Option<u64>) -> TaskProposal {
    match candidate.kind {
        CandidateKind::Resource => TaskProposal::new(
            TaskKind::UpgradeResource,
            json!({"fieldId": candidate.slot}),
            PRIORITY_RESOURCE,
        )
        .for_village(village),
        CandidateKind::Building => TaskProposal::new(
            TaskKind::UpgradeBuilding,
            json!({"slot": candidate.slot, "gid": candidate.gid}),
            PRIORITY_BUILDING,
        )
        .for_village(village),
    }
}

fn troop_rule(
    snapshot: &GameSnapshot,
    config: &BotConfig,
    village: Option<u64>,
) -> Option<TaskProposal> {
    let unit_key = if config.troop.default_troop_type.is_empty() {
        default_troop_key(config.tribe).to_string()
    } else {
        config.troop.default_troop_type.clone()
    };
    let count = config.troop.train_count.max(1);
    if !training_allowed(snapshot, config, &unit_key, count) {
        return None;
    }
    let building = troop_stats(config.tribe, &unit_key)
        .map(|s| s.training_building_gid)
        .unwrap_or(praetor_gamedata::GID_BARRACKS);
    Some(
        TaskProposal::new(
            TaskKind::TrainTroops,
            json!({"unit": unit_key, "count": count, "buildingGid": building}),
            PRIORITY_TROOPS,
        )
        .for_village(village),
    )
}
