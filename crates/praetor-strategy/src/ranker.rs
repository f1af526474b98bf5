use serde::{Deserialize, Serialize};

use praetor_gamedata::{
    building_name, field_production_per_hour, upgrade_cost, GID_CLAY_PIT, GID_CRANNY,
    GID_CROPLAND, GID_GRANARY, GID_IRON_MINE, GID_MAIN_BUILDING, GID_MARKETPLACE, GID_RALLY_POINT,
    GID_RESIDENCE, GID_WAREHOUSE, GID_WOODCUTTER,
};
use praetor_types::{BotConfig, GameSnapshot, ResourceKind};

use crate::{building_phase_weight, resource_phase_weight, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Resource,
    Building,
}

/// One ranked upgrade option. The top of this list is what the engine
/// builds next, subject to toggles, user targets, and cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCandidate {
    pub kind: CandidateKind,
    pub slot: u32,
    pub gid: u32,
    pub from_level: u8,
    pub affordable: bool,
    pub score: f64,
    pub reason: String,
    /// Stable key for cooldown scoping and user-target matching.
    pub building_key: String,
}

fn field_gid(kind: ResourceKind) -> u32 {
    match kind {
        ResourceKind::Wood => GID_WOODCUTTER,
        ResourceKind::Clay => GID_CLAY_PIT,
        ResourceKind::Iron => GID_IRON_MINE,
        ResourceKind::Crop => GID_CROPLAND,
    }
}

/// Utility weights for in-village buildings. Storage leads so the village
/// never chokes on capacity; throughput and military follow.
fn utility_weight(gid: u32, snapshot: &GameSnapshot) -> Option<f64> {
    let base = match gid {
        GID_WAREHOUSE | GID_GRANARY => 9.0,
        GID_MAIN_BUILDING => 8.0,
        praetor_gamedata::GID_BARRACKS => 5.0,
        praetor_gamedata::GID_STABLE => 4.5,
        GID_MARKETPLACE => 4.0,
        praetor_gamedata::GID_ACADEMY => 4.0,
        GID_RESIDENCE => 4.0,
        praetor_gamedata::GID_SMITHY => 3.5,
        GID_CRANNY => 3.0,
        GID_RALLY_POINT => 2.0,
        praetor_gamedata::GID_GRAIN_MILL | praetor_gamedata::GID_BAKERY => 3.0,
        praetor_gamedata::GID_SAWMILL
        | praetor_gamedata::GID_BRICKYARD
        | praetor_gamedata::GID_IRON_FOUNDRY => 3.0,
        praetor_gamedata::GID_TRAPPER => 2.5,
        praetor_gamedata::GID_EMBASSY | praetor_gamedata::GID_TOWN_HALL => 1.5,
        _ => return None,
    };
    // Storage pressure doubles the urgency of the matching store.
    let boosted = if gid == GID_WAREHOUSE || gid == GID_GRANARY {
        let ratio = snapshot.worst_fill_ratio();
        if ratio > 0.8 {
            base * 2.0
        } else {
            base
        }
    } else {
        base
    };
    Some(boosted)
}

/// Score every upgradeable field and building, best first.
///
/// Resource fields score on return: `1000 · Δproduction/h ÷ total cost`,
/// then the phase weight. Buildings have no production delta, so they score
/// on `500 · utility ÷ total cost` with their own phase weight. The scales
/// put a cheap low-level field ahead of routine infrastructure while a
/// pressured store or a starving village can still jump the line.
pub fn rank_candidates(
    snapshot: &GameSnapshot,
    config: &BotConfig,
    phase: Phase,
) -> Vec<BuildCandidate> {
    let mut out = Vec::new();
    let speed = config.server_speed.max(1) as i64;

    for field in &snapshot.resource_fields {
        if field.upgrading || field.level >= config.resource_max_level {
            continue;
        }
        let gid = field_gid(field.kind);
        let Some(cost) = upgrade_cost(gid, field.level + 1) else {
            continue;
        };
        let gain = (field_production_per_hour(field.level + 1)
            - field_production_per_hour(field.level))
            * speed;
        let total = cost.total().max(1) as f64;
        let mut score = 1000.0 * gain as f64 / total * resource_phase_weight(phase);
        // A starving village wants croplands regardless of phase.
        if field.kind == ResourceKind::Crop && snapshot.resource_production.crop < 0 {
            score *= 3.0;
        }
        out.push(BuildCandidate {
            kind: CandidateKind::Resource,
            slot: field.id,
            gid,
            from_level: field.level,
            affordable: snapshot.resources.covers(&cost),
            score,
            reason: format!(
                "{} {}→{} (+{}/h)",
                field.kind.as_str(),
                field.level,
                field.level + 1,
                gain
            ),
            building_key: format!("{}:{}", field.kind.as_str(), field.id),
        });
    }

    for building in &snapshot.buildings {
        if building.empty || building.upgrading {
            continue;
        }
        let Some(weight) = utility_weight(building.gid, snapshot) else {
            continue;
        };
        let Some(cost) = upgrade_cost(building.gid, building.level + 1) else {
            continue;
        };
        let total = cost.total().max(1) as f64;
        let score = 500.0 * weight / total * building_phase_weight(phase);
        out.push(BuildCandidate {
            kind: CandidateKind::Building,
            slot: building.slot,
            gid: building.gid,
            from_level: building.level,
            affordable: snapshot.resources.covers(&cost),
            score,
            reason: format!(
                "{} {}→{}",
                building_name(building.gid),
                building.level,
                building.level + 1
            ),
            building_key: format!("building:{}", building.slot),
        });
    }

    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use praetor_types::{Building, ResourceCapacity, ResourceField, Resources};

    fn base_snapshot() -> GameSnapshot {
        GameSnapshot {
            resources: Resources::new(5_000, 5_000, 5_000, 5_000),
            resource_capacity: ResourceCapacity {
                warehouse: 10_000,
                granary: 10_000,
            },
            resource_fields: vec![
                ResourceField {
                    id: 1,
                    kind: ResourceKind::Wood,
                    level: 1,
                    upgrading: false,
                },
                ResourceField {
                    id: 2,
                    kind: ResourceKind::Clay,
                    level: 9,
                    upgrading: false,
                },
            ],
            buildings: vec![Building {
                slot: 26,
                gid: GID_MAIN_BUILDING,
                level: 3,
                upgrading: false,
                empty: false,
            }],
            ..GameSnapshot::default()
        }
    }

    #[test]
    fn cheap_low_level_fields_outrank_expensive_high_ones() {
        let ranked = rank_candidates(&base_snapshot(), &BotConfig::default(), Phase::Early);
        let wood = ranked
            .iter()
            .position(|c| c.building_key == "wood:1")
            .expect("wood ranked");
        let clay = ranked
            .iter()
            .position(|c| c.building_key == "clay:2")
            .expect("clay ranked");
        assert!(wood < clay);
    }

    #[test]
    fn upgrading_and_capped_slots_are_excluded() {
        let mut snapshot = base_snapshot();
        snapshot.resource_fields[0].upgrading = true;
        snapshot.resource_fields[1].level = 10;
        let ranked = rank_candidates(&snapshot, &BotConfig::default(), Phase::Early);
        assert!(ranked.iter().all(|c| c.kind != CandidateKind::Resource));
    }

    #[test]
    fn affordability_reflects_current_stores() {
        let mut snapshot = base_snapshot();
        snapshot.resources = Resources::new(10, 10, 10, 10);
        let ranked = rank_candidates(&snapshot, &BotConfig::default(), Phase::Early);
        assert!(ranked.iter().all(|c| !c.affordable));
    }

    #[test]
    fn storage_pressure_boosts_the_warehouse() {
        let mut snapshot = base_snapshot();
        snapshot.buildings.push(Building {
            slot: 18,
            gid: GID_WAREHOUSE,
            level: 3,
            upgrading: false,
            empty: false,
        });
        let calm = rank_candidates(&snapshot, &BotConfig::default(), Phase::Mid);
        snapshot.resources.wood = 9_500;
        let pressured = rank_candidates(&snapshot, &BotConfig::default(), Phase::Mid);
        let score_of = |list: &Vec<BuildCandidate>| {
            list.iter()
                .find(|c| c.gid == GID_WAREHOUSE)
                .map(|c| c.score)
                .expect("warehouse ranked")
        };
        assert!(score_of(&pressured) > score_of(&calm));
    }
}
