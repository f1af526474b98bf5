use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use praetor_gamedata::{building_name, is_resource_field, prerequisites};
use praetor_types::{GameSnapshot, TaskKind, TaskProposal};

/// Depth cap for the dependency walk. Real chains are short (a town hall is
/// four hops from a bare village); anything deeper is a data problem.
pub const MAX_PREREQ_DEPTH: usize = 5;

/// Precomputed lookup maps over one snapshot, so the resolver never walks
/// the raw building vector more than once.
#[derive(Debug, Default)]
pub struct StateReader {
    max_level: HashMap<u32, u8>,
    slot_of: HashMap<u32, u32>,
    upgrading: HashSet<u32>,
    empty_slots: Vec<u32>,
}

impl StateReader {
    pub fn from_snapshot(snapshot: &GameSnapshot) -> Self {
        let mut reader = StateReader::default();
        for field in &snapshot.resource_fields {
            let gid = match field.kind {
                praetor_types::ResourceKind::Wood => praetor_gamedata::GID_WOODCUTTER,
                praetor_types::ResourceKind::Clay => praetor_gamedata::GID_CLAY_PIT,
                praetor_types::ResourceKind::Iron => praetor_gamedata::GID_IRON_MINE,
                praetor_types::ResourceKind::Crop => praetor_gamedata::GID_CROPLAND,
            };
            let best = reader.max_level.entry(gid).or_insert(0);
            if field.level >= *best {
                *best = field.level;
                reader.slot_of.insert(gid, field.id);
            }
            if field.upgrading {
                reader.upgrading.insert(gid);
            }
        }
        for building in &snapshot.buildings {
            if building.empty {
                reader.empty_slots.push(building.slot);
                continue;
            }
            let best = reader.max_level.entry(building.gid).or_insert(0);
            if building.level >= *best {
                *best = building.level;
                reader.slot_of.insert(building.gid, building.slot);
            }
            if building.upgrading {
                reader.upgrading.insert(building.gid);
            }
        }
        reader
    }

    pub fn level_of(&self, gid: u32) -> u8 {
        self.max_level.get(&gid).copied().unwrap_or(0)
    }

    pub fn is_present(&self, gid: u32) -> bool {
        self.slot_of.contains_key(&gid)
    }

    pub fn slot_of(&self, gid: u32) -> Option<u32> {
        self.slot_of.get(&gid).copied()
    }

    pub fn is_upgrading(&self, gid: u32) -> bool {
        self.upgrading.contains(&gid)
    }

    pub fn first_empty_slot(&self) -> Option<u32> {
        self.empty_slots.first().copied()
    }
}

/// Result of asking "what single task moves us toward this building".
#[derive(Debug, Clone)]
pub enum PrereqOutcome {
    /// The next actionable step in the chain.
    Action(TaskProposal),
    /// A link in the chain is already under construction; nothing to do yet.
    AwaitingUpgrade { gid: u32 },
    /// Every prerequisite holds (and the target exists if one was required).
    PrereqsMet,
    /// The chain cannot progress (no empty slot, a cycle, or depth blown).
    Blocked { reason: String },
}

impl PrereqOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            PrereqOutcome::Action(_) => "action",
            PrereqOutcome::AwaitingUpgrade { .. } => "awaiting_upgrade",
            PrereqOutcome::PrereqsMet => "prereqs_met",
            PrereqOutcome::Blocked { .. } => "blocked",
        }
    }
}

/// The walked chain, kept for the strategy surface the frontend renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrereqChain {
    pub target_gid: u32,
    pub steps: Vec<String>,
    pub outcome: String,
}

pub struct PrereqResolver<'a> {
    reader: &'a StateReader,
    priority: i32,
    village_id: Option<u64>,
    steps: Vec<String>,
    visited: HashSet<u32>,
}

impl<'a> PrereqResolver<'a> {
    pub fn new(reader: &'a StateReader, priority: i32, village_id: Option<u64>) -> Self {
        Self {
            reader,
            priority,
            village_id,
            steps: Vec::new(),
            visited: HashSet::new(),
        }
    }

    /// Resolve the first actionable step toward having `target_gid` built.
    /// If the target already stands, reports `PrereqsMet`.
    pub fn resolve(mut self, target_gid: u32) -> (PrereqOutcome, PrereqChain) {
        let outcome = self.advance_toward(target_gid, 1, 0);
        let chain = PrereqChain {
            target_gid,
            steps: self.steps,
            outcome: outcome.tag().to_string(),
        };
        (outcome, chain)
    }

    fn advance_toward(&mut self, gid: u32, needed_level: u8, depth: usize) -> PrereqOutcome {
        if depth > MAX_PREREQ_DEPTH {
            return PrereqOutcome::Blocked {
                reason: format!("prerequisite chain deeper than {MAX_PREREQ_DEPTH}"),
            };
        }
        if !self.visited.insert(gid) {
            return PrereqOutcome::Blocked {
                reason: format!("prerequisite cycle at {}", building_name(gid)),
            };
        }

        // Unmet dependencies of this link come first.
        for p in prerequisites(gid) {
            if self.reader.level_of(p.gid) < p.level {
                self.steps
                    .push(format!("{} needs {}@{}", building_name(gid), building_name(p.gid), p.level));
                return self.advance_toward(p.gid, p.level, depth + 1);
            }
        }

        if self.reader.is_upgrading(gid) {
            self.steps
                .push(format!("{} is already under construction", building_name(gid)));
            return PrereqOutcome::AwaitingUpgrade { gid };
        }

        let have = self.reader.level_of(gid);
        if !self.reader.is_present(gid) && !is_resource_field(gid) {
            let Some(slot) = self.reader.first_empty_slot() else {
                return PrereqOutcome::Blocked {
                    reason: format!("no empty slot for {}", building_name(gid)),
                };
            };
            self.steps.push(format!("place {} in slot {slot}", building_name(gid)));
            return PrereqOutcome::Action(
                TaskProposal::new(
                    TaskKind::BuildNew,
                    json!({"slot": slot, "gid": gid}),
                    self.priority,
                )
                .for_village(self.village_id),
            );
        }

        if have < needed_level {
            let Some(slot) = self.reader.slot_of(gid) else {
                return PrereqOutcome::Blocked {
                    reason: format!("{} has no known slot", building_name(gid)),
                };
            };
            let kind = if is_resource_field(gid) {
                TaskKind::UpgradeResource
            } else {
                TaskKind::UpgradeBuilding
            };
            let params = if kind == TaskKind::UpgradeResource {
                json!({"fieldId": slot})
            } else {
                json!({"slot": slot, "gid": gid})
            };
            self.steps
                .push(format!("raise {} {}→{}", building_name(gid), have, have + 1));
            return PrereqOutcome::Action(
                TaskProposal::new(kind, params, self.priority).for_village(self.village_id),
            );
        }

        PrereqOutcome::PrereqsMet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praetor_gamedata::{
        GID_ACADEMY, GID_BARRACKS, GID_MAIN_BUILDING, GID_RALLY_POINT, GID_SMITHY, GID_STABLE,
    };
    use praetor_types::Building;

    fn village(buildings: &[(u32, u32, u8, bool)], empty_slots: &[u32]) -> StateReader {
        let mut all: Vec<Building> = buildings
            .iter()
            .map(|&(slot, gid, level, upgrading)| Building {
                slot,
                gid,
                level,
                upgrading,
                empty: false,
            })
            .collect();
        for &slot in empty_slots {
            all.push(Building {
                slot,
                gid: 0,
                level: 0,
                upgrading: false,
                empty: true,
            });
        }
        let snapshot = GameSnapshot {
            buildings: all,
            ..GameSnapshot::default()
        };
        StateReader::from_snapshot(&snapshot)
    }

    #[test]
    fn missing_dependency_is_upgraded_first() {
        // Stable needs smithy 3 + academy 5; smithy is at 1.
        let reader = village(
            &[
                (19, GID_MAIN_BUILDING, 5, false),
                (20, GID_RALLY_POINT, 1, false),
                (21, GID_BARRACKS, 3, false),
                (22, GID_ACADEMY, 5, false),
                (23, GID_SMITHY, 1, false),
            ],
            &[30],
        );
        let (outcome, chain) = PrereqResolver::new(&reader, 3, None).resolve(GID_STABLE);
        match outcome {
            PrereqOutcome::Action(task) => {
                assert_eq!(task.kind, TaskKind::UpgradeBuilding);
                assert_eq!(task.params["slot"], 23);
            }
            other => panic!("expected upgrade action, got {:?}", other),
        }
        assert_eq!(chain.outcome, "action");
        assert!(!chain.steps.is_empty());
    }

    #[test]
    fn absent_dependency_is_placed_in_an_empty_slot() {
        // Stable chain bottoms out at a missing academy (barracks exists).
        let reader = village(
            &[
                (19, GID_MAIN_BUILDING, 5, false),
                (20, GID_RALLY_POINT, 1, false),
                (21, GID_BARRACKS, 3, false),
                (23, GID_SMITHY, 3, false),
            ],
            &[30, 31],
        );
        let (outcome, _) = PrereqResolver::new(&reader, 3, None).resolve(GID_STABLE);
        match outcome {
            PrereqOutcome::Action(task) => {
                assert_eq!(task.kind, TaskKind::BuildNew);
                assert_eq!(task.params["gid"], GID_ACADEMY);
                assert_eq!(task.params["slot"], 30);
            }
            other => panic!("expected build action, got {:?}", other),
        }
    }

    #[test]
    fn in_flight_dependency_reports_awaiting() {
        let reader = village(
            &[
                (19, GID_MAIN_BUILDING, 2, true),
                (20, GID_RALLY_POINT, 1, false),
            ],
            &[30],
        );
        let (outcome, chain) = PrereqResolver::new(&reader, 3, None).resolve(GID_BARRACKS);
        assert!(matches!(
            outcome,
            PrereqOutcome::AwaitingUpgrade {
                gid: GID_MAIN_BUILDING
            }
        ));
        assert_eq!(chain.outcome, "awaiting_upgrade");
    }

    #[test]
    fn complete_target_reports_prereqs_met_with_no_task() {
        let reader = village(
            &[
                (19, GID_MAIN_BUILDING, 3, false),
                (20, GID_RALLY_POINT, 1, false),
                (21, GID_BARRACKS, 3, false),
            ],
            &[],
        );
        let (outcome, _) = PrereqResolver::new(&reader, 3, None).resolve(GID_BARRACKS);
        assert!(matches!(outcome, PrereqOutcome::PrereqsMet));
    }

    #[test]
    fn no_empty_slot_blocks_instead_of_panicking() {
        let reader = village(&[(19, GID_MAIN_BUILDING, 5, false)], &[]);
        let (outcome, _) = PrereqResolver::new(&reader, 3, None).resolve(GID_RALLY_POINT);
        assert!(matches!(outcome, PrereqOutcome::Blocked { .. }));
    }

    #[test]
    fn resolver_terminates_within_the_depth_cap() {
        // A bare village asked for a town hall walks the longest real chain
        // and must still settle on a single concrete action.
        let reader = village(&[], &[30]);
        let (outcome, chain) =
            PrereqResolver::new(&reader, 3, None).resolve(praetor_gamedata::GID_TOWN_HALL);
        assert!(chain.steps.len() <= MAX_PREREQ_DEPTH + 1);
        match outcome {
            PrereqOutcome::Action(task) => assert_eq!(task.kind, TaskKind::BuildNew),
            PrereqOutcome::Blocked { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
