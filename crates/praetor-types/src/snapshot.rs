use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The four raw resources. Field kinds and resource amounts share this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Wood,
    Clay,
    Iron,
    Crop,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Wood,
        ResourceKind::Clay,
        ResourceKind::Iron,
        ResourceKind::Crop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Wood => "wood",
            ResourceKind::Clay => "clay",
            ResourceKind::Iron => "iron",
            ResourceKind::Crop => "crop",
        }
    }
}

/// A resource vector. Used for stocks, production rates, and costs alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub wood: i64,
    #[serde(default)]
    pub clay: i64,
    #[serde(default)]
    pub iron: i64,
    #[serde(default)]
    pub crop: i64,
}

impl Resources {
    pub fn new(wood: i64, clay: i64, iron: i64, crop: i64) -> Self {
        Self {
            wood,
            clay,
            iron,
            crop,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Wood => self.wood,
            ResourceKind::Clay => self.clay,
            ResourceKind::Iron => self.iron,
            ResourceKind::Crop => self.crop,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, value: i64) {
        match kind {
            ResourceKind::Wood => self.wood = value,
            ResourceKind::Clay => self.clay = value,
            ResourceKind::Iron => self.iron = value,
            ResourceKind::Crop => self.crop = value,
        }
    }

    pub fn total(&self) -> i64 {
        self.wood + self.clay + self.iron + self.crop
    }

    /// True when every component of `cost` is available in `self`.
    pub fn covers(&self, cost: &Resources) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.get(kind) >= cost.get(kind))
    }

    /// Per-component shortfall of `self` against `cost`, clamped at zero.
    pub fn deficit_against(&self, cost: &Resources) -> Resources {
        let mut out = Resources::default();
        for kind in ResourceKind::ALL {
            out.set(kind, (cost.get(kind) - self.get(kind)).max(0));
        }
        out
    }

    pub fn scaled(&self, factor: f64) -> Resources {
        Resources {
            wood: (self.wood as f64 * factor).round() as i64,
            clay: (self.clay as f64 * factor).round() as i64,
            iron: (self.iron as f64 * factor).round() as i64,
            crop: (self.crop as f64 * factor).round() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    #[serde(default)]
    pub warehouse: i64,
    #[serde(default)]
    pub granary: i64,
}

impl ResourceCapacity {
    pub fn for_kind(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Crop => self.granary,
            _ => self.warehouse,
        }
    }
}

/// One of the 18 resource-field slots around the village center.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceField {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub level: u8,
    #[serde(default)]
    pub upgrading: bool,
}

/// One in-village building slot. `gid` identifies the building kind; empty
/// slots carry `gid = 0` and `empty = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub slot: u32,
    #[serde(rename = "id", default)]
    pub gid: u32,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub upgrading: bool,
    #[serde(default)]
    pub empty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionQueueItem {
    #[serde(default)]
    pub remaining_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Resources>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionQueue {
    #[serde(default)]
    pub count: u32,
    #[serde(default = "default_queue_max")]
    pub max_count: u32,
    #[serde(default)]
    pub items: Vec<ConstructionQueueItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_finish_ms: Option<u64>,
}

fn default_queue_max() -> u32 {
    1
}

impl Default for ConstructionQueue {
    fn default() -> Self {
        Self {
            count: 0,
            max_count: default_queue_max(),
            items: Vec::new(),
            earliest_finish_ms: None,
        }
    }
}

impl ConstructionQueue {
    pub fn is_full(&self) -> bool {
        self.count >= self.max_count
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroState {
    #[serde(default)]
    pub is_home: bool,
    #[serde(default)]
    pub is_away: bool,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub has_adventure: bool,
    #[serde(default)]
    pub adventure_count: u32,
    /// Percent, 0–100.
    #[serde(default)]
    pub health: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Village {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

/// The canonical result of one SCAN request: everything the deciding side
/// knows about the game at a point in time. Every field tolerates absence so
/// partial scans from older page agents still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    /// Page kind reported by the scanner ("resources", "village", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub resource_capacity: ResourceCapacity,
    /// Per-resource production per hour.
    #[serde(default)]
    pub resource_production: Resources,
    #[serde(default)]
    pub resource_fields: Vec<ResourceField>,
    #[serde(default)]
    pub buildings: Vec<Building>,
    #[serde(default)]
    pub construction_queue: ConstructionQueue,
    /// Unit key → count, for the currently viewed village.
    #[serde(default)]
    pub troops: HashMap<String, u64>,
    #[serde(default)]
    pub hero: HeroState,
    #[serde(default)]
    pub villages: Vec<Village>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_village_id: Option<u64>,
    #[serde(default)]
    pub incoming_attacks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_farm_time_ms: Option<u64>,
    #[serde(default)]
    pub claimable_quests: u32,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub captcha: bool,
    #[serde(default)]
    pub error: bool,
}

impl GameSnapshot {
    pub fn total_troops(&self) -> u64 {
        self.troops.values().sum()
    }

    pub fn building_by_gid(&self, gid: u32) -> Option<&Building> {
        self.buildings
            .iter()
            .filter(|b| !b.empty && b.gid == gid)
            .max_by_key(|b| b.level)
    }

    pub fn empty_slots(&self) -> impl Iterator<Item = &Building> {
        self.buildings.iter().filter(|b| b.empty)
    }

    /// Fill ratio of the fullest store, 0.0–1.0 and beyond when overflowing.
    pub fn worst_fill_ratio(&self) -> f64 {
        ResourceKind::ALL
            .iter()
            .map(|&kind| {
                let cap = self.resource_capacity.for_kind(kind).max(1);
                self.resources.get(kind) as f64 / cap as f64
            })
            .fold(0.0, f64::max)
    }
}
