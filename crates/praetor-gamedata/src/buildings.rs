use praetor_types::Resources;

// Resource fields.
pub const GID_WOODCUTTER: u32 = 1;
pub const GID_CLAY_PIT: u32 = 2;
pub const GID_IRON_MINE: u32 = 3;
pub const GID_CROPLAND: u32 = 4;

// Production boosters.
pub const GID_SAWMILL: u32 = 5;
pub const GID_BRICKYARD: u32 = 6;
pub const GID_IRON_FOUNDRY: u32 = 7;
pub const GID_GRAIN_MILL: u32 = 8;
pub const GID_BAKERY: u32 = 9;

// Infrastructure and military.
pub const GID_WAREHOUSE: u32 = 10;
pub const GID_GRANARY: u32 = 11;
pub const GID_SMITHY: u32 = 13;
pub const GID_MAIN_BUILDING: u32 = 15;
pub const GID_RALLY_POINT: u32 = 16;
pub const GID_MARKETPLACE: u32 = 17;
pub const GID_EMBASSY: u32 = 18;
pub const GID_BARRACKS: u32 = 19;
pub const GID_STABLE: u32 = 20;
pub const GID_ACADEMY: u32 = 22;
pub const GID_CRANNY: u32 = 23;
pub const GID_TOWN_HALL: u32 = 24;
pub const GID_RESIDENCE: u32 = 25;
pub const GID_TRAPPER: u32 = 36;

pub fn is_resource_field(gid: u32) -> bool {
    (GID_WOODCUTTER..=GID_CROPLAND).contains(&gid)
}

/// A building the target depends on, at a minimum level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prerequisite {
    pub gid: u32,
    pub level: u8,
}

#[derive(Debug, Clone)]
pub struct BuildingInfo {
    pub gid: u32,
    pub name: &'static str,
    /// Level-1 cost; later levels scale by `cost_factor`.
    pub base_cost: Resources,
    pub cost_factor: f64,
    pub max_level: u8,
    pub prerequisites: &'static [Prerequisite],
}

const fn prereq(gid: u32, level: u8) -> Prerequisite {
    Prerequisite { gid, level }
}

const FIELD_COST_FACTOR: f64 = 1.67;
const BUILDING_COST_FACTOR: f64 = 1.28;

static BUILDINGS: &[BuildingInfo] = &[
    BuildingInfo {
        gid: GID_WOODCUTTER,
        name: "Woodcutter",
        base_cost: Resources {
            wood: 40,
            clay: 100,
            iron: 50,
            crop: 60,
        },
        cost_factor: FIELD_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_CLAY_PIT,
        name: "Clay Pit",
        base_cost: Resources {
            wood: 80,
            clay: 40,
            iron: 80,
            crop: 50,
        },
        cost_factor: FIELD_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_IRON_MINE,
        name: "Iron Mine",
        base_cost: Resources {
            wood: 100,
            clay: 80,
            iron: 30,
            crop: 60,
        },
        cost_factor: FIELD_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_CROPLAND,
        name: "Cropland",
        base_cost: Resources {
            wood: 70,
            clay: 90,
            iron: 70,
            crop: 20,
        },
        cost_factor: FIELD_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_SAWMILL,
        name: "Sawmill",
        base_cost: Resources {
            wood: 520,
            clay: 380,
            iron: 290,
            crop: 90,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 5,
        prerequisites: &[prereq(GID_WOODCUTTER, 10), prereq(GID_MAIN_BUILDING, 5)],
    },
    BuildingInfo {
        gid: GID_BRICKYARD,
        name: "Brickyard",
        base_cost: Resources {
            wood: 440,
            clay: 480,
            iron: 320,
            crop: 50,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 5,
        prerequisites: &[prereq(GID_CLAY_PIT, 10), prereq(GID_MAIN_BUILDING, 5)],
    },
    BuildingInfo {
        gid: GID_IRON_FOUNDRY,
        name: "Iron Foundry",
        base_cost: Resources {
            wood: 200,
            clay: 450,
            iron: 510,
            crop: 120,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 5,
        prerequisites: &[prereq(GID_IRON_MINE, 10), prereq(GID_MAIN_BUILDING, 5)],
    },
    BuildingInfo {
        gid: GID_GRAIN_MILL,
        name: "Grain Mill",
        base_cost: Resources {
            wood: 500,
            clay: 440,
            iron: 380,
            crop: 1240,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 5,
        prerequisites: &[prereq(GID_CROPLAND, 5)],
    },
    BuildingInfo {
        gid: GID_BAKERY,
        name: "Bakery",
        base_cost: Resources {
            wood: 1200,
            clay: 1480,
            iron: 870,
            crop: 1600,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 5,
        prerequisites: &[
            prereq(GID_CROPLAND, 10),
            prereq(GID_MAIN_BUILDING, 5),
            prereq(GID_GRAIN_MILL, 5),
        ],
    },
    BuildingInfo {
        gid: GID_WAREHOUSE,
        name: "Warehouse",
        base_cost: Resources {
            wood: 130,
            clay: 160,
            iron: 90,
            crop: 40,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 1)],
    },
    BuildingInfo {
        gid: GID_GRANARY,
        name: "Granary",
        base_cost: Resources {
            wood: 80,
            clay: 100,
            iron: 70,
            crop: 20,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 1)],
    },
    BuildingInfo {
        gid: GID_SMITHY,
        name: "Smithy",
        base_cost: Resources {
            wood: 170,
            clay: 200,
            iron: 380,
            crop: 130,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 3), prereq(GID_ACADEMY, 1)],
    },
    BuildingInfo {
        gid: GID_MAIN_BUILDING,
        name: "Main Building",
        base_cost: Resources {
            wood: 70,
            clay: 40,
            iron: 60,
            crop: 20,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_RALLY_POINT,
        name: "Rally Point",
        base_cost: Resources {
            wood: 110,
            clay: 160,
            iron: 90,
            crop: 70,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_MARKETPLACE,
        name: "Marketplace",
        base_cost: Resources {
            wood: 80,
            clay: 70,
            iron: 120,
            crop: 70,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[
            prereq(GID_MAIN_BUILDING, 3),
            prereq(GID_WAREHOUSE, 1),
            prereq(GID_GRANARY, 1),
        ],
    },
    BuildingInfo {
        gid: GID_EMBASSY,
        name: "Embassy",
        base_cost: Resources {
            wood: 180,
            clay: 130,
            iron: 150,
            crop: 80,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 1)],
    },
    BuildingInfo {
        gid: GID_BARRACKS,
        name: "Barracks",
        base_cost: Resources {
            wood: 210,
            clay: 140,
            iron: 260,
            crop: 120,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 3), prereq(GID_RALLY_POINT, 1)],
    },
    BuildingInfo {
        gid: GID_STABLE,
        name: "Stable",
        base_cost: Resources {
            wood: 260,
            clay: 140,
            iron: 220,
            crop: 100,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_SMITHY, 3), prereq(GID_ACADEMY, 5)],
    },
    BuildingInfo {
        gid: GID_ACADEMY,
        name: "Academy",
        base_cost: Resources {
            wood: 220,
            clay: 160,
            iron: 90,
            crop: 40,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 3), prereq(GID_BARRACKS, 3)],
    },
    BuildingInfo {
        gid: GID_CRANNY,
        name: "Cranny",
        base_cost: Resources {
            wood: 40,
            clay: 50,
            iron: 30,
            crop: 10,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 10,
        prerequisites: &[],
    },
    BuildingInfo {
        gid: GID_TOWN_HALL,
        name: "Town Hall",
        base_cost: Resources {
            wood: 1250,
            clay: 1110,
            iron: 1260,
            crop: 600,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 10), prereq(GID_ACADEMY, 10)],
    },
    BuildingInfo {
        gid: GID_RESIDENCE,
        name: "Residence",
        base_cost: Resources {
            wood: 580,
            clay: 460,
            iron: 350,
            crop: 180,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_MAIN_BUILDING, 5)],
    },
    BuildingInfo {
        gid: GID_TRAPPER,
        name: "Trapper",
        base_cost: Resources {
            wood: 80,
            clay: 120,
            iron: 70,
            crop: 90,
        },
        cost_factor: BUILDING_COST_FACTOR,
        max_level: 20,
        prerequisites: &[prereq(GID_RALLY_POINT, 1)],
    },
];

pub fn building_info(gid: u32) -> Option<&'static BuildingInfo> {
    BUILDINGS.iter().find(|b| b.gid == gid)
}

pub fn building_name(gid: u32) -> &'static str {
    building_info(gid).map(|b| b.name).unwrap_or("Unknown")
}

pub fn prerequisites(gid: u32) -> &'static [Prerequisite] {
    building_info(gid).map(|b| b.prerequisites).unwrap_or(&[])
}

/// Cost of bringing a building (or field) from `to_level - 1` to `to_level`.
/// Costs scale geometrically and round to the nearest 5, matching the
/// in-game tables closely enough for affordability checks.
pub fn upgrade_cost(gid: u32, to_level: u8) -> Option<Resources> {
    let info = building_info(gid)?;
    if to_level == 0 || to_level > info.max_level {
        return None;
    }
    let factor = info.cost_factor.powi(to_level as i32 - 1);
    let scale = |base: i64| -> i64 {
        let raw = base as f64 * factor;
        ((raw / 5.0).round() as i64) * 5
    };
    Some(Resources {
        wood: scale(info.base_cost.wood),
        clay: scale(info.base_cost.clay),
        iron: scale(info.base_cost.iron),
        crop: scale(info.base_cost.crop),
    })
}

/// Per-field production per hour at 1x speed, by field level.
static FIELD_PRODUCTION: &[i64] = &[2, 5, 9, 15, 22, 33, 50, 70, 100, 145, 200, 280, 375, 495, 635, 800, 1000, 1300, 1600, 2000, 2450];

pub fn field_production_per_hour(level: u8) -> i64 {
    let idx = (level as usize).min(FIELD_PRODUCTION.len() - 1);
    FIELD_PRODUCTION[idx]
}

/// Traps held by a trapper at a given level.
static TRAPPER_CAPACITY: &[u32] = &[0, 10, 22, 35, 49, 64, 80, 97, 115, 134, 154, 175, 196, 218, 241, 265, 290, 316, 343, 371, 400];

pub fn trapper_capacity(level: u8) -> u32 {
    let idx = (level as usize).min(TRAPPER_CAPACITY.len() - 1);
    TRAPPER_CAPACITY[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_one_cost_is_the_base_cost() {
        let cost = upgrade_cost(GID_CRANNY, 1).expect("cranny cost");
        assert_eq!(cost, Resources::new(40, 50, 30, 10));
    }

    #[test]
    fn costs_grow_with_level() {
        let l1 = upgrade_cost(GID_WOODCUTTER, 1).expect("l1");
        let l5 = upgrade_cost(GID_WOODCUTTER, 5).expect("l5");
        assert!(l5.wood > l1.wood * 5);
    }

    #[test]
    fn levels_past_max_have_no_cost() {
        assert!(upgrade_cost(GID_CRANNY, 11).is_none());
        assert!(upgrade_cost(GID_CRANNY, 0).is_none());
        assert!(upgrade_cost(999, 1).is_none());
    }

    #[test]
    fn barracks_requires_main_building_and_rally_point() {
        let prereqs = prerequisites(GID_BARRACKS);
        assert!(prereqs.contains(&Prerequisite {
            gid: GID_MAIN_BUILDING,
            level: 3
        }));
        assert!(prereqs.contains(&Prerequisite {
            gid: GID_RALLY_POINT,
            level: 1
        }));
    }

    #[test]
    fn field_production_is_monotonic() {
        for level in 1..=20u8 {
            assert!(field_production_per_hour(level) > field_production_per_hour(level - 1));
        }
    }

    #[test]
    fn resource_field_gids() {
        assert!(is_resource_field(GID_CROPLAND));
        assert!(!is_resource_field(GID_WAREHOUSE));
    }
}
