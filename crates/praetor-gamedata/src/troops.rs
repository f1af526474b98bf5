use std::collections::HashMap;

use praetor_types::{Resources, Tribe};

use crate::{GID_BARRACKS, GID_STABLE};

#[derive(Debug, Clone)]
pub struct TroopStats {
    /// Wire key used by the page scanner in the troops map.
    pub key: &'static str,
    pub name: &'static str,
    pub tribe: Tribe,
    pub cost: Resources,
    /// Crop consumed per unit per hour.
    pub upkeep: i64,
    pub training_building_gid: u32,
}

macro_rules! unit {
    ($key:literal, $name:literal, $tribe:expr, ($w:literal, $c:literal, $i:literal, $cr:literal), $upkeep:literal, $building:expr) => {
        TroopStats {
            key: $key,
            name: $name,
            tribe: $tribe,
            cost: Resources {
                wood: $w,
                clay: $c,
                iron: $i,
                crop: $cr,
            },
            upkeep: $upkeep,
            training_building_gid: $building,
        }
    };
}

static TROOPS: &[TroopStats] = &[
    // Romans
    unit!("legionnaire", "Legionnaire", Tribe::Romans, (120, 100, 150, 30), 1, GID_BARRACKS),
    unit!("praetorian", "Praetorian", Tribe::Romans, (100, 130, 160, 70), 1, GID_BARRACKS),
    unit!("imperian", "Imperian", Tribe::Romans, (150, 160, 210, 80), 1, GID_BARRACKS),
    unit!("equites_imperatoris", "Equites Imperatoris", Tribe::Romans, (550, 440, 320, 100), 3, GID_STABLE),
    // Gauls
    unit!("phalanx", "Phalanx", Tribe::Gauls, (100, 130, 55, 30), 1, GID_BARRACKS),
    unit!("swordsman", "Swordsman", Tribe::Gauls, (140, 150, 185, 60), 1, GID_BARRACKS),
    unit!("pathfinder", "Pathfinder", Tribe::Gauls, (170, 150, 20, 40), 2, GID_STABLE),
    unit!("theutates_thunder", "Theutates Thunder", Tribe::Gauls, (350, 450, 230, 60), 2, GID_STABLE),
    // Teutons
    unit!("clubswinger", "Clubswinger", Tribe::Teutons, (95, 75, 40, 40), 1, GID_BARRACKS),
    unit!("spearman", "Spearman", Tribe::Teutons, (145, 70, 85, 40), 1, GID_BARRACKS),
    unit!("axeman", "Axeman", Tribe::Teutons, (130, 120, 170, 70), 1, GID_BARRACKS),
    unit!("paladin", "Paladin", Tribe::Teutons, (370, 270, 290, 75), 2, GID_STABLE),
];

pub fn troops_for(tribe: Tribe) -> impl Iterator<Item = &'static TroopStats> {
    TROOPS.iter().filter(move |t| t.tribe == tribe)
}

pub fn troop_stats(tribe: Tribe, key: &str) -> Option<&'static TroopStats> {
    TROOPS.iter().find(|t| t.tribe == tribe && t.key == key)
}

pub fn unit_upkeep(tribe: Tribe, key: &str) -> i64 {
    troop_stats(tribe, key).map(|t| t.upkeep).unwrap_or(1)
}

/// Crop per hour consumed by an observed troop roster. Unknown unit keys
/// count one crop each rather than zero so the crop gate stays conservative.
pub fn total_upkeep(tribe: Tribe, troops: &HashMap<String, u64>) -> i64 {
    troops
        .iter()
        .map(|(key, count)| unit_upkeep(tribe, key) * *count as i64)
        .sum()
}

/// Default unit a tribe trains when the user has not picked one.
pub fn default_troop_key(tribe: Tribe) -> &'static str {
    match tribe {
        Tribe::Romans => "legionnaire",
        Tribe::Gauls => "phalanx",
        Tribe::Teutons => "clubswinger",
    }
}
