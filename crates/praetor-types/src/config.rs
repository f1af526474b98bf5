use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tribe {
    Romans,
    Gauls,
    Teutons,
}

impl Default for Tribe {
    fn default() -> Self {
        Tribe::Gauls
    }
}

/// A user-curated build plan entry, keyed by slot in `BotConfig::upgrade_targets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTarget {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_level: u8,
    #[serde(default)]
    pub is_new_build: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_gid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    #[serde(default = "default_min_action_delay")]
    pub min_action_delay_ms: u64,
    #[serde(default = "default_max_action_delay")]
    pub max_action_delay_ms: u64,
    #[serde(default = "default_loop_active")]
    pub loop_active_ms: u64,
    #[serde(default = "default_loop_idle")]
    pub loop_idle_ms: u64,
}

fn default_min_action_delay() -> u64 {
    2_000
}
fn default_max_action_delay() -> u64 {
    8_000
}
fn default_loop_active() -> u64 {
    45_000
}
fn default_loop_idle() -> u64 {
    180_000
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_action_delay_ms: default_min_action_delay(),
            max_action_delay_ms: default_max_action_delay(),
            loop_active_ms: default_loop_active(),
            loop_idle_ms: default_loop_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyConfig {
    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: u32,
}

fn default_max_actions_per_hour() -> u32 {
    60
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_actions_per_hour: default_max_actions_per_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmTarget {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub troop_type: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReRaidConfig {
    #[serde(default)]
    pub troop_type: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub min_loot: u64,
}

impl Default for ReRaidConfig {
    fn default() -> Self {
        Self {
            troop_type: String::new(),
            count: 0,
            min_loot: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmConfig {
    #[serde(default = "default_farm_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_farm_min_troops")]
    pub min_troops: u64,
    #[serde(default = "default_true")]
    pub use_rally_point_farm_list: bool,
    #[serde(default)]
    pub targets: Vec<FarmTarget>,
    #[serde(default)]
    pub min_loot: u64,
    #[serde(default)]
    pub skip_losses: bool,
    #[serde(default)]
    pub enable_re_raid: bool,
    #[serde(default)]
    pub re_raid: ReRaidConfig,
}

fn default_farm_interval() -> u64 {
    300_000
}
fn default_farm_min_troops() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_farm_interval(),
            min_troops: default_farm_min_troops(),
            use_rally_point_farm_list: true,
            targets: Vec::new(),
            min_loot: 0,
            skip_losses: false,
            enable_re_raid: false,
            re_raid: ReRaidConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TroopConfig {
    #[serde(default)]
    pub default_troop_type: String,
    #[serde(default = "default_train_count")]
    pub train_count: u32,
    #[serde(default = "default_training_building")]
    pub training_building: String,
    #[serde(default = "default_min_resource_threshold")]
    pub min_resource_threshold: Resources,
}

fn default_train_count() -> u32 {
    5
}
fn default_training_building() -> String {
    "barracks".to_string()
}
fn default_min_resource_threshold() -> Resources {
    Resources::new(500, 500, 500, 300)
}

impl Default for TroopConfig {
    fn default() -> Self {
        Self {
            default_troop_type: String::new(),
            train_count: default_train_count(),
            training_building: default_training_building(),
            min_resource_threshold: default_min_resource_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroConfig {
    /// Percent below which the hero stays home instead of adventuring.
    #[serde(default = "default_hero_min_health")]
    pub min_health: u8,
    /// Claim crates when any store drops below this percent of capacity.
    #[serde(default = "default_claim_threshold")]
    pub claim_threshold_pct: u8,
    /// Fill stores up to this percent of capacity when claiming.
    #[serde(default = "default_claim_fill_target")]
    pub claim_fill_target_pct: u8,
}

fn default_hero_min_health() -> u8 {
    30
}
fn default_claim_threshold() -> u8 {
    20
}
fn default_claim_fill_target() -> u8 {
    50
}

impl Default for HeroConfig {
    fn default() -> Self {
        Self {
            min_health: default_hero_min_health(),
            claim_threshold_pct: default_claim_threshold(),
            claim_fill_target_pct: default_claim_fill_target(),
        }
    }
}

/// Per-server configuration, merged over these defaults at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default = "default_true")]
    pub auto_upgrade_resources: bool,
    #[serde(default = "default_true")]
    pub auto_upgrade_buildings: bool,
    #[serde(default)]
    pub auto_train_troops: bool,
    #[serde(default)]
    pub auto_farm: bool,
    #[serde(default = "default_true")]
    pub auto_hero_adventure: bool,
    #[serde(default = "default_true")]
    pub auto_claim_quests: bool,
    #[serde(default)]
    pub auto_trapper: bool,
    /// Slot key (field id or building slot, as a string) → plan entry.
    #[serde(default)]
    pub upgrade_targets: HashMap<String, UpgradeTarget>,
    #[serde(default)]
    pub tribe: Tribe,
    #[serde(default = "default_server_speed")]
    pub server_speed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_day: Option<u32>,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub farm: FarmConfig,
    #[serde(default)]
    pub troop: TroopConfig,
    #[serde(default)]
    pub hero: HeroConfig,
    /// Troop training may push net crop production this far negative.
    #[serde(default = "default_crop_safety_margin")]
    pub crop_safety_margin: i64,
    #[serde(default = "default_resource_max_level")]
    pub resource_max_level: u8,
}

fn default_server_speed() -> u32 {
    1
}
fn default_crop_safety_margin() -> i64 {
    50
}
fn default_resource_max_level() -> u8 {
    10
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            auto_upgrade_resources: true,
            auto_upgrade_buildings: true,
            auto_train_troops: false,
            auto_farm: false,
            auto_hero_adventure: true,
            auto_claim_quests: true,
            auto_trapper: false,
            upgrade_targets: HashMap::new(),
            tribe: Tribe::default(),
            server_speed: default_server_speed(),
            game_day: None,
            delays: DelayConfig::default(),
            safety: SafetyConfig::default(),
            farm: FarmConfig::default(),
            troop: TroopConfig::default(),
            hero: HeroConfig::default(),
            crop_safety_margin: default_crop_safety_margin(),
            resource_max_level: default_resource_max_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = BotConfig::default();
        assert_eq!(config.safety.max_actions_per_hour, 60);
        assert_eq!(config.delays.min_action_delay_ms, 2_000);
        assert_eq!(config.delays.max_action_delay_ms, 8_000);
        assert_eq!(config.delays.loop_active_ms, 45_000);
        assert_eq!(config.delays.loop_idle_ms, 180_000);
        assert_eq!(config.resource_max_level, 10);
        assert_eq!(
            config.troop.min_resource_threshold,
            Resources::new(500, 500, 500, 300)
        );
        assert_eq!(config.farm.interval_ms, 300_000);
        assert_eq!(config.farm.min_troops, 10);
        assert_eq!(config.hero.min_health, 30);
        assert_eq!(config.hero.claim_threshold_pct, 20);
        assert_eq!(config.hero.claim_fill_target_pct, 50);
        assert_eq!(config.crop_safety_margin, 50);
    }

    #[test]
    fn sparse_config_json_fills_from_defaults() {
        let config: BotConfig =
            serde_json::from_str(r#"{"autoFarm":true,"farm":{"minTroops":25}}"#).expect("parse");
        assert!(config.auto_farm);
        assert_eq!(config.farm.min_troops, 25);
        assert_eq!(config.farm.interval_ms, 300_000);
        assert!(config.farm.use_rally_point_farm_list);
    }
}
