use praetor_gamedata::{total_upkeep, unit_upkeep};
use praetor_types::{BotConfig, GameSnapshot};

/// Net crop per hour after the current roster and a proposed training batch.
pub fn crop_balance_after_training(
    snapshot: &GameSnapshot,
    config: &BotConfig,
    unit_key: &str,
    count: u32,
) -> i64 {
    let existing = total_upkeep(config.tribe, &snapshot.troops);
    let new = unit_upkeep(config.tribe, unit_key) * count as i64;
    snapshot.resource_production.crop - existing - new
}

/// Training is rejected when it would push net crop below the configured
/// safety margin.
pub fn training_allowed(
    snapshot: &GameSnapshot,
    config: &BotConfig,
    unit_key: &str,
    count: u32,
) -> bool {
    crop_balance_after_training(snapshot, config, unit_key, count) >= -config.crop_safety_margin
}
