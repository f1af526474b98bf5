use serde::{Deserialize, Serialize};

use praetor_types::{BotConfig, GameSnapshot};

/// Coarse strategic phase. An input to ranking weights, inferred from the
/// configured game-day estimate when present, otherwise from field levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Early,
    Mid,
    Late,
}

pub fn infer_phase(snapshot: &GameSnapshot, config: &BotConfig) -> Phase {
    if let Some(day) = config.game_day {
        // Faster worlds compress the calendar.
        let speed = config.server_speed.max(1);
        let effective = day.saturating_mul(speed);
        return if effective < 14 {
            Phase::Early
        } else if effective < 45 {
            Phase::Mid
        } else {
            Phase::Late
        };
    }
    let fields = &snapshot.resource_fields;
    if fields.is_empty() {
        return Phase::Early;
    }
    let avg_level =
        fields.iter().map(|f| f.level as u32).sum::<u32>() as f64 / fields.len() as f64;
    if avg_level < 4.0 {
        Phase::Early
    } else if avg_level < 8.0 {
        Phase::Mid
    } else {
        Phase::Late
    }
}

/// Multiplier applied to resource-field scores: fields dominate early play
/// and fade as the village matures.
pub fn resource_phase_weight(phase: Phase) -> f64 {
    match phase {
        Phase::Early => 1.5,
        Phase::Mid => 1.0,
        Phase::Late => 0.8,
    }
}

/// Multiplier applied to building scores.
pub fn building_phase_weight(phase: Phase) -> f64 {
    match phase {
        Phase::Early => 0.7,
        Phase::Mid => 1.0,
        Phase::Late => 1.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praetor_types::{ResourceField, ResourceKind};

    fn snapshot_with_levels(levels: &[u8]) -> GameSnapshot {
        GameSnapshot {
            resource_fields: levels
                .iter()
                .enumerate()
                .map(|(i, &level)| ResourceField {
                    id: i as u32 + 1,
                    kind: ResourceKind::Wood,
                    level,
                    upgrading: false,
                })
                .collect(),
            ..GameSnapshot::default()
        }
    }

    #[test]
    fn game_day_estimate_wins_over_field_levels() {
        let snapshot = snapshot_with_levels(&[10, 10, 10]);
        let config = BotConfig {
            game_day: Some(3),
            ..BotConfig::default()
        };
        assert_eq!(infer_phase(&snapshot, &config), Phase::Early);
    }

    #[test]
    fn server_speed_compresses_the_calendar() {
        let config = BotConfig {
            game_day: Some(20),
            server_speed: 3,
            ..BotConfig::default()
        };
        assert_eq!(infer_phase(&GameSnapshot::default(), &config), Phase::Late);
    }

    #[test]
    fn field_levels_drive_the_fallback() {
        let config = BotConfig::default();
        assert_eq!(
            infer_phase(&snapshot_with_levels(&[1, 2, 1, 2]), &config),
            Phase::Early
        );
        assert_eq!(
            infer_phase(&snapshot_with_levels(&[5, 6, 5, 6]), &config),
            Phase::Mid
        );
        assert_eq!(
            infer_phase(&snapshot_with_levels(&[9, 10, 9, 10]), &config),
            Phase::Late
        );
    }
}
