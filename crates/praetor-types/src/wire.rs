use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural failure tokens reported by the in-page executor. These are the
/// reasons a task can fail without anything being broken on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    NoAdventure,
    HeroUnavailable,
    InsufficientResources,
    QueueFull,
    BuildingNotAvailable,
    NoItems,
    PageMismatch,
    ButtonNotFound,
    SlotOccupied,
    PrerequisitesNotMet,
    BuildingNotInTab,
    Unknown,
}

impl FailReason {
    /// Tokens come off the wire as free-form strings; anything unrecognized
    /// maps to `Unknown` instead of failing the parse.
    pub fn from_token(token: &str) -> Self {
        match token {
            "no_adventure" => FailReason::NoAdventure,
            "hero_unavailable" => FailReason::HeroUnavailable,
            "insufficient_resources" => FailReason::InsufficientResources,
            "queue_full" => FailReason::QueueFull,
            "building_not_available" => FailReason::BuildingNotAvailable,
            "no_items" => FailReason::NoItems,
            "page_mismatch" => FailReason::PageMismatch,
            "button_not_found" => FailReason::ButtonNotFound,
            "slot_occupied" => FailReason::SlotOccupied,
            "prerequisites_not_met" => FailReason::PrerequisitesNotMet,
            "building_not_in_tab" => FailReason::BuildingNotInTab,
            _ => FailReason::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailReason::NoAdventure => "no_adventure",
            FailReason::HeroUnavailable => "hero_unavailable",
            FailReason::InsufficientResources => "insufficient_resources",
            FailReason::QueueFull => "queue_full",
            FailReason::BuildingNotAvailable => "building_not_available",
            FailReason::NoItems => "no_items",
            FailReason::PageMismatch => "page_mismatch",
            FailReason::ButtonNotFound => "button_not_found",
            FailReason::SlotOccupied => "slot_occupied",
            FailReason::PrerequisitesNotMet => "prerequisites_not_met",
            FailReason::BuildingNotInTab => "building_not_in_tab",
            FailReason::Unknown => "unknown",
        }
    }

    /// Hopeless reasons terminal-fail the task and earn a long cooldown.
    /// `building_not_in_tab` stays out: the build handler retries it by
    /// walking the construction tabs.
    pub fn is_hopeless(self) -> bool {
        !matches!(self, FailReason::BuildingNotInTab | FailReason::Unknown)
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent to the in-page agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    Scan,
    Execute {
        action: String,
        #[serde(default)]
        params: Value,
        /// Monotonic per bridge; the executor drops a request id it has
        /// already seen so a timed-out retry cannot double-fire.
        #[serde(rename = "requestId")]
        request_id: u64,
    },
    Ping,
}

impl BridgeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeRequest::Scan => "SCAN",
            BridgeRequest::Execute { .. } => "EXECUTE",
            BridgeRequest::Ping => "PING",
        }
    }
}

/// Reply from the in-page agent: either a payload or a structural refusal.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeResponse {
    Ok { data: Value },
    Fail { reason: FailReason, message: Option<String> },
}

impl BridgeResponse {
    pub fn ok(data: Value) -> Self {
        BridgeResponse::Ok { data }
    }

    pub fn fail(reason: FailReason, message: impl Into<String>) -> Self {
        BridgeResponse::Fail {
            reason,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BridgeResponse::Ok { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            BridgeResponse::Ok { data } => Some(data),
            BridgeResponse::Fail { .. } => None,
        }
    }

    pub fn fail_reason(&self) -> Option<FailReason> {
        match self {
            BridgeResponse::Ok { .. } => None,
            BridgeResponse::Fail { reason, .. } => Some(*reason),
        }
    }
}

// The page side speaks `{success, data?}` / `{success, reason?, message?}`;
// the tagged enum above is the typed view of that shape.
#[derive(Serialize, Deserialize)]
struct RawBridgeResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Serialize for BridgeResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = match self {
            BridgeResponse::Ok { data } => RawBridgeResponse {
                success: true,
                data: Some(data.clone()),
                reason: None,
                message: None,
            },
            BridgeResponse::Fail { reason, message } => RawBridgeResponse {
                success: false,
                data: None,
                reason: Some(reason.as_str().to_string()),
                message: message.clone(),
            },
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BridgeResponse {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBridgeResponse::deserialize(deserializer)?;
        if raw.success {
            Ok(BridgeResponse::Ok {
                data: raw.data.unwrap_or(Value::Null),
            })
        } else {
            Ok(BridgeResponse::Fail {
                reason: raw
                    .reason
                    .as_deref()
                    .map(FailReason::from_token)
                    .unwrap_or(FailReason::Unknown),
                message: raw.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_carries_request_id_on_the_wire() {
        let req = BridgeRequest::Execute {
            action: "clickUpgradeButton".to_string(),
            params: json!({"fieldId": 1}),
            request_id: 42,
        };
        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(value["type"], "EXECUTE");
        assert_eq!(value["requestId"], 42);
        assert_eq!(value["params"]["fieldId"], 1);
    }

    #[test]
    fn responses_round_trip_through_the_raw_shape() {
        let ok: BridgeResponse =
            serde_json::from_value(json!({"success": true, "data": {"page": "resources"}}))
                .expect("parse ok");
        assert!(ok.is_ok());
        assert_eq!(ok.data().and_then(|d| d["page"].as_str()), Some("resources"));

        let fail: BridgeResponse = serde_json::from_value(
            json!({"success": false, "reason": "insufficient_resources", "message": "need 40 wood"}),
        )
        .expect("parse fail");
        assert_eq!(fail.fail_reason(), Some(FailReason::InsufficientResources));
    }

    #[test]
    fn unknown_reasons_do_not_break_parsing() {
        let fail: BridgeResponse =
            serde_json::from_value(json!({"success": false, "reason": "solar_flare"}))
                .expect("parse");
        assert_eq!(fail.fail_reason(), Some(FailReason::Unknown));
    }

    #[test]
    fn hopeless_set_matches_the_structural_tokens() {
        assert!(FailReason::InsufficientResources.is_hopeless());
        assert!(FailReason::PageMismatch.is_hopeless());
        assert!(!FailReason::BuildingNotInTab.is_hopeless());
    }
}
