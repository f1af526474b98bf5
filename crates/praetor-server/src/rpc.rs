use serde::Deserialize;
use serde_json::{json, Value};

pub const CODE_HANDLER_ERROR: i64 = -32000;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_PARSE_ERROR: i64 = -32700;

/// One frontend request, read as a single line of JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self {
            code: CODE_HANDLER_ERROR,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("unknown method: {method}"),
        }
    }
}

impl From<anyhow::Error> for RpcError {
    fn from(err: anyhow::Error) -> Self {
        RpcError::handler(format!("{err:#}"))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

pub fn response_ok(id: i64, result: Value) -> Value {
    json!({"id": id, "result": result})
}

pub fn response_err(id: i64, error: &RpcError) -> Value {
    json!({"id": id, "error": {"code": error.code, "message": error.message}})
}

pub fn parse_error_frame() -> Value {
    json!({"id": null, "error": {"code": CODE_PARSE_ERROR, "message": "parse error"}})
}

/// Unsolicited event frame.
pub fn event_frame(event: &str, data: Value) -> Value {
    json!({"event": event, "data": data})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_lines_parse_with_defaulted_params() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"id": 7, "method": "ping"}"#).expect("parse");
        assert_eq!(request.id, 7);
        assert_eq!(request.method, "ping");
        assert!(request.params.is_null());
    }

    #[test]
    fn frames_match_the_wire_contract() {
        let ok = response_ok(1, json!("pong"));
        assert_eq!(ok, json!({"id": 1, "result": "pong"}));

        let err = response_err(2, &RpcError::method_not_found("warp"));
        assert_eq!(err["error"]["code"], CODE_METHOD_NOT_FOUND);

        let event = event_frame("ready", json!({}));
        assert_eq!(event, json!({"event": "ready", "data": {}}));
    }
}
