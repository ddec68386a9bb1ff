//! JSON-RPC 2.0 envelopes for the management protocol.
//!
//! Outbound traffic is always a [`Request`]. Inbound text frames are
//! classified by [`Inbound::parse`]: anything carrying a non-null `id` is a
//! response, anything carrying a `method` is a notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{JSONRPC_VERSION, METHOD_PREFIX};

/// Prefixes `method` with the protocol namespace unless it already has it.
pub fn namespaced(method: &str) -> String {
    if method.starts_with(METHOD_PREFIX) {
        method.to_string()
    } else {
        format!("{METHOD_PREFIX}{method}")
    }
}

/// Outbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    /// Creates a request; `method` is namespaced automatically.
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: namespaced(method),
            params,
        }
    }
}

/// Error object embedded in a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default = "unknown_error")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn unknown_error() -> String {
    "Unknown error".into()
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Server-initiated notification. `params` is the first element of the
    /// params array (or an empty object when absent).
    Notification { method: String, params: Value },
    /// Valid JSON that is neither a response we can correlate nor a
    /// notification.
    Unrecognized,
}

impl Inbound {
    /// Parses and classifies a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(text)?;

        if let Some(id) = raw.id {
            let Some(id) = correlation_id(&id) else {
                return Ok(Self::Unrecognized);
            };
            let outcome = match raw.error {
                Some(err) => Err(err),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            return Ok(Self::Response { id, outcome });
        }

        if let Some(method) = raw.method {
            let params = match raw.params {
                Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
                Some(obj @ Value::Object(_)) => obj,
                _ => Value::Object(Default::default()),
            };
            return Ok(Self::Notification { method, params });
        }

        Ok(Self::Unrecognized)
    }
}

/// Extracts our integer request id. Servers echo it back as a number, some
/// as a numeric string.
fn correlation_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_is_namespaced() {
        let req = Request::new(7, "server/status", vec![]);
        assert_eq!(req.method, "minecraft:server/status");

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({"jsonrpc": "2.0", "id": 7, "method": "minecraft:server/status", "params": []})
        );
    }

    #[test]
    fn request_keeps_existing_prefix() {
        let req = Request::new(1, "minecraft:players", vec![]);
        assert_eq!(req.method, "minecraft:players");
    }

    #[test]
    fn parse_success_response() {
        let inbound = Inbound::parse(r#"{"jsonrpc":"2.0","id":3,"result":{"started":true}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"started": true})),
            }
        );
    }

    #[test]
    fn parse_error_response() {
        let inbound = Inbound::parse(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Response { id, outcome: Err(err) } => {
                assert_eq!(id, 4);
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "Method not found");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_without_message() {
        let inbound = Inbound::parse(r#"{"id":5,"error":{}}"#).unwrap();
        match inbound {
            Inbound::Response { outcome: Err(err), .. } => {
                assert_eq!(err.message, "Unknown error");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn parse_null_result_is_success() {
        let inbound = Inbound::parse(r#"{"id":9,"result":null}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 9,
                outcome: Ok(Value::Null),
            }
        );
    }

    #[test]
    fn parse_string_id() {
        let inbound = Inbound::parse(r#"{"id":"12","result":1}"#).unwrap();
        assert!(matches!(inbound, Inbound::Response { id: 12, .. }));
    }

    #[test]
    fn parse_notification_takes_first_param() {
        let inbound = Inbound::parse(
            r#"{"jsonrpc":"2.0","method":"minecraft:notification/players/joined","params":[{"name":"Alice"}]}"#,
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Notification {
                method: "minecraft:notification/players/joined".into(),
                params: json!({"name": "Alice"}),
            }
        );
    }

    #[test]
    fn parse_notification_without_params() {
        let inbound =
            Inbound::parse(r#"{"method":"minecraft:notification/server/saving"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Notification {
                method: "minecraft:notification/server/saving".into(),
                params: json!({}),
            }
        );
    }

    #[test]
    fn null_id_with_method_is_notification() {
        let inbound = Inbound::parse(r#"{"id":null,"method":"minecraft:notification/server/started","params":[]}"#).unwrap();
        assert!(matches!(inbound, Inbound::Notification { .. }));
    }

    #[test]
    fn parse_unrecognized_shapes() {
        assert_eq!(Inbound::parse("{}").unwrap(), Inbound::Unrecognized);
        assert_eq!(
            Inbound::parse(r#"{"id":{"nested":true},"result":1}"#).unwrap(),
            Inbound::Unrecognized
        );
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(Inbound::parse("not json {{{").is_err());
    }
}
