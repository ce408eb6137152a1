use serde::{Deserialize, Serialize};
use serde_json::Value;

use hatchway_core::GatewayError;

/// JSON-RPC 2.0 request id. `Null` is used when the id cannot be recovered
/// from a malformed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    Null,
}

impl JsonRpcId {
    /// Best-effort extraction from a raw envelope's `id` field.
    pub fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(JsonRpcId::Number)
                .unwrap_or(JsonRpcId::Null),
            Some(Value::String(s)) => JsonRpcId::String(s.clone()),
            _ => JsonRpcId::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&GatewayError> for JsonRpcError {
    fn from(err: &GatewayError) -> Self {
        JsonRpcError {
            code: err.code(),
            message: err.to_string(),
            data: err.data(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_gateway_error(id: JsonRpcId, error: &GatewayError) -> Self {
        Self::err(id, error.into())
    }
}
