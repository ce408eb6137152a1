use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use hatchway_core::GatewayError;

use crate::PROTOCOL_VERSION;
use crate::jsonrpc::{JsonRpcId, JsonRpcResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayServerInfo {
    pub name: String,
    pub title: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server_info: GatewayServerInfo,
    pub instructions: String,
}

impl GatewayConfig {
    pub fn default_for_binary(name: &str, version: &str) -> Self {
        Self {
            server_info: GatewayServerInfo {
                name: name.to_string(),
                title: "Hatchway MCP Gateway".to_string(),
                version: version.to_string(),
            },
            instructions: "Use GET /package/{pkg}/sse to stream a spawned MCP server and \
                           POST /package/{pkg}/messages to send it JSON-RPC requests."
                .to_string(),
        }
    }
}

/// Capabilities the gateway advertises for itself. Constant.
pub fn server_capabilities() -> Value {
    json!({
        "tools": { "listChanged": true },
        "resources": { "subscribe": true, "listChanged": true },
        "prompts": { "listChanged": true },
        "logging": {}
    })
}

/// What the HTTP layer should answer with.
#[derive(Debug)]
pub enum GatewayReply {
    /// A JSON-RPC response body, HTTP 200.
    Response(JsonRpcResponse),
    /// A notification was consumed; HTTP 204, empty body.
    NotificationAck,
}

/// MCP session state machine for the gateway's own `POST /mcp` surface.
///
/// This is the gateway talking about itself; it is independent of any
/// spawned child. One instance lives for the process lifetime.
pub struct GatewaySession {
    cfg: GatewayConfig,
    initialized: bool,
    protocol_version: Option<String>,
    client_capabilities: Option<Value>,
}

impl GatewaySession {
    pub fn new(cfg: GatewayConfig) -> Self {
        Self {
            cfg,
            initialized: false,
            protocol_version: None,
            client_capabilities: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Status document surfaced on `GET /mcp/capabilities`.
    pub fn status(&self) -> Value {
        let mut status = json!({
            "initialized": self.initialized,
            "protocolVersion": self.protocol_version,
            "serverCapabilities": server_capabilities(),
            "serverInfo": self.cfg.server_info,
        });
        if let Some(caps) = &self.client_capabilities {
            status["clientCapabilities"] = caps.clone();
        }
        status
    }

    /// Handle one raw JSON-RPC envelope.
    ///
    /// Errors carry the request id (or `Null` when it cannot be recovered) so
    /// the HTTP layer can build the error envelope.
    pub fn handle(&mut self, raw: &Value) -> Result<GatewayReply, (JsonRpcId, GatewayError)> {
        let id = JsonRpcId::from_value(raw.get("id"));

        if raw.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err((
                id,
                GatewayError::InvalidParams(
                    "Invalid JSON-RPC version. Expected \"2.0\"".to_string(),
                ),
            ));
        }

        let Some(method) = raw.get("method").and_then(Value::as_str) else {
            return Err((
                id,
                GatewayError::InvalidRequest("missing method".to_string()),
            ));
        };

        match method {
            "initialize" => self.handle_initialize(id, raw.get("params")),
            "notifications/initialized" => {
                self.initialized = true;
                Ok(GatewayReply::NotificationAck)
            }
            "capabilities/list" => {
                self.require_initialized(&id)?;
                Ok(GatewayReply::Response(JsonRpcResponse::ok(
                    id,
                    json!({ "capabilities": server_capabilities() }),
                )))
            }
            "tools/list" => {
                self.require_initialized(&id)?;
                Ok(GatewayReply::Response(JsonRpcResponse::ok(
                    id,
                    json!({ "tools": [] }),
                )))
            }
            "resources/list" => {
                self.require_initialized(&id)?;
                Ok(GatewayReply::Response(JsonRpcResponse::ok(
                    id,
                    json!({ "resources": [] }),
                )))
            }
            "prompts/list" => {
                self.require_initialized(&id)?;
                Ok(GatewayReply::Response(JsonRpcResponse::ok(
                    id,
                    json!({ "prompts": [] }),
                )))
            }
            other => Err((id, GatewayError::MethodNotFound(other.to_string()))),
        }
    }

    fn require_initialized(&self, id: &JsonRpcId) -> Result<(), (JsonRpcId, GatewayError)> {
        if self.initialized {
            Ok(())
        } else {
            Err((id.clone(), GatewayError::ServerNotReady))
        }
    }

    fn handle_initialize(
        &mut self,
        id: JsonRpcId,
        params: Option<&Value>,
    ) -> Result<GatewayReply, (JsonRpcId, GatewayError)> {
        let Some(requested) = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
        else {
            return Err((
                id,
                GatewayError::InvalidParams("missing params.protocolVersion".to_string()),
            ));
        };

        if requested != PROTOCOL_VERSION {
            return Err((
                id,
                GatewayError::UnsupportedProtocolVersion {
                    requested: requested.to_string(),
                    supported: vec![PROTOCOL_VERSION.to_string()],
                },
            ));
        }

        self.protocol_version = Some(requested.to_string());
        self.client_capabilities = params.and_then(|p| p.get("capabilities")).cloned();

        Ok(GatewayReply::Response(JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": server_capabilities(),
                "serverInfo": self.cfg.server_info,
                "instructions": self.cfg.instructions,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> GatewaySession {
        GatewaySession::new(GatewayConfig::default_for_binary("hatchwayd", "0.0.0"))
    }

    fn expect_error(
        result: Result<GatewayReply, (JsonRpcId, GatewayError)>,
    ) -> (JsonRpcId, GatewayError) {
        match result {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn initialize_negotiates_supported_version() {
        let mut s = session();
        let reply = s
            .handle(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0.0.0"}
                }
            }))
            .expect("reply");

        let GatewayReply::Response(resp) = reply else {
            panic!("expected response");
        };
        let result = resp.result.expect("result");
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(result["capabilities"]["prompts"]["listChanged"], true);
        assert!(result["capabilities"]["logging"].is_object());
        assert_eq!(result["serverInfo"]["name"], "hatchwayd");
        assert!(result["instructions"].is_string());
        // initialize alone does not mark the session ready
        assert!(!s.is_initialized());
    }

    #[test]
    fn initialize_rejects_unknown_version_with_supported_list() {
        let mut s = session();
        let (id, err) = expect_error(s.handle(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "initialize",
            "params": {"protocolVersion": "1.0.0"}
        })));
        assert_eq!(id, JsonRpcId::Number(2));
        assert_eq!(err.code(), -32000);
        let data = err.data().expect("data");
        assert_eq!(data["supported"], json!(["2024-11-05"]));
        assert_eq!(data["requested"], "1.0.0");
    }

    #[test]
    fn wrong_jsonrpc_version_is_invalid_params() {
        let mut s = session();
        let (id, err) = expect_error(s.handle(&json!({
            "id": 3,
            "method": "unknown/method"
        })));
        assert_eq!(id, JsonRpcId::Number(3));
        assert_eq!(err.code(), -32602);
        assert_eq!(err.to_string(), "Invalid JSON-RPC version. Expected \"2.0\"");
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let mut s = session();
        let (_, err) = expect_error(s.handle(&json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "unknown/method"
        })));
        assert_eq!(err.code(), -32601);
        assert_eq!(err.to_string(), "Method not found: unknown/method");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn lists_require_initialized_notification() {
        let mut s = session();
        let _ = s.handle(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05"}
        }));

        let (_, err) = expect_error(s.handle(&json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/list"
        })));
        assert_eq!(err.code(), -32006);

        let reply = s
            .handle(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .expect("ack");
        assert!(matches!(reply, GatewayReply::NotificationAck));
        assert!(s.is_initialized());

        for method in ["capabilities/list", "tools/list", "resources/list", "prompts/list"] {
            let reply = s
                .handle(&json!({"jsonrpc": "2.0", "id": 3, "method": method}))
                .expect(method);
            assert!(matches!(reply, GatewayReply::Response(_)), "{method}");
        }
    }

    #[test]
    fn status_reflects_session_state() {
        let mut s = session();
        let before = s.status();
        assert_eq!(before["initialized"], false);
        assert!(before["protocolVersion"].is_null());
        assert!(before.get("clientCapabilities").is_none());

        let _ = s.handle(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {"roots": {}}}
        }));
        let _ = s.handle(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));

        let after = s.status();
        assert_eq!(after["initialized"], true);
        assert_eq!(after["protocolVersion"], "2024-11-05");
        assert_eq!(after["clientCapabilities"]["roots"], json!({}));
        assert_eq!(after["serverInfo"]["title"], "Hatchway MCP Gateway");
    }
}
