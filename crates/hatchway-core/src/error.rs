use serde_json::{Value, json};

use crate::package::Ecosystem;

/// Why a package identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    InvalidFormat,
    PathTraversal,
    ShellMetacharacters,
}

impl NameError {
    pub fn as_str(self) -> &'static str {
        match self {
            NameError::Empty => "empty",
            NameError::TooLong => "too_long",
            NameError::InvalidFormat => "invalid_format",
            NameError::PathTraversal => "path_traversal",
            NameError::ShellMetacharacters => "shell_metacharacters",
        }
    }
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the gateway can surface, paired with its JSON-RPC error code
/// and HTTP status.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error")]
    Parse,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Unsupported protocol version: {requested}")]
    UnsupportedProtocolVersion {
        requested: String,
        supported: Vec<String>,
    },
    #[error("Server not initialized")]
    ServerNotReady,
    #[error("Package not found: {0}")]
    PackageNotFound(String),
    #[error("Runtime not available: {command}")]
    RuntimeNotAvailable {
        command: String,
        ecosystem: Ecosystem,
    },
    #[error("Server start failed: {0}")]
    ServerStartFailed(String),
    #[error("Too many running servers (limit {0})")]
    MaxProcessesExceeded(usize),
    #[error("Invalid package name: {reason}")]
    InvalidPackageName { reason: NameError },
    #[error("Package failed the quality check: {0}")]
    QualityCheckFailed(String),
    #[error("Remote servers are not supported")]
    RemoteServerNotSupported,
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::Parse => -32700,
            GatewayError::InvalidRequest(_) => -32600,
            GatewayError::MethodNotFound(_) => -32601,
            GatewayError::InvalidParams(_) => -32602,
            GatewayError::Internal(_) => -32603,
            GatewayError::UnsupportedProtocolVersion { .. } => -32000,
            GatewayError::ServerNotReady => -32006,
            GatewayError::PackageNotFound(_) => -32020,
            GatewayError::RuntimeNotAvailable { .. } => -32021,
            GatewayError::ServerStartFailed(_) => -32022,
            GatewayError::MaxProcessesExceeded(_) => -32023,
            GatewayError::InvalidPackageName { .. } => -32024,
            GatewayError::QualityCheckFailed(_) => -32025,
            GatewayError::RemoteServerNotSupported => -32026,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Parse
            | GatewayError::InvalidRequest(_)
            | GatewayError::InvalidParams(_)
            | GatewayError::UnsupportedProtocolVersion { .. }
            | GatewayError::ServerNotReady
            | GatewayError::InvalidPackageName { .. }
            | GatewayError::QualityCheckFailed(_)
            | GatewayError::RemoteServerNotSupported => 400,
            GatewayError::MethodNotFound(_) | GatewayError::PackageNotFound(_) => 404,
            GatewayError::RuntimeNotAvailable { .. } => 424,
            GatewayError::MaxProcessesExceeded(_) => 429,
            GatewayError::Internal(_) | GatewayError::ServerStartFailed(_) => 500,
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            GatewayError::UnsupportedProtocolVersion {
                requested,
                supported,
            } => Some(json!({ "supported": supported, "requested": requested })),
            GatewayError::InvalidPackageName { reason } => {
                Some(json!({ "reason": reason.as_str() }))
            }
            GatewayError::RuntimeNotAvailable { command, ecosystem } => {
                Some(json!({ "command": command, "ecosystem": ecosystem }))
            }
            GatewayError::MaxProcessesExceeded(limit) => Some(json!({ "limit": limit })),
            GatewayError::QualityCheckFailed(reason) => Some(json!({ "reason": reason })),
            _ => None,
        }
    }

    /// JSON-RPC error object `{code, message, data?}`.
    pub fn to_error_object(&self) -> Value {
        let mut obj = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(data) = self.data() {
            obj["data"] = data;
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(GatewayError::Parse.code(), -32700);
        assert_eq!(GatewayError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(GatewayError::PackageNotFound("p".into()).code(), -32020);
        assert_eq!(
            GatewayError::RuntimeNotAvailable {
                command: "npx".into(),
                ecosystem: Ecosystem::Node
            }
            .code(),
            -32021
        );
        assert_eq!(GatewayError::MaxProcessesExceeded(10).code(), -32023);
        assert_eq!(GatewayError::RemoteServerNotSupported.code(), -32026);
    }

    #[test]
    fn http_statuses_match_taxonomy() {
        assert_eq!(GatewayError::Parse.http_status(), 400);
        assert_eq!(GatewayError::MethodNotFound("x".into()).http_status(), 404);
        assert_eq!(
            GatewayError::RuntimeNotAvailable {
                command: "uvx".into(),
                ecosystem: Ecosystem::Python
            }
            .http_status(),
            424
        );
        assert_eq!(GatewayError::MaxProcessesExceeded(10).http_status(), 429);
        assert_eq!(
            GatewayError::ServerStartFailed("boom".into()).http_status(),
            500
        );
    }

    #[test]
    fn unsupported_protocol_carries_supported_list() {
        let err = GatewayError::UnsupportedProtocolVersion {
            requested: "1.0.0".into(),
            supported: vec!["2024-11-05".into()],
        };
        let obj = err.to_error_object();
        assert_eq!(obj["code"], -32000);
        assert_eq!(obj["data"]["supported"][0], "2024-11-05");
        assert_eq!(obj["data"]["requested"], "1.0.0");
    }
}
