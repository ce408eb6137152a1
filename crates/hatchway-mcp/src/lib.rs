//! Model Context Protocol (MCP) primitives used by this repo.
//!
//! This crate is intentionally scoped to the parts the gateway needs:
//! - JSON-RPC 2.0 envelope types shared by every surface
//! - the `Content-Length`-framed stdio codec spoken to spawned children
//! - the gateway's own MCP session (`POST /mcp` handshake surface)
//! - SSE wire helpers

mod framing;
mod jsonrpc;
mod server;
mod sse;

pub use framing::{FrameParser, encode_frame};
pub use jsonrpc::{JsonRpcError, JsonRpcId, JsonRpcResponse};
pub use server::{GatewayConfig, GatewayReply, GatewayServerInfo, GatewaySession};
pub use sse::{SseEvent, decode_sse_events, encode_sse_event};

/// The protocol revision this gateway speaks, advertised verbatim.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
