//! HTTP surface of the gateway: SSE sessions, POST ingress, the gateway's
//! own MCP handshake, and the registry snapshot.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use hatchway_core::params::ARGS_KEY;
use hatchway_core::{
    GatewayError, build_command, build_extra_args, is_remote_url, parse_package,
    project_environment, server_id, validate_package_identifier, validate_params,
};
use hatchway_mcp::{GatewayReply, GatewaySession, JsonRpcId, JsonRpcResponse, PROTOCOL_VERSION};
use hatchway_registry::RegistryClient;

use crate::supervisor::{ManagedServer, Supervisor};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub registry: Arc<RegistryClient>,
    pub session: Arc<tokio::sync::RwLock<GatewaySession>>,
    pub keepalive: Duration,
    pub session_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/package/{pkg}/sse", get(package_sse))
        .route("/package/{pkg}/respond", post(package_message))
        .route("/package/{pkg}/messages", post(package_message))
        .route("/package/{pkg}/message", post(package_message))
        .route("/mcp", post(mcp_post))
        .route("/mcp/capabilities", get(mcp_capabilities))
        .route("/servers", get(list_servers))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Run the full admission pipeline and return the (possibly just spawned)
/// child for `(pkg, params)`. Validation failures never touch the
/// supervisor; resolver failures never spawn.
async fn prepare_child(
    state: &AppState,
    pkg: &str,
    params: &BTreeMap<String, String>,
) -> Result<Arc<ManagedServer>, GatewayError> {
    if is_remote_url(pkg) {
        return Err(GatewayError::RemoteServerNotSupported);
    }
    let canonical = validate_package_identifier(pkg)?;
    validate_params(params)?;
    let extra_args = match params.get(ARGS_KEY) {
        Some(raw) => build_extra_args(raw)?,
        None => Vec::new(),
    };

    let ecosystem = state.registry.admit(canonical).await?;

    let parsed = parse_package(canonical);
    let spec = build_command(ecosystem, &parsed, &extra_args);
    let env = project_environment(params);
    let id = server_id(canonical, params);

    state
        .supervisor
        .get_or_create(&id, canonical, ecosystem, &spec, &env)
}

fn error_response(id: JsonRpcId, err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(JsonRpcResponse::from_gateway_error(id, err))).into_response()
}

// ---------------------------------------------------------------------------
// SSE sessions
// ---------------------------------------------------------------------------

/// Unsubscribes exactly once, whichever way the session ends: peer abort,
/// write failure, wall-clock timeout, child exit, or daemon shutdown all
/// drop the stream and with it this guard.
struct SubscriberGuard {
    supervisor: Arc<Supervisor>,
    server_id: String,
    subscriber_id: String,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.supervisor
            .unsubscribe(&self.server_id, &self.subscriber_id);
    }
}

struct SseSession {
    first: Option<Event>,
    rx: broadcast::Receiver<Value>,
    keepalive: tokio::time::Interval,
    deadline: std::pin::Pin<Box<tokio::time::Sleep>>,
    _guard: SubscriberGuard,
}

fn sse_stream(
    rx: broadcast::Receiver<Value>,
    guard: SubscriberGuard,
    server_id: String,
    client_id: String,
    keepalive: Duration,
    session_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let connected = Event::default().event("status").data(
        json!({ "type": "connected", "server": server_id, "clientId": client_id }).to_string(),
    );

    let now = tokio::time::Instant::now();
    let session = SseSession {
        first: Some(connected),
        rx,
        keepalive: tokio::time::interval_at(now + keepalive, keepalive),
        deadline: Box::pin(tokio::time::sleep(session_timeout)),
        _guard: guard,
    };

    futures::stream::unfold(session, |mut s| async move {
        if let Some(ev) = s.first.take() {
            return Some((Ok(ev), s));
        }
        loop {
            tokio::select! {
                _ = &mut s.deadline => return None,
                _ = s.keepalive.tick() => {
                    let ev = Event::default()
                        .event("ping")
                        .data(json!({ "timestamp": Utc::now().to_rfc3339() }).to_string());
                    return Some((Ok(ev), s));
                }
                msg = s.rx.recv() => match msg {
                    Ok(value) => {
                        let ev = Event::default().event("message").data(value.to_string());
                        return Some((Ok(ev), s));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "sse subscriber lagged");
                        continue;
                    }
                    // Child exited; end the session.
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    })
}

async fn package_sse(
    State(state): State<AppState>,
    Path(pkg): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let server = match prepare_child(&state, &pkg, &params).await {
        Ok(server) => server,
        Err(err) => return error_response(JsonRpcId::Null, &err),
    };

    let subscriber_id = Uuid::new_v4().to_string();
    let rx = match state.supervisor.subscribe(&server.id, &subscriber_id) {
        Ok(rx) => rx,
        Err(err) => return error_response(JsonRpcId::Null, &err),
    };
    let guard = SubscriberGuard {
        supervisor: state.supervisor.clone(),
        server_id: server.id.clone(),
        subscriber_id: subscriber_id.clone(),
    };

    info!(server_id = %server.id, client_id = %subscriber_id, "sse session opened");

    let stream = sse_stream(
        rx,
        guard,
        server.id.clone(),
        subscriber_id,
        state.keepalive,
        state.session_timeout,
    );

    let mut resp = Sse::new(stream).into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    resp
}

// ---------------------------------------------------------------------------
// POST ingress
// ---------------------------------------------------------------------------

async fn package_message(
    State(state): State<AppState>,
    Path(pkg): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    body: axum::body::Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error_response(JsonRpcId::Null, &GatewayError::Parse),
    };
    let id = JsonRpcId::from_value(payload.get("id"));

    let server = match prepare_child(&state, &pkg, &params).await {
        Ok(server) => server,
        Err(err) => return error_response(id, &err),
    };

    // Fire-and-forget: the child's reply arrives on the SSE stream.
    if let Err(err) = state.supervisor.send(&server.id, &payload).await {
        return error_response(id, &err);
    }

    (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response()
}

// ---------------------------------------------------------------------------
// Gateway MCP surface
// ---------------------------------------------------------------------------

async fn mcp_post(State(state): State<AppState>, body: String) -> Response {
    let raw: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            return error_response(
                JsonRpcId::Null,
                &GatewayError::InvalidParams("Invalid JSON format".to_string()),
            );
        }
    };

    let mut session = state.session.write().await;
    match session.handle(&raw) {
        Ok(GatewayReply::Response(resp)) => (StatusCode::OK, Json(resp)).into_response(),
        Ok(GatewayReply::NotificationAck) => StatusCode::NO_CONTENT.into_response(),
        Err((id, err)) => error_response(id, &err),
    }
}

async fn mcp_capabilities(State(state): State<AppState>) -> Json<Value> {
    let session = state.session.read().await;
    Json(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "status": session.status(),
    }))
}

async fn list_servers(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.supervisor.stats()))
}
