//! HTTP and WebSocket handlers for the harbor server.
//!
//! The HTTP layer is deliberately thin: authenticate, validate the
//! requested room, upgrade, and hand the socket to the session
//! machinery. Identity resolution happens before the upgrade; an
//! unauthenticated request never becomes a session.

use crate::auth::{Authenticator, Identity};
use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use crate::session::{self, SessionOptions};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use harbor_core::{validate_room_name, Hub};
use harbor_transport::split_socket;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The session hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    /// Identity resolver for incoming connections.
    pub authenticator: Arc<dyn Authenticator>,
}

/// Query parameters accepted on the WebSocket routes.
///
/// Browsers cannot set headers on a WebSocket handshake, so the bearer
/// token may also travel as a query parameter.
#[derive(Debug, Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/:room", get(ws_room_handler))
        .route("/rooms/:room/users", get(room_users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until shutdown.
///
/// On the shutdown signal the listener stops accepting, every live
/// session is forced to close, and the remaining write loops get a
/// bounded grace period to flush.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, authenticator: Arc<dyn Authenticator>) -> Result<()> {
    let hub = Arc::new(Hub::new());
    let state = Arc::new(AppState {
        hub: Arc::clone(&hub),
        config: config.clone(),
        authenticator,
    });

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("harbor listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping accepts");

    let _ = shutdown_tx.send(());
    let drained = hub.drain_all();
    info!(sessions = drained, "Draining sessions");

    match tokio::time::timeout(config.timeouts.shutdown_grace(), server).await {
        Ok(joined) => joined??,
        Err(_) => warn!("Shutdown grace elapsed with sessions still open"),
    }

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Room membership lookup.
async fn room_users_handler(
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let users = state.hub.list_users(Some(&room));
    Json(serde_json::json!({ "room": room, "users": users }))
}

/// WebSocket upgrade without a room.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
) -> Response {
    upgrade(ws, state, &headers, auth.token.as_deref(), None).await
}

/// WebSocket upgrade joining a room at admission.
async fn ws_room_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
) -> Response {
    if let Err(reason) = validate_room_name(&room) {
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }
    upgrade(ws, state, &headers, auth.token.as_deref(), Some(room)).await
}

/// Authenticate, then upgrade.
async fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    headers: &HeaderMap,
    query_token: Option<&str>,
    room: Option<String>,
) -> Response {
    let Some(token) = bearer_token(headers, query_token) else {
        metrics::record_error("auth");
        return (StatusCode::UNAUTHORIZED, "Missing credentials").into_response();
    };

    match state.authenticator.authenticate(&token).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, identity, room))
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Refusing unauthenticated upgrade");
            metrics::record_error("auth");
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

/// Run one upgraded socket as a session, to completion.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Identity,
    room: Option<String>,
) {
    let _guard = SessionMetricsGuard::new();

    let (reader, writer) = split_socket(
        socket,
        state.config.limits.max_message_size,
        state.config.timeouts.write_timeout(),
    );
    let options = SessionOptions {
        mailbox_capacity: state.config.limits.mailbox_capacity,
        max_inbound_size: state.config.limits.max_message_size,
        read_idle_timeout: state.config.timeouts.read_idle_timeout(),
    };

    session::run_session(
        Arc::clone(&state.hub),
        identity,
        room,
        reader,
        writer,
        options,
    )
    .await;

    metrics::refresh_hub_gauges(&state.hub.stats());
}

/// Extract a bearer token from the Authorization header, falling back
/// to the `token` query parameter.
fn bearer_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    query_token
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers, None), Some("abc123".to_string()));
        // Header wins over the query parameter.
        assert_eq!(
            bearer_token(&headers, Some("other")),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_bearer_token_from_query() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers, Some("qtok")), Some("qtok".to_string()));
        assert_eq!(bearer_token(&headers, Some("")), None);
        assert_eq!(bearer_token(&headers, None), None);
    }

    #[test]
    fn test_bearer_token_malformed_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc123"));
        assert_eq!(bearer_token(&headers, None), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers, None), None);
    }
}
