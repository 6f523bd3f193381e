//! Connection handlers for the Beacon server.
//!
//! Each WebSocket gets one task that pumps its outbound queue into the socket
//! and feeds inbound text frames to the hub.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{ensure, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use beacon_protocol::{codec::MAX_FRAME_SIZE, ErrorReason};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tenvis_beacon_core::{ConnectionId, Endpoint, Hub, LivenessMonitor, Outbound};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.hub_config())),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let relay_path = state.config.transport.relay_path.clone();
    let producer_path = state.config.transport.producer_path.clone();

    Router::new()
        .route(&relay_path, get(relay_handler))
        .route(&producer_path, get(producer_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn validate_paths(config: &Config) -> Result<()> {
    let transport = &config.transport;
    for path in [&transport.relay_path, &transport.producer_path] {
        ensure!(path.starts_with('/'), "Endpoint path must start with '/': {path}");
        ensure!(path != "/health", "Endpoint path collides with /health");
    }
    ensure!(
        transport.relay_path != transport.producer_path,
        "Relay and producer endpoints share the path {}",
        transport.relay_path
    );
    Ok(())
}

/// Serve on an already bound listener until it fails.
///
/// # Errors
///
/// Returns an error if the endpoint paths are invalid or serving fails.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    validate_paths(&config)?;
    let state = Arc::new(AppState::new(config));

    let monitor = LivenessMonitor::new(state.config.heartbeat_interval())
        .spawn_with(Arc::clone(&state.hub), metrics::record_sweep);

    let addr = listener.local_addr()?;
    info!("Beacon server listening on {}", addr);
    info!("Relay endpoint: ws://{}{}", addr, state.config.transport.relay_path);
    info!("Producer endpoint: ws://{}{}", addr, state.config.transport.producer_path);

    let result = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    monitor.abort();
    result?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let listener = TcpListener::bind(config.bind_addr()?).await?;
    serve(listener, config).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "hub": state.hub.stats(),
    }))
}

async fn relay_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, state, Endpoint::Relay, client_address(&headers, peer))
}

async fn producer_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, state, Endpoint::Producer, client_address(&headers, peer))
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    endpoint: Endpoint,
    address: String,
) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, state, endpoint, address))
}

/// Client address: first `X-Forwarded-For` entry, else the socket peer.
#[must_use]
pub fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    endpoint: Endpoint,
    address: String,
) {
    let _metrics_guard = ConnectionMetricsGuard::new(endpoint);
    let (handle, mut outbound) = state.hub.connect(address.clone(), endpoint);
    let id = handle.id();
    let max_message_size = state.config.limits.max_message_size;

    debug!(connection = %id, address = %address, endpoint = endpoint.as_str(), "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            item = outbound.recv() => {
                let message = match item {
                    Some(Outbound::Text(text)) => {
                        metrics::record_message(text.len(), "outbound");
                        Message::Text(text.to_string())
                    }
                    Some(Outbound::Ping) => Message::Ping(Vec::new()),
                    Some(Outbound::Close) => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    Some(Outbound::Terminate) | None => break,
                };
                if sender.send(message).await.is_err() {
                    metrics::record_error("send");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state.hub, id, max_message_size, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_inbound(&state.hub, id, max_message_size, text),
                        Err(_) => state.hub.reject(id, ErrorReason::InvalidJson),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.hub.mark_alive(id);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(id);
    metrics::record_hub(&state.hub.stats());

    debug!(connection = %id, "WebSocket disconnected");
}

fn handle_inbound(hub: &Hub, id: ConnectionId, max_message_size: usize, text: &str) {
    if text.len() > max_message_size {
        warn!(connection = %id, bytes = text.len(), limit = max_message_size, "Frame too large");
        metrics::record_error("frame-too-large");
        hub.reject(id, ErrorReason::FrameTooLarge);
        return;
    }
    metrics::record_message(text.len(), "inbound");
    hub.handle_text(id, text);
    metrics::record_hub(&hub.stats());
}
