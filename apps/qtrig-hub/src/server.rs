use std::future::Future;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::dispatcher::Hub;
use crate::protocol::ClientEvent;
use crate::registry::ConnectionId;

const WEB_CLIENT_MISSING: &str =
    "Web client not found. Please ensure web_api_client.html is in the lib directory.";
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    hub: Hub,
    config: Arc<HubConfig>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(hub: Hub, config: HubConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            hub,
            config: Arc::new(config),
            metrics,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/socket", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")
}

async fn index_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&state.config.web_client).await {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            debug!(
                path = %state.config.web_client.display(),
                error = %err,
                "web client page unavailable"
            );
            WEB_CLIENT_MISSING.into_response()
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.status())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ws_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.client_buffer);
    let connection_id = state.hub.connect(tx.clone());
    debug!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket upgraded");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!(connection_id = %connection_id, "writer task finished");
    });

    let mut keepalive = tokio::time::interval(state.config.ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(frame) = frame else {
                    break;
                };
                match frame {
                    Ok(message) => {
                        last_inbound = Instant::now();
                        if handle_frame(&state.hub, connection_id, message).is_break() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(
                            connection_id = %connection_id,
                            error = %err,
                            "error receiving websocket frame"
                        );
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if last_inbound.elapsed() >= state.config.ping_timeout {
                    counter!("qtrig_hub_idle_disconnects_total", 1);
                    info!(connection_id = %connection_id, "closing silent connection");
                    let _ = tx.try_send(Message::Close(None));
                    break;
                }
                let _ = tx.try_send(Message::Ping(Vec::new()));
            }
        }
    }

    state.hub.disconnect(connection_id);
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

fn handle_frame(hub: &Hub, connection_id: ConnectionId, message: Message) -> ControlFlow<()> {
    let decoded = match message {
        Message::Text(text) => ClientEvent::decode(&text),
        // Some socket libraries ship JSON in binary frames.
        Message::Binary(bytes) => ClientEvent::decode_slice(&bytes),
        Message::Close(frame) => {
            debug!(
                connection_id = %connection_id,
                reason = ?frame.map(|f| f.reason.to_string()),
                "client closed websocket"
            );
            return ControlFlow::Break(());
        }
        Message::Ping(_) | Message::Pong(_) => return ControlFlow::Continue(()),
    };

    match decoded {
        Ok(event) => hub.dispatch(connection_id, event),
        Err(err) => {
            counter!(
                "qtrig_hub_protocol_errors_total",
                1,
                "reason" => err.metric_label()
            );
            debug!(connection_id = %connection_id, error = %err, "ignoring undecodable frame");
        }
    }
    ControlFlow::Continue(())
}
