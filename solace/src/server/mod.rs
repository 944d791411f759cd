//! HTTP and WebSocket surface of the relay.
//!
//! Endpoints:
//! - POST /api/conversation - Submit a message (`{"message": "..."}`)
//! - DELETE /api/conversation - Forget the caller's conversation
//! - GET /ws - The caller's private event channel
//! - GET /healthz - Liveness and session count
//!
//! Every conversation endpoint requires a caller identity (see [`Caller`]).

mod hub;
mod identity;

pub use hub::{Broadcaster, ChannelHub, Subscription};
pub use identity::{Caller, USER_HEADER};

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::config::{Config, RelayConfig};
use crate::error::RelayError;
use crate::llm::{ModelGateway, OllamaGateway};
use crate::relay::Relay;
use crate::session::{HistoryTrimmer, SessionStore};

/// Shared server state.
pub struct AppState {
    pub relay: Arc<Relay>,
    pub hub: Arc<ChannelHub>,
    /// Cancel a user's generation when their last channel member leaves.
    pub cancel_on_disconnect: bool,
}

impl AppState {
    /// Wire the store, hub and relay together around `gateway`.
    pub fn new(config: &RelayConfig, gateway: Arc<dyn ModelGateway>) -> Self {
        let hub = Arc::new(ChannelHub::new(config.channel_capacity));
        let store = Arc::new(SessionStore::new(
            config.system_preamble.as_str(),
            config.max_sessions,
        ));
        let broadcaster: Arc<dyn Broadcaster> = hub.clone();
        let relay = Arc::new(Relay::new(
            store,
            HistoryTrimmer::new(config.history_pairs),
            gateway,
            broadcaster,
            config.max_concurrent_generations,
        ));

        Self {
            relay,
            hub,
            cancel_on_disconnect: config.cancel_on_disconnect,
        }
    }
}

/// Body of `POST /api/conversation`.
#[derive(Debug, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/conversation",
            post(send_message).delete(clear_conversation),
        )
        .route("/ws", get(websocket_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Server Lifecycle ===

/// Start the server and run until ctrl-c.
pub async fn start_server(config: &Config) -> Result<()> {
    let gateway = OllamaGateway::new(&config.upstream).context("Failed to set up model gateway")?;
    let state = Arc::new(AppState::new(&config.relay, Arc::new(gateway)));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %listener.local_addr().context("Listener has no local address")?,
        upstream = %config.upstream.base_url,
        model = %config.upstream.model,
        "Solace relay listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Solace relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// === Handlers ===

async fn send_message(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    body: Result<Json<ConversationRequest>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    // A malformed body carries no message, which is the same client error.
    let message = body
        .ok()
        .and_then(|Json(request)| request.message)
        .unwrap_or_default();

    let submission = state.relay.submit(&user_id, &message).await?;
    debug!(user = %user_id, ?submission, "Conversation request acknowledged");
    Ok(Json(json!({ "status": "streaming" })))
}

async fn clear_conversation(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> Json<Value> {
    state.relay.clear(&user_id).await;
    Json(json!({ "status": "cleared" }))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.relay.store().len().await;
    Json(json!({ "status": "ok", "sessions": sessions }))
}

async fn websocket_handler(
    Caller(user_id): Caller,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id))
}

async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let mut subscription = state.hub.subscribe(&user_id);
    let (mut sender, mut receiver) = socket.split();
    info!(user = %user_id, members = state.hub.members(&user_id), "Channel member joined");

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user = %user_id, skipped, "Channel member fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                // The channel is server-to-client; anything else is ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    drop(subscription);
    let remaining = state.hub.members(&user_id);
    info!(user = %user_id, remaining, "Channel member left");

    if remaining == 0 && state.cancel_on_disconnect && state.relay.cancel_inflight(&user_id).await {
        info!(user = %user_id, "Last member left mid-reply, generation cancelled");
    }
}
