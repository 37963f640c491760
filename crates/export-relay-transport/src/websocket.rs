//! WebSocket and HTTP endpoints for observers and agents.

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use export_relay_core::{Status, Target};
use futures::{SinkExt, Stream, StreamExt, stream::SplitStream};
use serde::Serialize;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    protocol::ServerMessage,
    relay::{RelayState, error_message, parse_agent_message, parse_client_message},
};

/// Create the relay router.
///
/// Routes:
/// - `GET /ws` - observer WebSocket
/// - `GET /agent/{target}` - agent WebSocket for one target
/// - `GET /status` - snapshot of every known target
/// - `GET /status/{target}` - last-known status of one target
/// - `GET /events` - SSE feed of status transitions
#[must_use]
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/agent/{target}", get(agent_handler))
        .route("/status", get(snapshot_handler))
        .route("/status/{target}", get(status_handler))
        .route("/events", get(events_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Body of the status endpoints.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub target: Target,
    pub status: Option<Status>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_observer_socket(socket, state))
}

async fn agent_handler(
    ws: WebSocketUpgrade,
    Path(target): Path<String>,
    State(state): State<RelayState>,
) -> Response {
    let target = Target::new(target);
    if target.is_empty() {
        return (StatusCode::BAD_REQUEST, "Target ID is required").into_response();
    }
    ws.on_upgrade(|socket| handle_agent_socket(socket, target, state))
}

async fn status_handler(Path(target): Path<String>, State(state): State<RelayState>) -> Response {
    let target = Target::new(target);
    match state.coordinator.last_status(&target) {
        Ok(status) => Json(StatusResponse { target, status }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn snapshot_handler(State(state): State<RelayState>) -> Response {
    match state.coordinator.snapshot() {
        Ok(entries) => Json(
            entries
                .into_iter()
                .map(|(target, status)| StatusResponse {
                    target,
                    status: Some(status),
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn events_handler(
    State(state): State<RelayState>,
) -> Sse<impl Stream<Item = Result<Event, std::io::Error>>> {
    Sse::new(state.coordinator.feed().sse_stream()).keep_alive(KeepAlive::default())
}

/// Forward text frames from `receiver` to `on_text` until the peer goes away.
async fn read_text_frames<F>(mut receiver: SplitStream<WebSocket>, mut on_text: F)
where
    F: FnMut(&str),
{
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => on_text(text.as_str()),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(s) => on_text(s),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        }
    }
}

/// Spawn a task that serializes messages from `rx` onto the socket.
fn spawn_sender<T>(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<T>,
) -> tokio::task::JoinHandle<()>
where
    T: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_observer_socket(socket: WebSocket, state: RelayState) {
    let (sender, receiver) = socket.split();
    let (observer, rx) = state.observers.connect();
    tracing::info!(%observer, "Observer connected");

    let send_task = spawn_sender::<ServerMessage>(sender, rx);

    read_text_frames(receiver, |text| {
        let reply = match parse_client_message(text) {
            Ok(msg) => state.handle_client_message(&observer, msg),
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                Some(error_message(&e))
            }
        };
        if let Some(reply) = reply {
            let _ = state.observers.send_message(&observer, reply);
        }
    })
    .await;

    state.observers.disconnect(&observer);
    send_task.abort();
    tracing::info!(%observer, "Observer disconnected");
}

async fn handle_agent_socket(socket: WebSocket, target: Target, state: RelayState) {
    let (sender, receiver) = socket.split();
    let conn = state.agents.connect(target.clone());
    let tx = conn.sender();
    tracing::info!(target_id = %target, "Agent connected");

    let send_task = spawn_sender(sender, conn.rx);

    read_text_frames(receiver, |text| match parse_agent_message(text) {
        Ok(msg) => {
            if let Some(reply) = state.handle_agent_message(&target, msg) {
                let _ = tx.send(reply);
            }
        }
        Err(e) => tracing::warn!(target_id = %target, "Invalid agent message: {e}"),
    })
    .await;

    state.agents.disconnect(&target, &tx);
    send_task.abort();
    tracing::info!(target_id = %target, "Agent disconnected");
}
