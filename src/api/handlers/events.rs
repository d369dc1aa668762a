use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::broadcast::LiveEvent;
use crate::db::event_repo;
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, serde::Serialize)]
pub struct EventsResponse {
    pub items: Vec<LiveEvent>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    let records = event_repo::recent_events(&state.db, query.limit.clamp(1, 500)).await?;
    let items = records.iter().map(LiveEvent::from_record).collect();
    Ok(Json(EventsResponse { items }))
}

pub async fn live(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    recent(State(state), Query(query)).await
}

/// WebSocket live stream: newline-delimited LiveEvent frames from connect
/// time on. History is served by the store queries, never replayed here.
pub async fn ws_live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("Live events WebSocket client connected");
    let mut rx = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(format!("{json}\n"))).await.is_err() {
                            break;
                        }
                    }
                    // Sender side dropped us (overflow) or shut down.
                    None => break,
                }
            }
            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {} // ignore client text/binary
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::info!("Live events WebSocket client disconnected");
}
