use crate::state::{StateChange, StateStore};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

#[derive(Clone)]
struct ServerState {
    token: String,
    store: Arc<StateStore>,
}

#[derive(Debug, Deserialize)]
struct SetValue {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WsIntent {
    attribute: String,
    value: Value,
}

pub async fn start(
    addr: SocketAddr,
    token: String,
    store: Arc<StateStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState { token, store });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/state", get(get_state))
        .route("/state/:attribute", post(set_state))
        .route("/device", get(get_device))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn get_state(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.store.snapshot()).into_response()
}

async fn get_device(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.store.device_state()).into_response()
}

async fn set_state(
    State(state): State<Arc<ServerState>>,
    Path(attribute): Path<String>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
    Json(body): Json<SetValue>,
) -> impl IntoResponse {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    tracing::debug!(attribute = %attribute, value = %body.value, "intent over http");
    state.store.request(&attribute, body.value);
    StatusCode::ACCEPTED.into_response()
}

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let store = state.store.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, store))
}

async fn handle_socket(mut socket: WebSocket, store: Arc<StateStore>) {
    // subscribe before the snapshot so nothing falls between the two
    let mut changes = store.subscribe();

    let snapshot = serde_json::json!({ "snapshot": store.snapshot() });
    if socket.send(Message::Text(snapshot.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        if socket.send(Message::Text(change_text(&change))).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ws client lagged behind state changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_client_text(&store, &text),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn change_text(change: &StateChange) -> String {
    serde_json::to_string(change).unwrap_or_default()
}

fn handle_client_text(store: &StateStore, text: &str) {
    match serde_json::from_str::<WsIntent>(text) {
        Ok(intent) => store.request(&intent.attribute, intent.value),
        Err(err) => tracing::debug!(error = %err, "ignoring malformed ws message"),
    }
}

fn is_token_valid(headers: &HeaderMap, query: &HashMap<String, String>, token: &str) -> bool {
    // Authorization header first, "Bearer <token>"
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(provided_token) = auth_str.strip_prefix("Bearer ") {
                return provided_token == token;
            }
        }
    }

    // query parameter for clients that cannot set headers
    query.get("token").map(|t| t == token).unwrap_or(false)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}
