//! The duplex progress channel.
//!
//! One WebSocket per client. Inbound messages are JSON objects with a
//! `type` field: `ping` answers `pong`, `cancel` sets the shared cancel
//! event for an in-flight chat request, and `chat` starts a chat
//! orchestration addressed back to this connection. Outbound pipeline
//! events are routed through the ProgressHub by user id.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::services::chat::orchestrator::ChatRequest;
use crate::services::tools::ToolContext;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Caller identity, injected by the outer auth layer.
    pub user_id: Option<i64>,
    pub org_id: Option<String>,
}

/// GET /api/ws
pub async fn ws_endpoint(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: WsQuery) {
    let connection_id = Uuid::new_v4().to_string();
    let user_id = query.user_id.unwrap_or(0);
    let org_id = query.org_id.unwrap_or_default();

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.hub.connect(&connection_id, Some(user_id), tx);

    // Writer: drain the hub's outbound queue in submission order.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message)).await.is_err() {
                break;
            }
        }
    });

    // Reader: handle client -> server messages until disconnect.
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else { continue };
        let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
        match parsed["type"].as_str() {
            Some("ping") => {
                state.hub.send_to_connection(&connection_id, &json!({"type": "pong"}));
            }
            Some("cancel") => {
                if let Some(request_id) = parsed["request_id"].as_str() {
                    state.hub.cancel_chat(request_id);
                }
            }
            Some("chat") => {
                handle_chat_submit(&state, &connection_id, user_id, &org_id, &parsed);
            }
            Some("context_tree_generate") => {
                handle_tree_submit(&state, &connection_id, user_id, &org_id, &parsed).await;
            }
            _ => {}
        }
    }

    state.hub.disconnect(&connection_id, Some(user_id));
    writer.abort();
}

/// Tree generation can also be submitted over the channel; the run id
/// comes back on this connection and progress fans out by user.
async fn handle_tree_submit(
    state: &Arc<AppState>,
    connection_id: &str,
    user_id: i64,
    org_id: &str,
    parsed: &Value,
) {
    let request = crate::models::SubmitTreeRequest {
        org_id: parsed["org_id"].as_str().unwrap_or(org_id).to_string(),
        base_url: parsed["base_url"].as_str().map(String::from),
        token: parsed["token"].as_str().map(String::from),
        sanitize: parsed["sanitize"].as_bool().unwrap_or(false),
        blueprint: parsed["blueprint"].as_str().map(String::from),
    };
    match state
        .context_engine_service
        .start_tree_generation(user_id, request)
        .await
    {
        Ok(run_id) => state.hub.send_to_connection(
            connection_id,
            &json!({"type": "context_engine_started", "run_id": run_id, "status": "started"}),
        ),
        Err(e) => state.hub.send_to_connection(
            connection_id,
            &json!({"type": "context_engine_failed", "error": e.to_string()}),
        ),
    }
}

fn handle_chat_submit(
    state: &Arc<AppState>,
    connection_id: &str,
    user_id: i64,
    org_id: &str,
    parsed: &Value,
) {
    let Some(message) = parsed["message"].as_str() else {
        state.hub.send_to_connection(
            connection_id,
            &json!({"type": "error", "error": "chat message text is required"}),
        );
        return;
    };

    let request_id = parsed["request_id"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let request = ChatRequest {
        conversation_id: parsed["conversation_id"].as_str().map(String::from),
        request_id: request_id.clone(),
        connection_id: connection_id.to_string(),
        message: message.to_string(),
        provider: parsed["provider"].as_str().map(String::from),
        model: parsed["model"].as_str().map(String::from),
    };
    let ctx = ToolContext {
        user_id,
        org_id: parsed["org_id"].as_str().unwrap_or(org_id).to_string(),
        is_admin: false,
        pool: state.db.clone(),
    };

    // The chat request's cancel event is shared between the ws reader (via
    // `cancel` messages) and the orchestrator's streaming loop.
    let cancel = state.hub.register_chat_cancel(&request_id);
    let chat = Arc::clone(&state.chat_service);
    let hub = Arc::clone(&state.hub);
    let connection = connection_id.to_string();
    let cleanup_request_id = request_id.clone();

    let submitted = state
        .task_registry
        .submit(&format!("chat-{}", request_id), user_id, move |task_cancel| async move {
            // Either cancellation source stops the stream.
            let merged = Arc::clone(&cancel);
            let watcher = Arc::clone(&merged);
            let watched = tokio::spawn(async move {
                task_cancel.cancelled().await;
                watcher.cancel();
            });
            let result = chat.run(ctx, request, merged).await;
            watched.abort();
            hub.clear_chat_cancel(&cleanup_request_id);
            if let Err(e) = &result {
                hub.send_to_connection(
                    &connection,
                    &json!({"type": "error", "request_id": cleanup_request_id, "error": e.to_string()}),
                );
            }
            result
        });

    if let Err(e) = submitted {
        state.hub.send_to_connection(
            connection_id,
            &json!({"type": "error", "request_id": request_id, "error": e.to_string()}),
        );
    }
}
