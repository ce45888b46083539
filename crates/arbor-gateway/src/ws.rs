//! WebSocket chat endpoint.
//!
//! One connection = one user/project conversation. Transport stays thin: the
//! handler keeps the bounded in-memory history and delegates every text
//! frame to the turn pipeline.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{info, warn};

use arbor_pipeline::provider::ChatMessage;
use arbor_pipeline::{run_chat_turn, TurnRequest};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub project: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(mut socket: WebSocket, params: WsParams, state: Arc<AppState>) {
    let user = if params.user.is_empty() {
        "default".to_string()
    } else {
        params.user
    };
    let project = if params.project.is_empty() {
        "default".to_string()
    } else {
        params.project
    };
    info!(%user, %project, "ws chat session opened");

    let max_history = state.config.limits.max_history_pairs * 2;
    let mut history: Vec<ChatMessage> = Vec::new();

    while let Some(Ok(frame)) = socket.recv().await {
        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        if text.trim().is_empty() {
            continue;
        }

        let request = TurnRequest {
            user: user.clone(),
            project: project.clone(),
            message: text.clone(),
            history: history.clone(),
            search_evidence: None,
        };

        let reply = match run_chat_turn(state.as_ref(), &request).await {
            Ok(outcome) => outcome.reply,
            Err(e) => {
                warn!(error = %e, "turn failed");
                "Something went wrong on my end; your project state is safe. Try that again."
                    .to_string()
            }
        };

        history.push(ChatMessage::user(&text));
        history.push(ChatMessage::assistant(&reply));
        while history.len() > max_history {
            history.remove(0);
        }

        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
    info!(%user, %project, "ws chat session closed");
}
