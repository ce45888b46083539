use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.config.agent.model,
        "storage_root": state.config.storage.root,
    }))
}
