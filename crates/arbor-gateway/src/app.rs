use std::sync::Arc;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};

use arbor_core::config::{ArborConfig, LimitsConfig};
use arbor_pipeline::provider::ModelCaller;
use arbor_pipeline::TurnContext;
use arbor_store::ProjectStore;

use crate::anthropic::AnthropicModel;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ArborConfig,
    pub store: ProjectStore,
    pub model: AnthropicModel,
}

impl AppState {
    pub fn new(config: ArborConfig) -> anyhow::Result<Self> {
        let store = ProjectStore::open(&config.storage.root)?;
        let model = AnthropicModel::new(
            config.agent.api_key.clone(),
            config.agent.base_url.clone(),
            config.agent.model.clone(),
        );
        Ok(Self {
            config,
            store,
            model,
        })
    }
}

impl TurnContext for AppState {
    fn model(&self) -> &dyn ModelCaller {
        &self.model
    }

    fn store(&self) -> &ProjectStore {
        &self.store
    }

    fn limits(&self) -> &LimitsConfig {
        &self.config.limits
    }

    fn default_timezone(&self) -> &str {
        &self.config.time.default_timezone
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Assemble the Axum router: health + WS chat.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::health::health_handler))
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
