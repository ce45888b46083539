use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use arbor_pipeline::provider::{ChatMessage, ChatRole, ModelCaller, ModelError};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic-backed model adapter. System messages are folded into the
/// `system` parameter; the rest map straight onto the messages array.
pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl ModelCaller for AnthropicModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::Unavailable("no api key configured".into()));
        }

        let mut system_parts: Vec<&str> = Vec::new();
        let mut chat: Vec<serde_json::Value> = Vec::new();
        for m in messages {
            match m.role {
                ChatRole::System => system_parts.push(&m.content),
                ChatRole::User => chat.push(serde_json::json!({
                    "role": "user", "content": m.content
                })),
                ChatRole::Assistant => chat.push(serde_json::json!({
                    "role": "assistant", "content": m.content
                })),
            }
        }
        // The API requires at least one user turn.
        if chat.is_empty() {
            chat.push(serde_json::json!({"role": "user", "content": ""}));
        }

        let body = serde_json::json!({
            "model": self.model,
            "system": system_parts.join("\n\n"),
            "messages": chat,
            "max_tokens": MAX_TOKENS,
        });
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ModelError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}
