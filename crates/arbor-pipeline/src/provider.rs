use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Narrow contract to the chat model. Implementations must be safe to invoke
/// from any task; the pipeline awaits them off the interactive path.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Send an ordered message list, return the full completion text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort extraction of the first `{...}` JSON object in a completion.
///
/// Strict-JSON classifier calls go through this: models occasionally wrap
/// their object in prose or code fences, so we scan for the first balanced
/// object and parse just that span. Braces inside string literals are
/// handled; anything unparseable returns `None`.
pub fn extract_first_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_object() {
        let v = extract_first_json(r#"{"intent": "recall"}"#).unwrap();
        assert_eq!(v["intent"], "recall");
    }

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let text = "Sure, here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\nHope that helps.";
        let v = extract_first_json(text).unwrap();
        assert_eq!(v["a"]["b"], 1);
    }

    #[test]
    fn handles_braces_inside_strings() {
        let v = extract_first_json(r#"{"text": "a { stray } brace"}"#).unwrap();
        assert_eq!(v["text"], "a { stray } brace");
    }

    #[test]
    fn no_object_returns_none() {
        assert!(extract_first_json("no json here").is_none());
        assert!(extract_first_json("{broken").is_none());
    }
}
