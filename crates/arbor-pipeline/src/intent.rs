//! Intent and continuity classification.
//!
//! Both classifiers are single strict-JSON model calls with deterministic
//! post-corrections. Model failures never fail the turn: the fallback
//! heuristics below produce a usable result from the message alone.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{extract_first_json, ChatMessage, ModelCaller};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Recall,
    Status,
    Plan,
    Execute,
    Lookup,
    Misc,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recall => "recall",
            Self::Status => "status",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Lookup => "lookup",
            Self::Misc => "misc",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "recall" => Some(Self::Recall),
            "status" => Some(Self::Status),
            "plan" => Some(Self::Plan),
            "execute" => Some(Self::Execute),
            "lookup" => Some(Self::Lookup),
            "misc" => Some(Self::Misc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    #[serde(default)]
    pub entities: Vec<String>,
    /// Always coerced to `current_project`.
    pub scope: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuity {
    SameTopic,
    NewTopic,
    Unclear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityResult {
    pub continuity: Continuity,
    pub followup_only: bool,
    #[serde(default)]
    pub topic: String,
}

const INTENT_SYSTEM_PROMPT: &str = "\
You are an intent classifier. Output ONLY a JSON object, no prose:\n\
{\"intent\": \"recall|status|plan|execute|lookup|misc\", \"entities\": [\"...\"], \"scope\": \"current_project\"}\n\
- recall: the user asks what is already known/stored about them or the project.\n\
- status: the user asks where the project stands.\n\
- plan: the user asks to plan or sequence work.\n\
- execute: the user asks to produce or change something now.\n\
- lookup: the user asks about the outside world (needs evidence).\n\
- misc: everything else, including greetings.";

const CONTINUITY_SYSTEM_PROMPT: &str = "\
You are a continuity classifier. Output ONLY a JSON object, no prose:\n\
{\"continuity\": \"same_topic|new_topic|unclear\", \"followup_only\": true, \"topic\": \"...\"}\n\
followup_only is true when the latest message depends on prior context to make sense.";

/// Classify the intent of a user message, with deterministic corrections.
pub async fn classify_intent(
    model: &dyn ModelCaller,
    message: &str,
    history_tail: &[ChatMessage],
) -> IntentResult {
    let mut messages = vec![ChatMessage::system(INTENT_SYSTEM_PROMPT)];
    for m in history_tail.iter().rev().take(4).rev() {
        messages.push(m.clone());
    }
    messages.push(ChatMessage::user(message));

    let parsed = match model.complete(&messages).await {
        Ok(text) => extract_first_json(&text),
        Err(e) => {
            debug!(error = %e, "intent classifier model call failed; using heuristic");
            None
        }
    };

    let raw = match parsed {
        Some(value) => {
            let intent = value
                .get("intent")
                .and_then(|v| v.as_str())
                .and_then(Intent::parse)
                .unwrap_or_else(|| heuristic_intent(message));
            let entities = value
                .get("entities")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|e| e.as_str().map(|s| s.to_string()))
                        .take(8)
                        .collect()
                })
                .unwrap_or_default();
            IntentResult {
                intent,
                entities,
                scope: String::new(),
            }
        }
        None => IntentResult {
            intent: heuristic_intent(message),
            entities: Vec::new(),
            scope: String::new(),
        },
    };

    correct_intent(raw, message)
}

/// Deterministic post-corrections; also coerces scope.
pub fn correct_intent(mut result: IntentResult, message: &str) -> IntentResult {
    result.scope = "current_project".to_string();

    // A concrete file reference makes "recall" the wrong frame: the user is
    // talking about an artifact, not stored memory.
    if result.intent == Intent::Recall && mentions_file(message) {
        result.intent = Intent::Misc;
    }

    if is_short_greeting(message) {
        result.intent = Intent::Misc;
    }

    result
}

/// Fallback classifier used when the model output is unusable.
pub fn heuristic_intent(message: &str) -> Intent {
    let lower = message.trim().to_lowercase();
    if is_short_greeting(message) {
        return Intent::Misc;
    }
    if recall_shaped(&lower) {
        return Intent::Recall;
    }
    if lower == "status"
        || lower.starts_with("where are we")
        || lower.contains("project status")
        || lower.contains("where do we stand")
    {
        return Intent::Status;
    }
    if lower.starts_with("plan ") || lower.starts_with("let's plan") || lower.contains("make a plan")
    {
        return Intent::Plan;
    }
    if lower.starts_with("look up")
        || lower.starts_with("search ")
        || lower.starts_with("what's the latest")
        || lower.starts_with("has ")
        || lower.starts_with("did ")
    {
        return Intent::Lookup;
    }
    if lower.starts_with("write ")
        || lower.starts_with("generate ")
        || lower.starts_with("create ")
        || lower.starts_with("build ")
    {
        return Intent::Execute;
    }
    Intent::Misc
}

/// Recall-shaped queries also force a distill pass before answering.
pub fn recall_shaped(lower: &str) -> bool {
    lower.starts_with("what's my")
        || lower.starts_with("what is my")
        || lower.starts_with("where do i")
        || lower.starts_with("who is my")
        || lower.starts_with("do you remember")
        || lower.starts_with("what do you know about me")
        || lower.starts_with("what did i say about")
}

const FILE_EXTENSIONS: &[&str] = &[
    ".pdf", ".xlsx", ".xls", ".csv", ".png", ".jpg", ".jpeg", ".gif", ".txt", ".md", ".docx",
    ".html", ".json",
];

fn mentions_file(message: &str) -> bool {
    let lower = message.to_lowercase();
    FILE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

const GREETINGS: &[&str] = &[
    "hi", "hey", "hello", "yo", "sup", "good morning", "good afternoon", "good evening",
];

fn is_short_greeting(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    let lower = lower.trim_end_matches(['!', '.', ',']);
    lower.len() <= 20 && GREETINGS.iter().any(|g| lower == *g || lower.starts_with(&format!("{g} ")))
}

/// Classify continuity of the latest message against the conversation tail.
pub async fn classify_continuity(
    model: &dyn ModelCaller,
    message: &str,
    history_tail: &[ChatMessage],
) -> ContinuityResult {
    let mut messages = vec![ChatMessage::system(CONTINUITY_SYSTEM_PROMPT)];
    for m in history_tail.iter().rev().take(6).rev() {
        messages.push(m.clone());
    }
    messages.push(ChatMessage::user(message));

    let parsed = match model.complete(&messages).await {
        Ok(text) => extract_first_json(&text),
        Err(_) => None,
    };

    match parsed {
        Some(value) => {
            let continuity = match value.get("continuity").and_then(|v| v.as_str()) {
                Some("new_topic") => Continuity::NewTopic,
                Some("unclear") => Continuity::Unclear,
                _ => Continuity::SameTopic,
            };
            ContinuityResult {
                continuity,
                followup_only: value
                    .get("followup_only")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                topic: value
                    .get("topic")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            }
        }
        // Dependent-by-default: a dangling message is treated as a follow-up.
        None => ContinuityResult {
            continuity: Continuity::SameTopic,
            followup_only: true,
            topic: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(intent: Intent) -> IntentResult {
        IntentResult {
            intent,
            entities: Vec::new(),
            scope: "everywhere".into(),
        }
    }

    #[test]
    fn scope_is_always_coerced() {
        let r = correct_intent(result(Intent::Plan), "plan the week");
        assert_eq!(r.scope, "current_project");
    }

    #[test]
    fn file_reference_demotes_recall() {
        let r = correct_intent(result(Intent::Recall), "what did budget.xlsx say?");
        assert_eq!(r.intent, Intent::Misc);

        let r = correct_intent(result(Intent::Recall), "what's my preferred name?");
        assert_eq!(r.intent, Intent::Recall);
    }

    #[test]
    fn greetings_are_forced_to_misc() {
        let r = correct_intent(result(Intent::Recall), "hey");
        assert_eq!(r.intent, Intent::Misc);
        let r = correct_intent(result(Intent::Plan), "good morning!");
        assert_eq!(r.intent, Intent::Misc);
        // Longer sentences that happen to start with a greeting word are kept.
        let r = correct_intent(
            result(Intent::Plan),
            "hello, can we plan the cabinet install for next week",
        );
        assert_eq!(r.intent, Intent::Plan);
    }

    #[test]
    fn heuristic_covers_the_shapes() {
        assert_eq!(heuristic_intent("What's my preferred name?"), Intent::Recall);
        assert_eq!(heuristic_intent("where are we on this?"), Intent::Status);
        assert_eq!(heuristic_intent("Has Apple confirmed the deal?"), Intent::Lookup);
        assert_eq!(heuristic_intent("generate the summary doc"), Intent::Execute);
        assert_eq!(heuristic_intent("hmm interesting"), Intent::Misc);
    }

    #[test]
    fn recall_shape_detector() {
        assert!(recall_shaped("what's my favorite color?"));
        assert!(recall_shaped("do you remember what i said about logan"));
        assert!(!recall_shaped("let's talk about colors"));
    }
}
