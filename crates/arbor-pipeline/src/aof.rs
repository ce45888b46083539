//! Active-object focus scoping for the current turn.
//!
//! Focus is ephemeral. The decision table:
//!   drop  — explicit topic break, a different file named, or a fresh
//!           generic image ask;
//!   keep  — trivial acks, short noun-phrase continuations, and anything
//!           that still reads as being about the object.

use arbor_store::aof::ActiveObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusDecision {
    /// No focus, or focus applies to this turn.
    InScope,
    /// Focus exists but should not be injected this turn.
    OutOfScope,
    /// Focus should be cleared from the store.
    Drop,
}

const TOPIC_BREAKS: &[&str] = &[
    "new topic",
    "different topic",
    "change of topic",
    "change topic",
    "forget the file",
    "never mind the file",
    "moving on",
];

const TRIVIAL_ACKS: &[&str] = &[
    "ok", "okay", "k", "sure", "yes", "yep", "go on", "continue", "tell me more", "and?", "more",
];

const IMAGE_ASKS: &[&str] = &[
    "generate an image",
    "make me an image",
    "create an image",
    "draw me",
    "draw a ",
];

const FILE_EXTENSIONS: &[&str] = &[
    ".pdf", ".xlsx", ".xls", ".csv", ".png", ".jpg", ".jpeg", ".gif", ".txt", ".md", ".docx",
    ".html", ".json",
];

/// Decide whether the active object stays in scope for this turn.
pub fn focus_in_scope(message: &str, aof: Option<&ActiveObject>) -> FocusDecision {
    let Some(aof) = aof else {
        return FocusDecision::OutOfScope;
    };
    let lower = message.trim().to_lowercase();

    if TOPIC_BREAKS.iter().any(|t| lower.starts_with(t) || lower == *t) {
        return FocusDecision::Drop;
    }

    // Naming a different file moves focus; the resolver sets the new object.
    if let Some(named) = first_file_token(&lower) {
        let current = aof.orig_name.to_lowercase();
        if !current.is_empty() && named != current {
            return FocusDecision::Drop;
        }
        return FocusDecision::InScope;
    }

    if aof.is_image() && IMAGE_ASKS.iter().any(|t| lower.contains(t)) {
        return FocusDecision::Drop;
    }

    if TRIVIAL_ACKS.iter().any(|a| lower == *a) {
        return FocusDecision::InScope;
    }

    // Short noun-phrase continuations ("the east wall", "what about the roof")
    // stay on the object.
    if lower.len() <= 60 {
        return FocusDecision::InScope;
    }

    FocusDecision::InScope
}

/// Whether the turn refers to the focused image (needs image semantics).
pub fn image_referential(message: &str, aof: Option<&ActiveObject>) -> bool {
    let Some(aof) = aof else {
        return false;
    };
    if !aof.is_image() {
        return false;
    }
    let lower = message.to_lowercase();
    lower.contains("image")
        || lower.contains("picture")
        || lower.contains("photo")
        || lower.contains("what do you see")
        || lower.contains(&aof.orig_name.to_lowercase())
}

/// Extract the first filename-looking token from a message.
fn first_file_token(lower: &str) -> Option<String> {
    for token in lower.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '_' && c != '-');
        if FILE_EXTENSIONS.iter().any(|ext| token.ends_with(ext)) {
            return Some(token.to_string());
        }
    }
    None
}
