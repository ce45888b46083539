//! Project bootstrap and the expert frame lock.
//!
//! Bootstrap walks needs_goal → goal_proposed → active. The first
//! substantive message (not a command, not a greeting, 10–420 chars)
//! auto-adopts as the goal. The expert frame walks "" → proposed → active
//! via a deterministic keyword library, an explicit "expert frame: X"
//! directive, or a yes/no confirmation of a pending proposal.

use arbor_store::state::{BootstrapStatus, ExpertFrame, ProjectState};

use arbor_core::paths::now_iso;

/// Goal auto-adoption length bounds.
const GOAL_MIN_LEN: usize = 10;
const GOAL_MAX_LEN: usize = 420;

const GREETINGS: &[&str] = &[
    "hi", "hey", "hello", "yo", "sup", "good morning", "good afternoon", "good evening", "thanks",
    "thank you",
];

/// Deterministic inference library: (keyword, label, directive).
/// First match wins; keep entries specific.
const EXPERT_LIBRARY: &[(&str, &str, &str)] = &[
    (
        "therap",
        "Therapist",
        "Hold a calm, non-judgmental frame. Reflect before advising. One question at a time.",
    ),
    (
        "couple",
        "Couples Counselor",
        "Stay neutral between partners. Surface themes, never attribute quotes.",
    ),
    (
        "remodel",
        "Project Planner",
        "Drive toward concrete next actions, budgets, and sequencing.",
    ),
    (
        "budget",
        "Analyst",
        "Work from the numbers in evidence. Show assumptions explicitly.",
    ),
    (
        "spreadsheet",
        "Analyst",
        "Work from the numbers in evidence. Show assumptions explicitly.",
    ),
    (
        "code",
        "Engineer",
        "Be precise and technical. Prefer worked examples over prose.",
    ),
    (
        "rust",
        "Engineer",
        "Be precise and technical. Prefer worked examples over prose.",
    ),
];

/// Whether this message can seed a goal.
pub fn substantive_for_goal(message: &str) -> bool {
    let trimmed = message.trim();
    if trimmed.len() < GOAL_MIN_LEN || trimmed.len() > GOAL_MAX_LEN {
        return false;
    }
    if trimmed.starts_with('!') || trimmed.starts_with('/') || trimmed.starts_with('[') {
        return false;
    }
    if trimmed.contains('?') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if GREETINGS.iter().any(|g| lower == *g || lower.starts_with(&format!("{g} "))) {
        return false;
    }
    true
}

/// Auto-adopt the goal on a needs_goal project. Returns the adopted text.
/// Mutates `state` only; the caller persists.
pub fn maybe_adopt_goal(state: &mut ProjectState, message: &str) -> Option<String> {
    if state.bootstrap_status != BootstrapStatus::NeedsGoal || !state.goal.trim().is_empty() {
        return None;
    }
    if !substantive_for_goal(message) {
        return None;
    }
    let goal = message.trim().to_string();
    state.goal = goal.clone();
    state.bootstrap_status = BootstrapStatus::Active;
    Some(goal)
}

/// Explicit directive: "expert frame: X" sets the frame active immediately.
pub fn parse_explicit_expert(message: &str) -> Option<String> {
    let lower = message.trim().to_lowercase();
    let rest = lower.strip_prefix("expert frame: ")
        .or_else(|| lower.strip_prefix("expert frame:"))?;
    let label = rest.trim().trim_end_matches('.');
    if label.is_empty() {
        return None;
    }
    // Recover original casing from the message tail; offsets can drift on
    // multi-byte case folds, so the slice is checked.
    let idx = message.to_lowercase().find(label)?;
    message
        .get(idx..idx + label.len())
        .map(|s| s.trim().to_string())
}

/// Infer a frame proposal from a text blob. Deterministic, first match wins.
pub fn infer_expert_frame(blob: &str) -> Option<ExpertFrame> {
    let lower = blob.to_lowercase();
    for (keyword, label, directive) in EXPERT_LIBRARY {
        if lower.contains(keyword) {
            return Some(ExpertFrame {
                status: "proposed".to_string(),
                label: label.to_string(),
                directive: directive.to_string(),
                set_reason: format!("inferred from keyword \"{keyword}\""),
                updated_at: now_iso(),
            });
        }
    }
    None
}

/// Resolve a pending frame proposal against a yes/no answer.
/// Returns true when the state changed.
pub fn resolve_frame_proposal(state: &mut ProjectState, message: &str) -> bool {
    if !state.expert_frame.is_proposed() {
        return false;
    }
    match yes_or_no(message) {
        Some(true) => {
            state.expert_frame.status = "active".to_string();
            state.expert_frame.updated_at = now_iso();
            true
        }
        Some(false) => {
            state.expert_frame = ExpertFrame::default();
            true
        }
        None => false,
    }
}

/// Strict yes/no reading of a short reply.
pub fn yes_or_no(message: &str) -> Option<bool> {
    let lower = message.trim().to_lowercase();
    let lower = lower.trim_end_matches(['.', '!']);
    match lower {
        "yes" | "y" | "yeah" | "yep" | "sure" | "ok" | "okay" => Some(true),
        "no" | "n" | "nope" | "nah" => Some(false),
        _ => None,
    }
}

/// Once real work exists (decisions, deliverables, a working focus), the
/// frame label is suppressed mid-stream: behavior continues, announcements
/// stop.
pub fn suppress_frame_label(
    has_decisions: bool,
    has_deliverables: bool,
    has_focus: bool,
) -> bool {
    has_decisions || has_deliverables || has_focus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_adoption_happy_path() {
        let mut state = ProjectState::default();
        let adopted = maybe_adopt_goal(&mut state, "Remodel the kitchen on a 30k budget");
        assert_eq!(adopted.as_deref(), Some("Remodel the kitchen on a 30k budget"));
        assert_eq!(state.bootstrap_status, BootstrapStatus::Active);
    }

    #[test]
    fn goal_rejects_commands_greetings_questions_and_bounds() {
        let mut state = ProjectState::default();
        assert!(maybe_adopt_goal(&mut state, "!plan").is_none());
        assert!(maybe_adopt_goal(&mut state, "hello there friend").is_none());
        assert!(maybe_adopt_goal(&mut state, "what should we do?").is_none());
        assert!(maybe_adopt_goal(&mut state, "short").is_none());
        let long = "x".repeat(500);
        assert!(maybe_adopt_goal(&mut state, &long).is_none());
        assert_eq!(state.bootstrap_status, BootstrapStatus::NeedsGoal);
    }

    #[test]
    fn goal_not_readopted_once_set() {
        let mut state = ProjectState::default();
        maybe_adopt_goal(&mut state, "Remodel the kitchen on a 30k budget");
        assert!(maybe_adopt_goal(&mut state, "Another perfectly fine goal text").is_none());
    }

    #[test]
    fn explicit_expert_directive() {
        assert_eq!(
            parse_explicit_expert("expert frame: Structural Engineer"),
            Some("Structural Engineer".to_string())
        );
        assert!(parse_explicit_expert("the expert frame is nice").is_none());
    }

    #[test]
    fn inference_first_match_wins() {
        let frame = infer_expert_frame("I need therapy-adjacent support for my couple sessions")
            .unwrap();
        assert_eq!(frame.label, "Therapist");
        assert_eq!(frame.status, "proposed");
        assert!(infer_expert_frame("talk about the weather").is_none());
    }

    #[test]
    fn proposal_resolution() {
        let mut state = ProjectState::default();
        state.expert_frame = infer_expert_frame("help me budget this").unwrap();

        let mut rejected = state.clone();
        assert!(resolve_frame_proposal(&mut rejected, "no"));
        assert_eq!(rejected.expert_frame, ExpertFrame::default());

        assert!(resolve_frame_proposal(&mut state, "yes"));
        assert_eq!(state.expert_frame.status, "active");

        // Non-answers leave the proposal pending.
        let mut pending = ProjectState::default();
        pending.expert_frame = infer_expert_frame("code review").unwrap();
        assert!(!resolve_frame_proposal(&mut pending, "tell me more"));
        assert!(pending.expert_frame.is_proposed());
    }

    #[test]
    fn label_suppression_on_real_work() {
        assert!(!suppress_frame_label(false, false, false));
        assert!(suppress_frame_label(true, false, false));
        assert!(suppress_frame_label(false, true, false));
    }
}
