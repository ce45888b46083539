//! Context commitment gates: CCG, CKCL, and CKSG.
//!
//! All three are deterministic over the conversation tail and the current
//! message — structural triggers (token scoring, length bounds), no model
//! calls. They exist to stop scope-resetting questions and refusal-shaped
//! answers once the user has committed to a concrete domain/target/goal.

use crate::provider::{ChatMessage, ChatRole};

/// Tokens that mark a crowd-knowledge ask (builds, metas, configs).
const CROWD_TOKENS: &[&str] = &[
    "best", "optimal", "meta", "tier", "build", "loadout", "config", "settings",
];

/// Tokens that mark the committed goal as optimization.
const OPTIMIZATION_TOKENS: &[&str] = &["best", "optimal", "optimize", "improve", "fastest", "max"];

/// Stall phrases that trigger one bounded CKSG regeneration.
/// Conservative allow-list; extend only by editing this table.
const STALL_MARKERS: &[&str] = &[
    "can't verify",
    "cannot verify",
    "without telemetry",
    "no reliable data",
    "i can't responsibly",
    "can't responsibly claim",
];

/// Refusal-shaped opening markers (checked against the first paragraph).
const REFUSAL_OPENERS: &[&str] = &[
    "i can't",
    "i cannot",
    "i won't",
    "i'm unable",
    "i am unable",
    "unfortunately",
    "i don't have access",
    "i lack access",
];

/// Committed context extracted from the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commitment {
    pub domain: String,
    pub target: String,
    pub goal: String,
}

impl Commitment {
    /// Committed when the goal is optimization and a domain or target exists.
    pub fn is_committed(&self) -> bool {
        self.goal == "optimization" && (!self.domain.is_empty() || !self.target.is_empty())
    }
}

/// Extract the committed `{domain, target, goal}` from the recent user
/// messages plus the current one.
pub fn extract_commitment(history_tail: &[ChatMessage], message: &str) -> Commitment {
    let mut commitment = Commitment::default();

    let user_texts: Vec<&str> = history_tail
        .iter()
        .filter(|m| matches!(m.role, ChatRole::User))
        .map(|m| m.content.as_str())
        .chain(std::iter::once(message))
        .collect();

    for text in &user_texts {
        let lower = text.to_lowercase();
        for prefix in ["i'm playing ", "i am playing ", "i'm working on ", "i am working on "] {
            if let Some(rest) = lower.find(prefix).map(|i| &lower[i + prefix.len()..]) {
                let domain = first_phrase(rest);
                if !domain.is_empty() {
                    commitment.domain = domain;
                }
            }
        }
        for prefix in ["for the ", "for my "] {
            if let Some(rest) = lower.find(prefix).map(|i| &lower[i + prefix.len()..]) {
                let target = first_phrase(rest);
                if !target.is_empty() {
                    commitment.target = target;
                }
            }
        }
    }

    let current = message.to_lowercase();
    if OPTIMIZATION_TOKENS
        .iter()
        .any(|t| contains_token(&current, t))
    {
        commitment.goal = "optimization".to_string();
    }

    commitment
}

/// First few words up to sentence punctuation, capped for sanity.
fn first_phrase(rest: &str) -> String {
    let cut = rest
        .find(['.', ',', '!', '?', '\n'])
        .unwrap_or(rest.len())
        .min(60);
    rest[..cut].trim().to_string()
}

/// Crowd-knowledge token score over the current message.
pub fn crowd_knowledge_score(message: &str) -> usize {
    let lower = message.to_lowercase();
    CROWD_TOKENS
        .iter()
        .filter(|t| contains_token(&lower, t))
        .count()
}

fn contains_token(haystack: &str, token: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == token)
}

/// CCG system note for committed turns: answer first, one refinement question.
pub fn ccg_note(commitment: &Commitment) -> String {
    format!(
        "CONTEXT_COMMITMENT: The user has committed to domain=\"{}\" target=\"{}\" goal=\"{}\".\n\
         Do not ask scope-resetting questions (which game / which context / what are you trying to do).\n\
         Give your best-effort answer FIRST, then at most one refinement question.",
        commitment.domain, commitment.target, commitment.goal
    )
}

/// CKCL hard lock: forbids refusal-shaped openings on crowd-knowledge turns.
pub fn ckcl_note() -> &'static str {
    "CROWD_KNOWLEDGE_LOCK (HARD): This is a crowd-knowledge question in a committed context.\n\
     Open with the 1-2 sentence community consensus. Never open with a refusal, a disclaimer,\n\
     or a claim that you cannot verify. State the consensus, then caveats if needed, then at\n\
     most one refinement question."
}

/// CKSG enforcement note for the single bounded regeneration.
pub fn cksg_enforcement_note() -> &'static str {
    "CONSENSUS_ENFORCEMENT: Your previous draft stalled instead of answering.\n\
     Regenerate: begin with the 1-2 sentence widely-held consensus answer,\n\
     then add a single refinement question. Do not mention verification limits."
}

/// Post-filter: strip a refusal-shaped first paragraph when more content
/// follows it. Returns the text unchanged when nothing matches.
pub fn strip_refusal_preamble(text: &str) -> String {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() < 2 {
        return text.to_string();
    }
    let first = paragraphs[0].trim().to_lowercase();
    if REFUSAL_OPENERS.iter().any(|m| first.starts_with(m)) {
        return paragraphs[1..].join("\n\n").trim().to_string();
    }
    text.to_string()
}

/// True when a draft reads as a stall instead of a consensus answer.
pub fn has_stall_markers(text: &str) -> bool {
    let lower = text.to_lowercase();
    STALL_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_from_history_and_message() {
        let history = vec![
            ChatMessage::user("I'm playing Diablo IV"),
            ChatMessage::assistant("Noted."),
        ];
        let c = extract_commitment(&history, "What's the best build for the Spiritborn?");
        assert_eq!(c.domain, "diablo iv");
        assert_eq!(c.target, "spiritborn");
        assert_eq!(c.goal, "optimization");
        assert!(c.is_committed());
    }

    #[test]
    fn no_optimization_goal_means_uncommitted() {
        let history = vec![ChatMessage::user("I'm playing Diablo IV")];
        let c = extract_commitment(&history, "tell me the lore of the game");
        assert!(!c.is_committed());
    }

    #[test]
    fn crowd_score_counts_distinct_tokens() {
        assert_eq!(crowd_knowledge_score("What's the best build?"), 2);
        assert_eq!(crowd_knowledge_score("what are the optimal settings"), 2);
        assert_eq!(crowd_knowledge_score("tell me about the story"), 0);
        // Token match, not substring: "bestow" doesn't count.
        assert_eq!(crowd_knowledge_score("bestow a gift"), 0);
    }

    #[test]
    fn refusal_preamble_is_stripped_when_body_follows() {
        let draft = "I can't responsibly claim a single best build.\n\nThat said, most players run the Eagle path with storm skills.";
        let out = strip_refusal_preamble(draft);
        assert!(out.starts_with("That said"));

        // A refusal with no following content stays (safety gate handles it).
        let lone = "I can't verify that.";
        assert_eq!(strip_refusal_preamble(lone), lone);

        // Normal answers pass through untouched.
        let fine = "The consensus build is Eagle storm.\n\nWant the gear list?";
        assert_eq!(strip_refusal_preamble(fine), fine);
    }

    #[test]
    fn stall_detection_uses_the_allow_list() {
        assert!(has_stall_markers("I can't verify the current meta without telemetry."));
        assert!(has_stall_markers("I can't responsibly claim this is best."));
        assert!(!has_stall_markers("The consensus is the Eagle build."));
    }
}
