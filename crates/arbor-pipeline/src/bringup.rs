//! Couples-mode bring-up mediation.
//!
//! Detection is conservative (explicit ask verbs only). A detected request
//! becomes a pending draft; the next yes/no turn resolves it. Queued entries
//! are pronoun-neutralized so the partner sees a theme, not a quote, and
//! session-start injection renders at most five themes with no attribution.

use arbor_store::bringup::BringupRequest;
use arbor_store::state::BringupDraft;

use arbor_core::paths::now_iso;

/// Max themes surfaced at session start.
pub const MAX_SESSION_BRINGUPS: usize = 5;

/// Couples mode keys off the account prefix.
pub fn couples_mode(user: &str) -> bool {
    user.to_lowercase().starts_with("couple_")
}

const REQUEST_PREFIXES: &[&str] = &[
    "i want to bring up ",
    "i'd like to bring up ",
    "i would like to bring up ",
    "can you bring up ",
    "please bring up ",
];

const PARTNER_TAILS: &[&str] = &[
    " with my partner",
    " with him",
    " with her",
    " with them",
    " next session",
];

/// Conservative NL detector. Returns the topic when the message is an
/// explicit bring-up request.
pub fn detect_bringup_request(message: &str) -> Option<String> {
    let lower = message.trim().to_lowercase();
    for prefix in REQUEST_PREFIXES {
        let Some(rest) = lower.strip_prefix(prefix) else {
            continue;
        };
        let mut topic = rest.trim_end_matches(['.', '!', '?']).trim();
        for tail in PARTNER_TAILS {
            if let Some(stripped) = topic.strip_suffix(tail) {
                topic = stripped.trim();
            }
        }
        if !topic.is_empty() && topic.len() <= 200 {
            return Some(topic.to_string());
        }
    }
    None
}

/// Build the pending draft plus the yes/no confirmation question.
pub fn draft_for_topic(topic: &str) -> (BringupDraft, String) {
    let draft = BringupDraft {
        pending: true,
        synopsis: format!("wants to bring up: {topic}"),
        topic: topic.to_string(),
        tone: "gentle".to_string(),
        boundaries: String::new(),
        urgency: String::new(),
        created_at: now_iso(),
    };
    let question = format!(
        "Queue this for your partner as a theme \u{2014} \"{topic}\"? (yes/no)"
    );
    (draft, question)
}

/// Bounded first/second-person → neutral substitutions.
///
/// Word-level, lowercase matching; punctuation on the token is preserved.
/// Deliberately small: neutralization must never invent content.
const PRONOUN_SUBS: &[(&str, &str)] = &[
    ("i", "one partner"),
    ("i'm", "one partner is"),
    ("i've", "one partner has"),
    ("me", "them"),
    ("my", "their"),
    ("mine", "theirs"),
    ("you", "one partner"),
    ("your", "their"),
    ("yours", "theirs"),
    ("she", "one partner"),
    ("he", "one partner"),
    ("her", "their"),
    ("his", "their"),
];

/// Rewrite a text to neutral phrasing.
pub fn neutralize_pronouns(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            let stripped: String = token
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '\'')
                .collect();
            let trailing: String = token
                .chars()
                .rev()
                .take_while(|c| !c.is_ascii_alphanumeric() && *c != '\'')
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let lower = stripped.to_lowercase();
            match PRONOUN_SUBS.iter().find(|(from, _)| *from == lower) {
                Some((_, to)) => format!("{to}{trailing}"),
                None => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the session-start themes block (no attribution, capped).
pub fn render_session_bringups(pending: &[BringupRequest]) -> String {
    if pending.is_empty() {
        return String::new();
    }
    let mut lines = vec![
        "PENDING_BRINGUPS: Themes one partner asked to surface (present gently, no attribution):"
            .to_string(),
    ];
    for entry in pending.iter().take(MAX_SESSION_BRINGUPS) {
        lines.push(format!("- {}", neutralize_pronouns(&entry.topic)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_requires_couple_prefix() {
        assert!(couples_mode("couple_ann"));
        assert!(!couples_mode("Frank"));
    }

    #[test]
    fn detector_is_conservative() {
        assert_eq!(
            detect_bringup_request("I want to bring up the holiday plans with my partner."),
            Some("the holiday plans".to_string())
        );
        assert_eq!(
            detect_bringup_request("Please bring up chores next session"),
            Some("chores".to_string())
        );
        // Mentions of the phrase mid-sentence don't trigger.
        assert!(detect_bringup_request("We never bring up money calmly").is_none());
        assert!(detect_bringup_request("What should I bring?").is_none());
    }

    #[test]
    fn draft_is_pending_with_yes_no_question() {
        let (draft, question) = draft_for_topic("the holiday plans");
        assert!(draft.pending);
        assert_eq!(draft.topic, "the holiday plans");
        assert!(question.contains("(yes/no)"));
    }

    #[test]
    fn pronouns_are_neutralized() {
        let out = neutralize_pronouns("I feel ignored when you cancel on me.");
        let lower = out.to_lowercase();
        assert!(!lower.split_whitespace().any(|w| w == "i" || w == "you"));
        assert!(lower.contains("one partner"));
        assert!(lower.contains("them."));
    }

    #[test]
    fn session_block_caps_and_strips_attribution() {
        let entries: Vec<BringupRequest> = (0..7)
            .map(|i| BringupRequest {
                id: format!("b{i}"),
                from_user: "couple_ann".into(),
                to_user: "couple_ben".into(),
                topic: format!("topic {i}"),
                tone: String::new(),
                boundaries: String::new(),
                urgency: String::new(),
                context_summary: String::new(),
                status: "pending".into(),
                created_at: String::new(),
            })
            .collect();
        let block = render_session_bringups(&entries);
        assert_eq!(block.matches("- ").count(), MAX_SESSION_BRINGUPS);
        assert!(!block.contains("couple_ann"));
    }
}
