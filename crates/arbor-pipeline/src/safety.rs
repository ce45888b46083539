//! Post-generation safety gate.
//!
//! Rejects model output that violates the grounding contracts and replaces
//! it with a deterministic fallback or a neutral rewrite. Fires after CKCL
//! cleanup and before constraint validation.

use tracing::warn;

use crate::bringup::neutralize_pronouns;
use crate::intent::Intent;
use crate::retrieval::CanonicalSnippets;

/// Attribution shapes forbidden whenever partner context was injected.
const ATTRIBUTION_PHRASES: &[&str] = &[
    "she said",
    "he said",
    "they said",
    "your partner said",
    "your partner told me",
    "from your partner's notes",
    "according to your partner",
];

/// Affirmative-claim markers that require evidence behind them.
const NO_EVIDENCE_AFFIRMATIVES: &[&str] = &[
    "it is confirmed",
    "it's confirmed",
    "has been confirmed",
    "officially announced",
    "they announced",
];

pub const FALLBACK_NOT_RECORDED: &str = "Not recorded / ambiguous.";

#[derive(Debug, Clone, Default)]
pub struct SafetyVerdict {
    /// Audit labels for everything that fired.
    pub reasons: Vec<String>,
    /// Deterministic replacement text, when the draft cannot ship.
    pub replacement: Option<String>,
}

impl SafetyVerdict {
    pub fn clean(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Run every check against a draft. Returns the verdict; callers apply the
/// replacement when present.
pub fn check_draft(
    intent: Intent,
    draft: &str,
    snippets: &CanonicalSnippets,
    couples_turn: bool,
) -> SafetyVerdict {
    let mut verdict = SafetyVerdict::default();
    let lower = draft.to_lowercase();

    // Status is deterministic; a model draft on a status turn never ships.
    if intent == Intent::Status {
        verdict.reasons.push("model_authored_status".to_string());
    }

    // Recall must ground in retrieved terms.
    if intent == Intent::Recall && !recall_grounded(&lower, snippets) {
        verdict.reasons.push("ungrounded_recall".to_string());
        verdict.replacement = Some(fallback_reply(snippets));
    }

    // Pulse tokens can only come from a truth-bound snippet.
    if lower.contains("project pulse") && !snippets.pulse_truth_bound {
        verdict.reasons.push("invented_pulse".to_string());
        verdict.replacement = Some(fallback_reply(snippets));
    }

    // Couples privacy: no attribution when partner context is in play.
    if couples_turn && snippets.partner_context_injected {
        if ATTRIBUTION_PHRASES.iter().any(|p| lower.contains(p)) {
            verdict.reasons.push("couples_attribution".to_string());
            verdict.replacement = Some(neutral_partner_reply(snippets));
        }
    }

    // Affirmative claims need evidence behind them.
    if !snippets.evidence_present
        && NO_EVIDENCE_AFFIRMATIVES.iter().any(|m| lower.contains(m))
    {
        verdict.reasons.push("affirmative_without_evidence".to_string());
        verdict.replacement = Some(
            "I don't have evidence for that yet. What source or detail should I check first?"
                .to_string(),
        );
    }

    if !verdict.reasons.is_empty() {
        warn!(reasons = ?verdict.reasons, "safety gate fired");
    }
    verdict
}

/// A recall draft is grounded when it overlaps a retrieved claim, or when it
/// honestly reports nothing is recorded.
fn recall_grounded(lower_draft: &str, snippets: &CanonicalSnippets) -> bool {
    if lower_draft.contains("not recorded") {
        return true;
    }
    snippets.recall_allow_terms.iter().any(|term| {
        // Claim overlap by significant words, not whole-claim substring.
        let words: Vec<&str> = term
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| w.len() >= 4)
            .collect();
        !words.is_empty() && words.iter().any(|w| lower_draft.contains(w))
    })
}

/// Deterministic fallback: cite the focused-object excerpt when one was
/// injected, otherwise the not-recorded line.
pub fn fallback_reply(snippets: &CanonicalSnippets) -> String {
    match &snippets.aof_excerpt {
        Some(excerpt) => {
            let head: String = excerpt.chars().take(280).collect();
            format!(
                "Here's what the file in focus actually says:\n\n{head}\n\nWhat single detail should I pull from it?"
            )
        }
        None => FALLBACK_NOT_RECORDED.to_string(),
    }
}

/// Neutral couples reply: surface a theme, never a quote or an attribution.
fn neutral_partner_reply(snippets: &CanonicalSnippets) -> String {
    let theme = snippets
        .text
        .lines()
        .skip_while(|l| !l.starts_with("PARTNER_CONTEXT"))
        .find(|l| l.trim_start().starts_with('-'))
        .map(|l| l.trim_start_matches(['-', ' ']).to_string())
        .unwrap_or_else(|| "something important to them".to_string());
    format!(
        "There's a theme worth holding gently here: {}. How does that land for you?",
        neutralize_pronouns(&theme)
    )
}

/// Final rewrite pass on couples turns even when no attribution fired:
/// neutralize stray first/second-person references inside theme lines.
pub fn couples_rewrite(draft: &str, partner_context_injected: bool) -> String {
    if !partner_context_injected {
        return draft.to_string();
    }
    let lower = draft.to_lowercase();
    if ATTRIBUTION_PHRASES.iter().any(|p| lower.contains(p)) {
        // Belt and suspenders; check_draft normally replaced this already.
        return neutralize_pronouns(draft);
    }
    draft.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippets_with_terms(terms: &[&str]) -> CanonicalSnippets {
        CanonicalSnippets {
            recall_allow_terms: terms.iter().map(|t| t.to_lowercase()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn status_drafts_always_fire() {
        let v = check_draft(Intent::Status, "We're doing great!", &CanonicalSnippets::default(), false);
        assert!(v.reasons.contains(&"model_authored_status".to_string()));
    }

    #[test]
    fn grounded_recall_passes() {
        let s = snippets_with_terms(&["my preferred name is frank"]);
        let v = check_draft(Intent::Recall, "Your preferred name is Frank.", &s, false);
        assert!(v.clean());
    }

    #[test]
    fn ungrounded_recall_falls_back() {
        let s = snippets_with_terms(&["my preferred name is frank"]);
        let v = check_draft(Intent::Recall, "You told me you love skiing.", &s, false);
        assert!(v.reasons.contains(&"ungrounded_recall".to_string()));
        assert_eq!(v.replacement.as_deref(), Some(FALLBACK_NOT_RECORDED));
    }

    #[test]
    fn honest_not_recorded_is_grounded() {
        let s = snippets_with_terms(&[]);
        let v = check_draft(Intent::Recall, "Not recorded / ambiguous.", &s, false);
        assert!(v.clean());
    }

    #[test]
    fn invented_pulse_is_rejected() {
        let v = check_draft(
            Intent::Misc,
            "Project Pulse (truth-bound)\nGoal: made up",
            &CanonicalSnippets::default(),
            false,
        );
        assert!(v.reasons.contains(&"invented_pulse".to_string()));
    }

    #[test]
    fn couples_attribution_is_replaced_with_neutral_theme() {
        let snippets = CanonicalSnippets {
            partner_context_injected: true,
            text: "PARTNER_CONTEXT:\n- feeling unheard about chores".to_string(),
            ..Default::default()
        };
        let v = check_draft(
            Intent::Misc,
            "Well, she said you never listen.",
            &snippets,
            true,
        );
        assert!(v.reasons.contains(&"couples_attribution".to_string()));
        let replacement = v.replacement.unwrap();
        let lower = replacement.to_lowercase();
        assert!(!lower.contains("she said"));
        assert!(!lower.contains("your partner said"));
        assert!(lower.contains("theme"));
        assert!(replacement.contains('?'));
    }

    #[test]
    fn affirmative_without_evidence_downgrades() {
        let v = check_draft(
            Intent::Lookup,
            "It is confirmed, the deal closed.",
            &CanonicalSnippets::default(),
            false,
        );
        assert!(v.reasons.contains(&"affirmative_without_evidence".to_string()));
        assert!(v.replacement.unwrap().contains('?'));
    }

    #[test]
    fn aof_fallback_cites_the_excerpt() {
        let snippets = CanonicalSnippets {
            aof_excerpt: Some("Wall A is load-bearing per the plan notes.".to_string()),
            ..Default::default()
        };
        let out = fallback_reply(&snippets);
        assert!(out.contains("load-bearing"));
        assert_eq!(out.matches('?').count(), 1);
    }
}
