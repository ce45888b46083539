//! Tier-1 raw candidate capture.
//!
//! Candidates come from two extractors: a model extractor (validated JSON,
//! driven by the pipeline) and the deterministic fallback below. Either way,
//! every record passes the evidence contract (verbatim substring of the
//! window) and the policy write gate before anything touches disk.
//!
//! The deterministic extractor is deliberately conservative: explicit,
//! first-person, recallable statements only. Feelings, speculation, and
//! questions never become facts.

use tracing::debug;

use arbor_core::paths::now_iso;
use arbor_store::userdata::PolicyRule;
use arbor_store::ProjectStore;

use crate::error::{MemoryError, Result};
use crate::global;
use crate::policy;
use crate::types::{RawFact, Slot, Subject};

/// Sentence length bounds for the deterministic extractor.
const MIN_SENTENCE_LEN: usize = 8;
const MAX_SENTENCE_LEN: usize = 240;

/// Reflective / speculative markers. A sentence containing any of these is
/// never captured.
const HEDGE_MARKERS: &[&str] = &[
    "i think",
    "i feel",
    "i felt",
    "maybe",
    "probably",
    "i guess",
    "i'm worried",
    "im worried",
    "not sure",
    "kind of",
    "sort of",
    "i wonder",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub stored: bool,
    pub mirrored_global: bool,
    pub policy_denied: bool,
}

/// Append one Tier-1 candidate for a project, mirroring global-eligible
/// claims to the user's Tier-1G log.
///
/// Contract: `fact.evidence_quote` must be a verbatim substring of `window`.
/// Policy denial is silent (`stored=false`, no error) per the write-gate
/// semantics; the caller audits it.
pub fn append_fact_raw_candidate(
    store: &ProjectStore,
    project_full: &str,
    fact: &RawFact,
    window: &str,
    rules: &[PolicyRule],
) -> Result<AppendOutcome> {
    if fact.evidence_quote.is_empty() || !window.contains(&fact.evidence_quote) {
        return Err(MemoryError::EvidenceMismatch);
    }

    let decision = policy::decision_for_claim(rules, &fact.claim, &fact.entity_key);
    if !decision.store {
        debug!(claim = %fact.claim, "tier-1 write gated by policy");
        return Ok(AppendOutcome {
            stored: false,
            mirrored_global: false,
            policy_denied: true,
        });
    }

    store.append_jsonl(&store.facts_raw_path(project_full), fact)?;

    let mut mirrored = false;
    if decision.mirror_global && global::global_eligible(fact).is_some() {
        let user = ProjectStore::user_of(project_full);
        store.ensure_user(&user)?;
        store.append_jsonl(&store.user_facts_raw_path(&user), fact)?;
        mirrored = true;
    }

    Ok(AppendOutcome {
        stored: true,
        mirrored_global: mirrored,
        policy_denied: false,
    })
}

/// Deterministic fallback extractor over a single user message.
///
/// Splits into sentences, drops anything question-shaped or hedged, and
/// accepts only explicit first-person patterns.
pub fn extract_candidates_deterministic(message: &str, turn_index: u64) -> Vec<RawFact> {
    let mut out = Vec::new();
    for sentence in split_sentences(message) {
        let trimmed = sentence.trim();
        if trimmed.len() < MIN_SENTENCE_LEN || trimmed.len() > MAX_SENTENCE_LEN {
            continue;
        }
        if trimmed.contains('?') {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if HEDGE_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        let Some((slot, subject, entity_key)) = classify_sentence(&lower) else {
            continue;
        };
        out.push(RawFact {
            claim: trimmed.trim_end_matches(['.', '!', ',']).to_string(),
            slot,
            subject,
            source: "chat".to_string(),
            evidence_quote: trimmed.to_string(),
            turn_index,
            timestamp: now_iso(),
            entity_key,
            confidence: 0.8,
        });
    }
    out
}

/// Split on sentence punctuation and newlines, preserving the original
/// (trimmed) text of each piece so evidence quotes stay verbatim.
fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in text.chars() {
        cur.push(ch);
        if matches!(ch, '.' | '!' | '?' | ';' | '\n') {
            let piece = cur.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            cur.clear();
        }
    }
    let piece = cur.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
    out
}

/// Conservative first-person pattern table. Returns (slot, subject, key).
fn classify_sentence(lower: &str) -> Option<(Slot, Subject, String)> {
    // Leading discourse fillers don't disqualify a sentence.
    let core = lower
        .trim_start_matches("actually,")
        .trim_start_matches("actually")
        .trim_start_matches("sometimes")
        .trim_start();

    // Identity.
    if core.contains("my preferred name is") || core.contains("i go by ") {
        return Some((Slot::Identity, Subject::User, "user.preferred_name".into()));
    }
    if core.contains("my birthday is") || core.contains("i was born on") {
        return Some((Slot::Identity, Subject::User, "user.birthdate".into()));
    }
    if core.starts_with("i live in ") || core.starts_with("i'm in ") || core.starts_with("i am in ")
    {
        return Some((Slot::Identity, Subject::User, "user.location".into()));
    }
    if core.contains("my timezone is") || core.starts_with("i'm usually on ") {
        return Some((Slot::Identity, Subject::User, "user.timezone".into()));
    }

    // Relationships: "my son is named Logan", "my girlfriend's name is Emanie".
    if let Some(rest) = core.strip_prefix("my ") {
        if rest.contains(" is named ") || rest.contains(" name is ") {
            let relation = rest
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .next()
                .unwrap_or("other");
            return Some((Slot::Relationship, Subject::Other, format!("rel.{relation}")));
        }
    }
    // Follow-up facts about a named person: "Logan is 7 years old."
    if core.contains(" is ") && core.contains("years old") {
        let name = core.split_whitespace().next().unwrap_or("person");
        return Some((Slot::Relationship, Subject::Other, format!("rel.{}", slug(name))));
    }

    // Preferences.
    if core.starts_with("i prefer ")
        || core.starts_with("i like ")
        || core.starts_with("i don't like ")
        || core.starts_with("i do not like ")
        || core.starts_with("i dont like ")
    {
        return Some((Slot::Preference, Subject::User, pref_key(core)));
    }
    if core.starts_with("my favorite ") || core.starts_with("my favourite ") {
        return Some((Slot::Preference, Subject::User, my_x_key(core)));
    }

    // Constraints / logistics.
    if core.starts_with("i'm on ") || core.starts_with("i am on ") {
        return Some((Slot::Constraint, Subject::User, ctx_key(core)));
    }
    if core.starts_with("i'm getting ") || core.starts_with("i am getting ") {
        return Some((Slot::Event, Subject::User, ctx_key(core)));
    }
    if core.starts_with("we have ") {
        return Some((Slot::Constraint, Subject::User, ctx_key(core)));
    }

    // Routines.
    if core.contains("helps me ") {
        return Some((Slot::Routine, Subject::User, ctx_key(core)));
    }

    // Work / ongoing context.
    if core.starts_with("i work ")
        || core.starts_with("i'm building ")
        || core.starts_with("i am building ")
    {
        return Some((Slot::Context, Subject::User, ctx_key(core)));
    }

    // Generic possession / attribute: "my X is Y".
    if let Some(rest) = core.strip_prefix("my ") {
        if rest.contains(" is ") {
            return Some((Slot::Context, Subject::User, my_x_key(core)));
        }
    }
    if core.starts_with("i have ") {
        return Some((Slot::Possession, Subject::User, ctx_key(core)));
    }

    None
}

/// Key for "my X is Y" shapes: `user.<slug of X>`.
fn my_x_key(core: &str) -> String {
    let rest = core.strip_prefix("my ").unwrap_or(core);
    let x: Vec<&str> = rest.split(" is ").next().unwrap_or("").split_whitespace().collect();
    format!("user.{}", slug(&x.join("_")))
}

fn pref_key(core: &str) -> String {
    let words: Vec<&str> = core.split_whitespace().skip(2).take(3).collect();
    format!("pref.{}", slug(&words.join("_")))
}

fn ctx_key(core: &str) -> String {
    let words: Vec<&str> = core.split_whitespace().take(4).collect();
    format!("ctx.{}", slug(&words.join("_")))
}

fn slug(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches('_').chars().take(40).collect()
}

/// Validate a model-extracted candidate array against the window and convert
/// the survivors into `RawFact`s. Items with missing fields or non-verbatim
/// evidence are dropped.
pub fn candidates_from_model_json(
    value: &serde_json::Value,
    window: &str,
    turn_index: u64,
) -> Vec<RawFact> {
    let Some(items) = value.get("facts").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in items {
        let claim = item.get("claim").and_then(|v| v.as_str()).unwrap_or("").trim();
        let evidence = item
            .get("evidence_quote")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if claim.is_empty() || evidence.is_empty() || !window.contains(evidence) {
            continue;
        }
        if claim.contains('?') {
            continue;
        }
        let slot = item
            .get("slot")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Slot>().ok())
            .unwrap_or(Slot::Other);
        let subject = item
            .get("subject")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Subject>().ok())
            .unwrap_or(Subject::Unknown);
        let entity_key = item
            .get("entity_key")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let entity_key = if entity_key.is_empty() {
            ctx_key(&claim.to_lowercase())
        } else {
            entity_key
        };
        out.push(RawFact {
            claim: claim.to_string(),
            slot,
            subject,
            source: "chat".to_string(),
            evidence_quote: evidence.to_string(),
            turn_index,
            timestamp: now_iso(),
            entity_key,
            confidence: item
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.8)
                .clamp(0.0, 1.0),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(msg: &str) -> Vec<String> {
        extract_candidates_deterministic(msg, 1)
            .into_iter()
            .map(|f| f.claim)
            .collect()
    }

    #[test]
    fn captures_explicit_identity_facts() {
        let facts = extract_candidates_deterministic("My preferred name is Frank.", 1);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].slot, Slot::Identity);
        assert_eq!(facts[0].entity_key, "user.preferred_name");
        assert_eq!(facts[0].evidence_quote, "My preferred name is Frank.");
    }

    #[test]
    fn captures_location_and_relationship() {
        assert!(!claims("I live in Austin, Texas.").is_empty());
        let facts = extract_candidates_deterministic("My son is named Logan.", 1);
        assert_eq!(facts[0].slot, Slot::Relationship);
        assert_eq!(facts[0].entity_key, "rel.son");
    }

    #[test]
    fn skips_reflective_and_speculative() {
        assert!(claims("I feel like she doesn't respect me when plans change.").is_empty());
        assert!(claims("I think I'm the one overreacting sometimes.").is_empty());
        assert!(claims("Maybe I'm just tired and reading into it.").is_empty());
        assert!(claims("I guess this is all my fault.").is_empty());
        assert!(claims("I'm worried this will never get better.").is_empty());
        assert!(claims("What do you think I should do?").is_empty());
    }

    #[test]
    fn skips_questions_even_factual_looking() {
        assert!(claims("What's my preferred name?").is_empty());
    }

    #[test]
    fn evidence_contract_enforced_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let fact = RawFact {
            claim: "lives in Austin".into(),
            slot: Slot::Identity,
            subject: Subject::User,
            source: "chat".into(),
            evidence_quote: "I live in Austin".into(),
            turn_index: 1,
            timestamp: now_iso(),
            entity_key: "user.location".into(),
            confidence: 0.8,
        };
        let err = append_fact_raw_candidate(&store, "u/p", &fact, "totally different text", &[]);
        assert!(matches!(err, Err(MemoryError::EvidenceMismatch)));

        let ok = append_fact_raw_candidate(&store, "u/p", &fact, "I live in Austin, Texas.", &[])
            .unwrap();
        assert!(ok.stored);
        assert_eq!(store.jsonl_line_count(&store.facts_raw_path("u/p")), 1);
    }

    #[test]
    fn policy_gate_blocks_silently() {
        use arbor_store::userdata::{PolicyAction, PolicyMatchType, PolicyRule};
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let rules = vec![PolicyRule {
            action: PolicyAction::DoNotStore,
            match_type: PolicyMatchType::Substring,
            match_value: "austin".into(),
            note: String::new(),
            created_at: String::new(),
        }];
        let fact = RawFact {
            claim: "lives in Austin".into(),
            slot: Slot::Identity,
            subject: Subject::User,
            source: "chat".into(),
            evidence_quote: "I live in Austin".into(),
            turn_index: 1,
            timestamp: now_iso(),
            entity_key: "user.location".into(),
            confidence: 0.8,
        };
        let out =
            append_fact_raw_candidate(&store, "u/p", &fact, "I live in Austin.", &rules).unwrap();
        assert!(out.policy_denied);
        assert!(!out.stored);
        assert_eq!(store.jsonl_line_count(&store.facts_raw_path("u/p")), 0);
    }

    #[test]
    fn global_eligible_facts_mirror_to_user_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let fact = extract_candidates_deterministic("My preferred name is Frank.", 1)
            .pop()
            .unwrap();
        let out = append_fact_raw_candidate(
            &store,
            "Frank/kitchen",
            &fact,
            "My preferred name is Frank.",
            &[],
        )
        .unwrap();
        assert!(out.mirrored_global);
        assert_eq!(store.jsonl_line_count(&store.user_facts_raw_path("Frank")), 1);
    }

    #[test]
    fn model_candidates_require_verbatim_evidence() {
        let window = "My favorite color is green.";
        let value = serde_json::json!({
            "facts": [
                {"claim": "favorite color is green", "slot": "preference",
                 "subject": "user", "evidence_quote": "My favorite color is green."},
                {"claim": "invented", "slot": "identity", "subject": "user",
                 "evidence_quote": "never said this"}
            ]
        });
        let facts = candidates_from_model_json(&value, window, 3);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].turn_index, 3);
    }
}
