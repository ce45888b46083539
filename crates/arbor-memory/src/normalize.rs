//! Tier-1 normalization.
//!
//! Normalization rewrites `facts_raw.jsonl` as a new file version (records
//! themselves never mutate in place): claims are whitespace-collapsed,
//! question-shaped and empty claims are dropped, and exact duplicates
//! (claim + slot, case-insensitive) keep only their first occurrence.
//! Idempotent: normalizing twice equals normalizing once.

use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use arbor_store::ProjectStore;

use crate::error::Result;
use crate::types::RawFact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NormalizeReceipt {
    pub kept: usize,
    pub dropped: usize,
}

/// Normalize the project Tier-1 log in place. Returns kept/dropped counts.
pub fn normalize_facts_raw_jsonl(
    store: &ProjectStore,
    project_full: &str,
) -> Result<NormalizeReceipt> {
    let path = store.facts_raw_path(project_full);
    let facts: Vec<RawFact> = store.read_jsonl(&path)?;
    let (normalized, receipt) = normalize_records(facts);
    store.rewrite_jsonl(&path, &normalized)?;
    info!(
        project = project_full,
        kept = receipt.kept,
        dropped = receipt.dropped,
        "tier-1 normalized"
    );
    Ok(receipt)
}

/// Normalize the per-user Tier-1G log.
pub fn normalize_user_facts_raw_jsonl(
    store: &ProjectStore,
    user: &str,
) -> Result<NormalizeReceipt> {
    let path = store.user_facts_raw_path(user);
    let facts: Vec<RawFact> = store.read_jsonl(&path)?;
    let (normalized, receipt) = normalize_records(facts);
    store.rewrite_jsonl(&path, &normalized)?;
    Ok(receipt)
}

/// Pure normalization pass over a record list.
pub fn normalize_records(facts: Vec<RawFact>) -> (Vec<RawFact>, NormalizeReceipt) {
    let total = facts.len();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out: Vec<RawFact> = Vec::with_capacity(total);

    for mut fact in facts {
        let claim = collapse_whitespace(fact.claim.trim());
        if claim.is_empty() || claim.contains('?') {
            continue;
        }
        let dedupe_key = (claim.to_lowercase(), fact.slot.to_string());
        if !seen.insert(dedupe_key) {
            continue;
        }
        fact.claim = claim;
        out.push(fact);
    }

    let receipt = NormalizeReceipt {
        kept: out.len(),
        dropped: total - out.len(),
    };
    (out, receipt)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Slot, Subject};

    fn fact(claim: &str, slot: Slot, turn: u64) -> RawFact {
        RawFact {
            claim: claim.into(),
            slot,
            subject: Subject::User,
            source: "chat".into(),
            evidence_quote: claim.into(),
            turn_index: turn,
            timestamp: "2026-01-01T00:00:00Z".into(),
            entity_key: "k".into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn drops_questions_and_empties() {
        let (out, receipt) = normalize_records(vec![
            fact("I live in Austin", Slot::Identity, 1),
            fact("what is my name?", Slot::Identity, 2),
            fact("   ", Slot::Other, 3),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(receipt, NormalizeReceipt { kept: 1, dropped: 2 });
    }

    #[test]
    fn dedupes_case_insensitively_keeping_first() {
        let (out, _) = normalize_records(vec![
            fact("My name is Frank", Slot::Identity, 1),
            fact("my name is frank", Slot::Identity, 5),
            fact("My name is Frank", Slot::Context, 6),
        ]);
        // Same slot dedupes; different slot survives.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].turn_index, 1);
    }

    #[test]
    fn collapses_internal_whitespace() {
        let (out, _) = normalize_records(vec![fact("I   live \t in  Austin", Slot::Identity, 1)]);
        assert_eq!(out[0].claim, "I live in Austin");
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = vec![
            fact("I live   in Austin", Slot::Identity, 1),
            fact("I live in Austin", Slot::Identity, 2),
            fact("coffee helps me focus", Slot::Routine, 3),
        ];
        let (once, _) = normalize_records(input);
        let (twice, receipt) = normalize_records(once.clone());
        assert_eq!(once, twice);
        assert_eq!(receipt.dropped, 0);
    }

    #[test]
    fn disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let path = store.facts_raw_path("u/p");
        store.append_jsonl(&path, &fact("A  fact", Slot::Context, 1)).unwrap();
        store.append_jsonl(&path, &fact("a fact", Slot::Context, 2)).unwrap();

        let receipt = normalize_facts_raw_jsonl(&store, "u/p").unwrap();
        assert_eq!(receipt, NormalizeReceipt { kept: 1, dropped: 1 });

        let again = normalize_facts_raw_jsonl(&store, "u/p").unwrap();
        assert_eq!(again, NormalizeReceipt { kept: 1, dropped: 0 });
    }
}
