//! Tier-2 project distillation: Tier-1 raw facts → `facts_map.md`.
//!
//! The distiller is the sole writer of `facts_map.md`. Selection is
//! deterministic: group by `(entity_key, slot)`, keep the newest claim
//! (confidence breaks ties), pin identity and relationship facts first,
//! order the rest by the profile's slot priority.

use serde::Serialize;
use tracing::info;

use arbor_store::state::ProjectState;
use arbor_store::ProjectStore;

use crate::error::Result;
use crate::types::{CompactFact, RawFact, Slot};

/// Distill every N turns when dirty (unless a same-turn append forces it).
pub const DISTILL_CADENCE_TURNS: u64 = 3;
/// Compact view caps.
pub const COMPACT_MAX_FACTS: usize = 30;
pub const COMPACT_MAX_CHARS: usize = 2_400;

/// Slot-priority profile for ordering the non-pinned section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistillProfile {
    Therapist,
    Programmer,
    #[default]
    General,
}

impl DistillProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Therapist => "therapist",
            Self::Programmer => "programmer",
            Self::General => "general",
        }
    }

    /// Accepts the canonical names plus the `therapy` alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "therapist" | "therapy" => Some(Self::Therapist),
            "programmer" => Some(Self::Programmer),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    fn slot_priority(&self, slot: Slot) -> usize {
        let order: &[Slot] = match self {
            Self::Therapist => &[
                Slot::Relationship,
                Slot::Identity,
                Slot::Event,
                Slot::Constraint,
                Slot::Preference,
                Slot::Routine,
                Slot::Context,
                Slot::Possession,
                Slot::Other,
            ],
            Self::Programmer => &[
                Slot::Context,
                Slot::Constraint,
                Slot::Preference,
                Slot::Possession,
                Slot::Routine,
                Slot::Identity,
                Slot::Relationship,
                Slot::Event,
                Slot::Other,
            ],
            Self::General => &[
                Slot::Identity,
                Slot::Relationship,
                Slot::Preference,
                Slot::Constraint,
                Slot::Routine,
                Slot::Context,
                Slot::Event,
                Slot::Possession,
                Slot::Other,
            ],
        };
        order.iter().position(|s| *s == slot).unwrap_or(order.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistillReceipt {
    pub promoted: usize,
    pub kept_existing: usize,
    pub dropped: usize,
}

/// Whether this turn should run the distiller.
///
/// Order of checks: a same-turn Tier-1 append always distills; recall-shaped
/// queries distill so the answer reads fresh state; otherwise the cadence
/// fires every [`DISTILL_CADENCE_TURNS`] turns while dirty.
pub fn should_distill(state: &ProjectState, appended_this_turn: bool, recall_shaped: bool) -> bool {
    if appended_this_turn {
        return true;
    }
    if recall_shaped && state.facts_dirty {
        return true;
    }
    state.facts_dirty && state.facts_turn_counter % DISTILL_CADENCE_TURNS == 0
}

/// Pure selection: normalized Tier-1 records → ordered compact facts.
///
/// Winner per `(entity_key, slot)` is the newest record; equal turn indexes
/// fall to the higher confidence. Pinned facts come first, then profile
/// order, newest last within a slot.
pub fn select_compact_facts(facts: &[RawFact], profile: DistillProfile) -> Vec<CompactFact> {
    use std::collections::HashMap;

    let mut winners: HashMap<(String, Slot), &RawFact> = HashMap::new();
    for fact in facts {
        let key = (fact.entity_key.clone(), fact.slot);
        match winners.get(&key) {
            Some(cur)
                if (cur.turn_index, cur.confidence) >= (fact.turn_index, fact.confidence) => {}
            _ => {
                winners.insert(key, fact);
            }
        }
    }

    let mut selected: Vec<CompactFact> = winners
        .into_values()
        .map(|f| CompactFact {
            claim: f.claim.clone(),
            slot: f.slot,
            subject: f.subject,
            entity_key: f.entity_key.clone(),
            confidence: f.confidence,
        })
        .collect();

    // Stable deterministic order: pinned first, then profile priority,
    // then turn order is unavailable post-grouping so entity_key breaks ties.
    selected.sort_by(|a, b| {
        let pa = (!a.pinned(), profile.slot_priority(a.slot), a.entity_key.clone());
        let pb = (!b.pinned(), profile.slot_priority(b.slot), b.entity_key.clone());
        pa.cmp(&pb)
    });
    selected.truncate(COMPACT_MAX_FACTS);
    selected
}

/// Render the bounded compact view for prompt injection.
pub fn render_compact_view(facts: &[CompactFact]) -> String {
    let mut out = String::from("FACTS_MAP_COMPACT:\n");
    for fact in facts {
        let line = fact.render_line();
        if out.len() + line.len() + 1 > COMPACT_MAX_CHARS {
            break;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Rebuild the compact fact list straight from the Tier-1 log (read-only).
pub fn build_compact_facts(
    store: &ProjectStore,
    project_full: &str,
    profile: DistillProfile,
) -> Result<Vec<CompactFact>> {
    let raw: Vec<RawFact> = store.read_jsonl(&store.facts_raw_path(project_full))?;
    let (normalized, _) = crate::normalize::normalize_records(raw);
    Ok(select_compact_facts(&normalized, profile))
}

/// Distill Tier-1 → `facts_map.md`. Returns a receipt against the previous map.
pub fn distill_facts_raw_to_facts_map(
    store: &ProjectStore,
    project_full: &str,
    profile: DistillProfile,
) -> Result<DistillReceipt> {
    let raw: Vec<RawFact> = store.read_jsonl(&store.facts_raw_path(project_full))?;
    let total = raw.len();
    let (normalized, _) = crate::normalize::normalize_records(raw);
    let selected = select_compact_facts(&normalized, profile);

    let map_path = store.facts_map_path(project_full);
    let previous = std::fs::read_to_string(&map_path)
        .unwrap_or_default()
        .to_lowercase();

    let mut promoted = 0usize;
    let mut kept_existing = 0usize;
    for fact in &selected {
        if previous.contains(&fact.claim.to_lowercase()) {
            kept_existing += 1;
        } else {
            promoted += 1;
        }
    }

    let mut md = String::new();
    md.push_str("# Facts Map\n\n");
    md.push_str(&format!("_Profile: {}_\n\n", profile.as_str()));
    md.push_str("## Pinned (identity & relationships)\n");
    let mut any_pinned = false;
    for fact in selected.iter().filter(|f| f.pinned()) {
        md.push_str(&fact.render_line());
        md.push('\n');
        any_pinned = true;
    }
    if !any_pinned {
        md.push_str("- (none)\n");
    }
    md.push_str("\n## Facts\n");
    let mut any_rest = false;
    for fact in selected.iter().filter(|f| !f.pinned()) {
        md.push_str(&fact.render_line());
        md.push('\n');
        any_rest = true;
    }
    if !any_rest {
        md.push_str("- (none)\n");
    }

    store.ensure_project(project_full)?;
    store.write_atomic(&map_path, &md)?;

    let receipt = DistillReceipt {
        promoted,
        kept_existing,
        dropped: total.saturating_sub(selected.len()),
    };
    info!(
        project = project_full,
        promoted = receipt.promoted,
        kept = receipt.kept_existing,
        dropped = receipt.dropped,
        "tier-2 distilled"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Subject;

    fn fact(claim: &str, slot: Slot, key: &str, turn: u64, conf: f64) -> RawFact {
        RawFact {
            claim: claim.into(),
            slot,
            subject: Subject::User,
            source: "chat".into(),
            evidence_quote: claim.into(),
            turn_index: turn,
            timestamp: "2026-01-01T00:00:00Z".into(),
            entity_key: key.into(),
            confidence: conf,
        }
    }

    #[test]
    fn newest_claim_wins_per_key_and_slot() {
        let facts = vec![
            fact("I live in Dallas", Slot::Identity, "user.location", 1, 0.9),
            fact("I live in Austin", Slot::Identity, "user.location", 5, 0.8),
        ];
        let compact = select_compact_facts(&facts, DistillProfile::General);
        assert_eq!(compact.len(), 1);
        assert_eq!(compact[0].claim, "I live in Austin");
    }

    #[test]
    fn confidence_breaks_turn_ties() {
        let facts = vec![
            fact("low", Slot::Context, "k", 3, 0.5),
            fact("high", Slot::Context, "k", 3, 0.9),
        ];
        let compact = select_compact_facts(&facts, DistillProfile::General);
        assert_eq!(compact[0].claim, "high");
    }

    #[test]
    fn pinned_facts_lead_the_view() {
        let facts = vec![
            fact("coffee helps me focus", Slot::Routine, "ctx.coffee", 1, 0.8),
            fact("My son is named Logan", Slot::Relationship, "rel.son", 2, 0.8),
            fact("My preferred name is Frank", Slot::Identity, "user.preferred_name", 3, 0.8),
        ];
        let compact = select_compact_facts(&facts, DistillProfile::General);
        assert!(compact[0].pinned());
        assert!(compact[1].pinned());
        assert!(!compact[2].pinned());
    }

    #[test]
    fn compact_view_respects_caps() {
        let facts: Vec<RawFact> = (0..60)
            .map(|i| {
                fact(
                    &format!("fact number {i} with some padding text"),
                    Slot::Context,
                    &format!("k{i}"),
                    i,
                    0.8,
                )
            })
            .collect();
        let compact = select_compact_facts(&facts, DistillProfile::General);
        assert!(compact.len() <= COMPACT_MAX_FACTS);
        let view = render_compact_view(&compact);
        assert!(view.len() <= COMPACT_MAX_CHARS);
        assert!(view.starts_with("FACTS_MAP_COMPACT:"));
    }

    #[test]
    fn cadence_rules() {
        let mut state = ProjectState::default();
        state.facts_dirty = true;
        state.facts_turn_counter = 3;
        assert!(should_distill(&state, false, false));
        state.facts_turn_counter = 4;
        assert!(!should_distill(&state, false, false));
        assert!(should_distill(&state, true, false));
        assert!(should_distill(&state, false, true));
        state.facts_dirty = false;
        assert!(!should_distill(&state, false, true));
    }

    #[test]
    fn distill_writes_map_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let path = store.facts_raw_path("u/p");
        store
            .append_jsonl(&path, &fact("My preferred name is Frank", Slot::Identity, "user.preferred_name", 1, 0.8))
            .unwrap();
        store
            .append_jsonl(&path, &fact("I live in Austin, Texas", Slot::Identity, "user.location", 2, 0.8))
            .unwrap();

        let first = distill_facts_raw_to_facts_map(&store, "u/p", DistillProfile::General).unwrap();
        assert_eq!(first.promoted, 2);

        let map = std::fs::read_to_string(store.facts_map_path("u/p")).unwrap();
        assert!(map.to_lowercase().contains("frank"));
        assert!(map.to_lowercase().contains("austin"));

        // No Tier-1 writes in between: re-distilling changes nothing.
        let second = distill_facts_raw_to_facts_map(&store, "u/p", DistillProfile::General).unwrap();
        assert_eq!(second.promoted, 0);
        assert_eq!(second.kept_existing, 2);
        let map2 = std::fs::read_to_string(store.facts_map_path("u/p")).unwrap();
        assert_eq!(map, map2);
    }
}
