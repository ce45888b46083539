//! Tier-2G (identity kernel) and Tier-2M (global facts map) promotion.
//!
//! Promotion is strict: a fact reaches the profile only when it matches a
//! fixed allow-list pattern AND its evidence is explicit first person.
//! Birthdates are stricter still — only "my birthday is ..." or
//! "i was born on ..." claims are considered, and anything that does not
//! parse cleanly to ISO `YYYY-MM-DD` is refused.

use chrono::NaiveDate;
use tracing::info;

use arbor_core::paths::now_iso;
use arbor_store::userdata::{GlobalFact, GlobalFactsMap, RelationshipFact, UserProfile};
use arbor_store::ProjectStore;

use crate::error::Result;
use crate::types::{RawFact, Slot};

/// One promotable identity/relationship key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalKey {
    PreferredName(String),
    /// ISO `YYYY-MM-DD`.
    Birthdate(String),
    Timezone(String),
    Location(String),
    Relationship { relation: String, name: String },
}

/// First-person marker check over the evidence quote.
fn is_first_person(evidence: &str) -> bool {
    let lower = format!(" {} ", evidence.to_lowercase());
    ["my ", " i ", "i'm ", "i am ", "i've ", "i was "]
        .iter()
        .any(|m| lower.contains(m))
        || lower.trim_start().starts_with("i ")
}

/// Allow-list check: is this Tier-1 fact eligible for global promotion?
pub fn global_eligible(fact: &RawFact) -> Option<GlobalKey> {
    if !is_first_person(&fact.evidence_quote) {
        return None;
    }
    let claim = fact.claim.to_lowercase();

    if let Some(rest) = after(&claim, "my preferred name is ") {
        return Some(GlobalKey::PreferredName(original_case(&fact.claim, rest)));
    }
    if let Some(rest) = after(&claim, "i go by ") {
        return Some(GlobalKey::PreferredName(original_case(&fact.claim, rest)));
    }

    if claim.contains("my birthday is") || claim.contains("i was born on") {
        let tail = after(&claim, "my birthday is ")
            .or_else(|| after(&claim, "i was born on "))
            .unwrap_or_default();
        return parse_birthdate(&tail).map(GlobalKey::Birthdate);
    }

    if let Some(rest) = after(&claim, "my timezone is ") {
        return Some(GlobalKey::Timezone(rest.trim().to_string()));
    }
    if let Some(rest) = after(&claim, "i'm usually on ") {
        return named_zone(rest.trim()).map(|z| GlobalKey::Timezone(z.to_string()));
    }

    if let Some(rest) = after(&claim, "i live in ") {
        return Some(GlobalKey::Location(original_case(&fact.claim, rest)));
    }

    if fact.slot == Slot::Relationship {
        if let Some(rest) = claim.strip_prefix("my ") {
            if let Some(idx) = rest.find(" is named ") {
                let relation = rest[..idx].trim().to_string();
                let name = original_case(&fact.claim, rest[idx + " is named ".len()..].trim());
                if !relation.is_empty() && !name.is_empty() {
                    return Some(GlobalKey::Relationship { relation, name });
                }
            }
            if let Some(idx) = rest.find(" name is ") {
                let relation = rest[..idx].trim().trim_end_matches("'s").to_string();
                let name = original_case(&fact.claim, rest[idx + " name is ".len()..].trim());
                if !relation.is_empty() && !name.is_empty() {
                    return Some(GlobalKey::Relationship { relation, name });
                }
            }
        }
    }

    None
}

/// Slice `claim` after `prefix` (lowercased match), trimming punctuation.
fn after<'a>(lower_claim: &'a str, prefix: &str) -> Option<&'a str> {
    let idx = lower_claim.find(prefix)?;
    let rest = &lower_claim[idx + prefix.len()..];
    let rest = rest.trim().trim_end_matches(['.', '!', ',']);
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Recover the original casing of a lowercased tail from the source claim.
/// Byte offsets can drift on multi-byte case folds, so the slice is checked.
fn original_case(original: &str, lower_tail: &str) -> String {
    let lower = original.to_lowercase();
    lower
        .find(lower_tail)
        .and_then(|idx| original.get(idx..idx + lower_tail.len()))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| lower_tail.to_string())
}

/// Strict birthdate parsing: ISO or an unambiguous long form only.
fn parse_birthdate(text: &str) -> Option<String> {
    let text = text.trim().trim_end_matches(['.', '!', ',']);
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%B %d %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Conservative mapping of spoken US zone names to IANA identifiers.
fn named_zone(text: &str) -> Option<&'static str> {
    let t = text.trim_end_matches(" time").trim();
    match t {
        "central" => Some("America/Chicago"),
        "eastern" => Some("America/New_York"),
        "mountain" => Some("America/Denver"),
        "pacific" => Some("America/Los_Angeles"),
        _ => None,
    }
}

/// Rebuild the Tier-2G profile from the user's Tier-1G log.
///
/// The log is chronological, so later claims overwrite earlier ones per key;
/// relationships dedupe by relation with the newest name winning.
pub fn rebuild_user_profile_from_user_facts(
    store: &ProjectStore,
    user: &str,
) -> Result<UserProfile> {
    let raw: Vec<RawFact> = store.read_jsonl(&store.user_facts_raw_path(user))?;
    let (normalized, _) = crate::normalize::normalize_records(raw);

    let mut profile = store.load_user_profile(user)?;
    profile.identity = Default::default();
    profile.relationships.clear();

    for fact in &normalized {
        match global_eligible(fact) {
            Some(GlobalKey::PreferredName(name)) => profile.identity.preferred_name = name,
            Some(GlobalKey::Birthdate(date)) => profile.identity.birthdate = date,
            Some(GlobalKey::Timezone(tz)) => profile.identity.timezone = tz,
            Some(GlobalKey::Location(loc)) => profile.identity.location = loc,
            Some(GlobalKey::Relationship { relation, name }) => {
                if let Some(existing) = profile
                    .relationships
                    .iter_mut()
                    .find(|r| r.relation == relation)
                {
                    existing.name = name;
                    existing.updated_at = now_iso();
                } else {
                    profile.relationships.push(RelationshipFact {
                        relation,
                        name,
                        note: String::new(),
                        updated_at: now_iso(),
                    });
                }
            }
            None => {}
        }
    }
    profile.relationships.sort_by(|a, b| a.relation.cmp(&b.relation));

    let profile = store.save_user_profile(user, profile)?;
    info!(user, relationships = profile.relationships.len(), "tier-2g rebuilt");
    Ok(profile)
}

/// Rebuild the Tier-2M global map: every eligible fact, identity kernel
/// entries first, then relationships, then nothing else (the map carries
/// only allow-listed claims).
pub fn rebuild_user_global_facts_map_from_user_facts(
    store: &ProjectStore,
    user: &str,
) -> Result<GlobalFactsMap> {
    let raw: Vec<RawFact> = store.read_jsonl(&store.user_facts_raw_path(user))?;
    let (normalized, _) = crate::normalize::normalize_records(raw);

    let mut identity: Vec<GlobalFact> = Vec::new();
    let mut relationships: Vec<GlobalFact> = Vec::new();
    for fact in &normalized {
        let Some(key) = global_eligible(fact) else {
            continue;
        };
        let entry = GlobalFact {
            claim: fact.claim.clone(),
            slot: fact.slot.to_string(),
            entity_key: fact.entity_key.clone(),
            updated_at: now_iso(),
        };
        match key {
            GlobalKey::Relationship { .. } => {
                relationships.retain(|g| g.entity_key != entry.entity_key);
                relationships.push(entry);
            }
            _ => {
                identity.retain(|g| g.entity_key != entry.entity_key);
                identity.push(entry);
            }
        }
    }

    let mut map = GlobalFactsMap::default();
    map.facts.extend(identity);
    map.facts.extend(relationships);
    store.save_global_facts_map(user, map.clone())?;
    Ok(map)
}

/// Render the profile excerpt injected for recall/status continuity.
pub fn render_profile_excerpt(profile: &UserProfile) -> String {
    let mut lines = vec!["GLOBAL_USER_PROFILE:".to_string()];
    let id = &profile.identity;
    if !id.preferred_name.is_empty() {
        lines.push(format!("- preferred_name: {}", id.preferred_name));
    }
    if !id.birthdate.is_empty() {
        lines.push(format!("- birthdate: {}", id.birthdate));
    }
    if !id.timezone.is_empty() {
        lines.push(format!("- timezone: {}", id.timezone));
    }
    if !id.location.is_empty() {
        lines.push(format!("- location: {}", id.location));
    }
    for rel in &profile.relationships {
        lines.push(format!("- {}: {}", rel.relation, rel.name));
    }
    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}

/// Render the Tier-2M excerpt for cross-project recall.
pub fn render_global_map_excerpt(map: &GlobalFactsMap) -> String {
    if map.facts.is_empty() {
        return String::new();
    }
    let mut lines = vec!["GLOBAL_USER_FACTS:".to_string()];
    for fact in &map.facts {
        lines.push(format!("- [{}] {}", fact.slot, fact.claim));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Subject;

    fn fact(claim: &str, slot: Slot, key: &str, turn: u64) -> RawFact {
        RawFact {
            claim: claim.into(),
            slot,
            subject: Subject::User,
            source: "chat".into(),
            evidence_quote: claim.into(),
            turn_index: turn,
            timestamp: "2026-01-01T00:00:00Z".into(),
            entity_key: key.into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn preferred_name_is_eligible() {
        let f = fact("My preferred name is Frank", Slot::Identity, "user.preferred_name", 1);
        assert_eq!(
            global_eligible(&f),
            Some(GlobalKey::PreferredName("Frank".into()))
        );
    }

    #[test]
    fn third_person_evidence_is_refused() {
        let mut f = fact("My preferred name is Frank", Slot::Identity, "user.preferred_name", 1);
        // The claim matches the allow-list pattern, but the evidence carries
        // no first-person marker — still refused.
        f.evidence_quote = "He said the preferred name is Frank".into();
        assert_eq!(global_eligible(&f), None);
    }

    #[test]
    fn birthdate_requires_explicit_phrase_and_parse() {
        let ok = fact("My birthday is 1982-08-01", Slot::Identity, "user.birthdate", 1);
        assert_eq!(global_eligible(&ok), Some(GlobalKey::Birthdate("1982-08-01".into())));

        let long = fact("I was born on August 1, 1982", Slot::Identity, "user.birthdate", 1);
        assert_eq!(global_eligible(&long), Some(GlobalKey::Birthdate("1982-08-01".into())));

        // Ambiguous forms are refused.
        let vague = fact("My birthday is 08/01/82", Slot::Identity, "user.birthdate", 1);
        assert_eq!(global_eligible(&vague), None);

        // Birthday mentioned without the explicit phrase is refused.
        let indirect = fact("I turn 44 on 1982-08-01", Slot::Identity, "user.birthdate", 1);
        assert_eq!(global_eligible(&indirect), None);
    }

    #[test]
    fn named_zone_mapping_is_conservative() {
        let f = fact("I'm usually on Central Time", Slot::Identity, "user.timezone", 1);
        assert_eq!(
            global_eligible(&f),
            Some(GlobalKey::Timezone("America/Chicago".into()))
        );
        let unknown = fact("I'm usually on mars time", Slot::Identity, "user.timezone", 1);
        assert_eq!(global_eligible(&unknown), None);
    }

    #[test]
    fn profile_rebuild_is_deterministic_and_newest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let path = store.user_facts_raw_path("Frank");
        store
            .append_jsonl(&path, &fact("My preferred name is Francis", Slot::Identity, "user.preferred_name", 1))
            .unwrap();
        store
            .append_jsonl(&path, &fact("My preferred name is Frank", Slot::Identity, "user.preferred_name", 2))
            .unwrap();
        store
            .append_jsonl(&path, &fact("My son is named Logan", Slot::Relationship, "rel.son", 3))
            .unwrap();
        store
            .append_jsonl(&path, &fact("I live in Austin, Texas", Slot::Identity, "user.location", 4))
            .unwrap();

        let p1 = rebuild_user_profile_from_user_facts(&store, "Frank").unwrap();
        assert_eq!(p1.identity.preferred_name, "Frank");
        assert_eq!(p1.identity.location, "Austin, Texas");
        assert_eq!(p1.relationships.len(), 1);
        assert_eq!(p1.relationships[0].name, "Logan");

        // No new Tier-1G facts: rebuild yields the same kernel.
        let p2 = rebuild_user_profile_from_user_facts(&store, "Frank").unwrap();
        assert_eq!(p2.identity, p1.identity);
    }

    #[test]
    fn global_map_orders_identity_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let path = store.user_facts_raw_path("Frank");
        store
            .append_jsonl(&path, &fact("My son is named Logan", Slot::Relationship, "rel.son", 1))
            .unwrap();
        store
            .append_jsonl(&path, &fact("I live in Austin", Slot::Identity, "user.location", 2))
            .unwrap();

        let map = rebuild_user_global_facts_map_from_user_facts(&store, "Frank").unwrap();
        assert_eq!(map.facts.len(), 2);
        assert_eq!(map.facts[0].entity_key, "user.location");
        assert_eq!(map.facts[1].entity_key, "rel.son");

        let excerpt = render_global_map_excerpt(&map);
        assert!(excerpt.starts_with("GLOBAL_USER_FACTS:"));
    }
}
