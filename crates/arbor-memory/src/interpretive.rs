//! Interpretive memory — the ambiguous layer (themes, values, dynamics).
//!
//! Every assistant turn distills a windowed blob of recent conversation into
//! `interpretive_memory_v1`. Items only survive when their evidence quote is
//! a verbatim substring of the window; list sizes are capped; the merge into
//! `understanding.json` always happens — on extraction failure a sentinel is
//! merged instead so the write path stays provably alive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use arbor_store::ProjectStore;

use crate::error::Result;

pub const INTERPRETIVE_SCHEMA: &str = "interpretive_memory_v1";
/// Max items kept per list after merge.
pub const MAX_ITEMS_PER_LIST: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uncertainty {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretiveItem {
    pub text: String,
    pub uncertainty: Uncertainty,
    /// Verbatim quote from the window.
    pub evidence: String,
    pub turn_index: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpretiveMemory {
    #[serde(default)]
    pub entities: Vec<InterpretiveItem>,
    #[serde(default)]
    pub relationship_dynamics: Vec<InterpretiveItem>,
    #[serde(default)]
    pub themes: Vec<InterpretiveItem>,
    #[serde(default)]
    pub values_goals: Vec<InterpretiveItem>,
    #[serde(default)]
    pub open_ambiguities: Vec<InterpretiveItem>,
}

/// Parse and validate model output against the window.
///
/// Returns `None` when the JSON is structurally unusable; individual items
/// with missing fields or non-verbatim evidence are silently dropped.
pub fn validate_extraction(value: &Value, window: &str, turn_index: u64) -> Option<InterpretiveMemory> {
    let obj = value.as_object()?;

    let memory = InterpretiveMemory {
        entities: validate_list(obj.get("entities"), window, turn_index),
        relationship_dynamics: validate_list(obj.get("relationship_dynamics"), window, turn_index),
        themes: validate_list(obj.get("themes"), window, turn_index),
        values_goals: validate_list(obj.get("values_goals"), window, turn_index),
        open_ambiguities: validate_list(obj.get("open_ambiguities"), window, turn_index),
    };

    let total = memory.entities.len()
        + memory.relationship_dynamics.len()
        + memory.themes.len()
        + memory.values_goals.len()
        + memory.open_ambiguities.len();
    if total == 0 {
        None
    } else {
        Some(memory)
    }
}

/// Validate one list field: drop items with missing fields or evidence that
/// is not a verbatim substring of the window.
fn validate_list(value: Option<&Value>, window: &str, turn_index: u64) -> Vec<InterpretiveItem> {
    let Some(items) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in items.iter().take(MAX_ITEMS_PER_LIST) {
        let text = item.get("text").and_then(|v| v.as_str()).unwrap_or("").trim();
        let evidence = item.get("evidence").and_then(|v| v.as_str()).unwrap_or("");
        if text.is_empty() || evidence.is_empty() || !window.contains(evidence) {
            continue;
        }
        let uncertainty = match item.get("uncertainty").and_then(|v| v.as_str()) {
            Some("low") => Uncertainty::Low,
            Some("medium") => Uncertainty::Medium,
            Some("high") => Uncertainty::High,
            _ => Uncertainty::High,
        };
        out.push(InterpretiveItem {
            text: text.to_string(),
            uncertainty,
            evidence: evidence.to_string(),
            turn_index,
        });
    }
    out
}

/// Merge an extraction (or the failure sentinel) into `understanding.json`.
pub fn merge_into_understanding(
    store: &ProjectStore,
    project_full: &str,
    extraction: Option<&InterpretiveMemory>,
    turn_index: u64,
) -> Result<()> {
    let mut understanding = store.load_understanding(project_full)?;
    if !understanding.is_object() {
        understanding = Value::Object(Default::default());
    }
    let obj = understanding.as_object_mut().unwrap();

    obj.insert("schema".into(), Value::String(INTERPRETIVE_SCHEMA.into()));
    obj.insert("last_updated_turn".into(), Value::from(turn_index));

    match extraction {
        Some(memory) => {
            obj.remove("extraction_failed");
            for (field, items) in [
                ("entities", &memory.entities),
                ("relationship_dynamics", &memory.relationship_dynamics),
                ("themes", &memory.themes),
                ("values_goals", &memory.values_goals),
                ("open_ambiguities", &memory.open_ambiguities),
            ] {
                merge_list(obj, field, items);
            }
        }
        None => {
            // Sentinel: proves the write path ran even when extraction failed.
            obj.insert("extraction_failed".into(), Value::Bool(true));
            debug!(project = project_full, turn_index, "interpretive extraction failed; sentinel merged");
        }
    }

    store.save_understanding(project_full, &understanding)?;
    Ok(())
}

/// Append new unique items (by text, case-insensitive) and trim the oldest
/// entries beyond the cap.
fn merge_list(obj: &mut serde_json::Map<String, Value>, field: &str, new_items: &[InterpretiveItem]) {
    let mut existing: Vec<InterpretiveItem> = obj
        .get(field)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    for item in new_items {
        let dup = existing
            .iter()
            .any(|e| e.text.eq_ignore_ascii_case(&item.text));
        if !dup {
            existing.push(item.clone());
        }
    }
    while existing.len() > MAX_ITEMS_PER_LIST {
        existing.remove(0);
    }
    obj.insert(field.into(), serde_json::to_value(&existing).unwrap_or(Value::Null));
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: &str = "user: I keep canceling plans with my sister.\nassistant: That sounds heavy.";

    #[test]
    fn validation_requires_verbatim_evidence() {
        let value = serde_json::json!({
            "themes": [
                {"text": "avoidance of family contact", "uncertainty": "medium",
                 "evidence": "I keep canceling plans with my sister."},
                {"text": "fabricated theme", "uncertainty": "low",
                 "evidence": "something never said"}
            ]
        });
        let memory = validate_extraction(&value, WINDOW, 7).unwrap();
        assert_eq!(memory.themes.len(), 1);
        assert_eq!(memory.themes[0].turn_index, 7);
        assert_eq!(memory.themes[0].uncertainty, Uncertainty::Medium);
    }

    #[test]
    fn garbage_json_yields_none() {
        assert!(validate_extraction(&serde_json::json!("nope"), WINDOW, 1).is_none());
        assert!(validate_extraction(&serde_json::json!({}), WINDOW, 1).is_none());
    }

    #[test]
    fn merge_dedupes_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();

        let item = |text: &str| InterpretiveItem {
            text: text.into(),
            uncertainty: Uncertainty::Low,
            evidence: "I keep canceling plans with my sister.".into(),
            turn_index: 1,
        };

        let mut memory = InterpretiveMemory::default();
        memory.themes = (0..5).map(|i| item(&format!("theme {i}"))).collect();
        merge_into_understanding(&store, "u/p", Some(&memory), 1).unwrap();

        // Re-merge with a duplicate and a new item.
        let mut second = InterpretiveMemory::default();
        second.themes = vec![item("theme 0"), item("a new theme")];
        merge_into_understanding(&store, "u/p", Some(&second), 2).unwrap();

        let u = store.load_understanding("u/p").unwrap();
        let themes = u.get("themes").unwrap().as_array().unwrap();
        assert!(themes.len() <= MAX_ITEMS_PER_LIST);
        assert_eq!(u.get("last_updated_turn").unwrap().as_u64(), Some(2));
        let texts: Vec<&str> = themes
            .iter()
            .filter_map(|t| t.get("text").and_then(|v| v.as_str()))
            .collect();
        assert!(texts.contains(&"a new theme"));
        assert_eq!(texts.iter().filter(|t| **t == "theme 0").count(), 1);
    }

    #[test]
    fn failed_extraction_merges_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        merge_into_understanding(&store, "u/p", None, 3).unwrap();
        let u = store.load_understanding("u/p").unwrap();
        assert_eq!(u.get("extraction_failed").unwrap().as_bool(), Some(true));
        assert_eq!(u.get("last_updated_turn").unwrap().as_u64(), Some(3));
    }
}
