//! Canonical snippet assembly — the bounded, ordered retrieval block.
//!
//! Hard ordering:
//!   1. PROJECT_STATE_JSON excerpt
//!   2. FACTS_MAP_COMPACT (policy-filtered, identity/relationship pinned)
//!   3. Global user memory (Tier-2G + Tier-2M) on recall/status
//!   4. File evidence bridge for the focused object
//!   5. Excel bridges on comparison intent
//!   6. Labeled ephemeral search evidence
//!   7. Assumption binding notes
//! Plus PROJECT_PULSE_TRUTH_BOUND on status turns. Every section is
//! char-capped; a single excerpt tail is truncated to the configured limit.

use serde_json::json;
use tracing::debug;

use arbor_core::config::LimitsConfig;
use arbor_memory::distill::{build_compact_facts, render_compact_view, DistillProfile};
use arbor_memory::global::{render_global_map_excerpt, render_profile_excerpt};
use arbor_memory::policy;
use arbor_store::aof::ActiveObject;
use arbor_store::ProjectStore;

use crate::error::Result;
use crate::intent::Intent;
use crate::search::SearchEvidence;

/// Artifact preference chain for non-image focused files.
const FILE_BRIDGE_CHAIN: &[&str] = &[
    "plan_ocr",
    "ocr_text",
    "pdf_text",
    "image_caption",
    "file_overview",
];

/// Max workbooks bridged on comparison turns.
const MAX_EXCEL_BRIDGES: usize = 3;
/// Max search results rendered into the excerpt.
const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CanonicalSnippets {
    /// The assembled block, sections joined by blank lines.
    pub text: String,
    /// Section labels in order, for audit and tests.
    pub sections: Vec<String>,
    /// A PROJECT_PULSE_TRUTH_BOUND section is present.
    pub pulse_truth_bound: bool,
    pub evidence_present: bool,
    pub partner_context_injected: bool,
    /// Lowercased claim terms a recall answer may ground on.
    pub recall_allow_terms: Vec<String>,
    /// Excerpt injected for the focused object, if any.
    pub aof_excerpt: Option<String>,
}

pub struct RetrievalInput<'a> {
    pub project_full: &'a str,
    pub user: &'a str,
    pub intent: Intent,
    pub message: &'a str,
    pub aof: Option<&'a ActiveObject>,
    pub aof_in_scope: bool,
    pub image_referential: bool,
    pub search: Option<&'a SearchEvidence>,
    pub profile: DistillProfile,
    /// Neutralized partner themes (couples mode), if any.
    pub partner_context: Option<String>,
}

/// Assemble the canonical snippets for a turn.
pub fn build_canonical_snippets(
    store: &ProjectStore,
    limits: &LimitsConfig,
    input: &RetrievalInput<'_>,
) -> Result<CanonicalSnippets> {
    let mut out = CanonicalSnippets::default();
    let mut sections: Vec<(String, String)> = Vec::new();

    // 1. Project state excerpt.
    let state = store.load_project_state(input.project_full)?;
    let state_json = json!({
        "goal": state.goal,
        "project_mode": state.project_mode,
        "bootstrap_status": state.bootstrap_status,
        "expert_frame": {
            "label": state.expert_frame.label,
            "status": state.expert_frame.status,
        },
        "current_focus": state.current_focus,
        "next_actions": state.next_actions,
        "key_files": state.key_files,
    });
    sections.push((
        "PROJECT_STATE_JSON".to_string(),
        format!("PROJECT_STATE_JSON:\n{state_json}"),
    ));

    // 2. Compact facts map, read-time policy filter applied.
    let rules = store.load_memory_policies(input.user).unwrap_or_default();
    let mut compact = build_compact_facts(store, input.project_full, input.profile)?;
    compact.retain(|f| {
        policy::decision_for_claim(&rules, &f.claim, &f.entity_key).allow_resurface
    });
    if !compact.is_empty() {
        out.recall_allow_terms = compact
            .iter()
            .map(|f| f.claim.to_lowercase())
            .collect();
        sections.push(("FACTS_MAP_COMPACT".to_string(), render_compact_view(&compact)));
    }

    // 3. Global user memory for recall/status continuity.
    if matches!(input.intent, Intent::Recall | Intent::Status) {
        let profile = store.load_user_profile(input.user)?;
        let excerpt = render_profile_excerpt(&profile);
        if !excerpt.is_empty() {
            push_allow_terms(&mut out.recall_allow_terms, &excerpt);
            sections.push(("GLOBAL_USER_PROFILE".to_string(), excerpt));
        }
        let map = store.load_global_facts_map(input.user)?;
        let excerpt = render_global_map_excerpt(&map);
        if !excerpt.is_empty() {
            push_allow_terms(&mut out.recall_allow_terms, &excerpt);
            sections.push(("GLOBAL_USER_FACTS".to_string(), excerpt));
        }
    }

    // Status turns carry the truth-bound pulse so downstream checks can
    // verify nothing was invented.
    if input.intent == Intent::Status {
        let pulse = store.build_truth_bound_pulse(input.project_full);
        sections.push((
            "PROJECT_PULSE_TRUTH_BOUND".to_string(),
            format!("PROJECT_PULSE_TRUTH_BOUND:\n{pulse}"),
        ));
        out.pulse_truth_bound = true;
    }

    // 4. Focused-object evidence bridge.
    if input.aof_in_scope {
        if let Some(aof) = input.aof {
            if let Some((label, text)) = file_bridge(store, input, aof, limits) {
                out.aof_excerpt = Some(text.clone());
                sections.push((label.clone(), format!("{label}:\n{text}")));
            }
        }
    }

    // 5. Excel bridges on comparison intent.
    if comparison_intent(input.message) {
        for (label, text) in excel_bridges(store, input.project_full, limits) {
            sections.push((label.clone(), format!("{label}:\n{text}")));
        }
    }

    // 6. Search evidence (ephemeral).
    if let Some(evidence) = input.search {
        sections.push((
            "SEARCH_EVIDENCE".to_string(),
            evidence.render_excerpt(MAX_SEARCH_RESULTS),
        ));
        out.evidence_present = true;
    }

    // 7. Assumption binding.
    if let Some(note) = assumption_note(input.message) {
        sections.push(("ASSUMPTIONS".to_string(), note));
    }

    // Partner context last: it is advisory, never authoritative.
    if let Some(ctx) = &input.partner_context {
        if !ctx.is_empty() {
            sections.push((
                "PARTNER_CONTEXT".to_string(),
                format!("PARTNER_CONTEXT:\n{ctx}"),
            ));
            out.partner_context_injected = true;
        }
    }

    out.sections = sections.iter().map(|(label, _)| label.clone()).collect();
    out.text = sections
        .into_iter()
        .map(|(_, body)| body)
        .collect::<Vec<_>>()
        .join("\n\n");

    debug!(
        project = input.project_full,
        sections = ?out.sections,
        chars = out.text.len(),
        "canonical snippets assembled"
    );
    Ok(out)
}

/// Pick the evidence bridge for the focused object.
///
/// Images with cached semantics inject those first; OCR/caption are
/// secondary. Everything else walks the artifact chain.
fn file_bridge(
    store: &ProjectStore,
    input: &RetrievalInput<'_>,
    aof: &ActiveObject,
    limits: &LimitsConfig,
) -> Option<(String, String)> {
    if aof.is_image() && input.image_referential {
        if let Some((_, text)) = store.find_latest_artifact_text_for_file(
            input.project_full,
            &aof.rel_path,
            &["image_semantics"],
        ) {
            return Some((
                "IMAGE_SEMANTICS".to_string(),
                truncate_tail(&text, limits.excerpt_max_chars),
            ));
        }
    }
    let (ty, text) = store.find_latest_artifact_text_for_file(
        input.project_full,
        &aof.rel_path,
        FILE_BRIDGE_CHAIN,
    )?;
    Some((
        format!("FILE_EVIDENCE_{}", ty.to_uppercase()),
        truncate_tail(&text, limits.excerpt_max_chars),
    ))
}

/// Up to three newest workbooks' blueprint + overview.
fn excel_bridges(
    store: &ProjectStore,
    project_full: &str,
    limits: &LimitsConfig,
) -> Vec<(String, String)> {
    let Ok(manifest) = store.load_manifest(project_full) else {
        return Vec::new();
    };
    let mut blueprints: Vec<_> = manifest
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == "excel_blueprint")
        .collect();
    blueprints.sort_by_key(|a| std::cmp::Reverse(a.version));

    let mut out = Vec::new();
    for bp in blueprints.into_iter().take(MAX_EXCEL_BRIDGES) {
        if let Ok(text) = store.read_artifact_text(project_full, &bp.path) {
            out.push((
                format!("EXCEL_BLUEPRINT_{}", out.len() + 1),
                truncate_tail(&text, limits.excerpt_max_chars),
            ));
        }
        if !bp.source_file.is_empty() {
            if let Some((_, overview)) = store.find_latest_artifact_text_for_file(
                project_full,
                &bp.source_file,
                &["file_overview"],
            ) {
                out.push((
                    format!("EXCEL_OVERVIEW_{}", out.len()),
                    truncate_tail(&overview, limits.excerpt_max_chars),
                ));
            }
        }
    }
    out
}

fn comparison_intent(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("compare")
        || lower.contains(" vs ")
        || lower.contains("versus")
        || lower.contains("difference between")
}

/// Quote declared assumptions back as a binding note.
fn assumption_note(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    let idx = lower.find("assume ").or_else(|| lower.find("assuming "))?;
    let tail = &message[idx..];
    let end = tail.find(['.', '\n']).unwrap_or(tail.len());
    let assumption = tail[..end].trim();
    if assumption.is_empty() {
        return None;
    }
    Some(format!(
        "ASSUMPTIONS: The user declared: \"{assumption}\". Treat it as binding for this turn; do not re-litigate it."
    ))
}

/// Keep the head, cut the tail at a char boundary.
fn truncate_tail(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... excerpt truncated ...]", &text[..end])
}

fn push_allow_terms(terms: &mut Vec<String>, excerpt: &str) {
    for line in excerpt.lines().skip(1) {
        let line = line.trim_start_matches('-').trim().to_lowercase();
        if !line.is_empty() {
            terms.push(line);
        }
    }
}
