//! Deterministic turn handling that never touches the model.
//!
//! Two layers:
//!   - bare-message short circuits: pulse/status/resume, inbox, constraint
//!     declarations, NL policy commands;
//!   - the explicit command router: only `!<cmd>` and `/cmd <cmd>` prefixes
//!     are commands; anything else falls through to the expert pipeline.
//!
//! Exit contract: `Some(reply)` means the turn is answered here; `None`
//! falls through.

use tracing::info;

use arbor_memory::distill::{distill_facts_raw_to_facts_map, DistillProfile};
use arbor_memory::global::{
    rebuild_user_global_facts_map_from_user_facts, rebuild_user_profile_from_user_facts,
};
use arbor_memory::normalize::normalize_facts_raw_jsonl;
use arbor_memory::policy::parse_policy_command;
use arbor_store::ProjectStore;

use crate::bringup;

/// Max length for the loose pulse/status verb+scope forms.
const PULSE_FORM_MAX_LEN: usize = 60;
/// Max length for a bare constraint declaration.
const CONSTRAINT_DECL_MAX_LEN: usize = 40;

const PULSE_EXACT: &[&str] = &[
    "pulse",
    "project pulse",
    "status",
    "project status",
    "resume",
    "show status",
    "show pulse",
    "where are we",
];

const PULSE_VERB_PREFIXES: &[&str] = &["give me", "show me", "what's the", "whats the"];

const INBOX_FORMS: &[&str] = &["inbox", "pending", "show inbox", "what's pending", "whats pending"];

/// Bare declarations appended to user_rules — never interpreted as a goal.
const CONSTRAINT_DECLS: &[&str] = &[
    "no questions",
    "don't ask",
    "do not ask",
    "no emoji",
    "no emojis",
    "be decisive",
    "one word",
    "word only",
    "no explanations",
    "no hedging",
    "stop hedging",
];

/// `[SEARCH]` / `[NOSEARCH]` routing recognition. The web call itself stays
/// with the host; this only strips the prefix and names the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRoute {
    Force(String),
    NoSearch(String),
}

pub fn parse_search_prefix(message: &str) -> Option<SearchRoute> {
    let lower = message.to_lowercase();
    if lower.starts_with("[nosearch]") {
        return Some(SearchRoute::NoSearch(
            message["[nosearch]".len()..].trim().to_string(),
        ));
    }
    if lower.starts_with("[search]") {
        return Some(SearchRoute::Force(
            message["[search]".len()..].trim().to_string(),
        ));
    }
    None
}

/// Bare-message short circuits. Checked before any model call.
pub fn try_short_circuit(
    store: &ProjectStore,
    user: &str,
    project_full: &str,
    message: &str,
) -> Option<String> {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();

    if is_pulse_form(&lower) {
        info!(project = project_full, "pulse short-circuit");
        return Some(store.build_truth_bound_pulse(project_full));
    }

    if INBOX_FORMS.contains(&lower.as_str()) {
        return Some(summarize_inbox_open(store, user, project_full));
    }

    if is_constraint_declaration(&lower) {
        let rule = trimmed.to_string();
        let _ = store.update_project_state(project_full, |state| {
            let dup = state
                .user_rules
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&rule));
            if !dup {
                state.user_rules.push(rule.clone());
            }
        });
        return Some("Understood.".to_string());
    }

    // "never say X" style rules are durable constraints too.
    if lower.starts_with("never say ") || lower.starts_with("do not say ") {
        let rule = trimmed.to_string();
        let _ = store.update_project_state(project_full, |state| {
            let dup = state
                .user_rules
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&rule));
            if !dup {
                state.user_rules.push(rule.clone());
            }
        });
        return Some("Understood.".to_string());
    }

    if let Some(rule) = parse_policy_command(trimmed) {
        let _ = store.upsert_memory_policy(user, rule);
        return Some("Understood.".to_string());
    }

    None
}

fn is_pulse_form(lower: &str) -> bool {
    if PULSE_EXACT.contains(&lower) {
        return true;
    }
    lower.len() <= PULSE_FORM_MAX_LEN
        && PULSE_VERB_PREFIXES.iter().any(|p| lower.starts_with(p))
        && (lower.contains("pulse") || lower.contains("status"))
}

fn is_constraint_declaration(lower: &str) -> bool {
    lower.len() <= CONSTRAINT_DECL_MAX_LEN
        && CONSTRAINT_DECLS
            .iter()
            .any(|d| lower == *d || lower.starts_with(&format!("{d} ")) || lower.starts_with(&format!("{d},")))
}

/// Deterministic inbox summary: pending bring-ups for this user, pending
/// decision candidates, and any open upload question.
pub fn summarize_inbox_open(store: &ProjectStore, user: &str, project_full: &str) -> String {
    let mut lines = vec!["Inbox (open items):".to_string()];

    let bringups = store.load_pending_bringups(user).unwrap_or_default();
    if !bringups.is_empty() {
        lines.push(format!("Bring-ups waiting: {}", bringups.len()));
        for entry in bringups.iter().take(bringup::MAX_SESSION_BRINGUPS) {
            lines.push(format!("- {}", bringup::neutralize_pronouns(&entry.topic)));
        }
    }

    let candidates = store.load_decision_candidates(project_full).unwrap_or_default();
    let pending: Vec<_> = candidates.iter().filter(|c| c.status == "pending").collect();
    if !pending.is_empty() {
        lines.push(format!("Unconfirmed decisions: {}", pending.len()));
        for c in pending.iter().rev().take(5) {
            lines.push(format!("- {}", c.text));
        }
    }

    let state = store.load_project_state(project_full).unwrap_or_default();
    if let Some(q) = state.pending_upload_question {
        if !q.trim().is_empty() {
            lines.push(format!("Open upload question: {q}"));
        }
    }
    if state
        .pending_bringup_draft
        .as_ref()
        .is_some_and(|d| d.pending)
    {
        lines.push("A bring-up draft is waiting for your yes/no.".to_string());
    }

    if lines.len() == 1 {
        lines.push("- (none)".to_string());
    }
    lines.join("\n")
}

/// System note binding a bare yes/no to the question it answers.
pub fn yes_no_binding_note(message: &str, last_assistant: Option<&str>) -> Option<String> {
    crate::bootstrap::yes_or_no(message)?;
    let last = last_assistant?.trim();
    if !last.contains('?') {
        return None;
    }
    let lower = last.to_lowercase();
    let yes_no_shaped = lower.contains("(yes/no)")
        || lower.contains("yes or no")
        || lower.contains("should i")
        || lower.contains("do you want")
        || lower.contains("would you like")
        || lower.contains("shall i");
    if !yes_no_shaped {
        return None;
    }
    let question = last
        .lines()
        .rev()
        .find(|l| l.contains('?'))
        .unwrap_or(last)
        .trim();
    Some(format!(
        "ANSWER_BINDING: The user's \"{}\" answers this exact question: \"{}\". \
         Act on that answer; do not reinterpret it as a new topic.",
        message.trim(),
        question
    ))
}

// ---------------------------------------------------------------------------
// Explicit command router (!<cmd> / /cmd <cmd>)
// ---------------------------------------------------------------------------

/// Handle an explicit command. `None` when the message carries no command
/// prefix; a prefixed but unknown command gets a short usage reply instead
/// of falling through to the model.
pub fn try_command(
    store: &ProjectStore,
    user: &str,
    project: &str,
    project_full: &str,
    message: &str,
) -> Option<String> {
    let trimmed = message.trim();
    let cmd_text = if let Some(rest) = trimmed.strip_prefix('!') {
        rest.trim_start()
    } else if let Some(rest) = trimmed
        .strip_prefix("/cmd ")
        .or_else(|| trimmed.strip_prefix("/cmd\t"))
    {
        rest.trim_start()
    } else {
        return None;
    };

    let lower = cmd_text.to_lowercase();
    let lower = lower.trim();

    // goal: show / set
    if matches!(lower, "goal" | "show goal" | "goal?") {
        let state = store.load_project_state(project_full).unwrap_or_default();
        let goal = state.goal.trim().to_string();
        return Some(format!(
            "Goal: {}",
            if goal.is_empty() { "Not set yet".to_string() } else { goal }
        ));
    }
    if let Some(rest) = cmd_text.strip_prefix("goal:") {
        let goal = rest.trim().to_string();
        if goal.is_empty() {
            return Some("Usage: goal: <text>".to_string());
        }
        let _ = store.update_project_state(project_full, |state| {
            state.goal = goal.clone();
            state.bootstrap_status = arbor_store::state::BootstrapStatus::Active;
        });
        return Some(format!("Goal set: {goal}"));
    }

    if matches!(lower, "plan" | "show plan") {
        return Some(store.build_truth_bound_pulse(project_full));
    }

    if matches!(lower, "list" | "list project" | "list files" | "list docs" | "ls") {
        return Some(render_listing(store, project, project_full));
    }

    if matches!(lower, "facts" | "facts map" | "facts_map") {
        let path = store.facts_map_path(project_full);
        if path.exists() {
            let rel = format!(
                "projects/{}/state/facts_map.md",
                ProjectStore::canonical_project(project_full)
            );
            return Some(format!("/file?path={rel}"));
        }
        return Some("No facts map yet. Facts distill runs automatically as you chat.".to_string());
    }

    if lower == "facts normalize" {
        return Some(match normalize_facts_raw_jsonl(store, project_full) {
            Ok(receipt) => format!(
                "facts_raw normalized: kept={} dropped={}",
                receipt.kept, receipt.dropped
            ),
            Err(e) => format!("facts normalize failed: {e}"),
        });
    }

    if lower.starts_with("facts distill") {
        let arg = cmd_text.split_whitespace().nth(2).unwrap_or("");
        let Some(profile) = DistillProfile::parse(arg) else {
            return Some("Usage: facts distill therapist|programmer|general".to_string());
        };
        return Some(match distill_facts_raw_to_facts_map(store, project_full, profile) {
            Ok(r) => format!(
                "facts distilled ({}): promoted={} kept_existing={} dropped={}",
                profile.as_str(),
                r.promoted,
                r.kept_existing,
                r.dropped
            ),
            Err(e) => format!("facts distill failed: {e}"),
        });
    }

    if matches!(lower, "t2g rebuild" | "tier2g rebuild") {
        return Some(match rebuild_user_profile_from_user_facts(store, user) {
            Ok(_) => {
                // Tier-2M failure should not block the Tier-2G receipt.
                let _ = rebuild_user_global_facts_map_from_user_facts(store, user);
                format!(
                    "t2g rebuild ok\n- profile: {}\n- facts_raw: {}\n- global_facts_map: {}",
                    store.user_profile_path(user).display(),
                    store.user_facts_raw_path(user).display(),
                    store.user_global_facts_map_path(user).display()
                )
            }
            Err(e) => format!("t2g rebuild failed: {e}"),
        });
    }

    if lower == "decisions" {
        return Some(render_decisions(store, project_full));
    }

    if lower == "notes" {
        return Some(render_notes(store, project_full));
    }

    if lower == "memory" {
        return Some(render_memory_snapshot(store, project_full));
    }

    if let Some(rest) = cmd_text.strip_prefix("couple link ") {
        if user != "Therapist" {
            return Some("Forbidden: only Therapist can link couples.".to_string());
        }
        let Some((a, b)) = rest.split_once('|') else {
            return Some("Usage: !couple link <user_a> | <user_b>".to_string());
        };
        let (a, b) = (a.trim(), b.trim());
        if a.is_empty() || b.is_empty() {
            return Some("Usage: !couple link <user_a> | <user_b>".to_string());
        }
        return Some(match store.link_couple(a, b, project, project) {
            Ok(link) => {
                let _ = store.update_project_state(project_full, |state| {
                    state.active_couple_id = link.couple_id.clone();
                });
                format!("Linked: {a} \u{2194} {b}\nActive couple_id: {}", link.couple_id)
            }
            Err(e) => format!("couple link failed: {e}"),
        });
    }

    if let Some(rest) = cmd_text.strip_prefix("couple use ") {
        if user != "Therapist" {
            return Some("Forbidden: only Therapist can select an active couple.".to_string());
        }
        let couple_id = rest.trim();
        if couple_id.is_empty() {
            return Some("Usage: !couple use <couple_id>".to_string());
        }
        let found = store.get_couple(couple_id).ok().flatten();
        return Some(match found {
            Some(link) if link.status == "active" => {
                let _ = store.update_project_state(project_full, |state| {
                    state.active_couple_id = link.couple_id.clone();
                });
                format!("Active couple_id: {couple_id}")
            }
            _ => format!("Not found or inactive: {couple_id}"),
        });
    }

    if let Some(rest) = cmd_text.strip_prefix("bringup add ") {
        if !bringup::couples_mode(user) {
            return Some("Forbidden: bringup is only available in couple_* accounts.".to_string());
        }
        let parts: Vec<&str> = rest.split('|').map(|p| p.trim()).collect();
        if parts.len() < 3 {
            return Some(
                "Usage: !bringup add <topic> | <tone> | <boundaries> | <urgency(optional)>"
                    .to_string(),
            );
        }
        let Ok(Some(link)) = store.find_active_couple_for(user) else {
            return Some(
                "No active couple link found for this couple_* account. (Therapist must run: !couple link ...)"
                    .to_string(),
            );
        };
        let partner = if link.user_a.eq_ignore_ascii_case(user) {
            link.user_b.clone()
        } else {
            link.user_a.clone()
        };
        let urgency = parts.get(3).copied().unwrap_or("");
        return Some(
            match store.append_bringup_request(user, &partner, parts[0], parts[1], parts[2], urgency, "")
            {
                Ok(entry) => format!("Bring-up queued. id={}", entry.id),
                Err(e) => format!("bringup add failed: {e}"),
            },
        );
    }

    if let Some(rest) = cmd_text.strip_prefix("bringup resolve ") {
        if !bringup::couples_mode(user) {
            return Some("Forbidden: bringup is only available in couple_* accounts.".to_string());
        }
        let id = rest.trim();
        if id.is_empty() {
            return Some("Usage: !bringup resolve <id>".to_string());
        }
        return Some(match store.resolve_bringup_request(user, id) {
            Ok(true) => format!("Bring-up resolved: {id}"),
            _ => format!("Bring-up resolve failed: {id}"),
        });
    }

    if let Some(rest) = cmd_text.strip_prefix("open ") {
        let target = rest.trim();
        if target.is_empty() {
            return Some("Usage: open <filename>".to_string());
        }
        return Some(match store.resolve_file_by_name(project_full, target) {
            Some(rel) => format!("/file?path={rel}"),
            None => format!("Not found in this project: {target}"),
        });
    }

    if matches!(lower, "last answer" | "last assistant" | "last output" | "last assistant output") {
        // Continuity guarantee: when nothing is snapshotted yet, a
        // truth-bound pulse restores context inline.
        return Some(store.build_truth_bound_pulse(project_full));
    }

    Some(format!("Unknown command: {}", first_word(cmd_text)))
}

fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

fn render_listing(store: &ProjectStore, project: &str, project_full: &str) -> String {
    let manifest = store.load_manifest(project_full).unwrap_or_default();
    let mut lines = vec![format!("Project: {project}"), String::new()];

    lines.push("Deliverables:".to_string());
    if manifest.deliverables.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let mut items: Vec<_> = manifest.deliverables.iter().collect();
        items.sort_by_key(|d| std::cmp::Reverse(d.version));
        for d in items.into_iter().take(25) {
            lines.push(format!("- {} [type={}, v{}]", d.title, d.deliverable_type, d.version));
            if !d.path.is_empty() {
                lines.push(format!("  /file?path={}", d.path));
            }
        }
    }

    lines.push(String::new());
    lines.push("Raw files:".to_string());
    if manifest.raw_files.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        for rf in &manifest.raw_files {
            let display = if rf.saved_name.is_empty() {
                &rf.orig_name
            } else {
                &rf.saved_name
            };
            lines.push(format!("- {display}"));
            if !rf.path.is_empty() {
                lines.push(format!("  /file?path={}", rf.path));
            }
        }
    }

    lines.join("\n")
}

fn render_decisions(store: &ProjectStore, project_full: &str) -> String {
    let decisions = store.load_decisions(project_full).unwrap_or_default();
    let candidates = store.load_decision_candidates(project_full).unwrap_or_default();

    let mut lines = vec!["Decisions (confirmed):".to_string()];
    if decisions.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let start = decisions.len().saturating_sub(50);
        for d in &decisions[start..] {
            let day = d.timestamp.split('T').next().unwrap_or("");
            lines.push(format!("- [{day}] {}", d.text));
        }
    }

    lines.push(String::new());
    lines.push("Pending / unconfirmed:".to_string());
    let pending: Vec<_> = candidates
        .iter()
        .filter(|c| c.status == "pending")
        .collect();
    if pending.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let start = pending.len().saturating_sub(25);
        for c in &pending[start..] {
            lines.push(format!("- {}", c.text));
        }
    }
    lines.join("\n")
}

fn render_notes(store: &ProjectStore, project_full: &str) -> String {
    let notes = store.load_upload_notes(project_full).unwrap_or_default();
    let mut lines = vec!["Upload notes:".to_string()];
    if notes.is_empty() {
        lines.push("- (none)".to_string());
        return lines.join("\n");
    }
    let start = notes.len().saturating_sub(80);
    for note in &notes[start..] {
        if note.upload_path.is_empty() {
            lines.push(format!("- {}", note.answer));
        } else {
            lines.push(format!("- {}: {}", note.upload_path, note.answer));
        }
    }
    lines.join("\n")
}

/// Bounded three-source snapshot: notes, decisions, deliverables.
fn render_memory_snapshot(store: &ProjectStore, project_full: &str) -> String {
    let mut lines = vec!["Memory (stored):".to_string(), String::new()];

    let notes = store.load_upload_notes(project_full).unwrap_or_default();
    lines.push("Upload notes:".to_string());
    if notes.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let start = notes.len().saturating_sub(10);
        for note in &notes[start..] {
            lines.push(format!("- {}: {}", note.upload_path, note.answer));
        }
    }

    lines.push(String::new());
    let decisions = store.load_decisions(project_full).unwrap_or_default();
    lines.push("Decisions:".to_string());
    if decisions.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let start = decisions.len().saturating_sub(10);
        for d in &decisions[start..] {
            lines.push(format!("- {}", d.text));
        }
    }

    lines.push(String::new());
    let manifest = store.load_manifest(project_full).unwrap_or_default();
    lines.push("Deliverables:".to_string());
    if manifest.deliverables.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        let start = manifest.deliverables.len().saturating_sub(10);
        for d in &manifest.deliverables[start..] {
            lines.push(format!("- {}", d.title));
            if !d.path.is_empty() {
                lines.push(format!("  /file?path={}", d.path));
            }
        }
    }

    lines.join("\n")
}
