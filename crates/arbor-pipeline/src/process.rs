//! Turn orchestration — every chat message flows through `run_chat_turn`.
//!
//! Stage order (the ordering guarantees live here):
//!   1. counter increment + anchor capture (exactly once, before distill)
//!   2. pending bring-up draft resolution
//!   3. explicit commands and deterministic short-circuits
//!   4. Tier-1 capture → normalize → distill (same-turn, in order)
//!   5. intent + continuity classification
//!   6. retrieval assembly
//!   7. generation with CKCL/CKSG, safety, and constraint gates
//!   8. interpretive memory merge
//!   9. audit write (at most once), chat log append
//!
//! Disk writes along the way are best-effort: a failed write never blocks
//! the reply.

use serde_json::Value;
use tracing::{debug, info, warn};

use arbor_core::paths::{safe_project_name, safe_user_name};
use arbor_memory::distill::{
    build_compact_facts, distill_facts_raw_to_facts_map, should_distill, DistillProfile,
};
use arbor_memory::global::{
    rebuild_user_global_facts_map_from_user_facts, rebuild_user_profile_from_user_facts,
};
use arbor_memory::interpretive;
use arbor_memory::normalize::normalize_facts_raw_jsonl;
use arbor_memory::tier1;
use arbor_store::state::TimeAnchor;

use crate::audit::TurnTrace;
use crate::bootstrap;
use crate::bringup;
use crate::commitment;
use crate::constraints;
use crate::context::TurnContext;
use crate::error::Result;
use crate::generate::{self, ComposeInput};
use crate::intent::{self, Intent, IntentResult};
use crate::provider::{extract_first_json, ChatMessage};
use crate::retrieval::{self, RetrievalInput};
use crate::safety;
use crate::search::parse_search_evidence;
use crate::shortcircuit::{self, SearchRoute};
use crate::timenote;

/// Window size (user/assistant pairs) for interpretive extraction.
const INTERPRETIVE_WINDOW_PAIRS: usize = 8;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract durable, recallable facts from one user message. Output ONLY a\n\
JSON object: {\"facts\": [{\"claim\": \"...\", \"slot\":\n\
\"identity|relationship|preference|possession|routine|constraint|context|event|other\",\n\
\"subject\": \"user|other|project|unknown\", \"entity_key\": \"...\",\n\
\"evidence_quote\": \"<verbatim substring of the message>\", \"confidence\": 0.8}]}\n\
Rules: explicit first-person statements only. Never extract feelings,\n\
speculation, questions, or opinions. An empty list is a good answer.";

const INTERPRETIVE_SYSTEM_PROMPT: &str = "\
You distill interpretive memory from a conversation window. Output ONLY a\n\
JSON object with keys entities, relationship_dynamics, themes, values_goals,\n\
open_ambiguities; each an array of {\"text\": \"...\", \"uncertainty\":\n\
\"low|medium|high\", \"evidence\": \"<verbatim substring of the window>\"}.\n\
Omit anything you cannot quote verbatim from the window.";

/// One inbound chat turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user: String,
    /// Short project name (no user segment).
    pub project: String,
    pub message: String,
    /// Bounded recent tail, oldest first.
    pub history: Vec<ChatMessage>,
    /// Raw `search_evidence_v1` object from the host, when a search ran.
    pub search_evidence: Option<Value>,
}

/// The user-visible result plus what the host needs for bookkeeping.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub trace_id: String,
    pub intent: Option<IntentResult>,
    pub short_circuited: bool,
}

/// Run one full chat turn.
pub async fn run_chat_turn<C: TurnContext>(ctx: &C, req: &TurnRequest) -> Result<TurnOutcome> {
    let store = ctx.store();
    let user = safe_user_name(&req.user);
    let project_full = safe_project_name(&format!("{}/{}", user, req.project));
    let project_short = safe_project_name(&req.project);
    let mut trace = TurnTrace::new();
    let now = ctx.now();

    // [SEARCH]/[NOSEARCH] routing is recognition only; the host owns the web.
    let (message, do_search) = match shortcircuit::parse_search_prefix(&req.message) {
        Some(SearchRoute::Force(clean)) => (clean, true),
        Some(SearchRoute::NoSearch(clean)) => (clean, false),
        None => (req.message.trim().to_string(), false),
    };
    let search = req
        .search_evidence
        .as_ref()
        .and_then(parse_search_evidence);
    let search_len = search.as_ref().map(|s| s.results.len()).unwrap_or(0);

    let _ = store.append_chat_log(&project_full, "user", &message);

    // Exactly one counter increment per turn, before any distill decision.
    // Anchors ride the same write.
    let anchor = timenote::detect_anchor(&message);
    let state = store.update_project_state(&project_full, |s| {
        s.facts_turn_counter += 1;
        if let Some(label) = &anchor {
            s.push_time_anchor(
                TimeAnchor {
                    label: label.clone(),
                    ts: now.to_rfc3339(),
                    tz: String::new(),
                },
                timenote::ANCHOR_DEDUPE_SECS,
            );
        }
    })?;
    let turn_index = state.facts_turn_counter;

    // Pending bring-up draft: the next yes/no resolves and clears it.
    if let Some(draft) = state
        .pending_bringup_draft
        .as_ref()
        .filter(|d| d.pending)
        .cloned()
    {
        if let Some(answer) = bootstrap::yes_or_no(&message) {
            let reply = resolve_bringup_draft(store, &user, &project_full, &draft.topic, answer);
            trace.note("path", "bringup_draft_resolution");
            return finish_short_circuit(
                ctx, &mut trace, &project_full, &message, do_search, search_len, reply,
            );
        }
    }

    // Explicit commands, then bare deterministic short-circuits.
    if let Some(reply) =
        shortcircuit::try_command(store, &user, &project_short, &project_full, &message)
    {
        trace.note("path", "command");
        return finish_short_circuit(
            ctx, &mut trace, &project_full, &message, do_search, search_len, reply,
        );
    }
    if let Some(reply) = shortcircuit::try_short_circuit(store, &user, &project_full, &message) {
        trace.note("path", "short_circuit");
        trace.note("intent_path_skipped", "status");
        return finish_short_circuit(
            ctx, &mut trace, &project_full, &message, do_search, search_len, reply,
        );
    }

    // Couples: a conservative bring-up ask becomes a pending draft.
    if bringup::couples_mode(&user) {
        if let Some(topic) = bringup::detect_bringup_request(&message) {
            let (draft, question) = bringup::draft_for_topic(&topic);
            let _ = store.update_project_state(&project_full, |s| {
                s.pending_bringup_draft = Some(draft.clone());
            });
            trace.note("path", "bringup_draft_created");
            return finish_short_circuit(
                ctx, &mut trace, &project_full, &message, do_search, search_len, question,
            );
        }
    }

    // ------------------------------------------------------------------
    // Tier-1 capture → normalize → distill (same turn, in order).
    // ------------------------------------------------------------------
    let rules = store.load_memory_policies(&user).unwrap_or_default();
    let candidates = extract_tier1_candidates(ctx, &message, turn_index).await;

    let mut appended = 0usize;
    let mut mirrored = 0usize;
    let mut policy_denied = 0usize;
    for fact in &candidates {
        match tier1::append_fact_raw_candidate(store, &project_full, fact, &message, &rules) {
            Ok(outcome) => {
                if outcome.stored {
                    appended += 1;
                }
                if outcome.mirrored_global {
                    mirrored += 1;
                }
                if outcome.policy_denied {
                    policy_denied += 1;
                }
            }
            Err(e) => debug!(error = %e, "tier-1 candidate rejected"),
        }
    }
    if policy_denied > 0 {
        trace.note("policy_denied", policy_denied);
    }

    let lower = message.to_lowercase();
    let recall_shaped = intent::recall_shaped(&lower);
    let profile = distill_profile_for(&state.expert_frame.label);

    if appended > 0 {
        let _ = normalize_facts_raw_jsonl(store, &project_full);
        let _ = store.update_project_state(&project_full, |s| s.facts_dirty = true);
    }
    let state = store.load_project_state(&project_full)?;
    if should_distill(&state, appended > 0, recall_shaped) {
        match distill_facts_raw_to_facts_map(store, &project_full, profile) {
            Ok(receipt) => {
                trace.note("distilled", serde_json::json!(receipt));
                let _ = store.update_project_state(&project_full, |s| s.facts_dirty = false);
            }
            Err(e) => warn!(error = %e, "distill failed (turn continues)"),
        }
    }
    // Tier-2G/2M rebuild only when this turn mirrored global-eligible facts.
    if mirrored > 0 {
        if let Err(e) = rebuild_user_profile_from_user_facts(store, &user) {
            warn!(error = %e, "tier-2g rebuild failed");
        }
        let _ = rebuild_user_global_facts_map_from_user_facts(store, &user);
    }

    // Bootstrap: adopt the first substantive message as the goal.
    let mut adopted_goal = None;
    let mut state = store.update_project_state(&project_full, |s| {
        adopted_goal = bootstrap::maybe_adopt_goal(s, &message);
    })?;
    if let Some(goal) = adopted_goal {
        trace.note("goal_adopted", goal);
    }

    // Expert frame: explicit set, yes/no confirmation, or keyword proposal.
    if let Some(label) = bootstrap::parse_explicit_expert(&message) {
        state = store.update_project_state(&project_full, |s| {
            s.expert_frame.status = "active".to_string();
            s.expert_frame.label = label.clone();
            s.expert_frame.set_reason = "explicit user directive".to_string();
            s.expert_frame.updated_at = arbor_core::paths::now_iso();
        })?;
    } else if state.expert_frame.is_proposed() && bootstrap::yes_or_no(&message).is_some() {
        state = store.update_project_state(&project_full, |s| {
            bootstrap::resolve_frame_proposal(s, &message);
        })?;
    } else if state.expert_frame.status.is_empty() {
        if let Some(frame) = bootstrap::infer_expert_frame(&message) {
            state = store.update_project_state(&project_full, |s| {
                s.expert_frame = frame.clone();
            })?;
        }
    }

    // ------------------------------------------------------------------
    // Classification.
    // ------------------------------------------------------------------
    let intent_result = intent::classify_intent(ctx.model(), &message, &req.history).await;
    let continuity = intent::classify_continuity(ctx.model(), &message, &req.history).await;
    trace.note("intent", intent_result.intent.as_str());

    // Status is deterministic: the model never authors it.
    if intent_result.intent == Intent::Status {
        let reply = store.build_truth_bound_pulse(&project_full);
        trace.note("path", "deterministic_status");
        let _ = store.append_chat_log(&project_full, "assistant", &reply);
        trace.write(
            store, &project_full, &message, do_search, search_len,
            &state.expert_frame.label, Some(&intent_result), false, reply.len(),
        );
        return Ok(TurnOutcome {
            reply,
            trace_id: trace.trace_id.clone(),
            intent: Some(intent_result),
            short_circuited: false,
        });
    }

    // ------------------------------------------------------------------
    // AOF scoping + retrieval.
    // ------------------------------------------------------------------
    let aof = store.load_active_object(&project_full);
    let focus = crate::aof::focus_in_scope(&message, aof.as_ref());
    if focus == crate::aof::FocusDecision::Drop {
        let _ = store.clear_active_object(&project_full);
    }
    let aof_in_scope = focus == crate::aof::FocusDecision::InScope && aof.is_some();
    let image_ref = crate::aof::image_referential(&message, aof.as_ref());

    let partner_context = if bringup::couples_mode(&user) {
        let pending = store.load_pending_bringups(&user).unwrap_or_default();
        let block = bringup::render_session_bringups(&pending);
        if block.is_empty() { None } else { Some(block) }
    } else {
        None
    };

    let snippets = retrieval::build_canonical_snippets(
        store,
        ctx.limits(),
        &RetrievalInput {
            project_full: &project_full,
            user: &user,
            intent: intent_result.intent,
            message: &message,
            aof: aof.as_ref(),
            aof_in_scope,
            image_referential: image_ref,
            search: search.as_ref(),
            profile,
            partner_context,
        },
    )?;
    trace.note("retrieval_sections", serde_json::json!(snippets.sections));

    // ------------------------------------------------------------------
    // Generation.
    // ------------------------------------------------------------------
    let profile_data = store.load_user_profile(&user).unwrap_or_default();
    let time_note = timenote::time_note_for(
        &profile_data.identity.timezone,
        ctx.default_timezone(),
        &profile_data.identity.birthdate,
        &state.time_anchors_v1,
        now,
    );

    let commitment = commitment::extract_commitment(&req.history, &message);
    let crowd_locked =
        commitment.is_committed() && commitment::crowd_knowledge_score(&message) >= 1;

    let active_expert = if state.expert_frame.is_active() {
        state.expert_frame.label.clone()
    } else {
        String::new()
    };
    let mode = generate::select_mode(
        intent_result.intent,
        state.project_mode,
        &active_expert,
        snippets.evidence_present,
    );
    let lookup_mode = mode == generate::GenMode::Lookup;
    let lookup_note = if lookup_mode {
        generate::lookup_directive(search.as_ref())
    } else {
        None
    };

    let decisions = store.load_decisions(&project_full).unwrap_or_default();
    let manifest = store.load_manifest(&project_full).unwrap_or_default();
    let suppress_label = bootstrap::suppress_frame_label(
        !decisions.is_empty(),
        !manifest.deliverables.is_empty(),
        !state.current_focus.trim().is_empty(),
    );

    let last_assistant = req
        .history
        .iter()
        .rev()
        .find(|m| matches!(m.role, crate::provider::ChatRole::Assistant))
        .map(|m| m.content.clone());
    let yes_no_note = shortcircuit::yes_no_binding_note(&message, last_assistant.as_deref());

    let compose = ComposeInput {
        mode,
        message: &message,
        history: &req.history,
        snippets: &snippets,
        time_note: &time_note,
        expert_frame: &state.expert_frame,
        suppress_frame_label: suppress_label,
        continuity: Some(&continuity),
        yes_no_note: yes_no_note.as_deref(),
        commitment: Some(&commitment),
        crowd_locked,
        lookup_note: lookup_note.as_deref(),
    };
    let messages = generate::compose_messages(&compose);

    let mut reply = match ctx.model().complete(&messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "generation failed; deterministic fallback");
            trace.note("model_error", e.to_string());
            safety::fallback_reply(&snippets)
        }
    };

    // CKCL post-filter: strip a leaked refusal preamble.
    if crowd_locked {
        reply = commitment::strip_refusal_preamble(&reply);
    }

    // CKSG: one bounded regeneration on stall.
    if crowd_locked && commitment::has_stall_markers(&reply) {
        trace.note("cksg_retry", true);
        let mut retry_messages = messages.clone();
        retry_messages.insert(
            retry_messages.len() - 1,
            ChatMessage::system(commitment::cksg_enforcement_note()),
        );
        if let Ok(second) = ctx.model().complete(&retry_messages).await {
            reply = commitment::strip_refusal_preamble(&second);
        }
    }

    // Safety gate.
    let couples_turn = bringup::couples_mode(&user);
    let verdict = safety::check_draft(intent_result.intent, &reply, &snippets, couples_turn);
    if !verdict.clean() {
        trace.note("safety_reasons", serde_json::json!(verdict.reasons));
        if let Some(replacement) = verdict.replacement {
            reply = replacement;
        }
    }

    // Constraints: one bounded regeneration, then ship the retried draft.
    let constraints = constraints::compile_constraints(&state, &message, &active_expert);
    let violations = constraints::validate_output(&reply, &constraints);
    if !violations.is_empty() {
        trace.note("constraint_violations", serde_json::json!(violations));
        let retry_note = constraints::build_retry_system_note(&constraints, &violations);
        let mut retry_messages = messages.clone();
        retry_messages.insert(retry_messages.len() - 1, ChatMessage::system(retry_note));
        if let Ok(second) = ctx.model().complete(&retry_messages).await {
            let second_violations = constraints::validate_output(&second, &constraints);
            if !second_violations.is_empty() {
                debug!(?second_violations, "constraint retry still violating; shipping retried draft");
            }
            reply = second;
        }
    }

    // Couples neutral-phrasing pass.
    reply = safety::couples_rewrite(&reply, snippets.partner_context_injected);

    // ------------------------------------------------------------------
    // Interpretive memory: always merges (sentinel on failure).
    // ------------------------------------------------------------------
    run_interpretive_pass(ctx, &project_full, &req.history, &message, &reply, turn_index).await;

    let _ = store.append_chat_log(&project_full, "assistant", &reply);
    trace.write(
        store, &project_full, &message, do_search, search_len,
        &state.expert_frame.label, Some(&intent_result), lookup_mode, reply.len(),
    );

    info!(
        project = %project_full,
        intent = intent_result.intent.as_str(),
        chars = reply.len(),
        "turn complete"
    );

    Ok(TurnOutcome {
        reply,
        trace_id: trace.trace_id.clone(),
        intent: Some(intent_result),
        short_circuited: false,
    })
}

/// Model extraction with the deterministic conservative fallback.
async fn extract_tier1_candidates<C: TurnContext>(
    ctx: &C,
    message: &str,
    turn_index: u64,
) -> Vec<arbor_memory::types::RawFact> {
    let messages = vec![
        ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
        ChatMessage::user(message),
    ];
    match ctx.model().complete(&messages).await {
        Ok(text) => {
            let parsed = extract_first_json(&text);
            let from_model = parsed
                .map(|v| tier1::candidates_from_model_json(&v, message, turn_index))
                .unwrap_or_default();
            if from_model.is_empty() {
                tier1::extract_candidates_deterministic(message, turn_index)
            } else {
                from_model
            }
        }
        Err(_) => tier1::extract_candidates_deterministic(message, turn_index),
    }
}

/// Pick the distill profile from the active frame label.
fn distill_profile_for(frame_label: &str) -> DistillProfile {
    let lower = frame_label.to_lowercase();
    if lower.contains("therap") || lower.contains("counsel") {
        DistillProfile::Therapist
    } else if lower.contains("engineer") || lower.contains("program") {
        DistillProfile::Programmer
    } else {
        DistillProfile::General
    }
}

/// YES queues the neutralized bring-up to the partner; NO discards and asks
/// for a one-sentence theme. Either way the draft clears.
fn resolve_bringup_draft(
    store: &arbor_store::ProjectStore,
    user: &str,
    project_full: &str,
    topic: &str,
    answer: bool,
) -> String {
    let _ = store.update_project_state(project_full, |s| {
        s.pending_bringup_draft = None;
    });
    if !answer {
        return "Dropped. If you still want it raised, give me a one-sentence theme instead."
            .to_string();
    }
    let Ok(Some(link)) = store.find_active_couple_for(user) else {
        return "No active couple link exists, so nothing was queued. (Therapist must run: !couple link ...)"
            .to_string();
    };
    let partner = if link.user_a.eq_ignore_ascii_case(user) {
        link.user_b.clone()
    } else {
        link.user_a.clone()
    };
    let neutral_topic = bringup::neutralize_pronouns(topic);
    match store.append_bringup_request(user, &partner, &neutral_topic, "gentle", "", "", "") {
        Ok(_) => "Queued for your partner as a theme. It will surface gently, without attribution."
            .to_string(),
        Err(e) => format!("Couldn't queue that: {e}"),
    }
}

/// Interpretive extraction over the recent window; sentinel merge on failure.
async fn run_interpretive_pass<C: TurnContext>(
    ctx: &C,
    project_full: &str,
    history: &[ChatMessage],
    message: &str,
    reply: &str,
    turn_index: u64,
) {
    let mut window = String::new();
    let tail_len = (INTERPRETIVE_WINDOW_PAIRS * 2).min(history.len());
    for m in &history[history.len() - tail_len..] {
        let role = match m.role {
            crate::provider::ChatRole::Assistant => "assistant",
            _ => "user",
        };
        window.push_str(&format!("{role}: {}\n", m.content));
    }
    window.push_str(&format!("user: {message}\n"));
    window.push_str(&format!("assistant: {reply}\n"));

    let messages = vec![
        ChatMessage::system(INTERPRETIVE_SYSTEM_PROMPT),
        ChatMessage::user(window.clone()),
    ];
    let extraction = match ctx.model().complete(&messages).await {
        Ok(text) => extract_first_json(&text)
            .and_then(|v| interpretive::validate_extraction(&v, &window, turn_index)),
        Err(_) => None,
    };
    if let Err(e) = interpretive::merge_into_understanding(
        ctx.store(),
        project_full,
        extraction.as_ref(),
        turn_index,
    ) {
        warn!(error = %e, "understanding merge failed (ignored)");
    }
}

/// Common exit for short-circuited turns: chat log, audit, outcome.
fn finish_short_circuit<C: TurnContext>(
    ctx: &C,
    trace: &mut TurnTrace,
    project_full: &str,
    message: &str,
    do_search: bool,
    search_len: usize,
    reply: String,
) -> Result<TurnOutcome> {
    let store = ctx.store();
    let _ = store.append_chat_log(project_full, "assistant", &reply);
    trace.write(
        store, project_full, message, do_search, search_len, "", None, false, reply.len(),
    );
    Ok(TurnOutcome {
        reply,
        trace_id: trace.trace_id.clone(),
        intent: None,
        short_circuited: true,
    })
}

/// Host hook: record an upload answer and refresh the compact facts view.
/// Kept thin; the upload pipeline owns artifact production.
pub fn note_upload_answer<C: TurnContext>(
    ctx: &C,
    project_full: &str,
    upload_path: &str,
    answer: &str,
) -> Result<()> {
    ctx.store()
        .append_upload_note(project_full, upload_path, answer)?;
    let _ = build_compact_facts(ctx.store(), project_full, DistillProfile::General);
    Ok(())
}
