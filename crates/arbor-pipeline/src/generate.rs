//! Grounded generation: mode selection and strict message assembly.
//!
//! The messages list is built in a fixed order — system prompt for the mode,
//! then the deterministic system notes (locks, time, bring-ups, expert frame),
//! then the bounded chat tail, then continuity/binding notes, then the
//! canonical snippets blob, and finally the user message. Order is part of
//! the contract; tests pin it.

use arbor_store::state::{ExpertFrame, ProjectMode};

use crate::commitment::Commitment;
use crate::intent::{Continuity, ContinuityResult, Intent};
use crate::provider::{ChatMessage, ChatRole};
use crate::retrieval::CanonicalSnippets;
use crate::search::SearchEvidence;

/// Bounded chat tail included in generation.
const GEN_HISTORY_PAIRS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenMode {
    Grounded,
    HybridGrounded,
    ConversationalExpert,
    DefaultExpert,
    Lookup,
}

const GROUNDED_SYSTEM_PROMPT: &str = "\
You are a project assistant answering from stored project memory.\n\
Answer ONLY from the canonical snippets provided. If the answer is not in\n\
them, say \"Not recorded / ambiguous.\" and ask one clarifying question.\n\
Never invent stored facts, decisions, or status lines.";

const HYBRID_GROUNDED_SYSTEM_PROMPT: &str = "\
You are a project assistant answering from stored project memory, with room\n\
for clearly-labeled reasoning. Ground every stored-fact claim in the\n\
canonical snippets; when you go beyond them, say so in one short clause.\n\
Never invent stored facts or status lines.";

const CONVERSATIONAL_EXPERT_PROMPT: &str = "\
You are the project's working expert. Stay inside the active expert frame's\n\
directive. Be concrete and useful; prefer doing the work over describing it.\n\
Use the canonical snippets as your project memory.";

const DEFAULT_EXPERT_PROMPT: &str = "\
You are a direct, no-frills project assistant. No flattery, no filler, no\n\
emoji. Answer plainly, commit to recommendations, and keep questions to the\n\
single most useful one. Use the canonical snippets as your project memory.";

const LOOKUP_SYSTEM_PROMPT: &str = "\
You are answering an outside-world question from the search evidence\n\
provided in the canonical snippets. Evidence outranks your priors. Never\n\
claim you lack access to information when evidence is present. Cite 1-3\n\
URLs from the evidence. If the evidence is thin, enumerate what IS\n\
confirmed before hedging, and end with one refinement question.";

/// Default-onramp note: stops cold-start scope questions.
const DEFAULT_ONRAMP_NOTE: &str = "\
ONRAMP: If the user's message is answerable as-is, answer it. Do not open\n\
with questions about what they want unless the message is genuinely empty\n\
of intent.";

/// Select the generation mode for a turn.
pub fn select_mode(
    intent: Intent,
    project_mode: ProjectMode,
    active_expert: &str,
    evidence_present: bool,
) -> GenMode {
    if evidence_present || intent == Intent::Lookup {
        return GenMode::Lookup;
    }
    match intent {
        Intent::Recall | Intent::Status => {
            if project_mode == ProjectMode::Hybrid {
                GenMode::HybridGrounded
            } else {
                GenMode::Grounded
            }
        }
        _ => {
            let expert = active_expert.trim().to_lowercase();
            if expert.is_empty() || expert == "default" {
                GenMode::DefaultExpert
            } else {
                GenMode::ConversationalExpert
            }
        }
    }
}

fn system_prompt_for(mode: GenMode) -> &'static str {
    match mode {
        GenMode::Grounded => GROUNDED_SYSTEM_PROMPT,
        GenMode::HybridGrounded => HYBRID_GROUNDED_SYSTEM_PROMPT,
        GenMode::ConversationalExpert => CONVERSATIONAL_EXPERT_PROMPT,
        GenMode::DefaultExpert => DEFAULT_EXPERT_PROMPT,
        GenMode::Lookup => LOOKUP_SYSTEM_PROMPT,
    }
}

/// Evidence-enforcement directive for lookup turns.
///
/// Affirmative evidence (or a primary-confirmed authority) forbids
/// dodge/refusal openings outright; thin evidence requires stating what IS
/// confirmed before hedging.
pub fn lookup_directive(evidence: Option<&SearchEvidence>) -> Option<String> {
    let evidence = evidence?;
    if evidence.has_affirmative_markers() || evidence.primary_confirmed() {
        Some(
            "EVIDENCE_ENFORCEMENT: The evidence affirmatively answers the question.\n\
             Open by stating the confirmed answer. Do not open with \"I can't\",\n\
             \"I don't have access\", or any refusal shape. Include 1-3 evidence URLs."
                .to_string(),
        )
    } else {
        Some(
            "EVIDENCE_ENFORCEMENT: The evidence is thin. First enumerate what IS\n\
             confirmed by it, then hedge if needed, then ask one refinement question."
                .to_string(),
        )
    }
}

/// Everything the composer needs beyond the snippets.
pub struct ComposeInput<'a> {
    pub mode: GenMode,
    pub message: &'a str,
    pub history: &'a [ChatMessage],
    pub snippets: &'a CanonicalSnippets,
    pub time_note: &'a str,
    pub expert_frame: &'a ExpertFrame,
    pub suppress_frame_label: bool,
    pub continuity: Option<&'a ContinuityResult>,
    pub yes_no_note: Option<&'a str>,
    pub commitment: Option<&'a Commitment>,
    pub crowd_locked: bool,
    pub lookup_note: Option<&'a str>,
}

/// Assemble the model messages in the contract order.
pub fn compose_messages(input: &ComposeInput<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    messages.push(ChatMessage::system(system_prompt_for(input.mode)));

    if input.crowd_locked {
        messages.push(ChatMessage::system(crate::commitment::ckcl_note()));
    }

    messages.push(ChatMessage::system(DEFAULT_ONRAMP_NOTE));

    if !input.time_note.is_empty() {
        messages.push(ChatMessage::system(input.time_note));
    }

    if input.expert_frame.is_active() && !input.expert_frame.directive.is_empty() {
        let mut note = format!("EXPERT_FRAME: {}", input.expert_frame.directive);
        if input.suppress_frame_label {
            note.push_str("\nDo not announce or name this frame; just behave accordingly.");
        } else {
            note.push_str(&format!("\nFrame label: {}", input.expert_frame.label));
        }
        messages.push(ChatMessage::system(note));
    }

    // Bounded recent tail.
    let tail_len = (GEN_HISTORY_PAIRS * 2).min(input.history.len());
    for m in &input.history[input.history.len() - tail_len..] {
        messages.push(m.clone());
    }

    // Continuity: on a bare continuation, restate the last assistant output.
    if let Some(cont) = input.continuity {
        if cont.continuity == Continuity::SameTopic && is_continuation_ask(input.message) {
            if let Some(last) = input
                .history
                .iter()
                .rev()
                .find(|m| matches!(m.role, ChatRole::Assistant))
            {
                messages.push(ChatMessage::system(format!(
                    "LAST_ASSISTANT_OUTPUT (continue from here, do not repeat it):\n{}",
                    last.content
                )));
            }
        }
        if cont.followup_only {
            messages.push(ChatMessage::system(
                "CONTINUITY: This message depends on prior context. Resolve references\n\
                 against the conversation above; if truly blocked, ask exactly one\n\
                 high-leverage (WIN) question instead of a list.",
            ));
        }
    }

    if let Some(note) = input.yes_no_note {
        messages.push(ChatMessage::system(note));
    }

    if let Some(commitment) = input.commitment {
        if commitment.is_committed() {
            messages.push(ChatMessage::system(crate::commitment::ccg_note(commitment)));
            messages.push(ChatMessage::system(
                "CONSENSUS_FIRST: Open with the direct answer or consensus, not with\n\
                 process talk or qualifications.",
            ));
        }
    }

    if let Some(note) = input.lookup_note {
        messages.push(ChatMessage::system(note));
    }

    if !input.snippets.text.is_empty() {
        messages.push(ChatMessage::system(format!(
            "CANONICAL_SNIPPETS:\n{}",
            input.snippets.text
        )));
    }

    messages.push(ChatMessage::user(input.message));
    messages
}

fn is_continuation_ask(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    matches!(
        lower.as_str(),
        "continue" | "go on" | "tell me more" | "more" | "keep going" | "and?"
    )
}
