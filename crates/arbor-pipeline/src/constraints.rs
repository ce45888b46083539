//! Deterministic constraint compilation + enforcement.
//!
//! Turns "rules as text" (project user_rules + this turn's directives) into a
//! machine-checkable constraint object, validates candidate output before it
//! reaches the user, and builds a bounded retry prompt on violation. No model
//! calls here.

use arbor_store::state::ProjectState;

/// Cap on compiled forbidden substrings.
const MAX_FORBIDDEN: usize = 24;
/// Cap on reported violations (forbidden-phrase noise guard).
const MAX_REPORTED: usize = 8;

/// Anti-sycophancy guardrails applied under the default expert.
/// Case-insensitive contains checks; both apostrophe variants included.
const DEFAULT_FORBIDDEN_SUBSTRINGS: &[&str] = &[
    "great question",
    "you\u{2019}re absolutely right",
    "you're absolutely right",
    "you\u{2019}re so right",
    "you're so right",
    "totally valid",
    "completely valid",
    "as an ai",
    "as a language model",
    "i'm happy to help",
    "happy to help",
    "glad to help",
    "you're brilliant",
    "you are brilliant",
];

/// Hedge phrases checked at word boundaries.
const HEDGE_PHRASES: &[&str] = &[
    "i think",
    "maybe",
    "probably",
    "might be",
    "not sure",
    "i guess",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub max_questions: Option<usize>,
    pub max_lines: Option<usize>,
    pub forbid_emoji: bool,
    pub forbid_hedging: bool,
    /// Case-insensitive contains checks, deduped, capped at [`MAX_FORBIDDEN`].
    pub forbidden_substrings: Vec<String>,
}

/// Compile constraints from project rules and this turn's message.
///
/// Defaults are permissive; the default expert ("" or "default") hardens
/// emoji/hedging and seeds the anti-sycophancy list.
pub fn compile_constraints(
    project_state: &ProjectState,
    user_msg: &str,
    active_expert: &str,
) -> Constraints {
    let rules: Vec<String> = project_state
        .user_rules
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    let msg = user_msg.trim();
    let mut out = Constraints::default();

    let expert = active_expert.trim().to_lowercase();
    let default_expert = expert.is_empty() || expert == "default";
    if default_expert {
        out.forbid_emoji = true;
        out.forbid_hedging = true;
    }

    // Phrase triggers scan rules + this turn's message together.
    let mut hay = rules.join("\n");
    if !msg.is_empty() {
        hay.push('\n');
        hay.push_str(msg);
    }
    let hay = hay.to_lowercase();

    if hay.contains("no questions") || hay.contains("do not ask") || hay.contains("don't ask") {
        out.max_questions = Some(0);
    }
    if hay.contains("word only") || hay.contains("one word") || hay.contains("single word") {
        out.max_lines = Some(1);
    }
    if hay.contains("no explanations")
        || hay.contains("do not explain")
        || hay.contains("don't explain")
    {
        // Strict but not absurd.
        out.max_lines = Some(2);
    }
    if hay.contains("no emoji") || hay.contains("no emojis") {
        out.forbid_emoji = true;
    }
    if hay.contains("be decisive") || hay.contains("stop hedging") || hay.contains("no hedging") {
        out.forbid_hedging = true;
    }

    // "never say X" / "do not say X" rules, plus a one-off quoted
    // "don't say 'Y'" in the message itself.
    let mut forbidden: Vec<String> = if default_expert {
        DEFAULT_FORBIDDEN_SUBSTRINGS.iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    for line in &rules {
        if let Some(frag) = parse_never_say(line) {
            forbidden.push(frag);
        }
    }
    if let Some(frag) = parse_quoted_dont_say(msg) {
        forbidden.push(frag);
    }

    // Dedupe case-insensitively, preserving first occurrence.
    let mut seen = std::collections::HashSet::new();
    out.forbidden_substrings = forbidden
        .into_iter()
        .filter(|f| seen.insert(f.to_lowercase()))
        .take(MAX_FORBIDDEN)
        .collect();

    out
}

/// `never say X` / `do not say X` / `don't say X` rule lines.
fn parse_never_say(line: &str) -> Option<String> {
    let lower = line.trim().to_lowercase();
    for prefix in ["never say ", "do not say ", "don't say "] {
        if lower.starts_with(prefix) {
            let frag = line.trim()[prefix.len()..]
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim();
            if !frag.is_empty() {
                return Some(frag.to_string());
            }
        }
    }
    None
}

/// One-off quoted message directive: `don't say 'great question'`.
/// Matching is case-insensitive, so the lowercased fragment is kept.
fn parse_quoted_dont_say(msg: &str) -> Option<String> {
    let lower = msg.to_lowercase();
    let idx = lower.find("don't say ")?;
    let rest = lower[idx + "don't say ".len()..].trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    let frag = inner[..end].trim();
    if frag.is_empty() {
        None
    } else {
        Some(frag.to_string())
    }
}

/// Validate candidate output. Empty vec means compliant. Deterministic only.
pub fn validate_output(output_text: &str, constraints: &Constraints) -> Vec<String> {
    let s = output_text.trim();
    let mut violations = Vec::new();

    if s.is_empty() {
        violations.push("empty_output".to_string());
        return violations;
    }

    if let Some(max_lines) = constraints.max_lines {
        if max_lines > 0 {
            let lines = s.lines().filter(|l| !l.trim().is_empty()).count();
            if lines > max_lines {
                violations.push(format!("too_many_lines (max_lines={max_lines})"));
            }
        }
    }

    if let Some(max_q) = constraints.max_questions {
        let count = s.matches('?').count();
        if count > max_q {
            violations.push(format!("too_many_questions (max_questions={max_q})"));
        }
    }

    if constraints.forbid_emoji && contains_emoji(s) {
        violations.push("emoji_forbidden".to_string());
    }

    if constraints.forbid_hedging {
        let lower = s.to_lowercase();
        if HEDGE_PHRASES.iter().any(|p| contains_word_phrase(&lower, p)) {
            violations.push("hedging_forbidden".to_string());
        }
    }

    let lower = s.to_lowercase();
    for frag in &constraints.forbidden_substrings {
        let f = frag.trim();
        if f.is_empty() {
            continue;
        }
        if lower.contains(&f.to_lowercase()) {
            violations.push(format!("forbidden_phrase: {f}"));
            if violations.len() >= MAX_REPORTED {
                break;
            }
        }
    }

    violations
}

/// Pictographic emoji heuristic over `U+1F300..U+1FAFF`.
fn contains_emoji(s: &str) -> bool {
    s.chars().any(|c| ('\u{1F300}'..='\u{1FAFF}').contains(&c))
}

/// Phrase match at word boundaries (chars on both sides non-alphanumeric).
fn contains_word_phrase(haystack: &str, phrase: &str) -> bool {
    let mut search_from = 0;
    while let Some(pos) = haystack[search_from..].find(phrase) {
        let start = search_from + pos;
        let end = start + phrase.len();
        let before_ok = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        search_from = start + 1;
    }
    false
}

/// System note telling the model to regenerate compliantly. Never shown to
/// the user directly; diagnostics must not leak into output.
pub fn build_retry_system_note(constraints: &Constraints, violations: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push("CONSTRAINT ENFORCEMENT:".to_string());
    parts.push("- The previous draft violated hard constraints. Regenerate a compliant answer.".to_string());
    parts.push("- Do NOT mention constraints or violations in the user-visible output.".to_string());
    parts.push(String::new());
    parts.push("Constraints:".to_string());
    parts.push(format!("- max_questions: {:?}", constraints.max_questions));
    parts.push(format!("- max_lines: {:?}", constraints.max_lines));
    parts.push(format!("- forbid_emoji: {}", constraints.forbid_emoji));
    parts.push(format!("- forbid_hedging: {}", constraints.forbid_hedging));
    if constraints.forbidden_substrings.is_empty() {
        parts.push("- forbidden_phrases: (none)".to_string());
    } else {
        let shown: Vec<&str> = constraints
            .forbidden_substrings
            .iter()
            .take(10)
            .map(|s| s.as_str())
            .collect();
        parts.push(format!("- forbidden_phrases: {}", shown.join(", ")));
    }
    parts.push(String::new());
    parts.push("Violations detected:".to_string());
    for v in violations.iter().take(12) {
        parts.push(format!("- {v}"));
    }
    parts.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_rules(rules: &[&str]) -> ProjectState {
        let mut state = ProjectState::default();
        state.user_rules = rules.iter().map(|s| s.to_string()).collect();
        state
    }

    #[test]
    fn default_expert_hardens() {
        let c = compile_constraints(&ProjectState::default(), "hello", "");
        assert!(c.forbid_emoji);
        assert!(c.forbid_hedging);
        assert!(!c.forbidden_substrings.is_empty());

        let c = compile_constraints(&ProjectState::default(), "hello", "Therapist");
        assert!(!c.forbid_emoji);
        assert!(c.forbidden_substrings.is_empty());
    }

    #[test]
    fn phrase_triggers_set_bounds() {
        let c = compile_constraints(&state_with_rules(&["no questions"]), "", "Therapist");
        assert_eq!(c.max_questions, Some(0));

        let c = compile_constraints(&ProjectState::default(), "answer in one word", "x");
        assert_eq!(c.max_lines, Some(1));

        let c = compile_constraints(&ProjectState::default(), "don't explain", "x");
        assert_eq!(c.max_lines, Some(2));
    }

    #[test]
    fn never_say_rules_add_forbidden() {
        let c = compile_constraints(
            &state_with_rules(&["never say \"synergy\"", "do not say moving forward"]),
            "",
            "Therapist",
        );
        assert!(c.forbidden_substrings.contains(&"synergy".to_string()));
        assert!(c.forbidden_substrings.contains(&"moving forward".to_string()));
    }

    #[test]
    fn quoted_message_directive_adds_one_off() {
        let c = compile_constraints(
            &ProjectState::default(),
            "Don't say 'great question' to me",
            "Therapist",
        );
        assert_eq!(c.forbidden_substrings, vec!["great question".to_string()]);
    }

    #[test]
    fn forbidden_dedupes_and_caps() {
        let rules: Vec<String> = (0..40).map(|i| format!("never say phrase{i}")).collect();
        let rule_refs: Vec<&str> = rules.iter().map(|s| s.as_str()).collect();
        let c = compile_constraints(&state_with_rules(&rule_refs), "", "Therapist");
        assert_eq!(c.forbidden_substrings.len(), 24);

        let c2 = compile_constraints(
            &state_with_rules(&["never say Synergy", "never say synergy"]),
            "",
            "Therapist",
        );
        assert_eq!(c2.forbidden_substrings.len(), 1);
    }

    #[test]
    fn validates_lines_questions_emoji_hedging() {
        let c = Constraints {
            max_questions: Some(0),
            max_lines: Some(1),
            forbid_emoji: true,
            forbid_hedging: true,
            forbidden_substrings: vec!["great question".into()],
        };
        let v = validate_output("Line one\nLine two?", &c);
        assert!(v.iter().any(|x| x.starts_with("too_many_lines")));
        assert!(v.iter().any(|x| x.starts_with("too_many_questions")));

        let v = validate_output("Nice \u{1F389}", &c);
        assert!(v.contains(&"emoji_forbidden".to_string()));

        let v = validate_output("I think maybe yes", &c);
        assert!(v.contains(&"hedging_forbidden".to_string()));

        let v = validate_output("Great question!", &c);
        assert!(v.iter().any(|x| x.starts_with("forbidden_phrase")));

        assert!(validate_output("Done.", &c).is_empty());
    }

    #[test]
    fn hedge_matching_respects_word_boundaries() {
        let c = Constraints {
            forbid_hedging: true,
            ..Default::default()
        };
        // "maybes" should not match "maybe" mid-word... but "maybe" with
        // punctuation around it should.
        assert!(validate_output("Maybe.", &c).contains(&"hedging_forbidden".to_string()));
        assert!(validate_output("The maybes have it", &c).is_empty());
    }

    #[test]
    fn empty_output_is_the_only_violation_reported() {
        let v = validate_output("   ", &Constraints::default());
        assert_eq!(v, vec!["empty_output".to_string()]);
    }

    #[test]
    fn violation_reporting_caps_at_eight() {
        let c = Constraints {
            forbidden_substrings: (0..12).map(|i| format!("tok{i}")).collect(),
            ..Default::default()
        };
        let text = (0..12).map(|i| format!("tok{i}")).collect::<Vec<_>>().join(" ");
        let v = validate_output(&text, &c);
        assert_eq!(v.len(), 8);
    }

    #[test]
    fn retry_note_enumerates_but_stays_internal() {
        let c = Constraints {
            max_questions: Some(0),
            ..Default::default()
        };
        let note = build_retry_system_note(&c, &["too_many_questions (max_questions=0)".into()]);
        assert!(note.starts_with("CONSTRAINT ENFORCEMENT:"));
        assert!(note.contains("Do NOT mention constraints"));
        assert!(note.contains("too_many_questions"));
    }
}
