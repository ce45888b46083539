//! Memory policy evaluation and the deterministic NL policy commands.
//!
//! Rules are evaluated at write time (store / mirror) and read time
//! (resurface). Matching is case-insensitive: `entity_key` rules compare
//! exact keys, `substring` rules scan the claim text.

use arbor_store::userdata::{PolicyAction, PolicyMatchType, PolicyRule};

/// Combined gate verdict for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub store: bool,
    pub mirror_global: bool,
    pub allow_resurface: bool,
}

impl Default for PolicyDecision {
    fn default() -> Self {
        Self {
            store: true,
            mirror_global: true,
            allow_resurface: true,
        }
    }
}

/// Evaluate all rules for one claim. First matching rule per action wins.
pub fn decision_for_claim(rules: &[PolicyRule], claim: &str, entity_key: &str) -> PolicyDecision {
    let mut decision = PolicyDecision::default();
    for rule in rules {
        if !rule_matches(rule, claim, entity_key) {
            continue;
        }
        match rule.action {
            PolicyAction::DoNotStore => decision.store = false,
            PolicyAction::ProjectOnly => decision.mirror_global = false,
            PolicyAction::DoNotResurface => decision.allow_resurface = false,
            PolicyAction::AllowGlobal => decision.mirror_global = true,
        }
    }
    decision
}

fn rule_matches(rule: &PolicyRule, claim: &str, entity_key: &str) -> bool {
    let needle = rule.match_value.to_lowercase();
    if needle.is_empty() {
        return false;
    }
    match rule.match_type {
        PolicyMatchType::EntityKey => entity_key.to_lowercase() == needle,
        PolicyMatchType::Substring => claim.to_lowercase().contains(&needle),
    }
}

/// Parse a natural-language policy command from a user message.
///
/// Recognized shapes (whole-message, deterministic):
///   "don't store X" / "do not store X"            → do_not_store
///   "keep X only in this project"                 → project_only
///   "don't bring up X unless I ask"               → do_not_resurface
///   "remember X globally"                         → allow_global
pub fn parse_policy_command(message: &str) -> Option<PolicyRule> {
    let msg = message.trim();
    let lower = msg.to_lowercase();

    let make = |action: PolicyAction, value: &str| {
        let value = value
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '.')
            .trim();
        if value.is_empty() {
            None
        } else {
            Some(PolicyRule {
                action,
                match_type: PolicyMatchType::Substring,
                match_value: value.to_string(),
                note: String::new(),
                created_at: String::new(),
            })
        }
    };

    if let Some(rest) = lower
        .strip_prefix("don't store ")
        .or_else(|| lower.strip_prefix("do not store "))
        .or_else(|| lower.strip_prefix("dont store "))
    {
        return make(PolicyAction::DoNotStore, rest);
    }

    if let Some(rest) = lower.strip_prefix("keep ") {
        if let Some(value) = rest.strip_suffix("only in this project") {
            return make(PolicyAction::ProjectOnly, value);
        }
        // Tolerate a trailing period.
        if let Some(value) = rest.strip_suffix("only in this project.") {
            return make(PolicyAction::ProjectOnly, value);
        }
    }

    if let Some(rest) = lower
        .strip_prefix("don't bring up ")
        .or_else(|| lower.strip_prefix("do not bring up "))
        .or_else(|| lower.strip_prefix("dont bring up "))
    {
        let value = rest
            .strip_suffix("unless i ask")
            .or_else(|| rest.strip_suffix("unless i ask."))
            .unwrap_or(rest);
        return make(PolicyAction::DoNotResurface, value);
    }

    if let Some(rest) = lower.strip_prefix("remember ") {
        if let Some(value) = rest
            .strip_suffix("globally")
            .or_else(|| rest.strip_suffix("globally."))
        {
            return make(PolicyAction::AllowGlobal, value);
        }
    }

    None
}
