//! Per-turn audit trace.
//!
//! The trace is an explicit value threaded through the pipeline (no global
//! state): stages add decision-context keys, and the event is written at
//! most once per turn, best-effort, after generation.

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use arbor_store::ProjectStore;

pub const AUDIT_SCHEMA: &str = "audit_v1";

/// Mutable per-turn trace context.
#[derive(Debug)]
pub struct TurnTrace {
    pub trace_id: String,
    decision_ctx: Map<String, Value>,
    started: Instant,
    written: bool,
}

impl TurnTrace {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            decision_ctx: Map::new(),
            started: Instant::now(),
            written: false,
        }
    }

    /// Record one decision-context key. Later writes win (shallow merge).
    pub fn note(&mut self, key: &str, value: impl Into<Value>) {
        self.decision_ctx.insert(key.to_string(), value.into());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Write the audit event. Second and later calls are no-ops, and any
    /// store failure is swallowed after a warning — audit never affects the
    /// reply.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &mut self,
        store: &ProjectStore,
        project_full: &str,
        clean_user_msg: &str,
        do_search: bool,
        search_len: usize,
        active_expert: &str,
        intent_obj: Option<&crate::intent::IntentResult>,
        lookup_mode: bool,
        answer_len: usize,
    ) {
        if self.written {
            return;
        }
        self.written = true;

        let mut event = Map::new();
        event.insert("schema".into(), Value::String(AUDIT_SCHEMA.into()));
        event.insert("trace_id".into(), Value::String(self.trace_id.clone()));
        event.insert("project_full".into(), Value::String(project_full.into()));
        event.insert(
            "clean_user_msg".into(),
            Value::String(clean_user_msg.chars().take(400).collect()),
        );
        event.insert("do_search".into(), Value::Bool(do_search));
        event.insert("search_len".into(), Value::from(search_len));
        event.insert("active_expert".into(), Value::String(active_expert.into()));
        event.insert(
            "intent_obj".into(),
            intent_obj
                .and_then(|i| serde_json::to_value(i).ok())
                .unwrap_or(Value::Null),
        );
        event.insert("lookup_mode".into(), Value::Bool(lookup_mode));
        event.insert("answer_len".into(), Value::from(answer_len));
        event.insert("elapsed_ms".into(), Value::from(self.elapsed_ms()));
        // Shallow merge of the decision context.
        for (k, v) in self.decision_ctx.iter() {
            event.entry(k.clone()).or_insert_with(|| v.clone());
        }
        event.insert("decision_ctx".into(), Value::Object(self.decision_ctx.clone()));

        if let Err(e) = store.append_audit_event(project_full, &Value::Object(event)) {
            warn!(error = %e, project = project_full, "audit write failed (ignored)");
        }
    }
}

impl Default for TurnTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_once_and_merges_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let mut trace = TurnTrace::new();
        trace.note("path", "short_circuit");
        trace.note("policy_denied", true);

        trace.write(&store, "u/p", "project pulse", false, 0, "", None, false, 42);
        trace.write(&store, "u/p", "project pulse", false, 0, "", None, false, 42);

        let path = store.audit_log_path("u/p");
        assert_eq!(store.jsonl_line_count(&path), 1);

        let events: Vec<Value> = store.read_jsonl(&path).unwrap();
        let event = &events[0];
        assert_eq!(event["schema"], "audit_v1");
        assert_eq!(event["decision_ctx"]["path"], "short_circuit");
        assert_eq!(event["answer_len"], 42);
        assert!(!event["trace_id"].as_str().unwrap().is_empty());
    }
}
