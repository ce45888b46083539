//! File-backed store for per-project and per-user durable state.
//!
//! Layout under the storage root:
//!   projects/<user>/<project>/state/{project_state.json, facts_raw.jsonl,
//!     facts_map.md, understanding.json, active_object.json, audit_log.jsonl,
//!     pending_*.json, chat_log.jsonl, decisions.jsonl, decision_candidates.jsonl}
//!   projects/<user>/<project>/project_manifest.json
//!   projects/<user>/_user/{profile.json, facts_raw.jsonl,
//!     global_facts_map.json, memory_policies.json, couples_links.json,
//!     bringup_queue.jsonl}
//!   projects/couples_links.json (registry; per-user files mirror it)
//!
//! JSON objects, JSON Lines for append-only logs, Markdown for distilled maps.
//! Writers go through a per-file lock registry; append-only logs have a single
//! writer per file.

pub mod aof;
pub mod bringup;
pub mod decisions;
pub mod error;
pub mod jsonl;
pub mod logs;
pub mod manifest;
pub mod pulse;
pub mod state;
pub mod store;
pub mod userdata;

pub use error::{Result, StoreError};
pub use store::ProjectStore;
