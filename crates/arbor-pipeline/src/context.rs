//! Shared context interface for pipeline hosts.
//!
//! `TurnContext` is the single trait a host (gateway, tests) implements to
//! run turns. It bundles the narrow collaborators the core depends on:
//! the model, the store, limits, and a time source (overridable for
//! deterministic tests).

use chrono::{DateTime, Utc};

use arbor_core::config::LimitsConfig;
use arbor_store::ProjectStore;

use crate::provider::ModelCaller;

pub trait TurnContext: Send + Sync {
    fn model(&self) -> &dyn ModelCaller;
    fn store(&self) -> &ProjectStore;
    fn limits(&self) -> &LimitsConfig;

    /// Server default IANA zone; the user's Tier-2G timezone overrides it.
    fn default_timezone(&self) -> &str {
        arbor_core::time::DEFAULT_TIMEZONE
    }

    /// Time source. Tests pin this for deterministic time notes.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
