//! Tiered durable memory.
//!
//! Tier-1 is the append-only raw candidate log per project (and mirrored per
//! user for global-eligible claims). Tier-2 is the distilled per-project
//! facts map; Tier-2G the curated user identity kernel; Tier-2M the compact
//! cross-project facts map. Interpretive memory captures the ambiguous
//! layer (themes, dynamics, values) with verbatim evidence.
//!
//! Model calls never happen here: the pipeline invokes the model and hands
//! raw JSON to this crate for validation and persistence. Everything in this
//! crate is deterministic.

pub mod distill;
pub mod error;
pub mod global;
pub mod interpretive;
pub mod normalize;
pub mod policy;
pub mod tier1;
pub mod types;

pub use error::{MemoryError, Result};
