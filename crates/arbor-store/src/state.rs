//! `project_state.json` — the mutable heart of a project.
//!
//! Created on first access, mutated only through `update_project_state` so
//! every change is a locked read-modify-write. The core never deletes a
//! project.

use serde::{Deserialize, Serialize};

use arbor_core::paths::now_iso;

use crate::error::Result;
use crate::store::ProjectStore;

pub const PROJECT_STATE_SCHEMA: &str = "project_state_v1";
/// Hard cap on stored time anchors.
pub const MAX_TIME_ANCHORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMode {
    #[default]
    OpenWorld,
    ClosedWorld,
    Hybrid,
}

impl std::fmt::Display for ProjectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenWorld => write!(f, "open_world"),
            Self::ClosedWorld => write!(f, "closed_world"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    #[default]
    NeedsGoal,
    GoalProposed,
    Active,
}

impl std::fmt::Display for BootstrapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedsGoal => write!(f, "needs_goal"),
            Self::GoalProposed => write!(f, "goal_proposed"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Project-scoped behavioral frame. `status` walks "" → proposed → active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExpertFrame {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub directive: String,
    #[serde(default)]
    pub set_reason: String,
    #[serde(default)]
    pub updated_at: String,
}

impl ExpertFrame {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
    pub fn is_proposed(&self) -> bool {
        self.status == "proposed"
    }
}

/// A concrete start-event anchor, e.g. "put the roast in the oven".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnchor {
    pub label: String,
    /// RFC3339 UTC stamp.
    pub ts: String,
    pub tz: String,
}

/// Pending couples bring-up draft awaiting a yes/no from the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BringupDraft {
    pub pending: bool,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub boundaries: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub project_mode: ProjectMode,
    #[serde(default)]
    pub bootstrap_status: BootstrapStatus,
    #[serde(default)]
    pub expert_frame: ExpertFrame,
    /// Ordered domain tags, most recent last.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub user_rules: Vec<String>,
    /// Incremented exactly once per chat turn, before any distill decision.
    #[serde(default)]
    pub facts_turn_counter: u64,
    #[serde(default)]
    pub facts_dirty: bool,
    #[serde(default)]
    pub time_anchors_v1: Vec<TimeAnchor>,
    #[serde(default)]
    pub pending_bringup_draft: Option<BringupDraft>,
    #[serde(default)]
    pub pending_upload_question: Option<String>,
    #[serde(default)]
    pub active_couple_id: String,
    #[serde(default)]
    pub current_focus: String,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub key_files: Vec<String>,
    #[serde(default)]
    pub updated_at: String,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            goal: String::new(),
            project_mode: ProjectMode::OpenWorld,
            bootstrap_status: BootstrapStatus::NeedsGoal,
            expert_frame: ExpertFrame::default(),
            domains: Vec::new(),
            user_rules: Vec::new(),
            facts_turn_counter: 0,
            facts_dirty: false,
            time_anchors_v1: Vec::new(),
            pending_bringup_draft: None,
            pending_upload_question: None,
            active_couple_id: String::new(),
            current_focus: String::new(),
            next_actions: Vec::new(),
            key_files: Vec::new(),
            updated_at: String::new(),
        }
    }
}

fn default_schema() -> String {
    PROJECT_STATE_SCHEMA.to_string()
}

impl ProjectState {
    /// Push a time anchor, deduping identical labels within `dedupe_secs`
    /// and keeping at most [`MAX_TIME_ANCHORS`] entries (oldest dropped).
    pub fn push_time_anchor(&mut self, anchor: TimeAnchor, dedupe_secs: i64) {
        if let Some(last) = self
            .time_anchors_v1
            .iter()
            .rev()
            .find(|a| a.label == anchor.label)
        {
            let close = match (
                arbor_core::time::parse_rfc3339(&last.ts),
                arbor_core::time::parse_rfc3339(&anchor.ts),
            ) {
                (Some(a), Some(b)) => (b - a).num_seconds().abs() <= dedupe_secs,
                _ => false,
            };
            if close {
                return;
            }
        }
        self.time_anchors_v1.push(anchor);
        while self.time_anchors_v1.len() > MAX_TIME_ANCHORS {
            self.time_anchors_v1.remove(0);
        }
    }
}

impl ProjectStore {
    /// Load the project state, creating a fresh default on first access.
    pub fn load_project_state(&self, project_full: &str) -> Result<ProjectState> {
        let path = self.project_state_path(project_full);
        if !path.exists() {
            return Ok(ProjectState::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Locked read-modify-write of the project state. Returns the new state.
    pub fn update_project_state<F>(&self, project_full: &str, mutate: F) -> Result<ProjectState>
    where
        F: FnOnce(&mut ProjectState),
    {
        self.ensure_project(project_full)?;
        let path = self.project_state_path(project_full);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();

        let mut state = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            ProjectState::default()
        };
        mutate(&mut state);
        state.updated_at = now_iso();
        self.write_atomic(&path, &serde_json::to_string_pretty(&state)?)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_access_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let st = store.load_project_state("u/p").unwrap();
        assert_eq!(st.bootstrap_status, BootstrapStatus::NeedsGoal);
        assert_eq!(st.facts_turn_counter, 0);
    }

    #[test]
    fn update_persists_and_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let st = store
            .update_project_state("u/p", |s| {
                s.goal = "remodel the kitchen".into();
                s.bootstrap_status = BootstrapStatus::Active;
            })
            .unwrap();
        assert!(!st.updated_at.is_empty());

        let loaded = store.load_project_state("u/p").unwrap();
        assert_eq!(loaded.goal, "remodel the kitchen");
        assert_eq!(loaded.bootstrap_status, BootstrapStatus::Active);
    }

    #[test]
    fn anchors_cap_and_dedupe() {
        let mut st = ProjectState::default();
        for i in 0..12 {
            st.push_time_anchor(
                TimeAnchor {
                    label: format!("event {i}"),
                    ts: format!("2026-01-01T00:{i:02}:00Z"),
                    tz: "America/Chicago".into(),
                },
                120,
            );
        }
        assert_eq!(st.time_anchors_v1.len(), MAX_TIME_ANCHORS);
        // Oldest were dropped.
        assert_eq!(st.time_anchors_v1[0].label, "event 4");

        // Same label within 120s is dropped.
        let before = st.time_anchors_v1.len();
        st.push_time_anchor(
            TimeAnchor {
                label: "event 11".into(),
                ts: "2026-01-01T00:11:59Z".into(),
                tz: "America/Chicago".into(),
            },
            120,
        );
        assert_eq!(st.time_anchors_v1.len(), before);

        // Same label outside the window is kept.
        st.push_time_anchor(
            TimeAnchor {
                label: "event 11".into(),
                ts: "2026-01-01T01:00:00Z".into(),
                tz: "America/Chicago".into(),
            },
            120,
        );
        assert_eq!(st.time_anchors_v1.len(), before); // capped at 8, oldest dropped
        assert_eq!(st.time_anchors_v1.last().unwrap().ts, "2026-01-01T01:00:00Z");
    }
}
