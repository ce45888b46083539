//! Confirmed decisions and pending candidates.
//!
//! Confirmed decisions are append-only; candidates carry a pending →
//! confirmed/dropped lifecycle and the whole file rewrites on transition.

use serde::{Deserialize, Serialize};

use arbor_core::paths::now_iso;

use crate::error::Result;
use crate::store::ProjectStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCandidate {
    pub text: String,
    /// pending | confirmed | dropped
    pub status: String,
    pub created_at: String,
}

impl ProjectStore {
    pub fn load_decisions(&self, project_full: &str) -> Result<Vec<Decision>> {
        self.read_jsonl(&self.decisions_path(project_full))
    }

    pub fn append_decision(&self, project_full: &str, text: &str) -> Result<()> {
        self.ensure_project(project_full)?;
        self.append_jsonl(
            &self.decisions_path(project_full),
            &Decision {
                text: text.trim().to_string(),
                timestamp: now_iso(),
            },
        )
    }

    pub fn load_decision_candidates(&self, project_full: &str) -> Result<Vec<DecisionCandidate>> {
        self.read_jsonl(&self.decision_candidates_path(project_full))
    }

    pub fn append_decision_candidate(&self, project_full: &str, text: &str) -> Result<()> {
        self.ensure_project(project_full)?;
        self.append_jsonl(
            &self.decision_candidates_path(project_full),
            &DecisionCandidate {
                text: text.trim().to_string(),
                status: "pending".to_string(),
                created_at: now_iso(),
            },
        )
    }

    /// Confirm a pending candidate: mark it and append a confirmed decision.
    pub fn confirm_decision_candidate(&self, project_full: &str, text: &str) -> Result<bool> {
        let path = self.decision_candidates_path(project_full);
        let mut candidates: Vec<DecisionCandidate> = self.read_jsonl(&path)?;
        let mut hit = false;
        for c in candidates.iter_mut() {
            if c.status == "pending" && c.text == text.trim() {
                c.status = "confirmed".to_string();
                hit = true;
                break;
            }
        }
        if hit {
            self.rewrite_jsonl(&path, &candidates)?;
            self.append_decision(project_full, text)?;
        }
        Ok(hit)
    }

    /// Drop a pending candidate without confirming it.
    pub fn drop_decision_candidate(&self, project_full: &str, text: &str) -> Result<bool> {
        let path = self.decision_candidates_path(project_full);
        let mut candidates: Vec<DecisionCandidate> = self.read_jsonl(&path)?;
        let mut hit = false;
        for c in candidates.iter_mut() {
            if c.status == "pending" && c.text == text.trim() {
                c.status = "dropped".to_string();
                hit = true;
                break;
            }
        }
        if hit {
            self.rewrite_jsonl(&path, &candidates)?;
        }
        Ok(hit)
    }
}
