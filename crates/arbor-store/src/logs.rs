//! Best-effort logs: audit trail, chat log, and the interpretive
//! `understanding.json` snapshot.
//!
//! None of these writes may block or fail a user reply; callers treat errors
//! as advisory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arbor_core::paths::now_iso;

use crate::error::Result;
use crate::store::ProjectStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Answer the user gave about an upload ("what is this file for?").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadNote {
    pub upload_path: String,
    pub answer: String,
    pub created_at: String,
}

impl ProjectStore {
    /// Append one audit event. Called at most once per turn.
    pub fn append_audit_event(&self, project_full: &str, event: &Value) -> Result<()> {
        self.ensure_project(project_full)?;
        self.append_jsonl(&self.audit_log_path(project_full), event)
    }

    pub fn append_chat_log(&self, project_full: &str, role: &str, content: &str) -> Result<()> {
        self.ensure_project(project_full)?;
        self.append_jsonl(
            &self.chat_log_path(project_full),
            &ChatLogEntry {
                role: role.to_string(),
                content: content.to_string(),
                created_at: now_iso(),
            },
        )
    }

    pub fn upload_notes_path(&self, project_full: &str) -> std::path::PathBuf {
        self.state_dir(project_full).join("upload_notes.jsonl")
    }

    pub fn load_upload_notes(&self, project_full: &str) -> Result<Vec<UploadNote>> {
        self.read_jsonl(&self.upload_notes_path(project_full))
    }

    pub fn append_upload_note(
        &self,
        project_full: &str,
        upload_path: &str,
        answer: &str,
    ) -> Result<()> {
        self.ensure_project(project_full)?;
        self.append_jsonl(
            &self.upload_notes_path(project_full),
            &UploadNote {
                upload_path: upload_path.to_string(),
                answer: answer.to_string(),
                created_at: now_iso(),
            },
        )
    }

    pub fn load_understanding(&self, project_full: &str) -> Result<Value> {
        let path = self.understanding_path(project_full);
        if !path.exists() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    }

    pub fn save_understanding(&self, project_full: &str, value: &Value) -> Result<()> {
        self.ensure_project(project_full)?;
        let path = self.understanding_path(project_full);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();
        self.write_atomic(&path, &serde_json::to_string_pretty(value)?)
    }
}
