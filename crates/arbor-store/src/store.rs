use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use arbor_core::paths::{safe_project_name, safe_user_name};

use crate::error::Result;

/// Root handle for all durable project and user state.
///
/// Cheap to clone via `Arc`; all writes serialize through a per-file lock so
/// read-modify-write cycles on the same JSON object never interleave. Files
/// are small, so I/O stays synchronous behind the lock.
pub struct ProjectStore {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ProjectStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("projects"))?;
        debug!(root = %root.display(), "project store opened");
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the write lock guarding `path`.
    pub(crate) fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Split `user/project` into its sanitized user segment.
    pub fn user_of(project_full: &str) -> String {
        let raw = project_full.split('/').next().unwrap_or("");
        safe_user_name(raw)
    }

    /// Sanitize a full `user/project` identifier.
    pub fn canonical_project(project_full: &str) -> String {
        safe_project_name(project_full)
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    pub fn project_dir(&self, project_full: &str) -> PathBuf {
        self.root.join("projects").join(safe_project_name(project_full))
    }

    pub fn state_dir(&self, project_full: &str) -> PathBuf {
        self.project_dir(project_full).join("state")
    }

    pub fn user_dir(&self, user: &str) -> PathBuf {
        self.root
            .join("projects")
            .join(safe_user_name(user))
            .join("_user")
    }

    pub fn project_state_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("project_state.json")
    }

    pub fn facts_raw_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("facts_raw.jsonl")
    }

    pub fn facts_map_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("facts_map.md")
    }

    pub fn understanding_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("understanding.json")
    }

    pub fn active_object_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("active_object.json")
    }

    pub fn audit_log_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("audit_log.jsonl")
    }

    pub fn chat_log_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("chat_log.jsonl")
    }

    pub fn decisions_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("decisions.jsonl")
    }

    pub fn decision_candidates_path(&self, project_full: &str) -> PathBuf {
        self.state_dir(project_full).join("decision_candidates.jsonl")
    }

    pub fn manifest_path(&self, project_full: &str) -> PathBuf {
        self.project_dir(project_full).join("project_manifest.json")
    }

    pub fn user_profile_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("profile.json")
    }

    pub fn user_facts_raw_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("facts_raw.jsonl")
    }

    pub fn user_global_facts_map_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("global_facts_map.json")
    }

    pub fn memory_policies_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("memory_policies.json")
    }

    pub fn couples_links_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("couples_links.json")
    }

    pub fn bringup_queue_path(&self, user: &str) -> PathBuf {
        self.user_dir(user).join("bringup_queue.jsonl")
    }

    /// Ensure the state directory for a project exists.
    pub fn ensure_project(&self, project_full: &str) -> Result<()> {
        std::fs::create_dir_all(self.state_dir(project_full))?;
        Ok(())
    }

    /// Ensure the per-user directory exists.
    pub fn ensure_user(&self, user: &str) -> Result<()> {
        std::fs::create_dir_all(self.user_dir(user))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let p = store.project_state_path("Frank/kitchen");
        assert!(p.ends_with("projects/Frank/kitchen/state/project_state.json"));
        let u = store.user_profile_path("Frank");
        assert!(u.ends_with("projects/Frank/_user/profile.json"));
    }

    #[test]
    fn sanitizes_hostile_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let p = store.project_dir("../etc/passwd");
        assert!(!p.to_string_lossy().contains(".."));
    }

    #[test]
    fn user_of_extracts_first_segment() {
        assert_eq!(ProjectStore::user_of("Frank/kitchen"), "Frank");
        assert_eq!(ProjectStore::user_of("couple_ann/home"), "couple_ann");
    }
}
