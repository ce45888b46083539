//! Active object focus — the single artifact currently "in focus".
//!
//! Ephemeral by design: a new upload or an explicit topic break clears it.

use serde::{Deserialize, Serialize};

use arbor_core::paths::now_iso;

use crate::error::Result;
use crate::store::ProjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActiveObject {
    #[serde(default)]
    pub rel_path: String,
    #[serde(default)]
    pub orig_name: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub set_reason: String,
    #[serde(default)]
    pub set_at: String,
}

impl ActiveObject {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

impl ProjectStore {
    pub fn load_active_object(&self, project_full: &str) -> Option<ActiveObject> {
        let path = self.active_object_path(project_full);
        let text = std::fs::read_to_string(path).ok()?;
        let obj: ActiveObject = serde_json::from_str(&text).ok()?;
        if obj.rel_path.is_empty() {
            None
        } else {
            Some(obj)
        }
    }

    pub fn set_active_object(&self, project_full: &str, mut obj: ActiveObject) -> Result<()> {
        self.ensure_project(project_full)?;
        obj.set_at = now_iso();
        let path = self.active_object_path(project_full);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();
        self.write_atomic(&path, &serde_json::to_string_pretty(&obj)?)
    }

    pub fn clear_active_object(&self, project_full: &str) -> Result<()> {
        let path = self.active_object_path(project_full);
        if path.exists() {
            let lock = self.lock_for(&path);
            let _guard = lock.lock().unwrap();
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_load_clear_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        assert!(store.load_active_object("u/p").is_none());

        store
            .set_active_object(
                "u/p",
                ActiveObject {
                    rel_path: "raw/plan.pdf".into(),
                    orig_name: "plan.pdf".into(),
                    mime: "application/pdf".into(),
                    set_reason: "user named file".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let obj = store.load_active_object("u/p").unwrap();
        assert_eq!(obj.rel_path, "raw/plan.pdf");
        assert!(!obj.set_at.is_empty());

        store.clear_active_object("u/p").unwrap();
        assert!(store.load_active_object("u/p").is_none());
    }
}
