//! Read model for `project_manifest.json`.
//!
//! The upload pipeline owns this file; the core reads raw-file and artifact
//! entries and only ever writes deliverable registrations.

use serde::{Deserialize, Serialize};

use arbor_core::paths::now_iso;

use crate::error::Result;
use crate::store::ProjectStore;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub raw_files: Vec<RawFileEntry>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default)]
    pub deliverables: Vec<DeliverableEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawFileEntry {
    #[serde(default)]
    pub orig_name: String,
    #[serde(default)]
    pub saved_name: String,
    /// Project-relative path, forward slashes.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub added_at: String,
}

/// Derived artifact (`pdf_text`, `ocr_text`, `plan_ocr`, `image_caption`,
/// `image_classification`, `image_semantics`, `excel_blueprint`,
/// `file_overview`, `code_index`, `code_chunk`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArtifactEntry {
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub version: u32,
    /// Raw-file relative path this artifact derives from, when known.
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliverableEntry {
    #[serde(rename = "type", default)]
    pub deliverable_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub created_at: String,
}

impl ProjectStore {
    /// Load the manifest; a missing file reads as an empty manifest.
    pub fn load_manifest(&self, project_full: &str) -> Result<Manifest> {
        let path = self.manifest_path(project_full);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Newest artifact of `artifact_type` (highest version wins, then latest
    /// position in the manifest).
    pub fn get_latest_artifact_by_type(
        &self,
        project_full: &str,
        artifact_type: &str,
    ) -> Option<ArtifactEntry> {
        let manifest = self.load_manifest(project_full).ok()?;
        manifest
            .artifacts
            .into_iter()
            .enumerate()
            .filter(|(_, a)| a.artifact_type == artifact_type)
            .max_by_key(|(idx, a)| (a.version, *idx))
            .map(|(_, a)| a)
    }

    /// Read an artifact's text by its project-relative path.
    pub fn read_artifact_text(&self, project_full: &str, rel_path: &str) -> Result<String> {
        let rel = rel_path.replace('\\', "/");
        // Relative paths only; reject traversal.
        if rel.starts_with('/') || rel.split('/').any(|seg| seg == "..") {
            return Err(crate::error::StoreError::NotFound {
                what: format!("artifact path {rel}"),
            });
        }
        let abs = self.project_dir(project_full).join(&rel);
        Ok(std::fs::read_to_string(abs)?)
    }

    /// Newest artifact text for a specific raw file, trying `types` in order.
    /// Returns `(artifact_type, text)`.
    pub fn find_latest_artifact_text_for_file(
        &self,
        project_full: &str,
        file_rel: &str,
        types: &[&str],
    ) -> Option<(String, String)> {
        let manifest = self.load_manifest(project_full).ok()?;
        for ty in types {
            let hit = manifest
                .artifacts
                .iter()
                .enumerate()
                .filter(|(_, a)| a.artifact_type == *ty && a.source_file == file_rel)
                .max_by_key(|(idx, a)| (a.version, *idx))
                .map(|(_, a)| a.clone());
            if let Some(entry) = hit {
                if let Ok(text) = self.read_artifact_text(project_full, &entry.path) {
                    return Some((ty.to_string(), text));
                }
            }
        }
        None
    }

    /// Register a produced deliverable in the manifest. The single write path
    /// the core has into this file.
    pub fn register_deliverable(
        &self,
        project_full: &str,
        deliverable_type: &str,
        title: &str,
        rel_path: &str,
        source: &str,
    ) -> Result<()> {
        self.ensure_project(project_full)?;
        let path = self.manifest_path(project_full);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();

        let mut manifest: Manifest = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Manifest::default()
        };
        let version = manifest
            .deliverables
            .iter()
            .filter(|d| d.deliverable_type == deliverable_type)
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        manifest.deliverables.push(DeliverableEntry {
            deliverable_type: deliverable_type.to_string(),
            title: title.to_string(),
            path: rel_path.replace('\\', "/"),
            source: source.to_string(),
            version,
            created_at: now_iso(),
        });
        self.write_atomic(&path, &serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    /// Resolve a user-typed filename against raw files (orig or saved name),
    /// then artifacts by filename. Returns the project-relative path.
    pub fn resolve_file_by_name(&self, project_full: &str, name: &str) -> Option<String> {
        let manifest = self.load_manifest(project_full).ok()?;
        for rf in &manifest.raw_files {
            if name == rf.orig_name || name == rf.saved_name {
                return Some(rf.path.replace('\\', "/"));
            }
        }
        for a in &manifest.artifacts {
            if name == a.filename {
                return Some(a.path.replace('\\', "/"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_manifest(manifest: &Manifest) -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        store.ensure_project("u/p").unwrap();
        store
            .write_atomic(
                &store.manifest_path("u/p"),
                &serde_json::to_string_pretty(manifest).unwrap(),
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn latest_artifact_prefers_version_then_position() {
        let manifest = Manifest {
            artifacts: vec![
                ArtifactEntry {
                    filename: "a1.txt".into(),
                    artifact_type: "ocr_text".into(),
                    path: "artifacts/a1.txt".into(),
                    version: 1,
                    ..Default::default()
                },
                ArtifactEntry {
                    filename: "a2.txt".into(),
                    artifact_type: "ocr_text".into(),
                    path: "artifacts/a2.txt".into(),
                    version: 3,
                    ..Default::default()
                },
                ArtifactEntry {
                    filename: "a3.txt".into(),
                    artifact_type: "pdf_text".into(),
                    path: "artifacts/a3.txt".into(),
                    version: 9,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let (_dir, store) = store_with_manifest(&manifest);
        let hit = store.get_latest_artifact_by_type("u/p", "ocr_text").unwrap();
        assert_eq!(hit.filename, "a2.txt");
        assert!(store.get_latest_artifact_by_type("u/p", "excel_blueprint").is_none());
    }

    #[test]
    fn artifact_text_rejects_traversal() {
        let (_dir, store) = store_with_manifest(&Manifest::default());
        assert!(store.read_artifact_text("u/p", "../secret").is_err());
        assert!(store.read_artifact_text("u/p", "/etc/passwd").is_err());
    }

    #[test]
    fn per_file_bridge_chain_order() {
        let manifest = Manifest {
            artifacts: vec![
                ArtifactEntry {
                    filename: "cap.txt".into(),
                    artifact_type: "image_caption".into(),
                    path: "artifacts/cap.txt".into(),
                    source_file: "raw/pic.png".into(),
                    version: 1,
                    ..Default::default()
                },
                ArtifactEntry {
                    filename: "ocr.txt".into(),
                    artifact_type: "ocr_text".into(),
                    path: "artifacts/ocr.txt".into(),
                    source_file: "raw/pic.png".into(),
                    version: 1,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let (dir, store) = store_with_manifest(&manifest);
        let art_dir = dir.path().join("projects/u/p/artifacts");
        std::fs::create_dir_all(&art_dir).unwrap();
        std::fs::write(art_dir.join("cap.txt"), "a caption").unwrap();
        std::fs::write(art_dir.join("ocr.txt"), "ocr words").unwrap();

        let (ty, text) = store
            .find_latest_artifact_text_for_file(
                "u/p",
                "raw/pic.png",
                &["plan_ocr", "ocr_text", "image_caption"],
            )
            .unwrap();
        assert_eq!(ty, "ocr_text");
        assert_eq!(text, "ocr words");
    }

    #[test]
    fn deliverable_registration_bumps_version() {
        let (_dir, store) = store_with_manifest(&Manifest::default());
        store
            .register_deliverable("u/p", "excel", "Budget", "deliverables/budget.xlsx", "model")
            .unwrap();
        store
            .register_deliverable("u/p", "excel", "Budget v2", "deliverables/budget2.xlsx", "model")
            .unwrap();
        let m = store.load_manifest("u/p").unwrap();
        assert_eq!(m.deliverables.len(), 2);
        assert_eq!(m.deliverables[1].version, 2);
    }

    #[test]
    fn resolve_by_original_name() {
        let manifest = Manifest {
            raw_files: vec![RawFileEntry {
                orig_name: "Plan.pdf".into(),
                saved_name: "1700_Plan.pdf".into(),
                path: "raw/1700_Plan.pdf".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let (_dir, store) = store_with_manifest(&manifest);
        assert_eq!(
            store.resolve_file_by_name("u/p", "Plan.pdf").unwrap(),
            "raw/1700_Plan.pdf"
        );
        assert!(store.resolve_file_by_name("u/p", "missing.doc").is_none());
    }
}
