//! Truth-bound project pulse.
//!
//! The pulse is assembled exclusively from stored state — never from model
//! output — so a status turn can return it byte-for-byte. Line order is
//! fixed: header, goal, mode, expert frame, focus, recent decisions, pending
//! candidate count, recent uploads.

use crate::store::ProjectStore;

/// Number of confirmed decisions shown, newest last.
const PULSE_DECISIONS: usize = 5;
/// Number of recent uploads shown.
const PULSE_UPLOADS: usize = 3;

impl ProjectStore {
    /// Render the deterministic pulse snapshot for a project.
    pub fn build_truth_bound_pulse(&self, project_full: &str) -> String {
        let state = self.load_project_state(project_full).unwrap_or_default();
        let decisions = self.load_decisions(project_full).unwrap_or_default();
        let candidates = self.load_decision_candidates(project_full).unwrap_or_default();
        let manifest = self.load_manifest(project_full).unwrap_or_default();

        let mut lines: Vec<String> = Vec::new();
        lines.push("Project Pulse (truth-bound)".to_string());
        lines.push(String::new());

        let goal = state.goal.trim();
        lines.push(format!(
            "Goal: {}",
            if goal.is_empty() { "(not set yet)" } else { goal }
        ));
        lines.push(format!("Mode: {}", state.project_mode));

        if state.expert_frame.label.trim().is_empty() {
            lines.push("Expert frame: (none)".to_string());
        } else {
            lines.push(format!(
                "Expert frame: {} [{}]",
                state.expert_frame.label,
                if state.expert_frame.status.is_empty() {
                    "unset"
                } else {
                    state.expert_frame.status.as_str()
                }
            ));
        }

        let focus = state.current_focus.trim();
        if !focus.is_empty() {
            lines.push(format!("Focus: {focus}"));
        }

        lines.push(String::new());
        lines.push("Recent decisions:".to_string());
        if decisions.is_empty() {
            lines.push("- (none)".to_string());
        } else {
            let start = decisions.len().saturating_sub(PULSE_DECISIONS);
            for d in &decisions[start..] {
                let day = d.timestamp.split('T').next().unwrap_or("").to_string();
                lines.push(format!("- [{day}] {}", d.text));
            }
        }

        let pending = candidates.iter().filter(|c| c.status == "pending").count();
        if pending > 0 {
            lines.push(format!("Pending decisions: {pending}"));
        }

        lines.push(String::new());
        lines.push("Recent uploads:".to_string());
        if manifest.raw_files.is_empty() {
            lines.push("- (none)".to_string());
        } else {
            let start = manifest.raw_files.len().saturating_sub(PULSE_UPLOADS);
            for rf in &manifest.raw_files[start..] {
                let name = if rf.orig_name.is_empty() {
                    &rf.saved_name
                } else {
                    &rf.orig_name
                };
                lines.push(format!("- {name}"));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, RawFileEntry};

    #[test]
    fn pulse_starts_with_header_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        store
            .update_project_state("u/p", |s| {
                s.goal = "finish the deck".into();
            })
            .unwrap();
        store.append_decision("u/p", "use cedar boards").unwrap();

        let a = store.build_truth_bound_pulse("u/p");
        let b = store.build_truth_bound_pulse("u/p");
        assert_eq!(a, b);
        assert!(a.starts_with("Project Pulse"));
        assert!(a.contains("Goal: finish the deck"));
        assert!(a.contains("use cedar boards"));
    }

    #[test]
    fn pulse_handles_empty_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let pulse = store.build_truth_bound_pulse("u/empty");
        assert!(pulse.contains("Goal: (not set yet)"));
        assert!(pulse.contains("- (none)"));
    }

    #[test]
    fn pulse_lists_recent_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        store.ensure_project("u/p").unwrap();
        let manifest = Manifest {
            raw_files: (0..5)
                .map(|i| RawFileEntry {
                    orig_name: format!("file{i}.pdf"),
                    path: format!("raw/file{i}.pdf"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        store
            .write_atomic(
                &store.manifest_path("u/p"),
                &serde_json::to_string_pretty(&manifest).unwrap(),
            )
            .unwrap();
        let pulse = store.build_truth_bound_pulse("u/p");
        assert!(!pulse.contains("file1.pdf"));
        assert!(pulse.contains("file2.pdf"));
        assert!(pulse.contains("file4.pdf"));
    }
}
