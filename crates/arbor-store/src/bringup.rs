//! Couples links and the bring-up-later queue.
//!
//! A link is written under both partners' `_user` dirs so either side can
//! resolve its partner without cross-user directory walks. Queue entries are
//! append-only per receiving partner; resolution rewrites the queue file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use arbor_core::paths::{now_iso, safe_user_name};
use uuid::Uuid;

use crate::error::Result;
use crate::store::ProjectStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoupleLink {
    pub couple_id: String,
    pub user_a: String,
    pub user_b: String,
    #[serde(default)]
    pub project_a: String,
    #[serde(default)]
    pub project_b: String,
    /// active | inactive
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BringupRequest {
    pub id: String,
    pub from_user: String,
    pub to_user: String,
    pub topic: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub boundaries: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub context_summary: String,
    /// pending | resolved
    pub status: String,
    pub created_at: String,
}

impl ProjectStore {
    /// Root registry: the single source of truth for all couple links.
    /// Per-user `couples_links.json` files are mirrors for fast lookup.
    pub fn couples_registry_path(&self) -> std::path::PathBuf {
        self.root().join("projects").join("couples_links.json")
    }

    pub fn load_couples_links(&self, user: &str) -> Result<BTreeMap<String, CoupleLink>> {
        let path = self.couples_links_path(user);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn load_couples_registry(&self) -> Result<BTreeMap<String, CoupleLink>> {
        let path = self.couples_registry_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Link two partners. Writes the registry plus a mirror under each
    /// partner; idempotent per unordered pair (re-linking an active pair
    /// returns the existing record).
    pub fn link_couple(
        &self,
        user_a: &str,
        user_b: &str,
        project_a: &str,
        project_b: &str,
    ) -> Result<CoupleLink> {
        let a = safe_user_name(user_a);
        let b = safe_user_name(user_b);

        if let Some(existing) = self.find_active_couple_for(&a)? {
            if (existing.user_a == a && existing.user_b == b)
                || (existing.user_a == b && existing.user_b == a)
            {
                return Ok(existing);
            }
        }

        let link = CoupleLink {
            couple_id: format!("couple-{}", Uuid::new_v4()),
            user_a: a.clone(),
            user_b: b.clone(),
            project_a: project_a.to_string(),
            project_b: project_b.to_string(),
            status: "active".to_string(),
            created_at: now_iso(),
        };

        let registry_path = self.couples_registry_path();
        {
            let lock = self.lock_for(&registry_path);
            let _guard = lock.lock().unwrap();
            let mut registry = self.load_couples_registry()?;
            registry.insert(link.couple_id.clone(), link.clone());
            self.write_atomic(&registry_path, &serde_json::to_string_pretty(&registry)?)?;
        }

        for user in [&a, &b] {
            self.ensure_user(user)?;
            let path = self.couples_links_path(user);
            let lock = self.lock_for(&path);
            let _guard = lock.lock().unwrap();
            let mut links = if path.exists() {
                serde_json::from_str::<BTreeMap<String, CoupleLink>>(&std::fs::read_to_string(
                    &path,
                )?)?
            } else {
                BTreeMap::new()
            };
            links.insert(link.couple_id.clone(), link.clone());
            self.write_atomic(&path, &serde_json::to_string_pretty(&links)?)?;
        }
        Ok(link)
    }

    /// Resolve a link by id from the registry (works for any caller,
    /// including the therapist account).
    pub fn get_couple(&self, couple_id: &str) -> Result<Option<CoupleLink>> {
        Ok(self.load_couples_registry()?.get(couple_id).cloned())
    }

    /// The active link this user participates in, if any.
    pub fn find_active_couple_for(&self, user: &str) -> Result<Option<CoupleLink>> {
        let me = safe_user_name(user);
        let links = self.load_couples_links(&me)?;
        Ok(links
            .into_values()
            .find(|l| l.status == "active" && (l.user_a == me || l.user_b == me)))
    }

    /// Queue a bring-up for the partner. Returns the stored entry.
    #[allow(clippy::too_many_arguments)]
    pub fn append_bringup_request(
        &self,
        from_user: &str,
        to_user: &str,
        topic: &str,
        tone: &str,
        boundaries: &str,
        urgency: &str,
        context_summary: &str,
    ) -> Result<BringupRequest> {
        let to = safe_user_name(to_user);
        self.ensure_user(&to)?;
        let entry = BringupRequest {
            id: format!("bringup-{}", Uuid::new_v4()),
            from_user: safe_user_name(from_user),
            to_user: to.clone(),
            topic: topic.trim().to_string(),
            tone: tone.trim().to_string(),
            boundaries: boundaries.trim().to_string(),
            urgency: urgency.trim().to_string(),
            context_summary: context_summary.trim().to_string(),
            status: "pending".to_string(),
            created_at: now_iso(),
        };
        self.append_jsonl(&self.bringup_queue_path(&to), &entry)?;
        Ok(entry)
    }

    pub fn load_pending_bringups(&self, to_user: &str) -> Result<Vec<BringupRequest>> {
        let all: Vec<BringupRequest> =
            self.read_jsonl(&self.bringup_queue_path(&safe_user_name(to_user)))?;
        Ok(all.into_iter().filter(|b| b.status == "pending").collect())
    }

    pub fn resolve_bringup_request(&self, to_user: &str, bringup_id: &str) -> Result<bool> {
        let path = self.bringup_queue_path(&safe_user_name(to_user));
        let mut all: Vec<BringupRequest> = self.read_jsonl(&path)?;
        let mut hit = false;
        for b in all.iter_mut() {
            if b.id == bringup_id && b.status == "pending" {
                b.status = "resolved".to_string();
                hit = true;
                break;
            }
        }
        if hit {
            self.rewrite_jsonl(&path, &all)?;
        }
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_visible_to_both_partners() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let link = store
            .link_couple("couple_ann", "couple_ben", "home", "home")
            .unwrap();

        let from_a = store.find_active_couple_for("couple_ann").unwrap().unwrap();
        let from_b = store.find_active_couple_for("couple_ben").unwrap().unwrap();
        assert_eq!(from_a.couple_id, link.couple_id);
        assert_eq!(from_b.couple_id, link.couple_id);
    }

    #[test]
    fn relink_same_pair_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let l1 = store.link_couple("couple_ann", "couple_ben", "p", "p").unwrap();
        let l2 = store.link_couple("couple_ben", "couple_ann", "p", "p").unwrap();
        assert_eq!(l1.couple_id, l2.couple_id);
    }

    #[test]
    fn registry_resolves_by_id_for_any_caller() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let link = store.link_couple("couple_ann", "couple_ben", "p", "p").unwrap();
        let found = store.get_couple(&link.couple_id).unwrap().unwrap();
        assert_eq!(found.user_a, "couple_ann");
        assert!(store.get_couple("couple-missing").unwrap().is_none());
    }

    #[test]
    fn bringup_queue_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let entry = store
            .append_bringup_request(
                "couple_ann",
                "couple_ben",
                "weekend plans",
                "gentle",
                "no blame",
                "",
                "wants to talk about scheduling",
            )
            .unwrap();

        let pending = store.load_pending_bringups("couple_ben").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].topic, "weekend plans");

        assert!(store.resolve_bringup_request("couple_ben", &entry.id).unwrap());
        assert!(store.load_pending_bringups("couple_ben").unwrap().is_empty());
        assert!(!store.resolve_bringup_request("couple_ben", &entry.id).unwrap());
    }
}
