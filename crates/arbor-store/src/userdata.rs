//! Per-user durable state: the Tier-2G identity profile, the Tier-2M global
//! facts map, and memory policy rules.

use serde::{Deserialize, Serialize};

use arbor_core::paths::{now_iso, safe_user_name};

use crate::error::Result;
use crate::store::ProjectStore;

pub const USER_PROFILE_SCHEMA: &str = "user_profile_v1";
pub const GLOBAL_FACTS_SCHEMA: &str = "global_facts_map_v1";

/// Curated identity kernel. Only explicit first-person evidence promotes here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IdentityKernel {
    #[serde(default)]
    pub preferred_name: String,
    /// ISO `YYYY-MM-DD` or empty.
    #[serde(default)]
    pub birthdate: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFact {
    /// e.g. "son", "girlfriend", "partner".
    pub relation: String,
    pub name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_profile_schema")]
    pub schema: String,
    #[serde(default)]
    pub identity: IdentityKernel,
    #[serde(default)]
    pub relationships: Vec<RelationshipFact>,
    #[serde(default)]
    pub updated_at: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            schema: default_profile_schema(),
            identity: IdentityKernel::default(),
            relationships: Vec::new(),
            updated_at: String::new(),
        }
    }
}

fn default_profile_schema() -> String {
    USER_PROFILE_SCHEMA.to_string()
}

/// One compact cross-project fact in the Tier-2M map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalFact {
    pub claim: String,
    pub slot: String,
    #[serde(default)]
    pub entity_key: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalFactsMap {
    #[serde(default = "default_global_schema")]
    pub schema: String,
    #[serde(default)]
    pub facts: Vec<GlobalFact>,
    #[serde(default)]
    pub updated_at: String,
}

impl Default for GlobalFactsMap {
    fn default() -> Self {
        Self {
            schema: default_global_schema(),
            facts: Vec::new(),
            updated_at: String::new(),
        }
    }
}

fn default_global_schema() -> String {
    GLOBAL_FACTS_SCHEMA.to_string()
}

// ---------------------------------------------------------------------------
// Memory policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    DoNotStore,
    ProjectOnly,
    DoNotResurface,
    AllowGlobal,
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DoNotStore => write!(f, "do_not_store"),
            Self::ProjectOnly => write!(f, "project_only"),
            Self::DoNotResurface => write!(f, "do_not_resurface"),
            Self::AllowGlobal => write!(f, "allow_global"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMatchType {
    EntityKey,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub action: PolicyAction,
    pub match_type: PolicyMatchType,
    pub match_value: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub created_at: String,
}

impl ProjectStore {
    pub fn load_user_profile(&self, user: &str) -> Result<UserProfile> {
        let path = self.user_profile_path(&safe_user_name(user));
        if !path.exists() {
            return Ok(UserProfile::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    }

    pub fn save_user_profile(&self, user: &str, mut profile: UserProfile) -> Result<UserProfile> {
        let user = safe_user_name(user);
        self.ensure_user(&user)?;
        profile.updated_at = now_iso();
        let path = self.user_profile_path(&user);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();
        self.write_atomic(&path, &serde_json::to_string_pretty(&profile)?)?;
        Ok(profile)
    }

    pub fn load_global_facts_map(&self, user: &str) -> Result<GlobalFactsMap> {
        let path = self.user_global_facts_map_path(&safe_user_name(user));
        if !path.exists() {
            return Ok(GlobalFactsMap::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    }

    pub fn save_global_facts_map(&self, user: &str, mut map: GlobalFactsMap) -> Result<()> {
        let user = safe_user_name(user);
        self.ensure_user(&user)?;
        map.updated_at = now_iso();
        let path = self.user_global_facts_map_path(&user);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();
        self.write_atomic(&path, &serde_json::to_string_pretty(&map)?)
    }

    pub fn load_memory_policies(&self, user: &str) -> Result<Vec<PolicyRule>> {
        let path = self.memory_policies_path(&safe_user_name(user));
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    }

    /// Upsert a rule; idempotent per `{action, match_type, match_value}`
    /// (match_value compared case-insensitively).
    pub fn upsert_memory_policy(&self, user: &str, mut rule: PolicyRule) -> Result<()> {
        let user = safe_user_name(user);
        self.ensure_user(&user)?;
        let path = self.memory_policies_path(&user);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();

        let mut rules: Vec<PolicyRule> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        let exists = rules.iter().any(|r| {
            r.action == rule.action
                && r.match_type == rule.match_type
                && r.match_value.eq_ignore_ascii_case(&rule.match_value)
        });
        if !exists {
            rule.created_at = now_iso();
            rules.push(rule);
            self.write_atomic(&path, &serde_json::to_string_pretty(&rules)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let mut prof = UserProfile::default();
        prof.identity.preferred_name = "Frank".into();
        prof.identity.timezone = "America/Chicago".into();
        store.save_user_profile("Frank", prof).unwrap();

        let loaded = store.load_user_profile("Frank").unwrap();
        assert_eq!(loaded.schema, USER_PROFILE_SCHEMA);
        assert_eq!(loaded.identity.preferred_name, "Frank");
    }

    #[test]
    fn policy_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let rule = PolicyRule {
            action: PolicyAction::DoNotStore,
            match_type: PolicyMatchType::Substring,
            match_value: "my salary".into(),
            note: String::new(),
            created_at: String::new(),
        };
        store.upsert_memory_policy("Frank", rule.clone()).unwrap();
        store.upsert_memory_policy("Frank", rule.clone()).unwrap();
        // Case-insensitive dedupe.
        store
            .upsert_memory_policy(
                "Frank",
                PolicyRule {
                    match_value: "My Salary".into(),
                    ..rule
                },
            )
            .unwrap();
        assert_eq!(store.load_memory_policies("Frank").unwrap().len(), 1);
    }
}
