use serde::{Deserialize, Serialize};

/// Which slot a raw fact fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Identity,
    Relationship,
    Preference,
    Possession,
    Routine,
    Constraint,
    Context,
    Event,
    Other,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Identity => "identity",
            Self::Relationship => "relationship",
            Self::Preference => "preference",
            Self::Possession => "possession",
            Self::Routine => "routine",
            Self::Constraint => "constraint",
            Self::Context => "context",
            Self::Event => "event",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Slot {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "relationship" => Ok(Self::Relationship),
            "preference" => Ok(Self::Preference),
            "possession" => Ok(Self::Possession),
            "routine" => Ok(Self::Routine),
            "constraint" => Ok(Self::Constraint),
            "context" => Ok(Self::Context),
            "event" => Ok(Self::Event),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown slot: {other}")),
        }
    }
}

/// Whose fact this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    User,
    Other,
    Project,
    Unknown,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Other => "other",
            Self::Project => "project",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Subject {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "other" => Ok(Self::Other),
            "project" => Ok(Self::Project),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown subject: {other}")),
        }
    }
}

/// One append-only Tier-1 record. Never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFact {
    pub claim: String,
    pub slot: Slot,
    pub subject: Subject,
    /// Where the candidate came from ("chat", "import", ...).
    pub source: String,
    /// Verbatim substring of the extraction window.
    pub evidence_quote: String,
    pub turn_index: u64,
    pub timestamp: String,
    #[serde(default)]
    pub entity_key: String,
    /// 0.0–1.0; deterministic extraction writes 0.8.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

pub fn default_confidence() -> f64 {
    0.8
}

/// One distilled Tier-2 fact in the compact view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactFact {
    pub claim: String,
    pub slot: Slot,
    pub subject: Subject,
    pub entity_key: String,
    pub confidence: f64,
}

impl CompactFact {
    /// Identity and relationship facts are pinned to the top of the view.
    pub fn pinned(&self) -> bool {
        matches!(self.slot, Slot::Identity | Slot::Relationship)
    }

    pub fn render_line(&self) -> String {
        format!(
            "- [{}/{}] {} (key={}, conf={:.1})",
            self.slot, self.subject, self.claim, self.entity_key, self.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trip() {
        for s in [
            Slot::Identity,
            Slot::Relationship,
            Slot::Preference,
            Slot::Event,
            Slot::Other,
        ] {
            assert_eq!(s.to_string().parse::<Slot>().unwrap(), s);
        }
        assert!("bogus".parse::<Slot>().is_err());
    }

    #[test]
    fn compact_fact_pinning() {
        let f = CompactFact {
            claim: "preferred name is Frank".into(),
            slot: Slot::Identity,
            subject: Subject::User,
            entity_key: "user.preferred_name".into(),
            confidence: 0.9,
        };
        assert!(f.pinned());
        assert!(f.render_line().contains("[identity/user]"));
    }
}
