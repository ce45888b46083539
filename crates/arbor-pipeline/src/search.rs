//! `search_evidence_v1` — the opaque evidence object from the search
//! provider. The core treats it as noisy except when the authority level is
//! `primary_confirmed`.

use serde_json::Value;

pub const SEARCH_EVIDENCE_SCHEMA: &str = "search_evidence_v1";
pub const AUTHORITY_PRIMARY_CONFIRMED: &str = "primary_confirmed";

/// Affirmative markers scanned across result snippets.
const AFFIRMATIVE_MARKERS: &[&str] = &[
    "confirmed",
    "announced",
    "official",
    "signed",
    "launched",
    "released",
    "multi-year deal",
];

#[derive(Debug, Clone, Default)]
pub struct SearchEvidence {
    pub authority_level: String,
    pub insufficient: bool,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub rank: u32,
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl SearchEvidence {
    pub fn primary_confirmed(&self) -> bool {
        self.authority_level == AUTHORITY_PRIMARY_CONFIRMED
    }

    /// Any affirmative marker in any snippet or title.
    pub fn has_affirmative_markers(&self) -> bool {
        self.results.iter().any(|r| {
            let text = format!("{} {}", r.title, r.snippet).to_lowercase();
            AFFIRMATIVE_MARKERS.iter().any(|m| text.contains(m))
        })
    }

    /// Labeled ephemeral excerpt for the canonical snippets.
    pub fn render_excerpt(&self, max_results: usize) -> String {
        let mut lines = vec![format!(
            "SEARCH_EVIDENCE (ephemeral, authority={}):",
            if self.authority_level.is_empty() {
                "unknown"
            } else {
                &self.authority_level
            }
        )];
        if self.insufficient {
            lines.push("- (provider marked results insufficient)".to_string());
        }
        for r in self.results.iter().take(max_results) {
            lines.push(format!("- [{}] {} — {}", r.rank, r.title, r.snippet));
            if !r.url.is_empty() {
                lines.push(format!("  {}", r.url));
            }
        }
        lines.join("\n")
    }

    /// Up to `n` result URLs, in rank order.
    pub fn urls(&self, n: usize) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.url.is_empty())
            .take(n)
            .map(|r| r.url.clone())
            .collect()
    }
}

/// Parse the provider object. Accepts `snippet` or `description` per result.
/// A wrong or missing schema tag yields `None` — the core never guesses.
pub fn parse_search_evidence(value: &Value) -> Option<SearchEvidence> {
    let schema = value.get("schema").and_then(|v| v.as_str())?;
    if schema != SEARCH_EVIDENCE_SCHEMA {
        return None;
    }
    let authority_level = value
        .get("authority")
        .and_then(|a| a.get("level"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let insufficient = value
        .get("insufficient")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| SearchResult {
                    rank: item.get("rank").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    title: str_field(item, "title"),
                    snippet: {
                        let s = str_field(item, "snippet");
                        if s.is_empty() {
                            str_field(item, "description")
                        } else {
                            s
                        }
                    },
                    url: str_field(item, "url"),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SearchEvidence {
        authority_level,
        insufficient,
        results,
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
