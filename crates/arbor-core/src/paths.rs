//! Path and naming safety for user-supplied project and file names.
//!
//! Every name that reaches the disk layer goes through one of these helpers.
//! `safe_project_name` preserves folder nesting ("User/Project") and cleans
//! each segment independently; `safe_filename` keeps only the basename.

/// Fallback segment when a name sanitizes to nothing.
pub const DEFAULT_PROJECT_NAME: &str = "default";

/// Normalize a project name while preserving nesting like `User/Project`.
///
/// Each path segment is sanitized independently to `[a-zA-Z0-9_-]`;
/// empty segments are dropped, and a fully-empty input yields
/// [`DEFAULT_PROJECT_NAME`].
pub fn safe_project_name(name: &str) -> String {
    let raw = name.trim().replace('\\', "/");
    let parts: Vec<&str> = raw.split('/').filter(|p| !p.trim().is_empty()).collect();
    if parts.is_empty() {
        return DEFAULT_PROJECT_NAME.to_string();
    }

    let cleaned: Vec<String> = parts
        .iter()
        .map(|part| {
            let c = sanitize_segment(part.trim(), false);
            if c.is_empty() {
                DEFAULT_PROJECT_NAME.to_string()
            } else {
                c
            }
        })
        .collect();

    cleaned.join("/")
}

/// Normalize a user name to a single safe segment (no nesting).
pub fn safe_user_name(name: &str) -> String {
    let raw = name.trim().replace('\\', "/");
    let base = raw.split('/').next_back().unwrap_or("");
    let cleaned = sanitize_segment(base.trim(), false);
    if cleaned.is_empty() {
        DEFAULT_PROJECT_NAME.to_string()
    } else {
        cleaned
    }
}

/// Derive a safe filename from an arbitrary upload name.
///
/// Only the basename is kept; characters outside `[a-zA-Z0-9_.-]` become `_`.
/// An empty result falls back to `file.bin`.
pub fn safe_filename(name: &str) -> String {
    let base = name.trim().replace('\\', "/");
    let base = base.split('/').next_back().unwrap_or("");
    let cleaned = sanitize_segment(base, true);
    if cleaned.is_empty() {
        "file.bin".to_string()
    } else {
        cleaned
    }
}

/// Replace disallowed characters with `_`. `allow_dot` admits `.` for filenames.
fn sanitize_segment(s: &str, allow_dot: bool) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || (allow_dot && c == '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Current UTC time as an ISO-8601 `Z` stamp (second precision).
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
