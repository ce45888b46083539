//! Time-awareness system note and project time anchors.
//!
//! The note is system-only and fully deterministic given a clock and zone.
//! Anchor detection is conservative: only concrete start-events match, and
//! storage dedupes within 120 seconds for identical labels.

use chrono::{DateTime, Utc};

use arbor_core::time::{local_stamp, minutes_ago, parse_rfc3339, LocalStamp};
use arbor_store::state::TimeAnchor;

/// Same-label dedupe window for anchors, seconds.
pub const ANCHOR_DEDUPE_SECS: i64 = 120;
/// Anchors rendered in the note (most recent).
const ANCHORS_RENDERED: usize = 3;

/// Render the full time block: TIME_RULE + TIME_CONTEXT (+ TIME_FLAG,
/// + TIME_ANCHORS when present).
pub fn render_time_note(
    stamp: &LocalStamp,
    birthday_today: bool,
    anchors: &[TimeAnchor],
    now: DateTime<Utc>,
) -> String {
    let mut out = String::from(
        "TIME_RULE: Use the local time below for any time-sensitive reasoning. \
         Never state a different current time.\n",
    );
    out.push_str(&format!(
        "TIME_CONTEXT: {} ({}) \u{2022} daypart={}\n",
        stamp.rendered,
        stamp.zone,
        stamp.daypart.as_str()
    ));
    if birthday_today {
        out.push_str("TIME_FLAG: birthday_today=true\n");
    }
    if !anchors.is_empty() {
        let start = anchors.len().saturating_sub(ANCHORS_RENDERED);
        let rendered: Vec<String> = anchors[start..]
            .iter()
            .filter_map(|a| {
                let ts = parse_rfc3339(&a.ts)?;
                Some(format!("{} ({}m ago)", a.label, minutes_ago(ts, now)))
            })
            .collect();
        if !rendered.is_empty() {
            out.push_str(&format!("TIME_ANCHORS: {}\n", rendered.join("; ")));
        }
    }
    out.trim_end().to_string()
}

/// Convenience: resolve the zone and render for `now`.
pub fn time_note_for(
    timezone: &str,
    default_timezone: &str,
    birthdate_iso: &str,
    anchors: &[TimeAnchor],
    now: DateTime<Utc>,
) -> String {
    let tz = arbor_core::time::resolve_timezone(timezone)
        .or_else(|_| arbor_core::time::resolve_timezone(default_timezone))
        .unwrap_or(chrono_tz::America::Chicago);
    let stamp = local_stamp(now, tz);
    let birthday = !birthdate_iso.is_empty()
        && arbor_core::time::is_birthday_today(birthdate_iso, now, tz);
    render_time_note(&stamp, birthday, anchors, now)
}

/// Conservative start-event patterns. Each entry is (prefix, optional
/// required suffix fragment); the label is the matched span minus "i just ".
const ANCHOR_PATTERNS: &[(&str, Option<&str>)] = &[
    ("i just put ", Some(" in the oven")),
    ("i just started ", None),
    ("i just turned on ", None),
    ("i just set a timer for ", None),
];

/// Detect a concrete start-event in the message. Returns the anchor label.
pub fn detect_anchor(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    for (prefix, required) in ANCHOR_PATTERNS {
        let Some(idx) = lower.find(prefix) else {
            continue;
        };
        let rest = &lower[idx + prefix.len()..];
        let end = rest.find(['.', '!', '?', ',', '\n']).unwrap_or(rest.len());
        let tail = rest[..end].trim();
        if tail.is_empty() || tail.len() > 80 {
            continue;
        }
        match required {
            Some(frag) => {
                if tail.contains(frag.trim()) || rest[..end].contains(frag) {
                    let verb = prefix.trim_start_matches("i just ").trim();
                    return Some(format!("{verb} {tail}"));
                }
            }
            None => {
                let verb = prefix.trim_start_matches("i just ").trim();
                return Some(format!("{verb} {tail}"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::time::resolve_timezone;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, h, m, 0).unwrap()
    }

    #[test]
    fn note_has_rule_context_and_daypart() {
        let tz = resolve_timezone("America/Chicago").unwrap();
        let stamp = local_stamp(utc(14, 0), tz); // 09:00 CDT
        let note = render_time_note(&stamp, false, &[], utc(14, 0));
        assert!(note.starts_with("TIME_RULE:"));
        assert!(note.contains("TIME_CONTEXT: 2026-06-15 09:00 CDT (America/Chicago)"));
        assert!(note.contains("daypart=morning"));
        assert!(!note.contains("TIME_FLAG"));
    }

    #[test]
    fn birthday_flag_renders() {
        let tz = resolve_timezone("America/Chicago").unwrap();
        let stamp = local_stamp(utc(14, 0), tz);
        let note = render_time_note(&stamp, true, &[], utc(14, 0));
        assert!(note.contains("TIME_FLAG: birthday_today=true"));
    }

    #[test]
    fn anchors_render_last_three_with_minutes() {
        let tz = resolve_timezone("America/Chicago").unwrap();
        let now = utc(12, 40);
        let stamp = local_stamp(now, tz);
        let anchors: Vec<TimeAnchor> = (0..4)
            .map(|i| TimeAnchor {
                label: format!("started task {i}"),
                ts: format!("2026-06-15T12:{:02}:00Z", i * 10),
                tz: "America/Chicago".into(),
            })
            .collect();
        let note = render_time_note(&stamp, false, &anchors, now);
        assert!(!note.contains("started task 0"));
        assert!(note.contains("started task 1 (30m ago)"));
        assert!(note.contains("started task 3 (10m ago)"));
    }

    #[test]
    fn anchor_detection_is_conservative() {
        assert_eq!(
            detect_anchor("I just put the roast in the oven."),
            Some("put the roast in the oven".to_string())
        );
        assert_eq!(
            detect_anchor("I just started the dishwasher"),
            Some("started the dishwasher".to_string())
        );
        assert!(detect_anchor("I put some thought into this").is_none());
        assert!(detect_anchor("we should start the project").is_none());
    }

    #[test]
    fn unknown_zone_falls_back_to_default() {
        let note = time_note_for("Not/AZone", "America/Chicago", "", &[], utc(14, 0));
        assert!(note.contains("America/Chicago"));
    }
}
