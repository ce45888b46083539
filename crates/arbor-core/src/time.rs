//! Local-time resolution for the time-awareness system notes.
//!
//! The server's reference zone defaults to `America/Chicago` and can be
//! overridden per user from the profile's identity kernel. All rendering here
//! is deterministic given a timestamp and a zone.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{CoreError, Result};

/// Fallback zone when no profile override exists.
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Resolve an IANA zone name, falling back to [`DEFAULT_TIMEZONE`] for empty
/// input. Unknown names are an error so callers can decide whether to degrade.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    let name = name.trim();
    let effective = if name.is_empty() { DEFAULT_TIMEZONE } else { name };
    effective
        .parse::<Tz>()
        .map_err(|_| CoreError::UnknownTimezone(effective.to_string()))
}

/// Coarse daypart buckets used in the time-context line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daypart {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl Daypart {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Daypart::Morning,
            12..=16 => Daypart::Afternoon,
            17..=20 => Daypart::Evening,
            _ => Daypart::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Daypart::Morning => "morning",
            Daypart::Afternoon => "afternoon",
            Daypart::Evening => "evening",
            Daypart::Night => "night",
        }
    }
}

/// A resolved local timestamp with everything the time note needs.
#[derive(Debug, Clone)]
pub struct LocalStamp {
    /// Human stamp, e.g. `2026-08-01 14:05 CDT`.
    pub rendered: String,
    /// IANA zone name, e.g. `America/Chicago`.
    pub zone: String,
    pub daypart: Daypart,
    /// `MM-DD` of the local date, for birthday matching.
    pub month_day: String,
}

/// Render `now` in `tz` for the time-context line.
pub fn local_stamp(now: DateTime<Utc>, tz: Tz) -> LocalStamp {
    let local = now.with_timezone(&tz);
    LocalStamp {
        rendered: local.format("%Y-%m-%d %H:%M %Z").to_string(),
        zone: tz.name().to_string(),
        daypart: Daypart::from_hour(local.hour()),
        month_day: format!("{:02}-{:02}", local.month(), local.day()),
    }
}

/// True when an ISO `YYYY-MM-DD` birthdate lands on the local date of `now`.
pub fn is_birthday_today(birthdate_iso: &str, now: DateTime<Utc>, tz: Tz) -> bool {
    let parts: Vec<&str> = birthdate_iso.trim().split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    let (Ok(m), Ok(d)) = (parts[1].parse::<u32>(), parts[2].parse::<u32>()) else {
        return false;
    };
    let local = now.with_timezone(&tz);
    local.month() == m && local.day() == d
}

/// Minutes elapsed between `then` and `now`, clamped at zero.
pub fn minutes_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_minutes().max(0)
}

/// Parse an RFC3339 stamp, tolerating the plain `...Z` shape `now_iso` emits.
pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn resolve_default_and_known() {
        assert_eq!(resolve_timezone("").unwrap().name(), "America/Chicago");
        assert_eq!(resolve_timezone("Europe/Berlin").unwrap().name(), "Europe/Berlin");
        assert!(resolve_timezone("Not/AZone").is_err());
    }

    #[test]
    fn daypart_buckets() {
        assert_eq!(Daypart::from_hour(6), Daypart::Morning);
        assert_eq!(Daypart::from_hour(13), Daypart::Afternoon);
        assert_eq!(Daypart::from_hour(19), Daypart::Evening);
        assert_eq!(Daypart::from_hour(2), Daypart::Night);
        assert_eq!(Daypart::from_hour(23), Daypart::Night);
    }

    #[test]
    fn stamp_renders_local_zone() {
        let tz = resolve_timezone("America/Chicago").unwrap();
        // 18:00 UTC in January is 12:00 CST.
        let stamp = local_stamp(utc(2026, 1, 15, 18, 0), tz);
        assert!(stamp.rendered.starts_with("2026-01-15 12:00"));
        assert!(stamp.rendered.ends_with("CST"));
        assert_eq!(stamp.daypart, Daypart::Afternoon);
        assert_eq!(stamp.month_day, "01-15");
    }

    #[test]
    fn birthday_match_is_local() {
        let tz = resolve_timezone("America/Chicago").unwrap();
        // 03:00 UTC on Aug 2 is still Aug 1 in Chicago.
        let now = utc(2026, 8, 2, 3, 0);
        assert!(is_birthday_today("1982-08-01", now, tz));
        assert!(!is_birthday_today("1982-08-02", now, tz));
        assert!(!is_birthday_today("not-a-date", now, tz));
    }

    #[test]
    fn minutes_ago_clamps() {
        let a = utc(2026, 1, 1, 10, 0);
        let b = utc(2026, 1, 1, 10, 42);
        assert_eq!(minutes_ago(a, b), 42);
        assert_eq!(minutes_ago(b, a), 0);
    }
}
