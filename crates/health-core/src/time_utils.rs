use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HealthError, Result};

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

// ── Timestamp parsing ─────────────────────────────────────────────────────────

/// Format used by the export, e.g. `2024-01-15 22:30:00 -0500`.
const EXPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Parse an export timestamp into a timezone-aware instant.
///
/// Accepts the export's native format and RFC 3339 as a fallback. Returns
/// `None` for anything else; callers treat that as a per-record skip.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_str(s, EXPORT_FORMAT) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    debug!("could not parse timestamp \"{}\"", s);
    None
}

// ── LocalClock ────────────────────────────────────────────────────────────────

/// Decides which wall clock calendar dates and hours are read from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalClock {
    /// Each record's own UTC offset, as written in the export.
    Source,
    /// A fixed IANA zone applied to every record.
    Zone(Tz),
}

impl LocalClock {
    /// Build a clock from a config value: `"source"`, `"auto"` or an IANA name.
    pub fn from_setting(setting: &str) -> Result<Self> {
        match setting {
            "source" => Ok(LocalClock::Source),
            "auto" => Self::zone(&get_system_timezone()),
            name => Self::zone(name),
        }
    }

    fn zone(name: &str) -> Result<Self> {
        name.parse::<Tz>()
            .map(LocalClock::Zone)
            .map_err(|_| HealthError::Config(format!("unrecognised timezone \"{}\"", name)))
    }

    /// Wall-clock time of `dt` under this clock.
    pub fn local(&self, dt: &DateTime<FixedOffset>) -> NaiveDateTime {
        match self {
            LocalClock::Source => dt.naive_local(),
            LocalClock::Zone(tz) => dt.with_timezone(tz).naive_local(),
        }
    }

    pub fn local_date(&self, dt: &DateTime<FixedOffset>) -> NaiveDate {
        self.local(dt).date()
    }

    /// Night anchor day of an interval starting at `start`.
    ///
    /// Intervals starting at or after `boundary_hour` belong to that day's
    /// night; earlier ones belong to the previous day's night.
    pub fn night_anchor(&self, start: &DateTime<FixedOffset>, boundary_hour: u32) -> NaiveDate {
        let local = self.local(start);
        if local.hour() >= boundary_hour {
            local.date()
        } else {
            local.date() - Duration::days(1)
        }
    }
}

// ── Granularity ───────────────────────────────────────────────────────────────

/// Calendar span of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl Granularity {
    /// First day of the bucket containing `date`.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// First day of the bucket following the one starting at `start`.
    pub fn next_start(self, start: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => start + Duration::days(1),
            Granularity::Month => {
                let (y, m) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(start)
            }
            Granularity::Year => {
                NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap_or(start)
            }
        }
    }

    /// Calendar key: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub fn key(self, date: NaiveDate) -> String {
        match self {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Month => date.format("%Y-%m").to_string(),
            Granularity::Year => date.format("%Y").to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<FixedOffset> {
        parse_timestamp(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── parse_timestamp ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_export_format_keeps_offset() {
        let dt = ts("2024-01-15 22:30:00 -0500");
        assert_eq!(dt.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(dt.naive_local().hour(), 22);
    }

    #[test]
    fn test_parse_rfc3339_fallback() {
        let dt = ts("2024-01-15T08:00:00Z");
        assert_eq!(dt.naive_utc().hour(), 8);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-45 99:00:00 +0000").is_none());
    }

    // ── LocalClock ────────────────────────────────────────────────────────────

    #[test]
    fn test_night_anchor_after_boundary_is_same_day() {
        let clock = LocalClock::Source;
        let start = ts("2024-03-10 22:15:00 +0100");
        assert_eq!(clock.night_anchor(&start, 18), date(2024, 3, 10));
    }

    #[test]
    fn test_night_anchor_before_boundary_is_previous_day() {
        let clock = LocalClock::Source;
        let start = ts("2024-03-11 02:40:00 +0100");
        assert_eq!(clock.night_anchor(&start, 18), date(2024, 3, 10));
    }

    #[test]
    fn test_zone_clock_reinterprets_offset() {
        let clock = LocalClock::from_setting("Asia/Tokyo").unwrap();
        // 20:00 UTC is 05:00 the next day in Tokyo.
        let start = ts("2024-03-10 20:00:00 +0000");
        assert_eq!(clock.local_date(&start), date(2024, 3, 11));
    }

    #[test]
    fn test_unknown_zone_is_config_error() {
        assert!(matches!(
            LocalClock::from_setting("Mars/Olympus_Mons"),
            Err(HealthError::Config(_))
        ));
    }

    // ── Granularity ───────────────────────────────────────────────────────────

    #[test]
    fn test_granularity_keys() {
        let d = date(2024, 2, 29);
        assert_eq!(Granularity::Day.key(d), "2024-02-29");
        assert_eq!(Granularity::Month.key(d), "2024-02");
        assert_eq!(Granularity::Year.key(d), "2024");
    }

    #[test]
    fn test_granularity_next_start_rolls_over() {
        assert_eq!(Granularity::Day.next_start(date(2023, 12, 31)), date(2024, 1, 1));
        assert_eq!(Granularity::Month.next_start(date(2023, 12, 1)), date(2024, 1, 1));
        assert_eq!(Granularity::Year.next_start(date(2023, 1, 1)), date(2024, 1, 1));
    }

    #[test]
    fn test_granularity_bucket_start() {
        assert_eq!(Granularity::Month.bucket_start(date(2024, 5, 17)), date(2024, 5, 1));
        assert_eq!(Granularity::Year.bucket_start(date(2024, 5, 17)), date(2024, 1, 1));
    }
}
