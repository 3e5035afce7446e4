//! Time bucketing for series keys.
//!
//! Every key is computed in a fixed reference offset with no DST handling.
//! Stored rows were keyed against Pacific Standard Time all year round and new
//! keys must line up with them.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

const DAY_FORMAT: &str = "%Y-%m-%d";
const VERBOSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const LONG_FORM_FORMAT: &str = "%B %d, %Y";

/// Seconds west of UTC for Pacific Standard Time.
const PACIFIC_STANDARD_WEST_SECS: i32 = 8 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// `YYYY-MM-DD` of the reference-local calendar day.
    Day,
    /// `YYYY-MM-DD` of the Monday starting the reference-local week.
    WeekStartMonday,
    /// Reference-local wall clock written as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
    VerboseTimestamp,
}

/// The default reference offset (UTC-8).
pub fn pacific_standard() -> FixedOffset {
    FixedOffset::west_opt(PACIFIC_STANDARD_WEST_SECS).unwrap_or_else(|| Utc.fix())
}

/// Build a reference offset from whole hours east of UTC.
pub fn offset_from_hours(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// Calendar day of `instant` in the reference offset.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Most recent Monday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Canonical series key for `instant`.
pub fn bucket_key(instant: DateTime<Utc>, offset: FixedOffset, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => local_date(instant, offset).format(DAY_FORMAT).to_string(),
        Granularity::WeekStartMonday => week_start(local_date(instant, offset))
            .format(DAY_FORMAT)
            .to_string(),
        Granularity::VerboseTimestamp => instant
            .with_timezone(&offset)
            .naive_local()
            .format(VERBOSE_FORMAT)
            .to_string(),
    }
}

/// Whether `key` is exactly what [`bucket_key`] would produce for some instant.
pub fn is_valid_key(key: &str, granularity: Granularity) -> bool {
    match granularity {
        Granularity::Day => parse_day(key).is_some(),
        Granularity::WeekStartMonday => {
            parse_day(key).is_some_and(|d| d.weekday().num_days_from_monday() == 0)
        }
        Granularity::VerboseTimestamp => {
            key.len() == 24 && NaiveDateTime::parse_from_str(key, VERBOSE_FORMAT).is_ok()
        }
    }
}

/// Re-key a manually supplied key for `granularity`.
///
/// Keys already in canonical form pass through unchanged. Plain days and
/// long-form dates (`"July 28, 2025"`, written by older loaders) are mapped
/// onto the day or week bucket containing that day. A verbose timestamp
/// carries a time of day that a date alone cannot supply, so only keys
/// already in that form are accepted for it.
pub fn normalize_key(key: &str, granularity: Granularity) -> Option<String> {
    let key = key.trim();
    if is_valid_key(key, granularity) {
        return Some(key.to_string());
    }

    let day = parse_day(key)
        .or_else(|| NaiveDate::parse_from_str(key, LONG_FORM_FORMAT).ok())?;
    match granularity {
        Granularity::Day => Some(day.format(DAY_FORMAT).to_string()),
        Granularity::WeekStartMonday => Some(week_start(day).format(DAY_FORMAT).to_string()),
        Granularity::VerboseTimestamp => None,
    }
}

fn parse_day(key: &str) -> Option<NaiveDate> {
    if key.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(key, DAY_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_day_uses_reference_offset() {
        let pst = pacific_standard();
        // 05:00 UTC is still the previous evening in UTC-8.
        assert_eq!(bucket_key(utc(2025, 7, 28, 5, 0), pst, Granularity::Day), "2025-07-27");
        assert_eq!(bucket_key(utc(2025, 7, 28, 8, 0), pst, Granularity::Day), "2025-07-28");
    }

    #[test]
    fn test_no_dst_adjustment_in_summer() {
        // July is PDT (UTC-7) on a wall clock, but keys stay on UTC-8.
        let pst = pacific_standard();
        assert_eq!(bucket_key(utc(2025, 7, 28, 7, 30), pst, Granularity::Day), "2025-07-27");
    }

    #[test]
    fn test_week_start_rolls_back_to_monday() {
        let pst = pacific_standard();
        // Sunday 2025-08-03 local.
        assert_eq!(
            bucket_key(utc(2025, 8, 3, 20, 0), pst, Granularity::WeekStartMonday),
            "2025-07-28"
        );
        // Monday maps to itself.
        assert_eq!(
            bucket_key(utc(2025, 7, 28, 20, 0), pst, Granularity::WeekStartMonday),
            "2025-07-28"
        );
    }

    #[test]
    fn test_verbose_timestamp_is_shifted_wall_clock() {
        let pst = pacific_standard();
        let instant =
            Utc.with_ymd_and_hms(2025, 7, 28, 12, 0, 0).unwrap() + Duration::milliseconds(123);
        assert_eq!(
            bucket_key(instant, pst, Granularity::VerboseTimestamp),
            "2025-07-28T04:00:00.123Z"
        );
    }

    #[test]
    fn test_bucketing_is_stable() {
        let pst = pacific_standard();
        let instant = utc(2025, 1, 1, 0, 0);
        for granularity in [
            Granularity::Day,
            Granularity::WeekStartMonday,
            Granularity::VerboseTimestamp,
        ] {
            let first = bucket_key(instant, pst, granularity);
            for _ in 0..10 {
                assert_eq!(bucket_key(instant, pst, granularity), first);
            }
        }
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("2025-07-28", Granularity::Day));
        assert!(!is_valid_key("2025-7-28", Granularity::Day));
        assert!(!is_valid_key("July 28, 2025", Granularity::Day));
        assert!(is_valid_key("2025-07-28", Granularity::WeekStartMonday));
        assert!(!is_valid_key("2025-07-29", Granularity::WeekStartMonday));
        assert!(is_valid_key("2025-07-28T04:00:00.000Z", Granularity::VerboseTimestamp));
        assert!(!is_valid_key("2025-07-28T04:00:00Z", Granularity::VerboseTimestamp));
    }

    #[test]
    fn test_normalize_long_form_date() {
        assert_eq!(
            normalize_key("July 28, 2025", Granularity::Day).as_deref(),
            Some("2025-07-28")
        );
        assert_eq!(
            normalize_key("July 30, 2025", Granularity::WeekStartMonday).as_deref(),
            Some("2025-07-28")
        );
        assert_eq!(normalize_key("yesterday", Granularity::Day), None);
    }

    #[test]
    fn test_normalize_verbose_requires_full_timestamp() {
        assert_eq!(
            normalize_key(" 2025-07-28T04:00:00.000Z ", Granularity::VerboseTimestamp).as_deref(),
            Some("2025-07-28T04:00:00.000Z")
        );
        assert_eq!(normalize_key("2025-07-28", Granularity::VerboseTimestamp), None);
        assert_eq!(normalize_key("July 28, 2025", Granularity::VerboseTimestamp), None);
    }

    #[test]
    fn test_offset_from_hours() {
        assert_eq!(offset_from_hours(-8), Some(pacific_standard()));
        assert_eq!(offset_from_hours(30), None);
    }
}
