//! Local-time calendar helpers shared by consolidation and reporting.
//!
//! Probe timestamps are stored as fractional epoch seconds. Every calendar
//! concept here (day, time of day) is interpreted in the host's local zone.

#![allow(missing_docs)]

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::core::errors::{ProbeError, Result};

/// Seconds in a nominal day, used by the "last 24 hours" shorthand.
pub const SECS_PER_DAY: f64 = 86_400.0;

/// Parse a day given as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_day(raw: &str) -> Result<NaiveDate> {
    let value = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(day);
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        let year = value[..4].parse::<i32>().ok();
        let month = value[4..6].parse::<u32>().ok();
        let day = value[6..].parse::<u32>().ok();
        if let (Some(y), Some(m), Some(d)) = (year, month, day)
            && let Some(date) = NaiveDate::from_ymd_opt(y, m, d)
        {
            return Ok(date);
        }
    }
    Err(ProbeError::InvalidDay {
        value: raw.to_string(),
    })
}

/// Parse a report bound into epoch seconds.
///
/// A bare day means noon local time of that day.
pub fn parse_timestamp(raw: &str) -> Result<f64> {
    let value = raw.trim();
    let naive = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(12, 0, 0))
        });

    naive
        .and_then(|ndt| local_instant(&ndt))
        .map(|dt| epoch_secs(&dt))
        .ok_or_else(|| ProbeError::InvalidTimestamp {
            value: raw.to_string(),
        })
}

/// Half-open `[start, end)` epoch window from local midnight of `day` to the
/// next local midnight.
pub fn local_day_bounds(day: NaiveDate) -> (f64, f64) {
    let start = local_midnight(day);
    let end = day.succ_opt().map_or(start + SECS_PER_DAY, local_midnight);
    (start, end)
}

/// Local calendar day containing `ts`.
pub fn local_day_of(ts: f64) -> NaiveDate {
    local_datetime_of(ts).date()
}

/// Local wall-clock time of `ts`, truncated to whole seconds.
pub fn local_time_of_day(ts: f64) -> NaiveTime {
    local_datetime_of(ts).time()
}

/// Local wall-clock date and time of `ts`, truncated to whole seconds.
///
/// Timestamps outside chrono's range (or NaN) map to the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub fn local_datetime_of(ts: f64) -> NaiveDateTime {
    let secs = ts.floor() as i64;
    DateTime::from_timestamp(secs, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&Local)
        .naive_local()
}

/// Yesterday's date in local time.
pub fn yesterday() -> NaiveDate {
    let today = Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

/// Current time as epoch seconds.
pub fn now_epoch() -> f64 {
    epoch_secs(&Local::now())
}

fn local_midnight(day: NaiveDate) -> f64 {
    let midnight = day.and_time(NaiveTime::MIN);
    local_instant(&midnight).map_or_else(
        // No local instant at all: treat the wall clock as UTC.
        || midnight.and_utc().timestamp() as f64,
        |dt| epoch_secs(&dt),
    )
}

fn local_instant(naive: &NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // Inside a DST gap: the first valid instant is one hour later.
        LocalResult::None => Local
            .from_local_datetime(&(*naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn epoch_secs<Tz: TimeZone>(dt: &DateTime<Tz>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_day_accepts_both_forms() {
        assert_eq!(parse_day("2024-01-05").unwrap(), day(2024, 1, 5));
        assert_eq!(parse_day("20240105").unwrap(), day(2024, 1, 5));
        assert_eq!(parse_day(" 2024-12-31 ").unwrap(), day(2024, 12, 31));
    }

    #[test]
    fn parse_day_rejects_garbage() {
        for raw in ["", "yesterday", "2024-13-01", "20241301", "2024/01/05", "2024010"] {
            let err = parse_day(raw).unwrap_err();
            assert_eq!(err.code(), "PMS-1001", "{raw:?}");
        }
    }

    #[test]
    fn parse_timestamp_minute_precision() {
        let ts = parse_timestamp("2024-01-05T08:30").unwrap();
        let local = local_datetime_of(ts);
        assert_eq!(local.date(), day(2024, 1, 5));
        assert_eq!(local.time(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }

    #[test]
    fn parse_timestamp_bare_day_means_noon() {
        let ts = parse_timestamp("2024-01-05").unwrap();
        assert_eq!(
            local_time_of_day(ts),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("noon").unwrap_err();
        assert_eq!(err.code(), "PMS-1002");
    }

    #[test]
    fn day_bounds_cover_whole_local_day() {
        let d = day(2024, 1, 1);
        let (start, end) = local_day_bounds(d);
        assert!(end > start);
        assert_eq!(local_day_of(start), d);
        assert_eq!(local_day_of(end - 0.5), d);
        assert_eq!(local_day_of(end), day(2024, 1, 2));
        assert_eq!(local_time_of_day(start), NaiveTime::MIN);
    }

    #[test]
    fn fractional_timestamps_truncate() {
        let (start, _) = local_day_bounds(day(2024, 6, 1));
        assert_eq!(
            local_time_of_day(start + 59.999),
            NaiveTime::from_hms_opt(0, 0, 59).unwrap()
        );
    }

    #[test]
    fn out_of_range_timestamp_maps_to_epoch() {
        let epoch = DateTime::UNIX_EPOCH.with_timezone(&Local).naive_local();
        assert_eq!(local_datetime_of(1e300), epoch);
        assert_eq!(local_datetime_of(f64::NAN), epoch);
    }
}
