//! Daily aggregator: reduce one device's probe samples for one local day
//! into a [`DailySummary`].
//!
//! Signal strength 0 is the capture sentinel for "not recorded". At this
//! stage the sentinel is an ordinary value: it takes part in min, max, mean
//! and median. Reporting decides what to do with it (see `stats::merge`).

#![allow(missing_docs)]

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::core::dates::{local_day_bounds, local_time_of_day};
use crate::core::errors::Result;
use crate::store::sqlite::ProbeStore;

/// Signal strength value meaning "not recorded".
pub const UNRECORDED_SIGNAL: i32 = 0;

/// Wire format of `first_seen` / `last_seen` in the `stats` table.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Wire format of the `date` column in the `stats` table.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// One raw observation of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    /// Epoch seconds.
    pub timestamp: f64,
    /// Probed network name; empty when none was announced.
    pub network_name: String,
    pub signal: i32,
}

/// Per-device, per-day rollup stored in the `stats` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub device_id: i64,
    pub day: NaiveDate,
    pub first_seen: NaiveTime,
    pub last_seen: NaiveTime,
    pub count: u32,
    pub min: i32,
    pub max: i32,
    pub avg: i32,
    pub median: i32,
    pub network_names: BTreeSet<String>,
}

impl DailySummary {
    /// Comma-joined network names, sorted, for the `ssids` column.
    pub fn joined_network_names(&self) -> String {
        self.network_names
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode one `stats` row selected as
    /// `mac_id, date, first_seen, last_seen, count, min, max, avg, med, ssids`.
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let day: String = row.get(1)?;
        let first: String = row.get(2)?;
        let last: String = row.get(3)?;
        let names: String = row.get::<_, Option<String>>(9)?.unwrap_or_default();
        Ok(Self {
            device_id: row.get(0)?,
            day: parse_column(1, &day, |s| NaiveDate::parse_from_str(s, DAY_FORMAT))?,
            first_seen: parse_column(2, &first, |s| NaiveTime::parse_from_str(s, TIME_FORMAT))?,
            last_seen: parse_column(3, &last, |s| NaiveTime::parse_from_str(s, TIME_FORMAT))?,
            count: row.get(4)?,
            min: row.get(5)?,
            max: row.get(6)?,
            avg: row.get(7)?,
            median: row.get(8)?,
            network_names: split_network_names(&names),
        })
    }
}

/// Split a comma-joined name list, dropping the empty "no network" entry.
pub fn split_network_names(joined: &str) -> BTreeSet<String> {
    joined
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_column<T>(
    index: usize,
    raw: &str,
    parse: impl FnOnce(&str) -> chrono::ParseResult<T>,
) -> rusqlite::Result<T> {
    parse(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Median of `values`; `None` when empty.
///
/// Odd length: the middle element of the sorted values. Even length: the
/// mean of the two central elements, truncated toward zero.
pub fn median(values: &[i32]) -> Option<i32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let pair = i64::from(sorted[mid - 1]) + i64::from(sorted[mid]);
        Some(truncate_to_i32(pair / 2))
    }
}

/// Mean of `values` truncated toward zero; `None` when empty.
pub fn truncated_mean(values: &[i32]) -> Option<i32> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.iter().copied().map(i64::from).sum();
    let len = i64::try_from(values.len()).unwrap_or(i64::MAX);
    Some(truncate_to_i32(sum / len))
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn truncate_to_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Reduce the samples of one device on one day. No samples, no summary.
pub fn summarize(device_id: i64, day: NaiveDate, samples: &[ProbeSample]) -> Option<DailySummary> {
    let signals: Vec<i32> = samples.iter().map(|s| s.signal).collect();
    let min = signals.iter().copied().min()?;
    let max = signals.iter().copied().max()?;
    let avg = truncated_mean(&signals)?;
    let median = median(&signals)?;

    let (first, last) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s.timestamp), hi.max(s.timestamp))
    });

    let network_names = samples
        .iter()
        .filter(|s| !s.network_name.is_empty())
        .map(|s| s.network_name.clone())
        .collect();

    Some(DailySummary {
        device_id,
        day,
        first_seen: local_time_of_day(first),
        last_seen: local_time_of_day(last),
        count: u32::try_from(samples.len()).unwrap_or(u32::MAX),
        min,
        max,
        avg,
        median,
        network_names,
    })
}

/// Read and reduce every event of `device_id` on local day `day`.
pub fn aggregate_device_day(
    store: &ProbeStore,
    device_id: i64,
    day: NaiveDate,
) -> Result<Option<DailySummary>> {
    let (start, end) = local_day_bounds(day);
    let samples = store.device_samples(device_id, start, end)?;
    Ok(summarize(device_id, day, &samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(ts: f64, name: &str, signal: i32) -> ProbeSample {
        ProbeSample {
            timestamp: ts,
            network_name: name.to_string(),
            signal,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[-70]), Some(-70));
        assert_eq!(median(&[-70, -80, -75]), Some(-75));
        assert_eq!(median(&[-70, -80]), Some(-75));
        // (-71 + -80) / 2 = -75.5, truncated toward zero.
        assert_eq!(median(&[-71, -80]), Some(-75));
        assert_eq!(median(&[3, 1, 2, 10]), Some(2));
    }

    #[test]
    fn mean_truncates_toward_zero() {
        assert_eq!(truncated_mean(&[-70, -80, -75]), Some(-75));
        assert_eq!(truncated_mean(&[-1, -2]), Some(-1));
        assert_eq!(truncated_mean(&[]), None);
    }

    #[test]
    fn summarize_reference_example() {
        let (start, _) = local_day_bounds(day());
        let samples = [
            sample(start + 3600.0, "home", -70),
            sample(start + 7200.0, "", -80),
            sample(start + 60.0, "cafe", -75),
        ];
        let s = summarize(7, day(), &samples).unwrap();
        assert_eq!(s.device_id, 7);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, -80);
        assert_eq!(s.max, -70);
        assert_eq!(s.avg, -75);
        assert_eq!(s.median, -75);
        assert_eq!(s.first_seen, NaiveTime::from_hms_opt(0, 1, 0).unwrap());
        assert_eq!(s.last_seen, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(
            s.network_names.iter().collect::<Vec<_>>(),
            vec!["cafe", "home"]
        );
        assert_eq!(s.joined_network_names(), "cafe,home");
    }

    #[test]
    fn summarize_empty_is_absence() {
        assert!(summarize(1, day(), &[]).is_none());
    }

    #[test]
    fn sentinel_counts_in_daily_stats() {
        let (start, _) = local_day_bounds(day());
        let samples = [sample(start, "", 0), sample(start + 1.0, "", -60)];
        let s = summarize(1, day(), &samples).unwrap();
        assert_eq!(s.max, UNRECORDED_SIGNAL);
        assert_eq!(s.min, -60);
        assert_eq!(s.avg, -30);
    }

    #[test]
    fn split_names_drops_empty() {
        let names = split_network_names(",home,,cafe");
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["cafe", "home"]);
        assert!(split_network_names("").is_empty());
    }

    #[test]
    fn aggregate_reads_only_the_requested_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProbeStore::create(&dir.path().join("p.db")).unwrap();
        let (start, end) = local_day_bounds(day());
        let addr = "00:11:22:33:44:55";
        store.record_probe(start - 1.0, addr, "V", "", -10).unwrap();
        store.record_probe(start, addr, "V", "home", -70).unwrap();
        store.record_probe(end - 0.25, addr, "V", "", -80).unwrap();
        store.record_probe(end, addr, "V", "", -20).unwrap();

        let s = aggregate_device_day(&store, 1, day()).unwrap().unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.max, -70);
        assert_eq!(s.min, -80);
        assert_eq!(s.last_seen, NaiveTime::from_hms_opt(23, 59, 59).unwrap());

        let other = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert!(aggregate_device_day(&store, 1, other).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn median_matches_sorted_definition(values in prop::collection::vec(-100i32..=0, 1..64)) {
            let mut sorted = values.clone();
            sorted.sort_unstable();
            let n = sorted.len();
            let expected = if n % 2 == 1 {
                sorted[n / 2]
            } else {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2
            };
            prop_assert_eq!(median(&values), Some(expected));
        }

        #[test]
        fn summary_extrema_bracket_mean_and_median(values in prop::collection::vec(-100i32..=0, 1..64)) {
            let samples: Vec<ProbeSample> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| sample(1_700_000_000.0 + i as f64, "", v))
                .collect();
            let s = summarize(1, day(), &samples).unwrap();
            prop_assert!(s.min <= s.avg && s.avg <= s.max);
            prop_assert!(s.min <= s.median && s.median <= s.max);
            prop_assert_eq!(s.count as usize, values.len());
        }
    }
}
