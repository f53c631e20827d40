//! Summary merger: fold many daily summaries, or many raw samples, into the
//! aggregate of one report subject.
//!
//! Two folds exist and they do not agree exactly:
//!
//! - [`merge_daily`] recombines per-day rows. Its `avg` and `median` are
//!   count-weighted means of the per-day values, which approximates the true
//!   mean and median without touching raw data. Per-day statistics include
//!   the zero sentinel, so the merged ones do too, except `max`.
//! - [`merge_samples`] computes exact statistics over raw samples with the
//!   zero sentinel removed.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::core::dates::local_datetime_of;
use crate::stats::daily::{
    DailySummary, ProbeSample, UNRECORDED_SIGNAL, median, truncate_to_i32, truncated_mean,
};

/// Signal statistics of a merged subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalStats {
    /// Samples contributing to the statistics.
    pub count: u64,
    pub min: i32,
    pub max: i32,
    pub avg: i32,
    pub median: i32,
}

/// Aggregate of one report subject over its whole history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSummary {
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub network_names: BTreeSet<String>,
    /// Observations folded in, recorded strength or not.
    pub records: u64,
    /// `None` when every sample was the unrecorded sentinel.
    pub signal: Option<SignalStats>,
}

impl MergedSummary {
    /// Sample count used to rank subjects.
    pub fn ranking_count(&self) -> u64 {
        self.signal.map_or(0, |s| s.count)
    }
}

/// Count-weighted merge of daily summaries. `None` for no input.
///
/// `max` skips rows whose maximum is the sentinel; it falls back to the
/// sentinel only when every row's maximum is. A single unrecorded sample
/// makes that day's maximum 0, so such a day never contributes to the
/// merged `max` even when it also holds recorded strengths.
pub fn merge_daily<'a, I>(records: I) -> Option<MergedSummary>
where
    I: IntoIterator<Item = &'a DailySummary>,
{
    struct Acc {
        first: NaiveDateTime,
        last: NaiveDateTime,
        names: BTreeSet<String>,
        count: u64,
        min: i32,
        max: Option<i32>,
        weighted_avg: i64,
        weighted_median: i64,
    }

    let acc = records.into_iter().fold(None::<Acc>, |acc, r| {
        let first = r.day.and_time(r.first_seen);
        let last = r.day.and_time(r.last_seen);
        let count = u64::from(r.count);
        let weight = i64::from(r.count);
        let real_max = (r.max != UNRECORDED_SIGNAL).then_some(r.max);
        Some(match acc {
            None => Acc {
                first,
                last,
                names: r.network_names.clone(),
                count,
                min: r.min,
                max: real_max,
                weighted_avg: i64::from(r.avg) * weight,
                weighted_median: i64::from(r.median) * weight,
            },
            Some(mut a) => {
                a.first = a.first.min(first);
                a.last = a.last.max(last);
                a.names.extend(r.network_names.iter().cloned());
                a.count += count;
                a.min = a.min.min(r.min);
                a.max = match (a.max, real_max) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (x, y) => x.or(y),
                };
                a.weighted_avg += i64::from(r.avg) * weight;
                a.weighted_median += i64::from(r.median) * weight;
                a
            }
        })
    })?;

    let mut names = acc.names;
    names.remove("");
    let divisor = i64::try_from(acc.count).unwrap_or(i64::MAX).max(1);
    Some(MergedSummary {
        first_seen: acc.first,
        last_seen: acc.last,
        network_names: names,
        records: acc.count,
        signal: Some(SignalStats {
            count: acc.count,
            min: acc.min,
            max: acc.max.unwrap_or(UNRECORDED_SIGNAL),
            avg: truncate_to_i32(acc.weighted_avg / divisor),
            median: truncate_to_i32(acc.weighted_median / divisor),
        }),
    })
}

/// Exact merge of raw samples. `None` for no input.
///
/// Sentinel samples count as observations (`records`, first/last seen,
/// names) but never as signal values.
pub fn merge_samples<'a, I>(samples: I) -> Option<MergedSummary>
where
    I: IntoIterator<Item = &'a ProbeSample>,
{
    let mut first = f64::INFINITY;
    let mut last = f64::NEG_INFINITY;
    let mut names = BTreeSet::new();
    let mut signals = Vec::new();
    let mut records = 0u64;

    for sample in samples {
        records += 1;
        first = first.min(sample.timestamp);
        last = last.max(sample.timestamp);
        if !sample.network_name.is_empty() {
            names.insert(sample.network_name.clone());
        }
        if sample.signal != UNRECORDED_SIGNAL {
            signals.push(sample.signal);
        }
    }
    if records == 0 {
        return None;
    }

    let signal = match (
        signals.iter().copied().min(),
        signals.iter().copied().max(),
        truncated_mean(&signals),
        median(&signals),
    ) {
        (Some(min), Some(max), Some(avg), Some(median)) => Some(SignalStats {
            count: signals.len() as u64,
            min,
            max,
            avg,
            median,
        }),
        _ => None,
    };

    Some(MergedSummary {
        first_seen: local_datetime_of(first),
        last_seen: local_datetime_of(last),
        network_names: names,
        records,
        signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn summary(day: u32, count: u32, min: i32, max: i32, avg: i32, median: i32) -> DailySummary {
        DailySummary {
            device_id: 1,
            day: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            first_seen: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            last_seen: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            count,
            min,
            max,
            avg,
            median,
            network_names: BTreeSet::new(),
        }
    }

    #[test]
    fn weighted_average_truncates() {
        let rows = [
            summary(1, 3, -80, -70, -75, -75),
            summary(2, 1, -50, -50, -50, -50),
        ];
        let merged = merge_daily(&rows).unwrap();
        let signal = merged.signal.unwrap();
        assert_eq!(signal.avg, -68);
        assert_eq!(signal.median, -68);
        assert_eq!(signal.count, 4);
        assert_eq!(signal.min, -80);
        assert_eq!(signal.max, -50);
    }

    #[test]
    fn sentinel_max_does_not_hide_real_max() {
        let rows = [
            summary(1, 2, 0, 0, 0, 0),
            summary(2, 2, -90, -60, -75, -75),
        ];
        assert_eq!(merge_daily(&rows).unwrap().signal.unwrap().max, -60);

        let only_sentinel = [summary(1, 2, 0, 0, 0, 0)];
        assert_eq!(
            merge_daily(&only_sentinel).unwrap().signal.unwrap().max,
            UNRECORDED_SIGNAL
        );
    }

    #[test]
    fn span_and_names_union() {
        let mut a = summary(2, 1, -50, -50, -50, -50);
        a.network_names = ["home".to_string(), String::new()].into_iter().collect();
        let mut b = summary(1, 1, -50, -50, -50, -50);
        b.first_seen = NaiveTime::from_hms_opt(6, 30, 0).unwrap();
        b.network_names = ["cafe".to_string()].into_iter().collect();

        let merged = merge_daily([&a, &b]).unwrap();
        assert_eq!(
            merged.first_seen,
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(6, 30, 0)
                .unwrap()
        );
        assert_eq!(
            merged.last_seen,
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );
        let names: Vec<&str> = merged.network_names.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["cafe", "home"]);
    }

    #[test]
    fn no_records_no_data() {
        assert!(merge_daily(std::iter::empty()).is_none());
        assert!(merge_samples(std::iter::empty()).is_none());
    }

    fn sample(ts: f64, signal: i32) -> ProbeSample {
        ProbeSample {
            timestamp: ts,
            network_name: "home".to_string(),
            signal,
        }
    }

    #[test]
    fn one_unrecorded_sample_drops_the_day_from_merged_max() {
        let jan = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let first = [sample(10.0, 0), sample(20.0, -71), sample(30.0, -80)];
        let second = [sample(90_000.0, 0)];
        let days = [
            crate::stats::daily::summarize(1, jan(1), &first).unwrap(),
            crate::stats::daily::summarize(1, jan(2), &second).unwrap(),
        ];
        assert_eq!(days[0].max, UNRECORDED_SIGNAL);
        assert_eq!(merge_daily(&days).unwrap().signal.unwrap().max, UNRECORDED_SIGNAL);

        let raw: Vec<ProbeSample> = first.iter().chain(second.iter()).cloned().collect();
        assert_eq!(merge_samples(&raw).unwrap().signal.unwrap().max, -71);
    }

    #[test]
    fn samples_exclude_sentinel_from_signal() {
        let samples = [sample(10.0, -70), sample(20.0, 0), sample(30.0, -80), sample(40.0, -60)];
        let merged = merge_samples(&samples).unwrap();
        assert_eq!(merged.records, 4);
        let signal = merged.signal.unwrap();
        assert_eq!(signal.count, 3);
        assert_eq!(signal.max, -60);
        assert_eq!(signal.avg, -70);
        assert_eq!(signal.median, -70);
        assert_eq!(merged.first_seen, local_datetime_of(10.0));
        assert_eq!(merged.last_seen, local_datetime_of(40.0));
    }

    #[test]
    fn only_sentinels_means_nothing_recorded() {
        let samples = [sample(10.0, 0), sample(11.0, 0)];
        let merged = merge_samples(&samples).unwrap();
        assert_eq!(merged.records, 2);
        assert!(merged.signal.is_none());
        assert_eq!(merged.ranking_count(), 0);
    }

    proptest! {
        #[test]
        fn merged_count_is_sum_of_counts(
            rows in prop::collection::vec((1u32..500, -100i32..=0, -100i32..=0), 1..20)
        ) {
            let summaries: Vec<DailySummary> = rows
                .iter()
                .enumerate()
                .map(|(i, &(count, a, b))| {
                    let (lo, hi) = (a.min(b), a.max(b));
                    summary(u32::try_from(i % 28).unwrap() + 1, count, lo, hi, lo, hi)
                })
                .collect();
            let merged = merge_daily(&summaries).unwrap();
            let expected: u64 = rows.iter().map(|r| u64::from(r.0)).sum();
            prop_assert_eq!(merged.records, expected);
            let signal = merged.signal.unwrap();
            prop_assert_eq!(signal.count, expected);

            let real_max = summaries.iter().map(|s| s.max).filter(|m| *m != 0).max();
            prop_assert_eq!(signal.max, real_max.unwrap_or(0));
            prop_assert!(signal.min <= signal.avg);
        }
    }
}
