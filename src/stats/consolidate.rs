//! Consolidation manager: builds and maintains the `stats` table.
//!
//! Each day is consolidated inside its own transaction. A backfill that
//! fails (or is killed) after day K leaves days up to K committed, and a
//! re-run rewrites them in place thanks to `ON CONFLICT REPLACE`.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rusqlite::params;

use crate::core::dates::{local_day_bounds, local_day_of, yesterday};
use crate::core::errors::{ProbeError, Result};
use crate::stats::daily::{DAY_FORMAT, DailySummary, TIME_FORMAT, aggregate_device_day};
use crate::store::sqlite::ProbeStore;

/// Name of the derived summary table.
pub const STATS_TABLE: &str = "stats";

/// What one `consolidate_day` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    pub day: NaiveDate,
    /// Devices with at least one event that day.
    pub devices: usize,
    pub rows_written: usize,
    pub duration: Duration,
}

/// Result of a completed backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Inclusive day range that was walked; `None` when there were no events.
    pub range: Option<(NaiveDate, NaiveDate)>,
    pub days: Vec<DayOutcome>,
}

impl BackfillReport {
    pub fn rows_written(&self) -> usize {
        self.days.iter().map(|d| d.rows_written).sum()
    }
}

/// Sole writer of the `stats` table.
pub struct Consolidator<'a> {
    store: &'a ProbeStore,
}

impl<'a> Consolidator<'a> {
    /// Wrap a read-write store. Read-only stores are refused.
    pub fn new(store: &'a ProbeStore) -> Result<Self> {
        store.ensure_writable()?;
        Ok(Self { store })
    }

    /// Create the summary table and its device index if they are missing.
    pub fn ensure_schema(&self) -> Result<()> {
        self.store
            .connection()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS stats (
                    mac_id INTEGER,
                    date TEXT,
                    first_seen TEXT,
                    last_seen TEXT,
                    count INTEGER,
                    min INTEGER,
                    max INTEGER,
                    avg INTEGER,
                    med INTEGER,
                    ssids TEXT,
                    UNIQUE(mac_id, date) ON CONFLICT REPLACE,
                    FOREIGN KEY(mac_id) REFERENCES mac(id)
                );

                CREATE INDEX IF NOT EXISTS indx_stats ON stats(mac_id);",
            )
            .map_err(|e| ProbeError::sql("stats schema", &e))?;
        Ok(())
    }

    /// Summarize every device seen on `day` and replace its row.
    ///
    /// Devices without events that day are left untouched.
    pub fn consolidate_day(&self, day: NaiveDate) -> Result<DayOutcome> {
        let started = Instant::now();
        self.ensure_schema()?;

        let conn = self.store.connection();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ProbeError::sql("begin day", &e))?;

        let (start, end) = local_day_bounds(day);
        let devices = self.store.devices_seen_between(start, end)?;
        let mut rows_written = 0;
        for &device_id in &devices {
            if let Some(summary) = aggregate_device_day(self.store, device_id, day)? {
                upsert_summary(conn, &summary)?;
                rows_written += 1;
            }
        }

        tx.commit().map_err(|e| ProbeError::sql("commit day", &e))?;
        Ok(DayOutcome {
            day,
            devices: devices.len(),
            rows_written,
            duration: started.elapsed(),
        })
    }

    /// Consolidate yesterday (local time). Meant for a daily scheduler.
    pub fn consolidate_latest(&self) -> Result<DayOutcome> {
        self.consolidate_day(yesterday())
    }

    /// Consolidate every day from `start` to `end` inclusive.
    ///
    /// Missing bounds come from the earliest/latest event. `on_day` runs
    /// after each day's commit. The first failure stops the walk and is
    /// returned as [`ProbeError::BackfillAborted`] naming the day.
    pub fn consolidate_range<F>(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        mut on_day: F,
    ) -> Result<BackfillReport>
    where
        F: FnMut(&DayOutcome),
    {
        let Some((first, last)) = self.resolve_range(start, end)? else {
            return Ok(BackfillReport::default());
        };
        if first > last {
            return Err(ProbeError::InvalidRange {
                start: first,
                end: last,
            });
        }

        let mut report = BackfillReport {
            range: Some((first, last)),
            days: Vec::new(),
        };
        for day in first.iter_days().take_while(|d| *d <= last) {
            let outcome = self
                .consolidate_day(day)
                .map_err(|source| ProbeError::BackfillAborted {
                    day,
                    source: Box::new(source),
                })?;
            on_day(&outcome);
            report.days.push(outcome);
        }
        Ok(report)
    }

    /// Drop the whole summary table. Fails when it does not exist.
    pub fn clear(&self) -> Result<()> {
        if !self.store.table_exists(STATS_TABLE)? {
            return Err(ProbeError::MissingTable { table: STATS_TABLE });
        }
        self.store
            .connection()
            .execute_batch("DROP TABLE stats;")
            .map_err(|e| ProbeError::sql("drop stats", &e))?;
        Ok(())
    }

    fn resolve_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        if let (Some(s), Some(e)) = (start, end) {
            return Ok(Some((s, e)));
        }
        let Some((first_ts, last_ts)) = self.store.event_time_range()? else {
            return Ok(None);
        };
        Ok(Some((
            start.unwrap_or_else(|| local_day_of(first_ts)),
            end.unwrap_or_else(|| local_day_of(last_ts)),
        )))
    }
}

fn upsert_summary(conn: &rusqlite::Connection, summary: &DailySummary) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO stats (
            mac_id, date, first_seen, last_seen, count, min, max, avg, med, ssids
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
    )?
    .execute(params![
        summary.device_id,
        summary.day.format(DAY_FORMAT).to_string(),
        summary.first_seen.format(TIME_FORMAT).to_string(),
        summary.last_seen.format(TIME_FORMAT).to_string(),
        summary.count,
        summary.min,
        summary.max,
        summary.avg,
        summary.median,
        summary.joined_network_names(),
    ])
    .map_err(|e| ProbeError::sql("upsert stats", &e))?;
    Ok(())
}

/// All summaries for one device, oldest day first.
pub fn device_summaries(store: &ProbeStore, device_id: i64) -> Result<Vec<DailySummary>> {
    let mut stmt = store
        .connection()
        .prepare_cached(
            "SELECT mac_id, date, first_seen, last_seen, count, min, max, avg, med, ssids
             FROM stats WHERE mac_id = ?1 ORDER BY date ASC",
        )
        .map_err(|e| ProbeError::sql("read stats", &e))?;
    let rows = stmt
        .query_map(params![device_id], DailySummary::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
