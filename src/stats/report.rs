//! Reporting engine over a read-only probe store.
//!
//! A [`ReportRequest`] resolves into exactly one [`ReportMode`]. Aggregate
//! and day-by-day reports read the `stats` table when it exists, summaries
//! are allowed and the filter only selects devices. Anything else scans raw
//! events.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::config::IgnoreList;
use crate::core::dates::local_day_of;
use crate::core::errors::{ProbeError, Result};
use crate::stats::consolidate::{STATS_TABLE, device_summaries};
use crate::stats::daily::{DailySummary, ProbeSample, summarize};
use crate::stats::filter::{Filter, FilterBuilder, ReportCriteria};
use crate::stats::merge::{MergedSummary, merge_daily, merge_samples};
use crate::store::sqlite::{Device, ProbeEvent, ProbeStore, is_locally_administered};

/// Identity every locally-administered device folds into under privacy merge.
pub const PRIVACY_SUBJECT: &str = "LAA";

/// Everything an operator can ask of one report invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub criteria: ReportCriteria,
    /// Merge locally-administered devices, or skip them when listing.
    pub privacy: bool,
    pub day_by_day: bool,
    /// Allow reading the `stats` table.
    pub use_summaries: bool,
    pub list_networks: bool,
    pub log: bool,
    /// Look up devices that probed this network name.
    pub network: Option<String>,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            criteria: ReportCriteria::default(),
            privacy: false,
            day_by_day: false,
            use_summaries: true,
            list_networks: false,
            log: false,
            network: None,
        }
    }
}

/// The single report produced by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMode {
    NetworkLookup(String),
    Log,
    ListNetworks,
    DayByDay,
    Aggregate,
}

/// Operator-facing remarks gathered while resolving and running a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// A device filter was dropped because a network lookup overrides it.
    DeviceFilterIgnored,
    /// Results came from the `stats` table.
    UsingSummaries,
    /// No `stats` table exists; consolidating would speed this up.
    SummariesUnavailable,
}

impl Notice {
    pub fn message(self) -> &'static str {
        match self {
            Self::DeviceFilterIgnored => "ignoring device filter for network lookup",
            Self::UsingSummaries => "using the stats table",
            Self::SummariesUnavailable => {
                "no stats table; run `probestats consolidate init` to speed this up"
            }
        }
    }
}

/// Where the numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Summaries,
    RawEvents,
}

/// A request after validation and mode precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub mode: ReportMode,
    pub criteria: ReportCriteria,
    pub privacy: bool,
    pub use_summaries: bool,
    pub notices: Vec<Notice>,
}

impl ReportRequest {
    /// Apply mode precedence and validate the combination.
    ///
    /// Precedence: network lookup, log, network listing, day-by-day,
    /// aggregate. Listing drops device filters and day-by-day.
    pub fn resolve(self) -> Result<ResolvedRequest> {
        let mut criteria = self.criteria;
        let mut day_by_day = self.day_by_day;
        let mut notices = Vec::new();

        if self.list_networks {
            criteria.devices.clear();
            day_by_day = false;
        }
        if criteria.last_day && (criteria.after.is_some() || criteria.before.is_some()) {
            return Err(ProbeError::ConflictingFilters {
                details: "--day conflicts with --after or --before".to_string(),
            });
        }
        if day_by_day && !criteria.has_device_filter() {
            return Err(ProbeError::MissingFilter {
                details: "--day-by-day needs at least one --mac".to_string(),
            });
        }

        let mode = if let Some(name) = self.network {
            if criteria.has_device_filter() {
                criteria.devices.clear();
                notices.push(Notice::DeviceFilterIgnored);
            }
            ReportMode::NetworkLookup(name)
        } else if self.log {
            ReportMode::Log
        } else if self.list_networks {
            ReportMode::ListNetworks
        } else if day_by_day {
            ReportMode::DayByDay
        } else {
            ReportMode::Aggregate
        };

        Ok(ResolvedRequest {
            mode,
            criteria,
            privacy: self.privacy,
            use_summaries: self.use_summaries,
            notices,
        })
    }
}

/// Devices that probed one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkDevices {
    pub network_name: String,
    pub devices: Vec<String>,
}

/// A network probed by several devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkListing {
    pub network_name: String,
    pub devices: BTreeSet<String>,
}

/// One device's daily rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDays {
    pub address: String,
    pub vendor: String,
    pub locally_administered: bool,
    pub days: Vec<DailySummary>,
}

/// Aggregate of one report subject (a device or the privacy pseudo-device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectReport {
    pub subject: String,
    pub vendor: String,
    pub locally_administered: bool,
    #[serde(flatten)]
    pub summary: MergedSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "rows", rename_all = "snake_case")]
pub enum Report {
    NetworkLookup(NetworkDevices),
    Log(Vec<ProbeEvent>),
    Networks(Vec<NetworkListing>),
    DayByDay(Vec<DeviceDays>),
    Aggregate(Vec<SubjectReport>),
}

impl Report {
    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::NetworkLookup(found) => found.devices.is_empty(),
            Self::Log(rows) => rows.is_empty(),
            Self::Networks(rows) => rows.is_empty(),
            Self::DayByDay(rows) => rows.is_empty(),
            Self::Aggregate(rows) => rows.is_empty(),
        }
    }
}

/// A finished report with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutput {
    pub source: DataSource,
    pub notices: Vec<Notice>,
    #[serde(flatten)]
    pub report: Report,
}

/// Runs reports. Holds a read-only store only.
pub struct ReportEngine<'a> {
    store: &'a ProbeStore,
    ignored: &'a IgnoreList,
}

impl<'a> ReportEngine<'a> {
    /// Refuses stores that can write.
    pub fn new(store: &'a ProbeStore, ignored: &'a IgnoreList) -> Result<Self> {
        if !store.is_read_only() {
            return Err(ProbeError::InvalidConfig {
                details: format!(
                    "reports need a read-only store, got {} opened read-write",
                    store.path().display()
                ),
            });
        }
        Ok(Self { store, ignored })
    }

    /// Resolve and run `request`. `now` anchors the last-24h shorthand.
    pub fn run(&self, request: ReportRequest, now: f64) -> Result<ReportOutput> {
        let resolved = request.resolve()?;
        let filter = FilterBuilder::new(self.ignored).build(&resolved.criteria, now)?;
        let mut notices = resolved.notices;

        let summaries_present = self.store.table_exists(STATS_TABLE)?;
        let fast = summaries_present && resolved.use_summaries && filter.is_device_only();
        let day_by_day = resolved.mode == ReportMode::DayByDay;

        let (source, report) = match resolved.mode {
            ReportMode::NetworkLookup(name) => (
                DataSource::RawEvents,
                Report::NetworkLookup(self.network_lookup(&name, &filter, resolved.privacy)?),
            ),
            ReportMode::Log => (DataSource::RawEvents, Report::Log(self.store.events(&filter)?)),
            ReportMode::ListNetworks => (
                DataSource::RawEvents,
                Report::Networks(self.list_networks(&filter)?),
            ),
            ReportMode::DayByDay | ReportMode::Aggregate => {
                if fast {
                    notices.push(Notice::UsingSummaries);
                } else if resolved.use_summaries && !summaries_present {
                    notices.push(Notice::SummariesUnavailable);
                }
                let report = match (day_by_day, fast) {
                    (true, true) => Report::DayByDay(self.day_by_day_from_summaries(&filter)?),
                    (true, false) => Report::DayByDay(self.day_by_day_from_events(&filter)?),
                    (false, true) => {
                        Report::Aggregate(self.aggregate_from_summaries(&filter, resolved.privacy)?)
                    }
                    (false, false) => {
                        Report::Aggregate(self.aggregate_from_events(&filter, resolved.privacy)?)
                    }
                };
                let source = if fast {
                    DataSource::Summaries
                } else {
                    DataSource::RawEvents
                };
                (source, report)
            }
        };

        Ok(ReportOutput {
            source,
            notices,
            report,
        })
    }

    fn network_lookup(&self, name: &str, filter: &Filter, privacy: bool) -> Result<NetworkDevices> {
        let Some(network_id) = self.store.network_id(name)? else {
            return Err(ProbeError::NetworkNotFound {
                name: name.to_string(),
            });
        };
        let devices = self
            .store
            .devices_probing_network(network_id, &filter.without_device_patterns())?
            .into_iter()
            .filter(|d| !(privacy && d.is_locally_administered()))
            .map(|d| d.address)
            .collect();
        Ok(NetworkDevices {
            network_name: name.to_string(),
            devices,
        })
    }

    /// Names probed by more than one globally-unique device, most devices first.
    fn list_networks(&self, filter: &Filter) -> Result<Vec<NetworkListing>> {
        let mut by_name: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for event in self.store.events(filter)? {
            if event.network_name.is_empty() || event.is_locally_administered() {
                continue;
            }
            by_name
                .entry(event.network_name)
                .or_default()
                .insert(event.address);
        }
        let mut listing: Vec<NetworkListing> = by_name
            .into_iter()
            .filter(|(_, devices)| devices.len() > 1)
            .map(|(network_name, devices)| NetworkListing {
                network_name,
                devices,
            })
            .collect();
        listing.sort_by(|a, b| {
            b.devices
                .len()
                .cmp(&a.devices.len())
                .then_with(|| a.network_name.cmp(&b.network_name))
        });
        Ok(listing)
    }

    fn day_by_day_from_summaries(&self, filter: &Filter) -> Result<Vec<DeviceDays>> {
        let mut out = Vec::new();
        for device in self.store.devices_matching(filter)? {
            let days = device_summaries(self.store, device.id)?;
            if !days.is_empty() {
                out.push(device_days(device, days));
            }
        }
        Ok(out)
    }

    fn day_by_day_from_events(&self, filter: &Filter) -> Result<Vec<DeviceDays>> {
        struct Group {
            device: Device,
            days: BTreeMap<NaiveDate, Vec<ProbeSample>>,
        }

        let mut order: Vec<i64> = Vec::new();
        let mut groups: BTreeMap<i64, Group> = BTreeMap::new();
        for event in self.store.events(filter)? {
            let day = local_day_of(event.timestamp);
            let group = groups.entry(event.device_id).or_insert_with(|| {
                order.push(event.device_id);
                Group {
                    device: Device {
                        id: event.device_id,
                        address: event.address.clone(),
                        vendor: event.vendor.clone(),
                    },
                    days: BTreeMap::new(),
                }
            });
            group.days.entry(day).or_default().push(ProbeSample {
                timestamp: event.timestamp,
                network_name: event.network_name,
                signal: event.signal,
            });
        }

        Ok(order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .map(|group| {
                let days = group
                    .days
                    .iter()
                    .filter_map(|(day, samples)| summarize(group.device.id, *day, samples))
                    .collect();
                device_days(group.device, days)
            })
            .collect())
    }

    fn aggregate_from_summaries(&self, filter: &Filter, privacy: bool) -> Result<Vec<SubjectReport>> {
        let mut subjects: BTreeMap<String, (String, Vec<DailySummary>)> = BTreeMap::new();
        for device in self.store.devices_matching(filter)? {
            let rows = device_summaries(self.store, device.id)?;
            if rows.is_empty() {
                continue;
            }
            let key = subject_of(&device.address, privacy);
            subjects
                .entry(key)
                .or_insert_with(|| (device.vendor.clone(), Vec::new()))
                .1
                .extend(rows);
        }
        let reports = subjects
            .into_iter()
            .filter_map(|(subject, (vendor, rows))| {
                merge_daily(&rows).map(|summary| subject_report(subject, vendor, summary))
            })
            .collect();
        Ok(ranked(reports))
    }

    fn aggregate_from_events(&self, filter: &Filter, privacy: bool) -> Result<Vec<SubjectReport>> {
        let mut subjects: BTreeMap<String, (String, Vec<ProbeSample>)> = BTreeMap::new();
        for event in self.store.events(filter)? {
            let key = subject_of(&event.address, privacy);
            subjects
                .entry(key)
                .or_insert_with(|| (event.vendor.clone(), Vec::new()))
                .1
                .push(ProbeSample {
                    timestamp: event.timestamp,
                    network_name: event.network_name,
                    signal: event.signal,
                });
        }
        let reports = subjects
            .into_iter()
            .filter_map(|(subject, (vendor, samples))| {
                merge_samples(&samples).map(|summary| subject_report(subject, vendor, summary))
            })
            .collect();
        Ok(ranked(reports))
    }
}

fn subject_of(address: &str, privacy: bool) -> String {
    if privacy && is_locally_administered(address) {
        PRIVACY_SUBJECT.to_string()
    } else {
        address.to_string()
    }
}

fn subject_report(subject: String, vendor: String, summary: MergedSummary) -> SubjectReport {
    SubjectReport {
        locally_administered: is_locally_administered(&subject),
        subject,
        vendor,
        summary,
    }
}

fn device_days(device: Device, days: Vec<DailySummary>) -> DeviceDays {
    DeviceDays {
        locally_administered: device.is_locally_administered(),
        address: device.address,
        vendor: device.vendor,
        days,
    }
}

/// Most samples first; ties by subject for stable output.
fn ranked(mut reports: Vec<SubjectReport>) -> Vec<SubjectReport> {
    reports.sort_by(|a, b| {
        b.summary
            .ranking_count()
            .cmp(&a.summary.ranking_count())
            .then_with(|| a.subject.cmp(&b.subject))
    });
    reports
}
