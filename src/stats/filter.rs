//! Query filter builder: turns optional report criteria into one predicate.
//!
//! Criteria become typed [`Clause`]s in a fixed order, whatever order the
//! operator gave them in. SQL text and positional arguments are produced
//! together by [`Filter::render`], so a fragment can never drift from its
//! argument.

#![allow(missing_docs)]

use rusqlite::types::Value;

use crate::core::config::IgnoreList;
use crate::core::dates::SECS_PER_DAY;
use crate::core::errors::{ProbeError, Result};

/// Length of a fully written `xx:xx:xx:xx:xx:xx` address.
pub const FULL_ADDRESS_LEN: usize = 17;

/// Optional report criteria as supplied by the operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportCriteria {
    /// Only events strictly after this epoch time.
    pub after: Option<f64>,
    /// Only events strictly before this epoch time.
    pub before: Option<f64>,
    /// Shorthand for "the 24 hours before now". Excludes `after`/`before`.
    pub last_day: bool,
    /// Full addresses (exact) or leading fragments (prefix).
    pub devices: Vec<String>,
    /// Only samples with strength strictly above this value.
    pub min_signal: Option<i32>,
    /// Drop samples whose strength was not recorded.
    pub exclude_zero: bool,
}

impl ReportCriteria {
    pub fn has_device_filter(&self) -> bool {
        !self.devices.is_empty()
    }
}

/// How a device pattern matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPattern {
    Exact(String),
    Prefix(String),
}

impl AddressPattern {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim().to_string();
        if value.len() == FULL_ADDRESS_LEN {
            Self::Exact(value)
        } else {
            Self::Prefix(value)
        }
    }

    fn like_argument(&self) -> String {
        match self {
            Self::Exact(value) => value.clone(),
            Self::Prefix(value) => format!("{value}%"),
        }
    }
}

/// One predicate over the joined event rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Any of the patterns matches the device address.
    DeviceAnyOf(Vec<AddressPattern>),
    SignalAbove(i32),
    After(f64),
    Before(f64),
    /// Signal strength is not the unrecorded sentinel.
    RecordedSignal,
    /// Device address is outside the ignore list.
    NotIgnored(Vec<String>),
    /// Event probed this network id.
    Network(i64),
}

impl Clause {
    /// Whether this clause only looks at the device, not at individual samples.
    pub fn is_device_only(&self) -> bool {
        matches!(self, Self::DeviceAnyOf(_) | Self::NotIgnored(_))
    }

    fn render(&self, columns: &Columns, args: &mut Vec<Value>) -> String {
        match self {
            Self::DeviceAnyOf(patterns) => {
                let parts: Vec<String> = patterns
                    .iter()
                    .map(|p| {
                        args.push(Value::Text(p.like_argument()));
                        format!("{} LIKE ?", columns.address)
                    })
                    .collect();
                if parts.len() > 1 {
                    format!("({})", parts.join(" OR "))
                } else {
                    parts.join("")
                }
            }
            Self::SignalAbove(threshold) => {
                args.push(Value::Integer(i64::from(*threshold)));
                format!("{} > ?", columns.signal)
            }
            Self::After(ts) => {
                args.push(Value::Real(*ts));
                format!("{} > ?", columns.timestamp)
            }
            Self::Before(ts) => {
                args.push(Value::Real(*ts));
                format!("{} < ?", columns.timestamp)
            }
            Self::RecordedSignal => format!("{} != 0", columns.signal),
            Self::Network(id) => {
                args.push(Value::Integer(*id));
                format!("{} = ?", columns.network)
            }
            Self::NotIgnored(addresses) => {
                let marks = vec!["?"; addresses.len()].join(",");
                args.extend(addresses.iter().cloned().map(Value::Text));
                format!("{} NOT IN ({marks})", columns.address)
            }
        }
    }
}

/// Column names a filter renders against.
#[derive(Debug, Clone, Copy)]
pub struct Columns {
    pub address: &'static str,
    pub timestamp: &'static str,
    pub signal: &'static str,
    pub network: &'static str,
}

impl Columns {
    /// `probemon` joined with `mac`.
    pub const EVENTS: Self = Self {
        address: "mac.address",
        timestamp: "probemon.date",
        signal: "probemon.rssi",
        network: "probemon.ssid",
    };
}

/// A composed predicate ready to be rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True when no clause needs per-sample data, so a lookup over daily
    /// summaries can honour the whole filter.
    pub fn is_device_only(&self) -> bool {
        self.clauses.iter().all(Clause::is_device_only)
    }

    /// Only the device clauses of this filter.
    pub fn device_clauses(&self) -> Self {
        Self {
            clauses: self
                .clauses
                .iter()
                .filter(|c| c.is_device_only())
                .cloned()
                .collect(),
        }
    }

    /// Same filter with every device pattern removed. The ignore list stays.
    pub fn without_device_patterns(&self) -> Self {
        Self {
            clauses: self
                .clauses
                .iter()
                .filter(|c| !matches!(c, Clause::DeviceAnyOf(_)))
                .cloned()
                .collect(),
        }
    }

    /// This filter restricted to events that probed `network_id`.
    pub fn for_network(&self, network_id: i64) -> Self {
        let mut clauses = Vec::with_capacity(self.clauses.len() + 1);
        clauses.push(Clause::Network(network_id));
        clauses.extend(self.clauses.iter().cloned());
        Self { clauses }
    }

    /// Render as ` WHERE ...` (or nothing) plus arguments in placeholder order.
    pub fn render(&self, columns: &Columns) -> (String, Vec<Value>) {
        let mut args = Vec::new();
        if self.clauses.is_empty() {
            return (String::new(), args);
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| c.render(columns, &mut args))
            .collect();
        (format!(" WHERE {}", parts.join(" AND ")), args)
    }
}

/// Builds [`Filter`]s, always folding in the ignore list.
pub struct FilterBuilder<'a> {
    ignored: &'a IgnoreList,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(ignored: &'a IgnoreList) -> Self {
        Self { ignored }
    }

    /// Compose `criteria` into a filter. `now` anchors the last-24h shorthand.
    pub fn build(&self, criteria: &ReportCriteria, now: f64) -> Result<Filter> {
        if criteria.last_day && (criteria.after.is_some() || criteria.before.is_some()) {
            return Err(ProbeError::ConflictingFilters {
                details: "last 24 hours conflicts with explicit after/before bounds".to_string(),
            });
        }

        let (after, before) = if criteria.last_day {
            (Some(now - SECS_PER_DAY), Some(now))
        } else {
            (criteria.after, criteria.before)
        };

        let mut clauses = Vec::new();
        let patterns: Vec<AddressPattern> = criteria
            .devices
            .iter()
            .filter(|d| !d.trim().is_empty())
            .map(|d| AddressPattern::parse(d))
            .collect();
        if !patterns.is_empty() {
            clauses.push(Clause::DeviceAnyOf(patterns));
        }
        if let Some(threshold) = criteria.min_signal {
            clauses.push(Clause::SignalAbove(threshold));
        }
        if let Some(ts) = after {
            clauses.push(Clause::After(ts));
        }
        if let Some(ts) = before {
            clauses.push(Clause::Before(ts));
        }
        if criteria.exclude_zero {
            clauses.push(Clause::RecordedSignal);
        }
        if !self.ignored.is_empty() {
            clauses.push(Clause::NotIgnored(
                self.ignored.iter().map(str::to_string).collect(),
            ));
        }
        Ok(Filter { clauses })
    }
}
