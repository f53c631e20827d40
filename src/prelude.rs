//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use probemon_stats::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, IgnoreList};
pub use crate::core::errors::{ErrorKind, ProbeError, Result};

// Store
pub use crate::store::sqlite::{Device, ProbeEvent, ProbeStore};

// Stats
pub use crate::stats::consolidate::{BackfillReport, Consolidator, DayOutcome};
pub use crate::stats::daily::{DailySummary, ProbeSample, summarize};
pub use crate::stats::filter::{Filter, FilterBuilder, ReportCriteria};
pub use crate::stats::merge::{MergedSummary, SignalStats, merge_daily, merge_samples};
pub use crate::stats::report::{Report, ReportEngine, ReportOutput, ReportRequest};

// Journal
pub use crate::logger::jsonl::{Journal, JsonlWriter, LogEntry};
