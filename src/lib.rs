#![forbid(unsafe_code)]

//! probemon_stats: statistics over a probemon wireless probe-request database.
//!
//! Two halves:
//! 1. **Consolidation** builds a per-device, per-day `stats` table from raw
//!    probe events, one transaction per day, idempotently.
//! 2. **Reporting** answers filtered queries read-only, from the `stats`
//!    table when it can and from raw events otherwise.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use probemon_stats::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use probemon_stats::core::config::Config;
//! use probemon_stats::stats::consolidate::Consolidator;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod stats;
pub mod store;
