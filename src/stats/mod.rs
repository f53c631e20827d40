//! Statistics engine: daily aggregation, consolidation, filtering, merging
//! and reporting.

pub mod consolidate;
pub mod daily;
pub mod filter;
pub mod merge;
pub mod report;
