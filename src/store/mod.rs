//! Probe database access.

pub mod sqlite;
