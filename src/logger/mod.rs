//! Append-only JSONL journal of consolidation runs.

pub mod jsonl;
