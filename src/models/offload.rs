//! Reporting types for offload cycles.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counts for one scan batch. Not persisted.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OffloadSummary {
    pub files_found: usize,
    pub uploaded: usize,
    pub deleted: usize,
    /// Files left on local disk because upload, verification or delete failed.
    pub failed: usize,
    pub pruned_dirs: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// How a single offload cycle ended.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The upload root does not exist yet.
    Skipped,
    /// The upload root holds no files.
    Empty,
    /// Another cycle was already running in this process.
    Busy,
    Completed(OffloadSummary),
}
