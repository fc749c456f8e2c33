//! Queue snapshots with JSON serialization support.

use crate::progress::ProgressUpdate;
use serde::{Deserialize, Serialize};

/// The job currently held by the active slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveJobStatus {
    pub job_id: String,
    pub display_name: String,
    pub source_path: String,
    pub stage_count: usize,
    /// Pid of the running encoder, absent between stages
    pub pid: Option<u32>,
    pub aborting: bool,
}

/// A job waiting behind the active one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingJobStatus {
    pub job_id: String,
    pub display_name: String,
}

/// Terminal outcomes seen since the queue was created
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounters {
    pub queued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub timestamp_unix_ms: i64,
    pub active: Option<ActiveJobStatus>,
    pub pending: Vec<PendingJobStatus>,
    pub paused: bool,
    pub counters: QueueCounters,
    /// Latest update of the active job
    pub progress: Option<ProgressUpdate>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it
pub fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
