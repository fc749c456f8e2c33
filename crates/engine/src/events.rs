//! Events published by the supervisor and queue to observers.

use crate::job::JobOutcome;
use crate::progress::ProgressUpdate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the unbounded event stream shared by the engine's components.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    JobQueued {
        job_id: String,
        display_name: String,
        /// Jobs waiting behind the active one after this enqueue
        pending: usize,
    },
    JobStarted {
        job_id: String,
        display_name: String,
        stage_count: usize,
    },
    StageStarted {
        job_id: String,
        /// 1-based
        stage: usize,
        stage_count: usize,
        command: String,
    },
    Progress(ProgressUpdate),
    Paused {
        job_id: String,
    },
    Resumed {
        job_id: String,
    },
    JobFinished {
        job_id: String,
        display_name: String,
        outcome: JobOutcome,
    },
}

impl EngineEvent {
    pub fn job_id(&self) -> &str {
        match self {
            EngineEvent::JobQueued { job_id, .. }
            | EngineEvent::JobStarted { job_id, .. }
            | EngineEvent::StageStarted { job_id, .. }
            | EngineEvent::Paused { job_id }
            | EngineEvent::Resumed { job_id }
            | EngineEvent::JobFinished { job_id, .. } => job_id,
            EngineEvent::Progress(update) => &update.job_id,
        }
    }

    /// One-line JSON rendering for machine consumers
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::JobQueued {
                display_name,
                pending,
                ..
            } => write!(f, "queued {} ({} waiting)", display_name, pending),
            EngineEvent::JobStarted { display_name, .. } => write!(f, "started {}", display_name),
            EngineEvent::StageStarted {
                stage, stage_count, ..
            } => write!(f, "pass {} of {} running", stage, stage_count),
            EngineEvent::Progress(update) => write!(f, "{}", update),
            EngineEvent::Paused { .. } => write!(f, "paused"),
            EngineEvent::Resumed { .. } => write!(f, "resumed"),
            EngineEvent::JobFinished {
                display_name,
                outcome,
                ..
            } => write!(f, "{} {}", display_name, outcome),
        }
    }
}
