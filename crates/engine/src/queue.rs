//! Queue coordinator.
//!
//! A capacity-one active slot plus a FIFO of pending jobs. Every mutation
//! of the slot and the FIFO happens under one mutex: `enqueue`,
//! `cancel_all` and the supervisor's terminal report. The synchronous entry
//! points can be called from any thread; supervisors are spawned onto the
//! runtime handle given at construction.

use crate::events::{EngineEvent, EventSender};
use crate::job::{JobOutcome, PlannedJob};
use crate::probe::FrameRateProbe;
use crate::process_control::ProcessControl;
use crate::status::{
    now_unix_ms, ActiveJobStatus, PendingJobStatus, QueueCounters, QueueSnapshot,
};
use crate::supervisor::{Supervisor, SupervisorHandle, SupervisorSettings};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

struct ActiveJob {
    job: Arc<PlannedJob>,
    handle: SupervisorHandle,
}

#[derive(Default)]
struct QueueState {
    /// Set exactly while a supervisor task runs
    active: Option<ActiveJob>,
    pending: VecDeque<Arc<PlannedJob>>,
    paused: bool,
    counters: QueueCounters,
}

struct QueueInner {
    state: Mutex<QueueState>,
    runtime: Handle,
    settings: SupervisorSettings,
    probe: Arc<dyn FrameRateProbe>,
    control: Arc<dyn ProcessControl>,
    events: EventSender,
    idle: watch::Sender<bool>,
}

/// Cloneable handle to the shared queue
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(
        runtime: Handle,
        settings: SupervisorSettings,
        probe: Arc<dyn FrameRateProbe>,
        control: Arc<dyn ProcessControl>,
        events: EventSender,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                runtime,
                settings,
                probe,
                control,
                events,
                idle,
            }),
        }
    }

    /// Append a job; starts it right away when the queue is idle.
    pub fn enqueue(&self, job: PlannedJob) {
        let job = Arc::new(job);
        let mut state = self.inner.lock();
        state.pending.push_back(Arc::clone(&job));
        state.counters.queued += 1;

        let idle = state.active.is_none();
        let waiting = if idle {
            state.pending.len() - 1
        } else {
            state.pending.len()
        };
        info!(job_id = %job.id, waiting, "queued {}", job.display_name);
        self.inner.emit(EngineEvent::JobQueued {
            job_id: job.id.clone(),
            display_name: job.display_name.clone(),
            pending: waiting,
        });

        if idle {
            self.inner.start_next(&mut state);
        }
    }

    /// Drop every pending job and abort the active one.
    ///
    /// Dropped jobs get no terminal notification; the active job reports
    /// `Cancelled` once its process is gone. Returns the number dropped.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.inner.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if let Some(active) = &state.active {
            active.handle.abort();
        }
        state.paused = false;
        info!(dropped, "cancelled queue");
        dropped
    }

    /// Suspend the active job's process. Returns whether it was paused.
    pub fn pause(&self) -> bool {
        let mut state = self.inner.lock();
        let paused = state
            .active
            .as_ref()
            .map(|active| active.handle.pause())
            .unwrap_or(false);
        if paused {
            state.paused = true;
        }
        paused
    }

    /// Continue the active job's process. Returns whether it was resumed.
    pub fn resume(&self) -> bool {
        let mut state = self.inner.lock();
        let resumed = state
            .active
            .as_ref()
            .map(|active| active.handle.resume())
            .unwrap_or(false);
        if resumed {
            state.paused = false;
        }
        resumed
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock();
        let active = state.active.as_ref().map(|active| ActiveJobStatus {
            job_id: active.job.id.clone(),
            display_name: active.job.display_name.clone(),
            source_path: active.job.source_path.to_string_lossy().into_owned(),
            stage_count: active.job.stage_count(),
            pid: active.handle.pid(),
            aborting: active.handle.is_aborted(),
        });
        let progress = state
            .active
            .as_ref()
            .and_then(|active| active.handle.latest_progress());

        QueueSnapshot {
            timestamp_unix_ms: now_unix_ms(),
            active,
            pending: state
                .pending
                .iter()
                .map(|job| PendingJobStatus {
                    job_id: job.id.clone(),
                    display_name: job.display_name.clone(),
                })
                .collect(),
            paused: state.paused,
            counters: state.counters.clone(),
            progress,
        }
    }

    /// Outputs of the active and pending jobs
    pub fn output_paths(&self) -> Vec<PathBuf> {
        let state = self.inner.lock();
        state
            .active
            .iter()
            .map(|active| &active.job)
            .chain(state.pending.iter())
            .flat_map(|job| job.outputs().map(PathBuf::from).collect::<Vec<_>>())
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// Wait until no job is active or pending.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives in `inner`, which `self` keeps alive
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Cancel everything and wait for the active process to be killed.
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.wait_idle().await;
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Promote the head of the FIFO into the active slot, or mark idle.
    fn start_next(self: &Arc<Self>, state: &mut QueueState) {
        let Some(job) = state.pending.pop_front() else {
            self.idle.send_replace(true);
            debug!("queue idle");
            return;
        };

        let supervisor = Supervisor::new(
            job.id.clone(),
            self.settings.clone(),
            Arc::clone(&self.probe),
            Arc::clone(&self.control),
            self.events.clone(),
        );
        state.active = Some(ActiveJob {
            job: Arc::clone(&job),
            handle: supervisor.handle(),
        });
        state.paused = false;
        self.idle.send_replace(false);

        info!(job_id = %job.id, stages = job.stage_count(), "starting {}", job.display_name);
        self.emit(EngineEvent::JobStarted {
            job_id: job.id.clone(),
            display_name: job.display_name.clone(),
            stage_count: job.stage_count(),
        });

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = supervisor.run(Arc::clone(&job)).await;
            inner.on_job_terminal(&job.id, outcome);
        });
    }

    /// Called by the supervisor task once its job has ended.
    fn on_job_terminal(self: &Arc<Self>, job_id: &str, outcome: JobOutcome) {
        let mut state = self.lock();
        let is_active = state
            .active
            .as_ref()
            .map(|active| active.job.id == job_id)
            .unwrap_or(false);
        if !is_active {
            debug!(job_id, "terminal report for a job that is not active");
            return;
        }
        let Some(finished) = state.active.take() else {
            return;
        };
        state.paused = false;

        let removed = finished.job.remove_pass_logs();
        if removed > 0 {
            debug!(job_id, removed, "pass logs cleaned up");
        }

        match outcome {
            JobOutcome::Succeeded => state.counters.succeeded += 1,
            JobOutcome::Cancelled => state.counters.cancelled += 1,
            JobOutcome::Failed { .. } | JobOutcome::LaunchFailed { .. } => {
                state.counters.failed += 1
            }
        }

        info!(job_id, code = outcome.code(), "{} {}", finished.job.display_name, outcome);
        self.emit(EngineEvent::JobFinished {
            job_id: finished.job.id.clone(),
            display_name: finished.job.display_name.clone(),
            outcome,
        });

        self.start_next(&mut state);
    }
}
