//! Engine facade
//!
//! Wires configuration, the profile registry, the planner and the job queue
//! together and provides the entry points a front end needs.

use crate::config::{Config, ConfigError};
use crate::events::EventSender;
use crate::job::PlannedJob;
use crate::planner::{Confirm, Planner, PlannerSettings, PlanningError};
use crate::probe::{FfprobeProbe, FrameRateProbe, ProbeError};
use crate::process_control::{ProcessControl, SysinfoProcessControl};
use crate::profiles::ProfileRegistry;
use crate::queue::JobQueue;
use crate::request::{CropRegion, JobRequest};
use crate::startup::{run_startup_checks, StartupError};
use crate::supervisor::SupervisorSettings;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The request could not be planned
    #[error("{0}")]
    Planning(#[from] PlanningError),

    /// Probing the source failed
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),
}

/// Engine state containing all runtime components
pub struct Engine {
    /// Configuration loaded from file and environment
    pub config: Config,
    registry: Arc<RwLock<ProfileRegistry>>,
    planner: Planner,
    queue: JobQueue,
    prober: FfprobeProbe,
    /// Held from the collision check until the job is queued
    submit_lock: Mutex<()>,
}

impl Engine {
    /// Initialize the engine after checking the external tools
    ///
    /// This performs the full startup sequence:
    /// 1. Run startup checks (encoder version, prober)
    /// 2. Build the profile registry from built-ins and config profiles
    /// 3. Create the planner and the queue
    pub async fn new(config: Config, events: EventSender) -> Result<Self, EngineError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config, events).await)
    }

    /// Initialize the engine without running the external tool checks
    pub async fn new_without_checks(config: Config, events: EventSender) -> Self {
        let probe = Arc::new(FfprobeProbe::new(config.encoder.ffprobe.clone()));
        Self::with_parts(
            config,
            Handle::current(),
            probe,
            Arc::new(SysinfoProcessControl),
            events,
        )
    }

    /// Build an engine from explicit collaborators
    ///
    /// Useful for testing or embedding with a custom probe or process control.
    pub fn with_parts(
        config: Config,
        runtime: Handle,
        probe: Arc<dyn FrameRateProbe>,
        control: Arc<dyn ProcessControl>,
        events: EventSender,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.paths.work_dir) {
            warn!(dir = %config.paths.work_dir.display(), error = %e, "failed to create work directory");
        }

        let registry = Arc::new(RwLock::new(ProfileRegistry::from_config(&config.profiles)));
        let planner = Planner::new(Arc::clone(&registry), PlannerSettings::from_config(&config));
        let settings = SupervisorSettings {
            encoder: config.encoder.ffmpeg.clone(),
            poll_interval: Duration::from_millis(config.encoder.poll_interval_ms.max(1)),
            probe_timeout: Duration::from_millis(config.encoder.probe_timeout_ms.max(1)),
        };
        let queue = JobQueue::new(runtime, settings, probe, control, events);
        let prober = FfprobeProbe::new(config.encoder.ffprobe.clone());

        Self {
            config,
            registry,
            planner,
            queue,
            prober,
            submit_lock: Mutex::new(()),
        }
    }

    /// Plan a request against the current queue and enqueue it
    ///
    /// Returns a copy of the planned job. Nothing is queued when planning fails.
    /// Concurrent submits are serialized, so two requests for the same output
    /// cannot both pass the collision check.
    pub fn submit(
        &self,
        request: &JobRequest,
        confirm: &dyn Confirm,
    ) -> Result<PlannedJob, EngineError> {
        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let queued = self.queue.output_paths();
        let job = self.planner.plan(request, &queued, confirm)?;
        self.queue.enqueue(job.clone());
        Ok(job)
    }

    /// Map a normalized selection onto the source's pixel grid
    pub fn crop_from_normalized(
        &self,
        source: &Path,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> Result<CropRegion, EngineError> {
        let resolution = self.prober.resolution(source)?;
        Ok(CropRegion::from_normalized(x, y, w, h, resolution))
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Shared registry; edits apply to jobs planned afterwards
    pub fn registry(&self) -> Arc<RwLock<ProfileRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Cancel all jobs and wait until the active process is gone
    pub async fn shutdown(&self) {
        info!("shutting down queue");
        self.queue.shutdown().await;
    }
}
