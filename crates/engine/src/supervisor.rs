//! Process supervisor.
//!
//! Runs the stages of one job strictly in order, one encoder process at a
//! time. Output from stdout and stderr is fed to the progress parser as it
//! arrives, and a ticker at the poll interval checks for a requested abort.
//! Pause and resume go through [`ProcessControl`] and only freeze the live
//! process; they never touch the stage sequence.

use crate::events::{EngineEvent, EventSender};
use crate::job::{JobOutcome, PlannedJob, StageCommand};
use crate::probe::FrameRateProbe;
use crate::process_control::ProcessControl;
use crate::progress::{parse_chunk, ProgressUpdate, StageTracker};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Unterminated output kept per stream before it is discarded
const MAX_PENDING_OUTPUT: usize = 64 * 1024;

/// Settings shared by every supervisor of a queue
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Encoder binary
    pub encoder: PathBuf,
    /// How often a running stage checks for abort
    pub poll_interval: Duration,
    /// Longest wait for the frame-rate probe before progress goes without it
    pub probe_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from("ffmpeg"),
            poll_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct ControlState {
    pid: Option<u32>,
    paused: bool,
    latest: Option<ProgressUpdate>,
}

struct HandleInner {
    job_id: String,
    abort: AtomicBool,
    state: Mutex<ControlState>,
    control: Arc<dyn ProcessControl>,
    events: EventSender,
}

/// Thread-safe control surface of a running supervisor.
///
/// All methods are synchronous and may be called from any thread.
#[derive(Clone)]
pub struct SupervisorHandle {
    inner: Arc<HandleInner>,
}

impl SupervisorHandle {
    fn new(job_id: String, control: Arc<dyn ProcessControl>, events: EventSender) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                job_id,
                abort: AtomicBool::new(false),
                state: Mutex::new(ControlState::default()),
                control,
                events,
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.inner.job_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Suspend the running stage.
    ///
    /// No-op (returns false) when no process is running, the job is already
    /// paused or the host refuses the signal.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if state.paused || self.is_aborted() {
            return false;
        }
        let Some(pid) = state.pid else {
            return false;
        };
        if !self.inner.control.suspend(pid) {
            warn!(job_id = %self.inner.job_id, pid, "failed to suspend encoder");
            return false;
        }
        state.paused = true;
        info!(job_id = %self.inner.job_id, pid, "paused");
        let _ = self.inner.events.send(EngineEvent::Paused {
            job_id: self.inner.job_id.clone(),
        });
        true
    }

    /// Continue a paused stage. No-op (returns false) when not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        if let Some(pid) = state.pid {
            if !self.inner.control.resume(pid) {
                warn!(job_id = %self.inner.job_id, pid, "failed to resume encoder");
            }
        }
        info!(job_id = %self.inner.job_id, "resumed");
        let _ = self.inner.events.send(EngineEvent::Resumed {
            job_id: self.inner.job_id.clone(),
        });
        true
    }

    /// Request cancellation; observed at the next poll tick.
    pub fn abort(&self) {
        if !self.inner.abort.swap(true, Ordering::SeqCst) {
            info!(job_id = %self.inner.job_id, "abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Pid of the running stage, if any
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub fn latest_progress(&self) -> Option<ProgressUpdate> {
        self.lock().latest.clone()
    }

    fn set_pid(&self, pid: Option<u32>) {
        let mut state = self.lock();
        state.pid = pid;
        state.paused = false;
    }

    fn publish(&self, update: ProgressUpdate) {
        self.lock().latest = Some(update.clone());
        let _ = self.inner.events.send(EngineEvent::Progress(update));
    }
}

/// Supervises a single job from first stage to terminal outcome.
pub struct Supervisor {
    settings: SupervisorSettings,
    probe: Arc<dyn FrameRateProbe>,
    handle: SupervisorHandle,
    events: EventSender,
}

impl Supervisor {
    pub fn new(
        job_id: impl Into<String>,
        settings: SupervisorSettings,
        probe: Arc<dyn FrameRateProbe>,
        control: Arc<dyn ProcessControl>,
        events: EventSender,
    ) -> Self {
        let handle = SupervisorHandle::new(job_id.into(), control, events.clone());
        Self {
            settings,
            probe,
            handle,
            events,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Run every stage of `job` and report how it ended.
    pub async fn run(&self, job: Arc<PlannedJob>) -> JobOutcome {
        if let Some(dir) = job.pass_log.as_ref().and_then(|p| p.parent()) {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(job_id = %job.id, dir = %dir.display(), error = %e, "failed to create work directory");
            }
        }

        let frame_rate = self.probe_frame_rate(&job).await;
        let stage_count = job.stage_count();

        for (index, stage) in job.stages.iter().enumerate() {
            if self.handle.is_aborted() {
                return JobOutcome::Cancelled;
            }

            let tracker = StageTracker::new(
                job.id.clone(),
                index + 1,
                stage_count,
                frame_rate,
                job.expected_duration_seconds,
                job.target_bitrate_kbps,
            );

            info!(job_id = %job.id, stage = index + 1, stage_count, "starting stage");
            debug!(job_id = %job.id, stage = index + 1, "{}", stage.command_line());
            let _ = self.events.send(EngineEvent::StageStarted {
                job_id: job.id.clone(),
                stage: index + 1,
                stage_count,
                command: stage.command_line(),
            });

            if let Err(outcome) = self.run_stage(&job.id, stage, &tracker).await {
                info!(job_id = %job.id, stage = index + 1, code = outcome.code(), "job {}", outcome);
                return outcome;
            }
        }

        info!(job_id = %job.id, "all stages finished");
        JobOutcome::Succeeded
    }

    /// Frame rate of the source, or `None` when unknown.
    ///
    /// Gives up at the probe timeout or when an abort is seen at a poll tick.
    /// The blocking probe itself is left to finish on its own.
    async fn probe_frame_rate(&self, job: &PlannedJob) -> Option<f64> {
        if job.expected_duration_seconds <= 0.0 {
            return None;
        }

        let probe = Arc::clone(&self.probe);
        let source = job.source_path.clone();
        let mut task = tokio::task::spawn_blocking(move || probe.frame_rate(&source));
        let deadline = tokio::time::sleep(self.settings.probe_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut task => break result,
                _ = &mut deadline => {
                    warn!(job_id = %job.id, timeout = ?self.settings.probe_timeout, "frame rate probe timed out");
                    return None;
                }
                _ = ticker.tick() => {
                    if self.handle.is_aborted() {
                        debug!(job_id = %job.id, "abort during probe");
                        return None;
                    }
                }
            }
        };

        match result {
            Ok(Ok(rate)) => {
                debug!(job_id = %job.id, frame_rate = rate, "probed source");
                Some(rate)
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.id, error = %e, "frame rate unknown, progress shows passes only");
                None
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "probe task failed");
                None
            }
        }
    }

    /// Run one stage to completion. `Err` carries the job's terminal outcome.
    async fn run_stage(
        &self,
        job_id: &str,
        stage: &StageCommand,
        tracker: &StageTracker,
    ) -> Result<(), JobOutcome> {
        let mut child = Command::new(&self.settings.encoder)
            .args(&stage.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(job_id, encoder = %self.settings.encoder.display(), error = %e, "failed to start encoder");
                JobOutcome::LaunchFailed {
                    reason: e.to_string(),
                }
            })?;

        self.handle.set_pid(child.id());

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_text = OutputBuffer::default();
        let mut err_text = OutputBuffer::default();
        let mut out_buf = [0u8; 4096];
        let mut err_buf = [0u8; 4096];

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut exit_code: Option<i32> = None;

        loop {
            if exit_code.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) | Err(_) => {
                        stdout = None;
                        self.on_output(out_text.flush(), tracker);
                    }
                    Ok(n) => self.on_output(out_text.push(&out_buf[..n]), tracker),
                },
                read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) | Err(_) => {
                        stderr = None;
                        self.on_output(err_text.flush(), tracker);
                    }
                    Ok(n) => self.on_output(err_text.push(&err_buf[..n]), tracker),
                },
                status = child.wait(), if exit_code.is_none() => {
                    exit_code = Some(match status {
                        Ok(status) => status.code().unwrap_or(-1),
                        Err(e) => {
                            warn!(job_id, error = %e, "failed to wait for encoder");
                            -1
                        }
                    });
                },
                _ = ticker.tick() => {
                    if self.handle.is_aborted() {
                        self.kill(job_id, &mut child).await;
                        return Err(JobOutcome::Cancelled);
                    }
                    // Pipes held open by a grandchild must not keep the stage alive
                    if exit_code.is_some() {
                        break;
                    }
                },
            }
        }

        self.handle.set_pid(None);

        if self.handle.is_aborted() {
            return Err(JobOutcome::Cancelled);
        }

        match exit_code {
            Some(0) => Ok(()),
            Some(code) => {
                warn!(job_id, code, "encoder exited with error");
                Err(JobOutcome::Failed { code })
            }
            None => Err(JobOutcome::Failed { code: -1 }),
        }
    }

    async fn kill(&self, job_id: &str, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            debug!(job_id, error = %e, "encoder already gone");
        }
        if let Err(e) = child.wait().await {
            warn!(job_id, error = %e, "failed to reap killed encoder");
        }
        self.handle.set_pid(None);
        info!(job_id, "encoder killed");
    }

    fn on_output(&self, text: Option<String>, tracker: &StageTracker) {
        let Some(text) = text else {
            return;
        };
        trace!(job_id = %self.handle.job_id(), "{}", text.trim_end());
        if let Some(record) = parse_chunk(&text) {
            self.handle.publish(tracker.update(record));
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Accumulates raw output and releases it up to the last line break.
#[derive(Debug, Default)]
struct OutputBuffer {
    pending: String,
}

impl OutputBuffer {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let Some(cut) = self.pending.rfind(['\n', '\r']) else {
            if self.pending.len() > MAX_PENDING_OUTPUT {
                self.pending.clear();
            }
            return None;
        };
        let rest = self.pending.split_off(cut + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_keeps_partial_line() {
        let mut buffer = OutputBuffer::default();
        assert_eq!(buffer.push(b"frame=  1 fps"), None);
        assert_eq!(buffer.push(b"= 30\rframe= 2"), Some("frame=  1 fps= 30\r".to_string()));
        assert_eq!(buffer.flush(), Some("frame= 2".to_string()));
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn test_output_buffer_discards_runaway_line() {
        let mut buffer = OutputBuffer::default();
        let junk = vec![b'x'; MAX_PENDING_OUTPUT + 1];
        assert_eq!(buffer.push(&junk), None);
        assert_eq!(buffer.flush(), None);
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::events::{channel, EventReceiver};
        use crate::probe::ProbeError;
        use crate::process_control::SysinfoProcessControl;
        use crate::request::JobMode;
        use std::path::Path;
        use tempfile::TempDir;
        use std::time::Instant;
        use tokio::time::timeout;

        struct FixedProbe(Option<f64>);

        impl FrameRateProbe for FixedProbe {
            fn frame_rate(&self, _source: &Path) -> Result<f64, ProbeError> {
                self.0
                    .ok_or_else(|| ProbeError::ParseError("no video stream".to_string()))
            }
        }

        struct SlowProbe(Duration);

        impl FrameRateProbe for SlowProbe {
            fn frame_rate(&self, _source: &Path) -> Result<f64, ProbeError> {
                std::thread::sleep(self.0);
                Ok(30.0)
            }
        }

        fn script_job(scripts: &[&str], expected_duration_seconds: f64) -> Arc<PlannedJob> {
            Arc::new(PlannedJob {
                id: "job-test".to_string(),
                display_name: "test".to_string(),
                mode: JobMode::Convert,
                stages: scripts
                    .iter()
                    .map(|s| StageCommand::new(vec!["-c".to_string(), s.to_string()], None))
                    .collect(),
                expected_duration_seconds,
                source_path: PathBuf::from("/videos/source.mp4"),
                target_bitrate_kbps: None,
                pass_log: None,
            })
        }

        fn supervisor(rate: Option<f64>) -> (Supervisor, EventReceiver) {
            supervisor_with_probe(Arc::new(FixedProbe(rate)))
        }

        fn supervisor_with_probe(probe: Arc<dyn FrameRateProbe>) -> (Supervisor, EventReceiver) {
            let (tx, rx) = channel();
            let settings = SupervisorSettings {
                encoder: PathBuf::from("sh"),
                poll_interval: Duration::from_millis(50),
                probe_timeout: Duration::from_secs(1),
            };
            let supervisor = Supervisor::new(
                "job-test",
                settings,
                probe,
                Arc::new(SysinfoProcessControl),
                tx,
            );
            (supervisor, rx)
        }

        fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            events
        }

        async fn wait_for_stage(rx: &mut EventReceiver, wanted: usize) {
            loop {
                match rx.recv().await {
                    Some(EngineEvent::StageStarted { stage, .. }) if stage == wanted => return,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        }

        #[tokio::test]
        async fn test_all_stages_succeed() {
            let (supervisor, mut rx) = supervisor(None);
            let outcome = supervisor.run(script_job(&["exit 0", "exit 0"], 1.0)).await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            let stages: Vec<usize> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::StageStarted { stage, .. } => Some(stage),
                    _ => None,
                })
                .collect();
            assert_eq!(stages, vec![1, 2]);
        }

        #[tokio::test]
        async fn test_failed_stage_skips_the_rest() {
            let dir = TempDir::new().unwrap();
            let marker = dir.path().join("second-ran");
            let second = format!("touch {}", marker.display());
            let (supervisor, _rx) = supervisor(None);

            let outcome = supervisor.run(script_job(&["exit 3", &second], 1.0)).await;

            assert_eq!(outcome, JobOutcome::Failed { code: 3 });
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn test_launch_failure() {
            let (tx, _rx) = channel();
            let supervisor = Supervisor::new(
                "job-test",
                SupervisorSettings {
                    encoder: PathBuf::from("/nonexistent/webber-encoder"),
                    poll_interval: Duration::from_millis(50),
                    ..SupervisorSettings::default()
                },
                Arc::new(FixedProbe(None)),
                Arc::new(SysinfoProcessControl),
                tx,
            );

            let outcome = supervisor.run(script_job(&["exit 0"], 1.0)).await;
            assert!(matches!(outcome, JobOutcome::LaunchFailed { .. }));
            assert_eq!(outcome.code(), -1);
        }

        #[tokio::test]
        async fn test_progress_from_stderr() {
            let script = "printf 'frame=   15 fps= 30 q=1.0 size=       1kB time=00:00:00.50 bitrate=  16.0kbits/s speed=1.0x\\r' >&2; sleep 0.1";
            let (supervisor, mut rx) = supervisor(Some(30.0));
            let outcome = supervisor.run(script_job(&[script], 1.0)).await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            let progress: Vec<ProgressUpdate> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::Progress(update) => Some(update),
                    _ => None,
                })
                .collect();
            assert_eq!(progress.len(), 1);
            assert_eq!(progress[0].percent, Some(50));
            assert_eq!(progress[0].record.frame, 15);
            assert_eq!(supervisor.handle().latest_progress(), Some(progress[0].clone()));
        }

        #[tokio::test]
        async fn test_probe_failure_only_drops_percent() {
            let script = "printf 'frame=   15 fps= 30 q=1.0 size=       1kB time=00:00:00.50 bitrate=  16.0kbits/s speed=1.0x\\n'";
            let (supervisor, mut rx) = supervisor(None);
            let outcome = supervisor.run(script_job(&[script], 1.0)).await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            let update = drain(&mut rx)
                .into_iter()
                .find_map(|e| match e {
                    EngineEvent::Progress(update) => Some(update),
                    _ => None,
                })
                .unwrap();
            assert_eq!(update.percent, None);
        }

        #[tokio::test]
        async fn test_abort_during_second_stage_reports_cancelled() {
            let (supervisor, mut rx) = supervisor(None);
            let handle = supervisor.handle();
            let job = script_job(&["exit 0", "sleep 30", "exit 0"], 1.0);

            let run = tokio::spawn(async move { supervisor.run(job).await });
            wait_for_stage(&mut rx, 2).await;
            handle.abort();

            let outcome = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
            assert_eq!(outcome, JobOutcome::Cancelled);
            assert_eq!(outcome.code(), 123);
            assert_eq!(handle.pid(), None);
            let later: Vec<EngineEvent> = drain(&mut rx);
            assert!(!later
                .iter()
                .any(|e| matches!(e, EngineEvent::StageStarted { stage: 3, .. })));
        }

        #[tokio::test]
        async fn test_abort_while_probing_does_not_wait_for_probe() {
            let (supervisor, mut rx) = supervisor_with_probe(Arc::new(SlowProbe(Duration::from_secs(3))));
            let handle = supervisor.handle();
            let job = script_job(&["exit 0"], 1.0);

            let started = Instant::now();
            let run = tokio::spawn(async move { supervisor.run(job).await });
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.abort();

            let outcome = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
            assert_eq!(outcome, JobOutcome::Cancelled);
            assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
            assert!(!drain(&mut rx)
                .iter()
                .any(|e| matches!(e, EngineEvent::StageStarted { .. })));
        }

        #[tokio::test]
        async fn test_probe_timeout_runs_without_percent() {
            let script = "printf 'frame=   15 fps= 30 q=1.0 size=       1kB time=00:00:00.50 bitrate=  16.0kbits/s speed=1.0x\\n'";
            let (supervisor, mut rx) = supervisor_with_probe(Arc::new(SlowProbe(Duration::from_secs(3))));

            let started = Instant::now();
            let outcome = supervisor.run(script_job(&[script], 1.0)).await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
            let update = drain(&mut rx)
                .into_iter()
                .find_map(|e| match e {
                    EngineEvent::Progress(update) => Some(update),
                    _ => None,
                })
                .unwrap();
            assert_eq!(update.percent, None);
        }

        #[tokio::test]
        async fn test_pause_then_resume_matches_unpaused_outcome() {
            let (supervisor, mut rx) = supervisor(None);
            let handle = supervisor.handle();
            let job = script_job(&["sleep 0.4; exit 5"], 1.0);

            let run = tokio::spawn(async move { supervisor.run(job).await });
            wait_for_stage(&mut rx, 1).await;
            while handle.pid().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert!(handle.pause());
            assert!(handle.is_paused());
            assert!(!handle.pause());
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(handle.resume());
            assert!(!handle.resume());

            let outcome = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
            assert_eq!(outcome, JobOutcome::Failed { code: 5 });

            let events = drain(&mut rx);
            assert!(events.iter().any(|e| matches!(e, EngineEvent::Paused { .. })));
            assert!(events.iter().any(|e| matches!(e, EngineEvent::Resumed { .. })));
        }

        #[tokio::test]
        async fn test_pause_without_process_is_noop() {
            let (supervisor, mut rx) = supervisor(None);
            let handle = supervisor.handle();
            assert!(!handle.pause());
            assert!(!handle.resume());
            assert!(drain(&mut rx).is_empty());
        }
    }
}
