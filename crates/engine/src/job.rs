//! Planned jobs and their terminal outcomes.

use crate::request::JobMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Terminal code reported when the user stopped the job
pub const USER_CANCELLED_CODE: i32 = 123;

/// One encoder invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommand {
    /// Encoder arguments, program name excluded
    pub args: Vec<String>,
    /// File this stage writes; `None` for an analysis-only pass
    pub output: Option<PathBuf>,
}

impl StageCommand {
    pub fn new(args: Vec<String>, output: Option<PathBuf>) -> Self {
        Self { args, output }
    }

    /// Arguments joined for logging
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// A fully planned job, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedJob {
    /// Unique job identifier (UUID)
    pub id: String,
    pub display_name: String,
    pub mode: JobMode,
    pub stages: Vec<StageCommand>,
    /// Length of the produced clip in seconds; 0 when unknown
    pub expected_duration_seconds: f64,
    pub source_path: PathBuf,
    /// Video bitrate of a convert job
    pub target_bitrate_kbps: Option<u32>,
    /// Two-pass log prefix shared by both passes of a convert job
    pub pass_log: Option<PathBuf>,
}

impl PlannedJob {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Every file the job will write
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.stages.iter().filter_map(|s| s.output.as_deref())
    }

    /// Delete the two-pass log files left behind by the encoder.
    ///
    /// The encoder appends suffixes such as `-0.log` and `-0.log.mbtree` to
    /// the prefix, so every file in the prefix's directory starting with the
    /// prefix's file name is removed. Returns the number of files removed.
    pub fn remove_pass_logs(&self) -> usize {
        let Some(prefix) = &self.pass_log else {
            return 0;
        };
        let Some(stem) = prefix.file_name().and_then(|n| n.to_str()) else {
            return 0;
        };
        let dir = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut removed = 0;
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            let matches = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(stem))
                    .unwrap_or(false);
            if !matches {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(job_id = %self.id, path = %entry.path().display(), "removed pass log");
                    removed += 1;
                }
                Err(e) => {
                    warn!(job_id = %self.id, path = %entry.path().display(), error = %e, "failed to remove pass log");
                }
            }
        }
        removed
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every stage exited with code 0
    Succeeded,
    /// A stage exited non-zero; later stages were skipped.
    /// Code is -1 when the process died from a signal.
    Failed { code: i32 },
    /// The encoder could not be started
    LaunchFailed { reason: String },
    /// Stopped by the user
    Cancelled,
}

impl JobOutcome {
    /// Numeric status as reported to observers (0, exit code, -1 or 123)
    pub fn code(&self) -> i32 {
        match self {
            JobOutcome::Succeeded => 0,
            JobOutcome::Failed { code } => *code,
            JobOutcome::LaunchFailed { .. } => -1,
            JobOutcome::Cancelled => USER_CANCELLED_CODE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "finished successfully"),
            JobOutcome::Failed { code } => write!(f, "encountered an error with code {}", code),
            JobOutcome::LaunchFailed { reason } => write!(f, "could not start encoder: {}", reason),
            JobOutcome::Cancelled => write!(f, "stopped by user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_job(pass_log: Option<PathBuf>) -> PlannedJob {
        PlannedJob {
            id: "job-1".to_string(),
            display_name: "clip.webm".to_string(),
            mode: JobMode::Convert,
            stages: vec![
                StageCommand::new(vec!["-pass".into(), "1".into()], None),
                StageCommand::new(
                    vec!["-pass".into(), "2".into()],
                    Some(PathBuf::from("/out/clip.webm")),
                ),
            ],
            expected_duration_seconds: 10.0,
            source_path: PathBuf::from("/in/source.mp4"),
            target_bitrate_kbps: Some(1092),
            pass_log,
        }
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(JobOutcome::Succeeded.code(), 0);
        assert_eq!(JobOutcome::Failed { code: 1 }.code(), 1);
        assert_eq!(JobOutcome::LaunchFailed { reason: "x".into() }.code(), -1);
        assert_eq!(JobOutcome::Cancelled.code(), USER_CANCELLED_CODE);
        assert_eq!(USER_CANCELLED_CODE, 123);
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_string(&JobOutcome::Failed { code: 3 }).unwrap();
        assert_eq!(json, r#"{"status":"failed","code":3}"#);
        let json = serde_json::to_string(&JobOutcome::Cancelled).unwrap();
        assert_eq!(json, r#"{"status":"cancelled"}"#);
    }

    #[test]
    fn test_outputs_skip_analysis_pass() {
        let job = make_job(None);
        let outputs: Vec<&Path> = job.outputs().collect();
        assert_eq!(outputs, vec![Path::new("/out/clip.webm")]);
        assert_eq!(job.stage_count(), 2);
    }

    #[test]
    fn test_remove_pass_logs() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("webber2pass-abc");
        fs::write(dir.path().join("webber2pass-abc-0.log"), "log").unwrap();
        fs::write(dir.path().join("webber2pass-abc-0.log.mbtree"), "tree").unwrap();
        fs::write(dir.path().join("webber2pass-other-0.log"), "keep").unwrap();

        let job = make_job(Some(prefix));
        assert_eq!(job.remove_pass_logs(), 2);
        assert!(dir.path().join("webber2pass-other-0.log").exists());
        assert!(!dir.path().join("webber2pass-abc-0.log").exists());
    }

    #[test]
    fn test_remove_pass_logs_without_prefix() {
        assert_eq!(make_job(None).remove_pass_logs(), 0);
    }
}
