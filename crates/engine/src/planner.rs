//! Command planner.
//!
//! Turns a [`JobRequest`] into a [`PlannedJob`]: validates the marks, derives
//! the target bitrate and filters, and lays out the encoder arguments of
//! every stage. Planning only touches the filesystem to look for existing
//! outputs; anything the user has to agree to goes through [`Confirm`].

use crate::config::Config;
use crate::job::{PlannedJob, StageCommand};
use crate::profiles::{EncodingProfile, ProfileRegistry};
use crate::request::{CropRegion, JobMode, JobRequest};
use crate::timestamp::{Timestamp, TimestampError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Where the analysis pass sends its output
pub const NULL_DEVICE: &str = if cfg!(windows) { "NUL" } else { "/dev/null" };

/// Extension used for cut and split outputs when the source has none
const FALLBACK_EXTENSION: &str = "mp4";

/// Quality used when a cut has to re-encode to apply a crop
const CUT_CROP_CRF: &str = "18";

/// Yes/no decisions the planner needs from the user.
pub trait Confirm {
    /// Whether an existing or already queued output may be overwritten.
    fn confirm_overwrite(&self, path: &Path) -> bool;
    /// Whether to continue despite a warning.
    fn confirm_warning(&self, title: &str, message: &str) -> bool;
}

/// Accepts every decision
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        true
    }

    fn confirm_warning(&self, _title: &str, _message: &str) -> bool {
        true
    }
}

/// Declines every decision
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        false
    }

    fn confirm_warning(&self, _title: &str, _message: &str) -> bool {
        false
    }
}

/// Upper bound on the computed video bitrate (1 Gbit/s)
pub const MAX_VIDEO_KBPS: u32 = 1_000_000;

/// Reasons a request cannot be planned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    #[error("target name must not be empty")]
    EmptyName,

    #[error("unknown encoding profile '{0}'")]
    UnknownProfile(String),

    #[error("a target size is required to convert")]
    MissingTargetSize,

    #[error(transparent)]
    InvalidTimestamp(#[from] TimestampError),

    /// End mark is not after the start mark (after scaling).
    #[error("end {end} must be after start {start}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    /// Video bitrate left for the target size is below `minimum`.
    #[error("video bitrate of {kbps} kbps is below the minimum of {minimum} kbps")]
    BitrateTooLow { kbps: i64, minimum: u32 },

    /// Video bitrate for the target size is above what any encoder accepts.
    #[error("video bitrate of {kbps} kbps is above the maximum of {maximum} kbps")]
    BitrateTooHigh { kbps: i64, maximum: u32 },

    #[error("output {} already exists and was not overwritten", .0.display())]
    DuplicateOutput(PathBuf),

    #[error("audio cannot be kept while changing the playback speed")]
    IncompatibleAudioRetiming,
}

/// Settings the planner reads from the configuration.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub destination: PathBuf,
    pub work_dir: PathBuf,
    pub audio_bitrate_kbps: u32,
    pub low_bitrate_warning_kbps: u32,
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            destination: config.paths.destination.clone(),
            work_dir: config.paths.work_dir.clone(),
            audio_bitrate_kbps: config.encoder.audio_bitrate_kbps,
            low_bitrate_warning_kbps: config.encoder.low_bitrate_warning_kbps,
        }
    }
}

/// Plans jobs against a shared profile registry.
#[derive(Debug, Clone)]
pub struct Planner {
    registry: Arc<RwLock<ProfileRegistry>>,
    settings: PlannerSettings,
}

/// Marks and duration after validation
struct Range {
    start: Timestamp,
    end: Timestamp,
    multiplier: f64,
}

impl Range {
    fn duration_seconds(&self) -> f64 {
        (self.end.as_millis() - self.start.as_millis()) as f64 / 1000.0
    }
}

impl Planner {
    pub fn new(registry: Arc<RwLock<ProfileRegistry>>, settings: PlannerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Plan a request.
    ///
    /// `queued_outputs` are the outputs of jobs already active or pending;
    /// writing to one of them counts as a collision just like an existing
    /// file does.
    pub fn plan(
        &self,
        request: &JobRequest,
        queued_outputs: &[PathBuf],
        confirm: &dyn Confirm,
    ) -> Result<PlannedJob, PlanningError> {
        let name = request.target_name.trim();
        if name.is_empty() {
            return Err(PlanningError::EmptyName);
        }

        let profile = match request.mode {
            JobMode::Convert => Some(self.lookup_profile(&request.profile_name)?),
            JobMode::Cut | JobMode::Split => None,
        };

        let range = self.resolve_range(request, confirm)?;
        let crop = request.crop.and_then(CropRegion::effective);

        let job = match request.mode {
            JobMode::Convert => {
                let profile = profile
                    .ok_or_else(|| PlanningError::UnknownProfile(request.profile_name.clone()))?;
                let size_mb = request
                    .target_size_mb
                    .ok_or(PlanningError::MissingTargetSize)?;
                let video_kbps = self.video_bitrate(
                    size_mb,
                    range.duration_seconds(),
                    request.include_audio,
                    confirm,
                )?;
                self.plan_convert(request, name, &profile, &range, video_kbps, crop)
            }
            JobMode::Cut => self.plan_cut(request, name, &range, crop),
            JobMode::Split => self.plan_split(request, name, &range, crop),
        };

        self.check_collisions(&job, queued_outputs, confirm)?;

        info!(
            job_id = %job.id,
            mode = %job.mode,
            stages = job.stage_count(),
            "planned {}",
            job.display_name
        );
        Ok(job)
    }

    fn lookup_profile(&self, name: &str) -> Result<EncodingProfile, PlanningError> {
        let registry = self
            .registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| PlanningError::UnknownProfile(name.to_string()))
    }

    /// Parse the marks, settle the audio/retiming conflict and scale.
    fn resolve_range(
        &self,
        request: &JobRequest,
        confirm: &dyn Confirm,
    ) -> Result<Range, PlanningError> {
        let start = Timestamp::parse(&request.start_timestamp)?;
        let end = Timestamp::parse(&request.end_timestamp)?;

        let mut multiplier = 1.0;
        if request.mode == JobMode::Convert {
            multiplier = request.time_multiplier;
            if request.include_audio && !is_unit(multiplier) {
                let accepted = confirm.confirm_warning(
                    "Audio and speed change",
                    "Audio can't be kept when the playback speed changes. \
                     Continue at normal speed?",
                );
                if !accepted {
                    return Err(PlanningError::IncompatibleAudioRetiming);
                }
                multiplier = 1.0;
            }
        }

        let (start, end) = if is_unit(multiplier) {
            (start, end)
        } else {
            (start.scaled(multiplier), end.scaled(multiplier))
        };

        if end <= start {
            return Err(PlanningError::InvalidRange { start, end });
        }

        Ok(Range {
            start,
            end,
            multiplier,
        })
    }

    /// Video share of the target size in kbps.
    fn video_bitrate(
        &self,
        size_mb: f64,
        duration_seconds: f64,
        include_audio: bool,
        confirm: &dyn Confirm,
    ) -> Result<u32, PlanningError> {
        let mut kbps = (size_mb * 8.0 * 1024.0 / duration_seconds).floor() as i64;
        if include_audio {
            kbps -= i64::from(self.settings.audio_bitrate_kbps);
        }

        if kbps < 1 {
            return Err(PlanningError::BitrateTooLow { kbps, minimum: 1 });
        }
        if kbps > i64::from(MAX_VIDEO_KBPS) {
            return Err(PlanningError::BitrateTooHigh {
                kbps,
                maximum: MAX_VIDEO_KBPS,
            });
        }

        let low = self.settings.low_bitrate_warning_kbps;
        if kbps < i64::from(low) {
            let message = format!(
                "The video bitrate will be {} kbps, which is likely to look bad. Continue?",
                kbps
            );
            if !confirm.confirm_warning("Low bitrate", &message) {
                return Err(PlanningError::BitrateTooLow {
                    kbps,
                    minimum: low,
                });
            }
        }

        u32::try_from(kbps).map_err(|_| PlanningError::BitrateTooHigh {
            kbps,
            maximum: MAX_VIDEO_KBPS,
        })
    }

    fn plan_convert(
        &self,
        request: &JobRequest,
        name: &str,
        profile: &EncodingProfile,
        range: &Range,
        video_kbps: u32,
        crop: Option<CropRegion>,
    ) -> PlannedJob {
        let output = self
            .settings
            .destination
            .join(format!("{}.{}", name, profile.container_extension));
        let pass_log = self
            .settings
            .work_dir
            .join(format!("webber2pass-{}", Uuid::new_v4()));

        let mut filters = Vec::new();
        if !is_unit(range.multiplier) {
            filters.push(format!("setpts={}*PTS", range.multiplier));
        }
        if let Some(region) = crop {
            filters.push(region.filter());
        }

        let stage = |pass: u8| {
            let mut args = base_args();
            args.extend(strings(&[
                "-ss",
                &range.start.encoder_arg(),
                "-to",
                &range.end.encoder_arg(),
                "-i",
            ]));
            args.push(path_arg(&request.source_path));
            args.extend(strings(&["-map", "0:v:0"]));
            args.extend(profile.all_stage_args.iter().cloned());
            if pass == 1 {
                args.extend(profile.first_stage_args.iter().cloned());
            } else {
                args.extend(profile.second_stage_args.iter().cloned());
            }
            args.extend(strings(&[
                "-b:v",
                &format!("{}k", video_kbps),
                "-maxrate",
                &format!("{}k", u64::from(video_kbps) * 2),
                "-bufsize",
                &format!("{}k", u64::from(video_kbps) * 3),
            ]));

            if pass == 2 && request.include_audio {
                args.extend(self.audio_args(request.merge_two_audio_tracks));
            } else {
                args.push("-an".to_string());
            }

            if !filters.is_empty() {
                args.push("-filter:v".to_string());
                args.push(filters.join(","));
            }

            args.extend(strings(&["-f", &profile.muxer_format_name, "-passlogfile"]));
            args.push(path_arg(&pass_log));
            args.extend(strings(&["-pass", &pass.to_string()]));

            if pass == 1 {
                args.push(NULL_DEVICE.to_string());
                StageCommand::new(args, None)
            } else {
                args.extend(strings(&["-metadata", &format!("title={}", name)]));
                args.push(path_arg(&output));
                StageCommand::new(args, Some(output.clone()))
            }
        };

        let stages = vec![stage(1), stage(2)];
        debug!(bitrate_kbps = video_kbps, pass_log = %pass_log.display(), "convert stages built");

        PlannedJob {
            id: Uuid::new_v4().to_string(),
            display_name: format!("{}.{}", name, profile.container_extension),
            mode: JobMode::Convert,
            stages,
            expected_duration_seconds: range.duration_seconds(),
            source_path: request.source_path.clone(),
            target_bitrate_kbps: Some(video_kbps),
            pass_log: Some(pass_log),
        }
    }

    fn audio_args(&self, merge: bool) -> Vec<String> {
        let bitrate = format!("{}k", self.settings.audio_bitrate_kbps);
        if merge {
            strings(&[
                "-filter_complex",
                "[0:a:0][0:a:1]amerge=inputs=2[a]",
                "-map",
                "[a]",
                "-c:a",
                "libopus",
                "-ac",
                "2",
                "-b:a",
                &bitrate,
            ])
        } else {
            strings(&["-map", "0:a?", "-c:a", "libopus", "-b:a", &bitrate])
        }
    }

    fn plan_cut(
        &self,
        request: &JobRequest,
        name: &str,
        range: &Range,
        crop: Option<CropRegion>,
    ) -> PlannedJob {
        let extension = source_extension(&request.source_path);
        let output = self
            .settings
            .destination
            .join(format!("{}.{}", name, extension));

        let mut args = base_args();
        args.push("-i".to_string());
        args.push(path_arg(&request.source_path));
        args.extend(strings(&[
            "-ss",
            &range.start.encoder_arg(),
            "-to",
            &range.end.encoder_arg(),
        ]));
        args.extend(copy_policy_args(request.include_audio, crop));
        args.push(path_arg(&output));

        PlannedJob {
            id: Uuid::new_v4().to_string(),
            display_name: format!("{}.{}", name, extension),
            mode: JobMode::Cut,
            stages: vec![StageCommand::new(args, Some(output))],
            expected_duration_seconds: range.duration_seconds(),
            source_path: request.source_path.clone(),
            target_bitrate_kbps: None,
            pass_log: None,
        }
    }

    fn plan_split(
        &self,
        request: &JobRequest,
        name: &str,
        range: &Range,
        crop: Option<CropRegion>,
    ) -> PlannedJob {
        let extension = source_extension(&request.source_path);
        let start = range.start.encoder_arg();
        let end = range.end.encoder_arg();

        let parts: [(&str, Vec<String>); 3] = [
            ("before", strings(&["-to", &start])),
            ("between", strings(&["-ss", &start, "-to", &end])),
            ("after", strings(&["-ss", &end])),
        ];

        let stages = parts
            .into_iter()
            .map(|(suffix, seek)| {
                let output = self
                    .settings
                    .destination
                    .join(format!("{}_{}.{}", name, suffix, extension));
                let mut args = base_args();
                args.push("-i".to_string());
                args.push(path_arg(&request.source_path));
                args.extend(seek);
                args.extend(copy_policy_args(request.include_audio, crop));
                args.push(path_arg(&output));
                StageCommand::new(args, Some(output))
            })
            .collect();

        let source_name = request
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        PlannedJob {
            id: Uuid::new_v4().to_string(),
            display_name: format!("Splitting {}", source_name),
            mode: JobMode::Split,
            stages,
            expected_duration_seconds: 0.0,
            source_path: request.source_path.clone(),
            target_bitrate_kbps: None,
            pass_log: None,
        }
    }

    /// Ask once if any output exists on disk or belongs to a queued job.
    fn check_collisions(
        &self,
        job: &PlannedJob,
        queued_outputs: &[PathBuf],
        confirm: &dyn Confirm,
    ) -> Result<(), PlanningError> {
        let collision = job
            .outputs()
            .find(|out| out.exists() || queued_outputs.iter().any(|q| q.as_path() == *out));

        match collision {
            Some(path) if !confirm.confirm_overwrite(path) => {
                Err(PlanningError::DuplicateOutput(path.to_path_buf()))
            }
            _ => Ok(()),
        }
    }
}

fn base_args() -> Vec<String> {
    strings(&["-hide_banner", "-nostdin", "-y"])
}

/// Stream copy unless a crop forces a video re-encode
fn copy_policy_args(include_audio: bool, crop: Option<CropRegion>) -> Vec<String> {
    let mut args = match crop {
        Some(region) => strings(&["-crf", CUT_CROP_CRF, "-filter:v", &region.filter()]),
        None => strings(&["-vcodec", "copy"]),
    };
    if include_audio {
        args.extend(strings(&["-acodec", "copy"]));
    } else {
        args.push("-an".to_string());
    }
    args
}

fn source_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn is_unit(multiplier: f64) -> bool {
    (multiplier - 1.0).abs() < f64::EPSILON
}
