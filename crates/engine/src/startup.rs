//! Startup checks
//!
//! Verifies the external tools before any job is accepted:
//! - the encoder answers `-version` with a parsable version line
//! - the prober answers `-version`

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    EncoderUnavailable(String),

    #[error("FFprobe not available: {0}")]
    ProberUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the checks found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReport {
    /// Major version of the encoder
    pub encoder_major: u32,
    /// First line of the prober's version output
    pub prober_version: String,
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version is everything before the first '.' or '-'
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Run `<encoder> -version` and return the major version
pub fn check_encoder_available(program: &Path) -> Result<u32, StartupError> {
    let output = Command::new(program).arg("-version").output().map_err(|e| {
        StartupError::EncoderUnavailable(format!(
            "{} -version failed; is FFmpeg installed and in PATH? Error: {}",
            program.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} -version exited with {}",
            program.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::EncoderUnavailable(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })
}

/// Run `<prober> -version` and return its first output line
pub fn check_prober_available(program: &Path) -> Result<String, StartupError> {
    let output = Command::new(program).arg("-version").output().map_err(|e| {
        StartupError::ProberUnavailable(format!(
            "{} -version failed; is FFprobe installed and in PATH? Error: {}",
            program.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::ProberUnavailable(format!(
            "{} -version exited with {}",
            program.display(),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .to_string())
}

/// Run all startup checks in order: encoder, then prober
pub fn run_startup_checks(cfg: &Config) -> Result<ToolReport, StartupError> {
    let encoder_major = check_encoder_available(&cfg.encoder.ffmpeg)?;
    info!(encoder = %cfg.encoder.ffmpeg.display(), major = encoder_major, "encoder found");

    let prober_version = check_prober_available(&cfg.encoder.ffprobe)?;
    info!(prober = %cfg.encoder.ffprobe.display(), "{}", prober_version);

    Ok(ToolReport {
        encoder_major,
        prober_version,
    })
}
