//! Media probing through ffprobe.
//!
//! Only two facts are needed from the source: the frame rate of the first
//! video stream, which turns frame counts into a percentage, and its
//! resolution, which maps a normalized crop selection onto pixels.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// ffprobe output could not be understood.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// ffprobe could not be started.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of frame-rate information for the supervisor.
///
/// Implementations may block; the supervisor calls them from a blocking task.
pub trait FrameRateProbe: Send + Sync {
    fn frame_rate(&self, source: &Path) -> Result<f64, ProbeError>;
}

/// Probe backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Width and height of the first video stream.
    pub fn resolution(&self, source: &Path) -> Result<(u32, u32), ProbeError> {
        let stdout = self.run(
            &[
                "-v",
                "0",
                "-of",
                "csv=s=x:p=0",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
            ],
            source,
        )?;
        parse_resolution(&stdout)
    }

    fn run(&self, args: &[&str], source: &Path) -> Result<String, ProbeError> {
        let output = Command::new(&self.program).args(args).arg(source).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl FrameRateProbe for FfprobeProbe {
    fn frame_rate(&self, source: &Path) -> Result<f64, ProbeError> {
        let stdout = self.run(
            &[
                "-v",
                "0",
                "-of",
                "csv=p=0",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=r_frame_rate",
            ],
            source,
        )?;
        parse_frame_rate(&stdout)
    }
}

/// Parse `num/den` or a plain decimal into frames per second.
pub fn parse_frame_rate(text: &str) -> Result<f64, ProbeError> {
    let text = text.lines().next().unwrap_or("").trim().trim_end_matches(',');
    let invalid = || ProbeError::ParseError(format!("invalid frame rate '{}'", text));

    let rate = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| invalid())?;
            let den: f64 = den.trim().parse().map_err(|_| invalid())?;
            if den == 0.0 {
                return Err(invalid());
            }
            num / den
        }
        None => text.parse().map_err(|_| invalid())?,
    };

    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(invalid())
    }
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_resolution(text: &str) -> Result<(u32, u32), ProbeError> {
    let text = text.lines().next().unwrap_or("").trim();
    let invalid = || ProbeError::ParseError(format!("invalid resolution '{}'", text));

    let (w, h) = text.split_once('x').ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}
