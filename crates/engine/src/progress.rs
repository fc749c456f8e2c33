//! Encoder progress parsing.
//!
//! The encoder prints status lines such as
//! `frame=  120 fps= 30 q=28.0 size=    512kB time=00:00:04.00 bitrate=1048.6kbits/s speed=1.5x`
//! separated by `\r` while running. [`parse_chunk`] extracts the last complete
//! record from a chunk of output and [`StageTracker`] turns records into
//! percentage and ETA updates for one stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Keys a status line must carry to count as a progress record
const KEYS: [&str; 6] = ["frame", "fps", "size", "time", "bitrate", "speed"];

/// Raw fields of one status line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub frame: u64,
    pub fps: f64,
    pub size: String,
    pub time: String,
    pub bitrate: String,
    pub speed: String,
}

/// Return the record of the last well-formed line in `chunk`, if any.
///
/// Lines may end in `\n` or `\r`. A line is well-formed when all six keys
/// appear as `key=value` with optional spaces around `=` and the frame and
/// fps values are numeric.
pub fn parse_chunk(chunk: &str) -> Option<ProgressRecord> {
    chunk
        .split(['\n', '\r'])
        .rev()
        .find_map(parse_line)
}

/// Parse a single status line.
pub fn parse_line(line: &str) -> Option<ProgressRecord> {
    let mut values = KEYS.iter().map(|key| extract_value(line, key));
    let frame = values.next()??;
    let fps = values.next()??;
    let size = values.next()??;
    let time = values.next()??;
    let bitrate = values.next()??;
    let speed = values.next()??;

    Some(ProgressRecord {
        frame: frame.parse().ok()?,
        fps: fps.parse().ok()?,
        size: size.to_string(),
        time: time.to_string(),
        bitrate: bitrate.to_string(),
        speed: speed.to_string(),
    })
}

/// Find `key = value` in `line` and return the value.
///
/// The key may be glued to an uppercase prefix (the final summary line
/// reports `Lsize=`), but not to another lowercase word.
fn extract_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    for (idx, _) in line.match_indices(key) {
        let glued = line[..idx]
            .chars()
            .next_back()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false);
        if glued {
            continue;
        }

        let rest = line[idx + key.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end > 0 {
            return Some(&rest[..end]);
        }
    }
    None
}

/// Progress of the running stage as reported to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: String,
    /// 1-based stage number
    pub stage: usize,
    pub stage_count: usize,
    /// `None` when the frame rate or expected duration is unknown
    pub percent: Option<u8>,
    pub eta_seconds: Option<u64>,
    pub elapsed_seconds: u64,
    pub total_frames: Option<u64>,
    pub target_bitrate_kbps: Option<u32>,
    pub record: ProgressRecord,
}

impl fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {} of {}", self.stage, self.stage_count)?;
        match (self.percent, self.total_frames) {
            (Some(percent), Some(total)) => write!(
                f,
                ": {}% (frame {} of {})",
                percent, self.record.frame, total
            )?,
            (Some(percent), None) => write!(f, ": {}%", percent)?,
            _ => write!(f, ": frame {}", self.record.frame)?,
        }
        if let Some(eta) = self.eta_seconds {
            write!(f, ", ETA {}", format_clock(eta))?;
        }
        write!(f, ", speed {}", self.record.speed)
    }
}

fn format_clock(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Derives updates for one stage of one job.
#[derive(Debug, Clone)]
pub struct StageTracker {
    job_id: String,
    stage: usize,
    stage_count: usize,
    frame_rate: Option<f64>,
    expected_duration_seconds: f64,
    target_bitrate_kbps: Option<u32>,
    started: Instant,
}

impl StageTracker {
    pub fn new(
        job_id: impl Into<String>,
        stage: usize,
        stage_count: usize,
        frame_rate: Option<f64>,
        expected_duration_seconds: f64,
        target_bitrate_kbps: Option<u32>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            stage_count,
            frame_rate,
            expected_duration_seconds,
            target_bitrate_kbps,
            started: Instant::now(),
        }
    }

    /// Frames the stage is expected to produce, when known
    pub fn total_frames(&self) -> Option<f64> {
        match self.frame_rate {
            Some(rate) if rate > 0.0 && self.expected_duration_seconds > 0.0 => {
                Some(rate * self.expected_duration_seconds)
            }
            _ => None,
        }
    }

    pub fn update(&self, record: ProgressRecord) -> ProgressUpdate {
        self.update_at(record, self.started.elapsed())
    }

    /// Build an update as if `elapsed` had passed since the stage started.
    pub fn update_at(&self, record: ProgressRecord, elapsed: Duration) -> ProgressUpdate {
        let total = self.total_frames();
        let percent = total.map(|total| {
            let ratio = (record.frame as f64 / total * 100.0).floor();
            ratio.clamp(0.0, 100.0) as u8
        });

        let elapsed_secs = elapsed.as_secs_f64();
        let eta_seconds = match percent {
            Some(p) if p > 0 => {
                Some((elapsed_secs * f64::from(100 - p) / f64::from(p)).round() as u64)
            }
            _ => None,
        };

        ProgressUpdate {
            job_id: self.job_id.clone(),
            stage: self.stage,
            stage_count: self.stage_count,
            percent,
            eta_seconds,
            elapsed_seconds: elapsed.as_secs(),
            total_frames: total.map(|t| t.round() as u64),
            target_bitrate_kbps: self.target_bitrate_kbps,
            record,
        }
    }
}
