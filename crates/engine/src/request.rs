//! User intent collected at submit time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Crop regions this small or smaller are treated as a stray click, not a crop
pub const MIN_CROP_EDGE: u32 = 80;

/// What kind of job to plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Two-pass encode to a target size
    Convert,
    /// Single lossless (or crop-only) trim
    Cut,
    /// Three files: before, between and after the marks
    Split,
}

impl Default for JobMode {
    fn default() -> Self {
        Self::Convert
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMode::Convert => write!(f, "convert"),
            JobMode::Cut => write!(f, "cut"),
            JobMode::Split => write!(f, "split"),
        }
    }
}

/// Sub-frame rectangle in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a pixel region from a selection given as fractions of the frame.
    ///
    /// `(x, y, w, h)` are fractions in `0..=1`; values are truncated like the
    /// player overlay does when it maps its selection onto the source.
    pub fn from_normalized(x: f64, y: f64, w: f64, h: f64, resolution: (u32, u32)) -> Self {
        let (src_w, src_h) = (resolution.0 as f64, resolution.1 as f64);
        let px = |v: f64, total: f64| (v.clamp(0.0, 1.0) * total) as u32;
        Self {
            x: px(x, src_w),
            y: px(y, src_h),
            width: px(w, src_w),
            height: px(h, src_h),
        }
    }

    /// The region if it is large enough to count as a crop
    pub fn effective(self) -> Option<Self> {
        (self.width > MIN_CROP_EDGE && self.height > MIN_CROP_EDGE).then_some(self)
    }

    /// Encoder filter fragment `crop=W:H:X:Y`
    pub fn filter(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

/// Everything the planner needs to know about one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_path: PathBuf,
    /// In mark as typed, `MM:SS.mmm`
    pub start_timestamp: String,
    /// Out mark as typed, `MM:SS.mmm`
    pub end_timestamp: String,
    /// Output base name without extension
    pub target_name: String,
    /// Target file size in MB; `None` for a lossless cut
    pub target_size_mb: Option<f64>,
    pub profile_name: String,
    /// Playback speed multiplier applied before encoding (1 = unchanged)
    pub time_multiplier: f64,
    pub include_audio: bool,
    /// Mix the first two audio tracks into one stereo track
    pub merge_two_audio_tracks: bool,
    pub crop: Option<CropRegion>,
    pub mode: JobMode,
}

impl JobRequest {
    /// A convert request with default options
    pub fn new(
        source_path: impl Into<PathBuf>,
        start_timestamp: impl Into<String>,
        end_timestamp: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            start_timestamp: start_timestamp.into(),
            end_timestamp: end_timestamp.into(),
            target_name: target_name.into(),
            target_size_mb: None,
            profile_name: "webm".to_string(),
            time_multiplier: 1.0,
            include_audio: false,
            merge_two_audio_tracks: false,
            crop: None,
            mode: JobMode::Convert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_small_regions_are_not_crops(
            x in 0u32..4000,
            y in 0u32..4000,
            small in 0u32..=MIN_CROP_EDGE,
            other in 0u32..4000,
            small_is_width in proptest::bool::ANY,
        ) {
            let region = if small_is_width {
                CropRegion::new(x, y, small, other)
            } else {
                CropRegion::new(x, y, other, small)
            };
            prop_assert!(region.effective().is_none());
        }
    }

    #[test]
    fn test_effective_keeps_large_regions() {
        let region = CropRegion::new(10, 20, 81, 81);
        assert_eq!(region.effective(), Some(region));
    }

    #[test]
    fn test_filter_fragment_order() {
        let region = CropRegion::new(10, 20, 640, 360);
        assert_eq!(region.filter(), "crop=640:360:10:20");
    }

    #[test]
    fn test_from_normalized() {
        let region = CropRegion::from_normalized(0.25, 0.5, 0.5, 0.25, (1920, 1080));
        assert_eq!(region, CropRegion::new(480, 540, 960, 270));
    }

    #[test]
    fn test_job_mode_display() {
        assert_eq!(JobMode::Convert.to_string(), "convert");
        assert_eq!(JobMode::Cut.to_string(), "cut");
        assert_eq!(JobMode::Split.to_string(), "split");
        assert_eq!(JobMode::default(), JobMode::Convert);
    }
}
