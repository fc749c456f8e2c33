//! Command line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use webber_engine::{CropRegion, JobMode, JobRequest};

/// Webber - cut, split and convert video clips to a target size
#[derive(Parser, Debug)]
#[command(name = "webber")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "webber.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Skip the ffmpeg/ffprobe startup checks
    #[arg(long, global = true)]
    pub skip_checks: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Two-pass encode of the marked range to a target file size
    Convert(ConvertArgs),
    /// Trim the marked range without re-encoding
    Cut(JobArgs),
    /// Write the parts before, between and after the marks
    Split(JobArgs),
    /// List encoding profiles
    Profiles,
    /// Check that ffmpeg and ffprobe are usable
    Check,
}

/// Options shared by every job command
#[derive(Args, Debug)]
pub struct JobArgs {
    /// Source video
    pub source: PathBuf,

    /// In mark, MM:SS.mmm
    #[arg(short, long)]
    pub start: String,

    /// Out mark, MM:SS.mmm
    #[arg(short, long)]
    pub end: String,

    /// Output name without extension
    #[arg(short, long)]
    pub name: String,

    /// Keep the audio
    #[arg(long)]
    pub audio: bool,

    /// Crop rectangle in pixels, W:H:X:Y
    #[arg(long, value_parser = parse_crop)]
    pub crop: Option<CropRegion>,

    /// Crop rectangle as fractions of the frame, x,y,w,h
    #[arg(long, value_parser = parse_normalized_crop, conflicts_with = "crop")]
    pub crop_normalized: Option<NormalizedCrop>,

    /// Answer yes to every overwrite and warning prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Serve GET /status on this address while the job runs
    #[arg(long)]
    pub status_bind: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Target size in MB
    #[arg(long)]
    pub size: f64,

    /// Encoding profile
    #[arg(short, long, default_value = "webm")]
    pub profile: String,

    /// Playback speed multiplier (2 = half speed)
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Mix the first two audio tracks into one
    #[arg(long)]
    pub merge_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedCrop {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl JobArgs {
    /// Request without crop; the caller resolves normalized crops
    pub fn to_request(&self, mode: JobMode) -> JobRequest {
        let mut request = JobRequest::new(&self.source, &self.start, &self.end, &self.name);
        request.mode = mode;
        request.include_audio = self.audio;
        request.crop = self.crop;
        request
    }
}

impl ConvertArgs {
    pub fn to_request(&self) -> JobRequest {
        let mut request = self.job.to_request(JobMode::Convert);
        request.target_size_mb = Some(self.size);
        request.profile_name = self.profile.clone();
        request.time_multiplier = self.speed;
        request.merge_two_audio_tracks = self.merge_audio;
        request
    }
}

fn parse_crop(s: &str) -> Result<CropRegion, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err(format!("expected W:H:X:Y, got '{}'", s));
    }
    let mut values = [0u32; 4];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a pixel count", part))?;
    }
    let [width, height, x, y] = values;
    Ok(CropRegion::new(x, y, width, height))
}

fn parse_normalized_crop(s: &str) -> Result<NormalizedCrop, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h, got '{}'", s));
    }
    let mut values = [0f64; 4];
    for (value, part) in values.iter_mut().zip(&parts) {
        let v: f64 = part
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", part))?;
        if !(0.0..=1.0).contains(&v) {
            return Err(format!("'{}' is outside 0..1", part));
        }
        *value = v;
    }
    let [x, y, w, h] = values;
    Ok(NormalizedCrop { x, y, w, h })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crop() {
        assert_eq!(parse_crop("640:360:10:20").unwrap(), CropRegion::new(10, 20, 640, 360));
        assert!(parse_crop("640:360").is_err());
        assert!(parse_crop("a:b:c:d").is_err());
    }

    #[test]
    fn test_parse_normalized_crop() {
        let crop = parse_normalized_crop("0.25,0.5,0.5,0.25").unwrap();
        assert_eq!(crop, NormalizedCrop { x: 0.25, y: 0.5, w: 0.5, h: 0.25 });
        assert!(parse_normalized_crop("0.1,0.2,1.5,0.1").is_err());
    }

    #[test]
    fn test_convert_args_to_request() {
        let cli = Cli::try_parse_from([
            "webber", "convert", "in.mp4", "--start", "00:01.000", "--end", "00:09.000",
            "--name", "clip", "--size", "8", "--speed", "2", "--profile", "av1",
        ])
        .unwrap();
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        let request = args.to_request();
        assert_eq!(request.mode, JobMode::Convert);
        assert_eq!(request.target_size_mb, Some(8.0));
        assert_eq!(request.time_multiplier, 2.0);
        assert_eq!(request.profile_name, "av1");
        assert_eq!(request.source_path, PathBuf::from("in.mp4"));
    }

    #[test]
    fn test_crop_flags_conflict() {
        let result = Cli::try_parse_from([
            "webber", "cut", "in.mp4", "-s", "00:01.000", "-e", "00:02.000", "-n", "c",
            "--crop", "100:100:0:0", "--crop-normalized", "0,0,1,1",
        ]);
        assert!(result.is_err());
    }
}
