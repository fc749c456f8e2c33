//! Webber conversion job engine
//!
//! Plans encoder invocations from user intent and runs them through a
//! single-slot job queue with pause, resume and cancellation.

pub mod engine;
pub mod events;
pub mod job;
pub mod planner;
pub mod probe;
pub mod process_control;
pub mod profiles;
pub mod progress;
pub mod queue;
pub mod request;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod supervisor;
pub mod timestamp;

pub use engine::{Engine, EngineError};
pub use events::{channel, EngineEvent, EventReceiver, EventSender};
pub use job::{JobOutcome, PlannedJob, StageCommand, USER_CANCELLED_CODE};
pub use planner::{
    AlwaysConfirm, Confirm, NeverConfirm, Planner, PlannerSettings, PlanningError, MAX_VIDEO_KBPS,
};
pub use probe::{parse_frame_rate, FfprobeProbe, FrameRateProbe, ProbeError};
pub use process_control::{ProcessControl, SysinfoProcessControl};
pub use profiles::{EncodingProfile, ProfileRegistry};
pub use progress::{parse_chunk, ProgressRecord, ProgressUpdate, StageTracker};
pub use queue::JobQueue;
pub use request::{CropRegion, JobMode, JobRequest, MIN_CROP_EDGE};
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError, ToolReport};
pub use status::{QueueCounters, QueueSnapshot};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorSettings};
pub use timestamp::{Timestamp, TimestampError};
pub use webber_config as config;
pub use webber_config::Config;
