//! media-squeeze
//!
//! Batch transcoder for series and movie libraries: walks the catalog, gates
//! candidates by bitrate and drives one ffmpeg encode at a time with progress
//! reporting, cooperative cancellation and cleanup of incomplete output.

pub mod batch;
pub mod bitrate_gate;
pub mod catalog;
pub mod cleanup;
pub mod encode;
pub mod filter;
pub mod job_runner;
pub mod naming;
pub mod probe;
pub mod progress;
pub mod report;
pub mod startup;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use media_squeeze_config as config;
pub use media_squeeze_config::Config;
pub use batch::{run_library, BatchError, BatchSummary, Orchestrator, RunOptions};
pub use bitrate_gate::{decide_from_measurement, BitrateGate, GateDecision};
pub use catalog::{CatalogKind, CatalogWalker, MediaItem, MediaKind};
pub use encode::{
    build_ffmpeg_command, scale_filter, EncodeError, EncodeOutcome, EncodeProcess, EncodeRequest,
    Encoder, FfmpegEncoder, Quality,
};
pub use filter::{BitrateFlags, FilterError, NameFilter};
pub use job_runner::{EncodeJob, JobError, JobOutcome, JobRunner, JobState, RunnerSettings};
pub use naming::{derive_movie_name, parse_episode, EpisodeLabel};
pub use probe::{Dimensions, FfprobeProbe, MediaProbe, ProbeError, ProbeResult};
pub use progress::{IndicatifSink, NoopSink, ProgressMonitor, ProgressReader, ProgressSink};
pub use report::{format_size, SizeReport};
pub use startup::{check_tool_available, run_startup_checks, StartupError};
pub use storage::{provider_for, CifsStorage, LocalStorage, StorageError, StorageProvider};
