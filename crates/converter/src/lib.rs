pub mod cache;
pub mod config;
pub mod ffmpeg;
pub mod ffprobe;
pub mod pipeline;
pub mod scan;
pub mod scheduler;

#[cfg(all(test, unix))]
mod test_support;

pub use cache::{CacheRecord, CacheStore, Outcome, SkipReason};
pub use config::Config;
pub use ffmpeg::{ConversionError, ConversionResult, SpaceCheck, Transcoder};
pub use ffprobe::{StreamInfo, TrackInspector};
pub use pipeline::{FileOutcome, FileProcessor, Fingerprint};
pub use scheduler::{RunSummary, Schedule, Scheduler};
