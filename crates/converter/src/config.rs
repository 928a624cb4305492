use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for a parsed configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid schedule.start_time {0:?}: expected HH:MM")]
    InvalidStartTime(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Configuration for the converter daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub schedule: ScheduleConfig,
    pub paths: PathsConfig,
    pub system: SystemConfig,
    pub audio: AudioConfig,
    pub ffmpeg: FfmpegConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Raise log verbosity to debug and let ffmpeg print its progress
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily wall-clock start time, `HH:MM`
    pub start_time: String,
    /// Run a single pass right away instead of waiting for `start_time`
    pub run_immediately: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_time: "04:00".to_string(),
            run_immediately: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory scanned for media files
    pub input_dir: PathBuf,
    /// JSON document holding processed-file records
    pub cache_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/app/input"),
            cache_file: PathBuf::from("/app/cache/converted-files.cache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// IANA timezone used for the daily schedule
    pub timezone: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Paris".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio codecs that trigger a conversion (matched case-insensitively)
    pub source_codecs: Vec<String>,
    /// Codec every audio stream is re-encoded to
    pub target_codec: String,
    /// Container extension picked up by the scan
    pub extension: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source_codecs: vec!["dts".to_string(), "truehd".to_string()],
            target_codec: "eac3".to_string(),
            extension: "mkv".to_string(),
        }
    }
}

/// Knobs passed through to the ffmpeg/ffprobe invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub audio_bitrate: String,
    pub bufsize: String,
    /// Encoder threads, 0 lets ffmpeg decide
    pub threads: u32,
    pub performance_flags: String,
    pub avoid_negative_ts: String,
    pub max_muxing_queue_size: u32,
    pub strict_mode: String,
    /// Hard wall-clock limit for a single conversion
    pub timeout_seconds: u64,
    /// Free space required on the target filesystem, as a multiple of the source size
    pub min_disk_space_ratio: f64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            audio_bitrate: "1536k".to_string(),
            bufsize: "3072k".to_string(),
            threads: 0,
            performance_flags: "+genpts+igndts+discardcorrupt".to_string(),
            avoid_negative_ts: "make_zero".to_string(),
            max_muxing_queue_size: 2048,
            strict_mode: "experimental".to_string(),
            timeout_seconds: 3600,
            min_disk_space_ratio: 1.5,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML (or `.json`) document.
    /// A missing file is an error: the daemon refuses to start on guessed settings.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = if config_path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

        Ok(config)
    }

    /// Check every field that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_start_time(&self.schedule.start_time)?;

        if self.audio.source_codecs.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "audio.source_codecs",
                reason: "at least one codec is required".to_string(),
            });
        }
        if self.audio.target_codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "audio.target_codec",
                reason: "must not be empty".to_string(),
            });
        }
        if self.audio.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "audio.extension",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ffmpeg.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ffmpeg.timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        let ratio = self.ffmpeg.min_disk_space_ratio;
        if !ratio.is_finite() || ratio < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "ffmpeg.min_disk_space_ratio",
                reason: format!("{} is not a finite value >= 1.0", ratio),
            });
        }
        Ok(())
    }

    /// Parsed daily start time
    pub fn start_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_start_time(&self.schedule.start_time)
    }
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_start_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidStartTime(value.to_string()))
}
