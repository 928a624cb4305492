use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use log::{debug, error, info, warn};
use crate::cache::{CacheRecord, CacheStore, Outcome, SkipReason};
use crate::ffmpeg::{SpaceCheck, Transcoder};
use crate::ffprobe::TrackInspector;
use crate::scan;

/// Cache identity of a file: path plus size and modification time
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the epoch
    pub mtime: f64,
}

impl Fingerprint {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as f64 + d.subsec_nanos() as f64 * 1e-9)
            .unwrap_or(0.0);

        Ok(Self {
            path: std::path::absolute(path)?,
            size: metadata.len(),
            mtime,
        })
    }

    /// `<path>_<size>_<mtime>`; mtime always carries a fractional part
    /// so keys stay stable for whole-second timestamps
    pub fn key(&self) -> String {
        let mtime = if self.mtime.fract() == 0.0 && self.mtime.is_finite() {
            format!("{:.1}", self.mtime)
        } else {
            format!("{}", self.mtime)
        };
        format!("{}_{}_{}", self.path.display(), self.size, mtime)
    }
}

/// What happened to one file in a run
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// The file disappeared before it could be fingerprinted; nothing recorded
    Vanished,
    /// Already recorded under the current fingerprint
    CacheHit,
    /// A new record was written
    Recorded(Outcome),
}

/// Per-file orchestration: fingerprint, cache lookup, inspect, convert, swap, record
pub struct FileProcessor {
    cache: CacheStore,
    inspector: TrackInspector,
    transcoder: Transcoder,
}

impl FileProcessor {
    pub fn new(cache: CacheStore, inspector: TrackInspector, transcoder: Transcoder) -> Self {
        Self {
            cache,
            inspector,
            transcoder,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Process a single file. Never fails: every error is classified into a record.
    pub async fn process_file(&mut self, file_path: &Path) -> FileOutcome {
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.display().to_string());

        let fingerprint = match Fingerprint::from_path(file_path) {
            Ok(fp) => fp,
            Err(e) => {
                error!("File disappeared during processing: {} ({})", file_path.display(), e);
                return FileOutcome::Vanished;
            }
        };
        let key = fingerprint.key();
        debug!(
            "File metadata for {}: size={}, mtime={}",
            filename, fingerprint.size, fingerprint.mtime
        );

        if self.cache.is_processed(&key) {
            debug!("Cache hit for {} with key: {}", filename, key);
            info!("Skipping {} (already processed according to cache)", filename);
            return FileOutcome::CacheHit;
        }
        debug!("Cache miss for {} with key: {}", filename, key);

        let outcome = self.decide(file_path, &filename).await;
        self.cache.mark_processed(key, CacheRecord::now(outcome.clone()));
        FileOutcome::Recorded(outcome)
    }

    async fn decide(&self, file_path: &Path, filename: &str) -> Outcome {
        let codecs = self.inspector.matching_codecs(file_path).await;
        if codecs.is_empty() {
            info!("No target codec tracks found in {}, skipping.", filename);
            return Outcome::Skipped {
                reason: SkipReason::NoTargetCodec,
                error: None,
            };
        }
        info!("Found {} audio in {}", codecs.join(", "), filename);

        match self.transcoder.check_disk_space(file_path) {
            Ok(SpaceCheck::Sufficient) => {}
            Ok(SpaceCheck::Insufficient { required, available }) => {
                let message = format!(
                    "Insufficient disk space. Required: {}, Available: {}",
                    required, available
                );
                error!("Skipping conversion of {}: {}", filename, message);
                return Outcome::Skipped {
                    reason: SkipReason::InsufficientDiskSpace,
                    error: Some(message),
                };
            }
            Err(e) => {
                error!("Skipping conversion of {}: {:#}", filename, e);
                return Outcome::Skipped {
                    reason: SkipReason::InsufficientDiskSpace,
                    error: Some(format!("{:#}", e)),
                };
            }
        }

        let temp_file = scan::temp_path_for(file_path);
        info!("Converting audio tracks for {}...", filename);

        let result = match self.transcoder.convert(file_path, &temp_file).await {
            Ok(result) => result,
            Err(e) => {
                error!("Conversion failed for {}: {}", filename, e);
                remove_temp(&temp_file);
                return Outcome::Failed {
                    error_type: e.error_type().to_string(),
                    error: e.to_string(),
                };
            }
        };
        info!("Conversion completed for {}.", filename);

        if !temp_file.exists() {
            let message = format!(
                "Temporary file {} does not exist after conversion",
                temp_file.display()
            );
            error!("Conversion failed for {}: {}", filename, message);
            return Outcome::Failed {
                error_type: "missing_output".to_string(),
                error: message,
            };
        }

        // rename within one directory: the canonical name always points at a complete file
        if let Err(e) = fs::rename(&temp_file, file_path) {
            error!("Unexpected error replacing {}: {}", filename, e);
            remove_temp(&temp_file);
            return Outcome::Failed {
                error_type: "unexpected_error".to_string(),
                error: format!(
                    "Failed to replace {} with {}: {}",
                    file_path.display(),
                    temp_file.display(),
                    e
                ),
            };
        }
        info!("File {} replaced successfully.", filename);
        info!("Metrics: conversion_time={:.2}s", result.conversion_time);

        Outcome::Converted {
            original_codecs: codecs.join(","),
            conversion_time: result.conversion_time,
            ffmpeg_command: result.command,
        }
    }
}

fn remove_temp(temp_file: &Path) {
    if temp_file.exists() {
        match fs::remove_file(temp_file) {
            Ok(()) => debug!("Removed temporary file {}", temp_file.display()),
            Err(e) => warn!("Failed to remove temporary file {}: {}", temp_file.display(), e),
        }
    }
}
