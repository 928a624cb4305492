use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, error, warn};
use serde::Deserialize;
use tokio::process::Command;
use crate::config::Config;

/// ffprobe output restricted to the fields we read
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub channels: Option<i32>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Looks for audio streams in a restricted codec set
#[derive(Debug, Clone)]
pub struct TrackInspector {
    ffprobe_bin: PathBuf,
    codecs: Vec<String>,
}

impl TrackInspector {
    pub fn new(ffprobe_bin: impl Into<PathBuf>, codecs: &[String]) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
            codecs: codecs
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.ffmpeg.ffprobe_bin, &cfg.audio.source_codecs)
    }

    /// True if any audio stream uses a restricted codec.
    /// Probe failures count as "no": the file is left alone rather than blocking the run.
    pub async fn has_target_codec(&self, file_path: &Path) -> bool {
        !self.matching_codecs(file_path).await.is_empty()
    }

    /// Distinct restricted codecs present in the file, lower-cased, in stream order
    pub async fn matching_codecs(&self, file_path: &Path) -> Vec<String> {
        let probe = match self.probe(file_path).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!("Failed to analyze audio tracks for {}: {:#}", file_path.display(), e);
                return Vec::new();
            }
        };

        debug!("Found {} audio streams in {}", probe.streams.len(), file_path.display());

        let mut found = Vec::new();
        for (i, stream) in probe.streams.iter().enumerate() {
            let codec = stream.codec_name.as_deref().unwrap_or("").to_lowercase();
            debug!("Stream {}: codec_name={}", i, codec);
            if self.codecs.contains(&codec) && !found.contains(&codec) {
                found.push(codec);
            }
        }
        found
    }

    /// Raw audio stream records, empty on any failure
    pub async fn streams_info(&self, file_path: &Path) -> Vec<StreamInfo> {
        match self.probe(file_path).await {
            Ok(probe) => probe.streams,
            Err(e) => {
                warn!("Failed to get audio streams info for {}: {:#}", file_path.display(), e);
                Vec::new()
            }
        }
    }

    async fn probe(&self, file_path: &Path) -> Result<ProbeOutput> {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.arg("-i")
            .arg(file_path)
            .arg("-show_streams")
            .arg("-select_streams")
            .arg("a")
            .arg("-loglevel")
            .arg("error")
            .arg("-print_format")
            .arg("json");

        debug!(
            "Running ffprobe: {} -i {} -show_streams -select_streams a -loglevel error -print_format json",
            self.ffprobe_bin.display(),
            file_path.display()
        );

        let output = cmd.output().await.with_context(|| {
            format!(
                "Failed to execute ffprobe at {} for {}",
                self.ffprobe_bin.display(),
                file_path.display()
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffprobe failed (exit code {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let json_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;

        parse_probe_output(&json_str).map_err(|e| {
            error!("Failed to decode ffprobe output for {}: {}", file_path.display(), json_str);
            e
        })
    }
}

/// Parse ffprobe's JSON document
pub fn parse_probe_output(json: &str) -> Result<ProbeOutput> {
    serde_json::from_str(json).context("Failed to parse ffprobe JSON")
}
