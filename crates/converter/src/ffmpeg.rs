use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use log::{debug, error, info};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use crate::config::{Config, FfmpegConfig};

/// Ways a conversion can fail
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to start ffmpeg at {}: {source}", bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ffmpeg exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },
    #[error("ffmpeg timed out after {seconds} seconds and was killed")]
    Timeout { seconds: u64 },
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(#[source] io::Error),
}

impl ConversionError {
    /// Stable identifier stored in failed cache records
    pub fn error_type(&self) -> &'static str {
        match self {
            ConversionError::Timeout { .. } => "conversion_timeout",
            _ => "conversion_error",
        }
    }
}

/// Result of a successful conversion
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Wall-clock seconds spent in ffmpeg
    pub conversion_time: f64,
    /// The exact command line that was run
    pub command: String,
}

/// Outcome of the pre-flight free space check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceCheck {
    Sufficient,
    Insufficient { required: u64, available: u64 },
}

/// Source of the free space figure for a directory's filesystem
pub trait FreeSpace {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// Free space as reported by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFreeSpace;

impl FreeSpace for SystemFreeSpace {
    /// Available space on the mounted disk with the longest mount point containing `dir`
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        let dir = dir.canonicalize()?;
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| dir.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk contains {}", dir.display()),
                )
            })
    }
}

/// Re-encodes audio tracks with ffmpeg while copying everything else
pub struct Transcoder {
    ffmpeg: FfmpegConfig,
    target_codec: String,
    debug_mode: bool,
    free_space: Box<dyn FreeSpace + Send + Sync>,
}

impl Transcoder {
    pub fn new(cfg: &Config) -> Self {
        Self::with_free_space(cfg, SystemFreeSpace)
    }

    pub fn with_free_space(cfg: &Config, free_space: impl FreeSpace + Send + Sync + 'static) -> Self {
        Self {
            ffmpeg: cfg.ffmpeg.clone(),
            target_codec: cfg.audio.target_codec.clone(),
            debug_mode: cfg.app.debug_mode,
            free_space: Box::new(free_space),
        }
    }

    /// Compare `size * min_disk_space_ratio` against free space next to the file
    pub fn check_disk_space(&self, file_path: &Path) -> Result<SpaceCheck> {
        let file_size = std::fs::metadata(file_path)
            .with_context(|| format!("Failed to stat {}", file_path.display()))?
            .len();
        let required = (file_size as f64 * self.ffmpeg.min_disk_space_ratio).ceil() as u64;

        let dir = match file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        let available = self
            .free_space
            .available_bytes(&dir)
            .with_context(|| format!("Failed to read free space for {}", dir.display()))?;

        debug!(
            "File size: {}, Required space: {}, Available space: {}",
            file_size, required, available
        );

        if available < required {
            return Ok(SpaceCheck::Insufficient { required, available });
        }
        Ok(SpaceCheck::Sufficient)
    }

    /// ffmpeg arguments: copy video and subtitles, re-encode all audio
    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let f = &self.ffmpeg;
        let loglevel = if self.debug_mode { "info" } else { "error" };

        let mut args: Vec<String> = Vec::new();
        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(loglevel.to_string());
        args.push("-y".to_string());

        // Input flags for damaged sources
        args.push("-fflags".to_string());
        args.push(f.performance_flags.clone());
        args.push("-i".to_string());
        args.push(input.display().to_string());

        args.push("-map".to_string());
        args.push("0".to_string());
        args.push("-c:v".to_string());
        args.push("copy".to_string());
        args.push("-c:a".to_string());
        args.push(self.target_codec.clone());
        args.push("-b:a".to_string());
        args.push(f.audio_bitrate.clone());
        args.push("-bufsize".to_string());
        args.push(f.bufsize.clone());
        args.push("-c:s".to_string());
        args.push("copy".to_string());

        args.push("-threads".to_string());
        args.push(f.threads.to_string());
        args.push("-avoid_negative_ts".to_string());
        args.push(f.avoid_negative_ts.clone());
        args.push("-max_muxing_queue_size".to_string());
        args.push(f.max_muxing_queue_size.to_string());
        args.push("-strict".to_string());
        args.push(f.strict_mode.clone());

        args.push(output.display().to_string());
        args
    }

    /// Run ffmpeg into `temp_output`, killing it once the configured timeout expires
    pub async fn convert(
        &self,
        input: &Path,
        temp_output: &Path,
    ) -> Result<ConversionResult, ConversionError> {
        let args = self.build_args(input, temp_output);
        let cmd_str = format!("{} {}", self.ffmpeg.ffmpeg_bin.display(), args.join(" "));
        debug!("Running ffmpeg command: {}", cmd_str);
        info!("Starting ffmpeg conversion...");

        let start = Instant::now();

        let mut cmd = Command::new(&self.ffmpeg.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ConversionError::Spawn {
            bin: self.ffmpeg.ffmpeg_bin.clone(),
            source,
        })?;

        // stderr is drained concurrently, a full pipe would stall ffmpeg
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let timeout_secs = self.ffmpeg.timeout_seconds;
        let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(result) => result.map_err(ConversionError::Wait)?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    error!("Failed to kill timed out ffmpeg process: {}", e);
                }
                return Err(ConversionError::Timeout { seconds: timeout_secs });
            }
        };

        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(ConversionError::Failed {
                exit_code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let conversion_time = start.elapsed().as_secs_f64();
        info!("Conversion completed in {:.2}s", conversion_time);

        Ok(ConversionResult {
            conversion_time,
            command: cmd_str,
        })
    }
}

/// Free space stub for tests
#[cfg(test)]
pub(crate) struct FixedFreeSpace(pub u64);

#[cfg(test)]
impl FreeSpace for FixedFreeSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn transcoder(cfg: &Config, available: u64) -> Transcoder {
        Transcoder::with_free_space(cfg, FixedFreeSpace(available))
    }

    #[test]
    fn test_build_args_copies_video_and_reencodes_audio() {
        let mut cfg = Config::default();
        cfg.ffmpeg.audio_bitrate = "640k".to_string();
        cfg.ffmpeg.threads = 4;
        let t = transcoder(&cfg, 0);

        let args = t.build_args(Path::new("/in/movie.mkv"), Path::new("/in/.temp_movie.mkv"));
        let joined = args.join(" ");

        assert!(joined.contains("-i /in/movie.mkv"));
        assert!(joined.contains("-map 0"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:s copy"));
        assert!(joined.contains("-c:a eac3"));
        assert!(joined.contains("-b:a 640k"));
        assert!(joined.contains("-threads 4"));
        assert!(joined.contains("-loglevel error"));
        assert!(args.contains(&"-y".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/in/.temp_movie.mkv"));
    }

    #[test]
    fn test_debug_mode_raises_ffmpeg_loglevel() {
        let mut cfg = Config::default();
        cfg.app.debug_mode = true;
        let args = transcoder(&cfg, 0).build_args(Path::new("a.mkv"), Path::new(".temp_a.mkv"));
        assert!(args.join(" ").contains("-loglevel info"));
    }

    #[test]
    fn test_disk_space_gate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, vec![0u8; 1000]).unwrap();
        let cfg = Config::default();

        // 1000 bytes * 1.5 = 1500 required
        assert_eq!(transcoder(&cfg, 1500).check_disk_space(&file).unwrap(), SpaceCheck::Sufficient);
        assert_eq!(
            transcoder(&cfg, 1499).check_disk_space(&file).unwrap(),
            SpaceCheck::Insufficient { required: 1500, available: 1499 }
        );
    }

    #[test]
    fn test_disk_space_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = transcoder(&Config::default(), u64::MAX);
        assert!(t.check_disk_space(&dir.path().join("gone.mkv")).is_err());
    }

    #[test]
    fn test_system_free_space_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SystemFreeSpace.available_bytes(&dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::{fake_ffmpeg, write_script};

        #[tokio::test]
        async fn test_convert_success_reports_command() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin = fake_ffmpeg(dir.path(), "converted");
            let input = dir.path().join("movie.mkv");
            let output = dir.path().join(".temp_movie.mkv");
            fs::write(&input, "original").unwrap();

            let result = transcoder(&cfg, u64::MAX).convert(&input, &output).await.unwrap();

            assert_eq!(fs::read_to_string(&output).unwrap(), "converted");
            assert!(result.conversion_time >= 0.0);
            assert!(result.command.contains("-c:a eac3"));
            assert!(result.command.starts_with(&cfg.ffmpeg.ffmpeg_bin.display().to_string()));
        }

        #[tokio::test]
        async fn test_convert_nonzero_exit() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin = write_script(dir.path(), "ffmpeg", "echo 'Invalid data' >&2; exit 3");

            let err = transcoder(&cfg, u64::MAX)
                .convert(&dir.path().join("a.mkv"), &dir.path().join(".temp_a.mkv"))
                .await
                .unwrap_err();

            match &err {
                ConversionError::Failed { exit_code, stderr } => {
                    assert_eq!(*exit_code, 3);
                    assert_eq!(stderr, "Invalid data");
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(err.error_type(), "conversion_error");
        }

        #[tokio::test]
        async fn test_convert_keeps_stderr_that_is_not_utf8() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin =
                write_script(dir.path(), "ffmpeg", "printf 'bad \\377 tag\\n' >&2; exit 1");

            let err = transcoder(&cfg, u64::MAX)
                .convert(&dir.path().join("a.mkv"), &dir.path().join(".temp_a.mkv"))
                .await
                .unwrap_err();

            match err {
                ConversionError::Failed { exit_code, stderr } => {
                    assert_eq!(exit_code, 1);
                    assert!(stderr.starts_with("bad "), "stderr was {stderr:?}");
                    assert!(stderr.ends_with(" tag"), "stderr was {stderr:?}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_dropped_conversion_kills_ffmpeg() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("ffmpeg.pid");
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin = write_script(
                dir.path(),
                "ffmpeg",
                &format!("echo $$ > '{}'; exec sleep 30", pid_file.display()),
            );

            let t = transcoder(&cfg, u64::MAX);
            let input = dir.path().join("a.mkv");
            let output = dir.path().join(".temp_a.mkv");
            // cancelling the future, as a shutdown signal does, drops the child
            let cancelled = tokio::time::timeout(Duration::from_millis(500), t.convert(&input, &output)).await;
            assert!(cancelled.is_err());

            let pid = fs::read_to_string(&pid_file).unwrap().trim().to_string();
            let stat_path = PathBuf::from(format!("/proc/{pid}/stat"));
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                // gone, or killed and waiting to be reaped
                let alive = match fs::read_to_string(&stat_path) {
                    Ok(stat) => !stat.contains(") Z"),
                    Err(_) => false,
                };
                if !alive {
                    break;
                }
                assert!(Instant::now() < deadline, "ffmpeg {pid} outlived its conversion");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        #[tokio::test]
        async fn test_convert_timeout_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin = write_script(dir.path(), "ffmpeg", "exec sleep 30");
            cfg.ffmpeg.timeout_seconds = 1;

            let started = Instant::now();
            let err = transcoder(&cfg, u64::MAX)
                .convert(&dir.path().join("a.mkv"), &dir.path().join(".temp_a.mkv"))
                .await
                .unwrap_err();

            assert!(matches!(err, ConversionError::Timeout { seconds: 1 }));
            assert_eq!(err.error_type(), "conversion_timeout");
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_convert_missing_binary() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::default();
            cfg.ffmpeg.ffmpeg_bin = dir.path().join("no-ffmpeg");

            let err = transcoder(&cfg, u64::MAX)
                .convert(&dir.path().join("a.mkv"), &dir.path().join(".temp_a.mkv"))
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::Spawn { .. }));
        }
    }
}
