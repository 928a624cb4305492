//! Fixtures shared by the unit tests: stand-in ffprobe/ffmpeg scripts and
//! a configuration pointing at a scratch directory.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use crate::config::Config;

/// Write an executable `/bin/sh` script and return its path
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// ffprobe stand-in reporting the given audio codecs and logging each call
pub fn fake_ffprobe(dir: &Path, codecs: &[&str]) -> PathBuf {
    let streams: Vec<String> = codecs
        .iter()
        .enumerate()
        .map(|(i, c)| format!(r#"{{"index": {}, "codec_type": "audio", "codec_name": "{}"}}"#, i + 1, c))
        .collect();
    let calls = dir.join("ffprobe.calls");
    write_script(
        dir,
        "ffprobe",
        &format!(
            "echo \"$@\" >> '{}'\necho '{{\"streams\": [{}]}}'",
            calls.display(),
            streams.join(", ")
        ),
    )
}

/// ffmpeg stand-in that writes `content` to its last argument and logs each call
pub fn fake_ffmpeg(dir: &Path, content: &str) -> PathBuf {
    let calls = dir.join("ffmpeg.calls");
    write_script(
        dir,
        "ffmpeg",
        &format!(
            "echo \"$@\" >> '{}'\nfor last; do :; done\nprintf '{}' > \"$last\"",
            calls.display(),
            content
        ),
    )
}

/// Number of logged invocations for a fake tool
pub fn call_count(dir: &Path, tool: &str) -> usize {
    fs::read_to_string(dir.join(format!("{}.calls", tool)))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// Configuration rooted in a scratch directory: media under `input/`,
/// cache under `cache/`, tools under `bin/`
pub fn scratch_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.input_dir = root.join("input");
    cfg.paths.cache_file = root.join("cache").join("converted-files.cache");
    cfg.ffmpeg.ffprobe_bin = root.join("bin").join("ffprobe");
    cfg.ffmpeg.ffmpeg_bin = root.join("bin").join("ffmpeg");
    fs::create_dir_all(&cfg.paths.input_dir).unwrap();
    fs::create_dir_all(root.join("bin")).unwrap();
    cfg
}
