use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Prefix marking in-progress conversion output
pub const TEMP_PREFIX: &str = ".temp_";

/// Hidden sibling path the converter writes to before swapping it in
pub fn temp_path_for(file_path: &Path) -> PathBuf {
    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_path.with_file_name(format!("{}{}", TEMP_PREFIX, name))
}

pub fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX)
}

/// Recursively collect files with `extension` under `root`, skipping temp output.
/// Entries within a directory are visited in file name order.
pub fn find_media_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    if !root.exists() {
        warn!("Input directory does not exist: {}", root.display());
        return Vec::new();
    }

    let wanted = extension.trim_start_matches('.').to_lowercase();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        // symlinked files count, symlinked directories are not descended into
        let is_file = if entry.path_is_symlink() {
            entry.path().is_file()
        } else {
            entry.file_type().is_file()
        };
        if !is_file {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if is_temp_file(&name) {
            debug!("Ignoring in-progress file: {}", entry.path().display());
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase() == wanted)
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }

    debug!("Found {} {} files in {}", files.len(), wanted, root.display());
    files
}

/// Remove leftover temp files anywhere under `root`. Returns how many were removed.
pub fn cleanup_temp_files(root: &Path) -> usize {
    if !root.exists() {
        return 0;
    }

    let mut cleaned_count = 0;
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !is_temp_file(&entry.file_name().to_string_lossy()) {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                info!("Cleaned up temporary file: {}", entry.path().display());
                cleaned_count += 1;
            }
            Err(e) => warn!("Failed to remove temporary file {}: {}", entry.path().display(), e),
        }
    }

    if cleaned_count > 0 {
        info!("Cleaned up {} temporary files from previous runs", cleaned_count);
    }
    cleaned_count
}
