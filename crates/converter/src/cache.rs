use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a file was recorded without being converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    #[serde(alias = "no_dts_or_truehd")]
    NoTargetCodec,
    InsufficientDiskSpace,
}

/// Terminal outcome of processing one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outcome {
    Converted {
        original_codecs: String,
        conversion_time: f64,
        ffmpeg_command: String,
    },
    Skipped {
        reason: SkipReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Failed {
        error_type: String,
        error: String,
    },
}

impl Outcome {
    pub fn action(&self) -> &'static str {
        match self {
            Outcome::Converted { .. } => "converted",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Value stored for one fingerprint key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl CacheRecord {
    /// Record an outcome stamped with the current local time
    pub fn now(outcome: Outcome) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            outcome,
        }
    }
}

/// Contents of the persisted document
#[derive(Debug, Default)]
pub struct LoadedCache {
    pub records: HashMap<String, CacheRecord>,
    /// Entries that are valid JSON but not a record we understand
    pub unparsed: HashMap<String, Value>,
    /// False when the document exists but could not be read or parsed at all
    pub readable: bool,
}

/// Persistent map of fingerprint key to processing record.
///
/// Write-through: every mutation rewrites the whole document, so a crash
/// loses at most the record being written. Entries that fail to decode are
/// carried along verbatim and written back on every save.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    entries: HashMap<String, CacheRecord>,
    unparsed: HashMap<String, Value>,
    readable: bool,
}

impl CacheStore {
    /// Open the store at `path`, loading whatever is already persisted
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create cache directory {}: {}", parent.display(), e);
            }
        }

        let mut store = Self {
            path,
            entries: HashMap::new(),
            unparsed: HashMap::new(),
            readable: true,
        };
        let loaded = store.load();
        store.entries = loaded.records;
        store.unparsed = loaded.unparsed;
        store.readable = loaded.readable;
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted document. Never fails: a missing document is empty,
    /// an unreadable one is logged and treated as empty, and entries that do
    /// not decode are kept aside as raw JSON.
    pub fn load(&self) -> LoadedCache {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No existing cache file found, starting with empty cache");
                return LoadedCache {
                    readable: true,
                    ..Default::default()
                };
            }
            Err(e) => {
                error!("Error loading cache {}: {}", self.path.display(), e);
                return LoadedCache::default();
            }
        };

        let raw = match serde_json::from_str::<HashMap<String, Value>>(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "Cache file {} is corrupted ({}). Creating new cache.",
                    self.path.display(),
                    e
                );
                return LoadedCache::default();
            }
        };

        let mut loaded = LoadedCache {
            readable: true,
            ..Default::default()
        };
        for (key, value) in raw {
            match serde_json::from_value::<CacheRecord>(value.clone()) {
                Ok(record) => {
                    loaded.records.insert(key, record);
                }
                Err(e) => {
                    warn!("Keeping undecodable cache entry {} as-is: {}", key, e);
                    loaded.unparsed.insert(key, value);
                }
            }
        }

        info!(
            "Loaded cache with {} entries ({} undecodable)",
            loaded.records.len() + loaded.unparsed.len(),
            loaded.unparsed.len()
        );
        loaded
    }

    /// False when the document on disk existed but could not be parsed at startup
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.entries.contains_key(key) || self.unparsed.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheRecord> {
        self.entries.get(key)
    }

    /// Insert or overwrite a record, then persist the full map.
    /// A failed persist is logged; the in-memory map stays authoritative.
    pub fn mark_processed(&mut self, key: impl Into<String>, record: CacheRecord) {
        let key = key.into();
        self.unparsed.remove(&key);
        self.entries.insert(key, record);
        if let Err(e) = self.save() {
            error!("Error saving cache: {:#}", e);
        }
    }

    /// Persist the full map, replacing the document in one rename
    pub fn save(&self) -> Result<()> {
        let mut document = serde_json::Map::new();
        for (key, value) in &self.unparsed {
            document.insert(key.clone(), value.clone());
        }
        for (key, record) in &self.entries {
            let value = serde_json::to_value(record)
                .with_context(|| format!("Failed to serialize cache entry {}", key))?;
            document.insert(key.clone(), value);
        }
        let json = serde_json::to_string_pretty(&document)
            .context("Failed to serialize cache")?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write cache file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to move cache file into place: {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        debug!("Saved cache with {} entries", document.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.unparsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
