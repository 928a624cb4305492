use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, error, info};
use crate::cache::Outcome;
use crate::config::Config;
use crate::pipeline::{FileOutcome, FileProcessor};
use crate::scan;

/// When processing runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One pass right away, then return
    Immediate,
    /// Once per calendar day, at or after `start`
    Daily { start: NaiveTime },
}

impl Schedule {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        if cfg.schedule.run_immediately {
            return Ok(Schedule::Immediate);
        }
        Ok(Schedule::Daily {
            start: cfg.start_time()?,
        })
    }
}

/// Counters for one processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub vanished: usize,
    pub cache_size: usize,
}

impl RunSummary {
    /// Files that got a new record this run
    pub fn processed(&self) -> usize {
        self.converted + self.skipped + self.failed
    }

    fn add(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Vanished => self.vanished += 1,
            FileOutcome::CacheHit => self.cache_hits += 1,
            FileOutcome::Recorded(Outcome::Converted { .. }) => self.converted += 1,
            FileOutcome::Recorded(Outcome::Skipped { .. }) => self.skipped += 1,
            FileOutcome::Recorded(Outcome::Failed { .. }) => self.failed += 1,
        }
    }
}

/// Gates runs by schedule and drives the pipeline over discovered files
pub struct Scheduler {
    processor: FileProcessor,
    schedule: Schedule,
    input_dir: PathBuf,
    extension: String,
    last_run_date: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(processor: FileProcessor, schedule: Schedule, input_dir: PathBuf, extension: String) -> Self {
        Self {
            processor,
            schedule,
            input_dir,
            extension,
            last_run_date: None,
        }
    }

    pub fn from_config(processor: FileProcessor, cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            processor,
            Schedule::from_config(cfg)?,
            cfg.paths.input_dir.clone(),
            cfg.audio.extension.clone(),
        ))
    }

    pub fn processor(&self) -> &FileProcessor {
        &self.processor
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn last_run_date(&self) -> Option<NaiveDate> {
        self.last_run_date
    }

    /// Daily trigger check. Marks today as run when it fires.
    pub fn should_run_now(&mut self, now: NaiveDateTime) -> bool {
        let start = match self.schedule {
            Schedule::Immediate => return true,
            Schedule::Daily { start } => start,
        };

        let today = now.date();
        let already_ran = self.last_run_date.map_or(false, |d| d >= today);
        if now.time() >= start && !already_ran {
            info!(
                "Current time {} is after start time {}. Starting daily file processing...",
                now.format("%H:%M"),
                start.format("%H:%M")
            );
            self.last_run_date = Some(today);
            return true;
        }

        debug!(
            "Schedule check: current={}, start={}, last_run={:?}",
            now.format("%H:%M"),
            start.format("%H:%M"),
            self.last_run_date
        );
        false
    }

    /// Next instant the daily trigger can fire
    pub fn next_trigger(&self, now: NaiveDateTime) -> NaiveDateTime {
        let start = match self.schedule {
            Schedule::Immediate => return now,
            Schedule::Daily { start } => start,
        };

        let today = now.date();
        let ran_today = self.last_run_date.map_or(false, |d| d >= today);
        if now.time() < start {
            return today.and_time(start);
        }
        if !ran_today {
            return now;
        }
        today.succ_opt().unwrap_or(today).and_time(start)
    }

    /// How long to sleep before checking the schedule again
    pub fn sleep_duration(&self, now: NaiveDateTime) -> Duration {
        let wait = (self.next_trigger(now) - now).to_std().unwrap_or(Duration::ZERO);
        wait.max(Duration::from_secs(1))
    }

    /// Discover files and push each through the pipeline in discovery order
    pub async fn process_files(&mut self) -> RunSummary {
        let files = scan::find_media_files(&self.input_dir, &self.extension);
        debug!("Total files to process: {}", files.len());

        let mut summary = RunSummary {
            discovered: files.len(),
            ..Default::default()
        };
        for file_path in &files {
            let outcome = self.processor.process_file(file_path).await;
            summary.add(&outcome);
        }
        summary.cache_size = self.processor.cache().len();

        info!(
            "Run finished: {} files found, {} processed ({} converted, {} skipped, {} failed), {} already cached, cache size {}",
            summary.discovered,
            summary.processed(),
            summary.converted,
            summary.skipped,
            summary.failed,
            summary.cache_hits,
            summary.cache_size
        );
        summary
    }

    /// Shutdown housekeeping: persist the cache and remove temp files an
    /// interrupted conversion left behind. Returns how many were removed.
    pub fn flush_and_sweep(&self) -> usize {
        if let Err(e) = self.processor.cache().save() {
            error!("Error saving cache: {:#}", e);
        }
        scan::cleanup_temp_files(&self.input_dir)
    }

    /// Main loop. Immediate mode makes a single pass and returns; daily mode never returns.
    pub async fn run(&mut self) {
        info!("Starting watch service...");
        debug!(
            "Configuration: INPUT_DIR={}, SCHEDULE={:?}",
            self.input_dir.display(),
            self.schedule
        );

        if self.schedule == Schedule::Immediate {
            info!("Run immediately is enabled. Processing files regardless of schedule.");
            self.process_files().await;
            return;
        }

        loop {
            let now = Local::now().naive_local();
            if self.should_run_now(now) {
                self.process_files().await;
                info!("Finishing daily processing...");
            }

            let now = Local::now().naive_local();
            let wait = self.sleep_duration(now);
            info!(
                "Next run at {} (sleeping {}s)",
                self.next_trigger(now).format("%Y-%m-%d %H:%M"),
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
        }
    }
}
