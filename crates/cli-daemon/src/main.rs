use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use converter::{
    config::Config,
    scan,
    CacheStore, FileProcessor, Schedule, Scheduler, TrackInspector, Transcoder,
};
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Scheduled DTS/TrueHD to EAC3 audio converter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "EAC3D_CONFIG", default_value = "/app/config/config.toml")]
    config: PathBuf,

    /// Enable debug logging regardless of app.debug_mode
    #[arg(short, long)]
    verbose: bool,

    /// Make a single pass now and exit, ignoring the schedule
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = Config::load(&args.config).context("Failed to load configuration")?;

    // TZ must be in place before the runtime spawns worker threads
    let zoneinfo_found = setup_timezone(&cfg.system.timezone);

    init_logging(cfg.app.debug_mode || args.verbose);
    if !zoneinfo_found {
        warn!(
            "No zoneinfo entry for timezone {}, local time may fall back to UTC",
            cfg.system.timezone
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(cfg, args.once))
}

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // RUST_LOG, when set, wins over the configured level
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

/// Point local time at the configured zone. Returns whether the zone is known to the system.
fn setup_timezone(timezone: &str) -> bool {
    std::env::set_var("TZ", timezone);
    Path::new("/usr/share/zoneinfo").join(timezone).is_file()
}

async fn run(cfg: Config, once: bool) -> Result<()> {
    info!("EAC3 converter starting");
    info!("Configuration loaded:");
    info!("  Input dir: {}", cfg.paths.input_dir.display());
    info!("  Cache file: {}", cfg.paths.cache_file.display());
    info!("  Start time: {}", cfg.schedule.start_time);
    info!("  Run immediately: {}", cfg.schedule.run_immediately || once);
    info!("  Timezone: {}", cfg.system.timezone);
    info!(
        "  Codecs: {} -> {} @ {}",
        cfg.audio.source_codecs.join(", "),
        cfg.audio.target_codec,
        cfg.ffmpeg.audio_bitrate
    );

    if !cfg.paths.input_dir.exists() {
        warn!("Input directory does not exist: {}", cfg.paths.input_dir.display());
    }

    // Leftovers from an interrupted encode
    scan::cleanup_temp_files(&cfg.paths.input_dir);

    let cache = CacheStore::open(&cfg.paths.cache_file);
    if !cache.is_readable() {
        // left untouched until a record is written, so it can still be recovered by hand
        warn!("Cache file {} could not be read, starting empty", cache.path().display());
    } else if let Err(e) = cache.save() {
        warn!("Cache file {} is not writable: {:#}", cache.path().display(), e);
    }

    let processor = FileProcessor::new(cache, TrackInspector::from_config(&cfg), Transcoder::new(&cfg));
    let mut scheduler = if once {
        Scheduler::new(
            processor,
            Schedule::Immediate,
            cfg.paths.input_dir.clone(),
            cfg.audio.extension.clone(),
        )
    } else {
        Scheduler::from_config(processor, &cfg)?
    };

    let interrupted = tokio::select! {
        _ = scheduler.run() => None,
        signal = shutdown_signal() => Some(signal),
    };

    match interrupted {
        Some(signal) => {
            // an encode that was in flight keeps its temp file until the sweep below
            info!("Received {}, saving cache and cleaning up...", signal);
            scheduler.flush_and_sweep();
        }
        None => info!("Processing finished, exiting"),
    }

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        "Ctrl+C"
    }
}
