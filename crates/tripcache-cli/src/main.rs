//! tripcache - fetch, cache and print the current booking.
//!
//! A thin console frontend over `tripcache-core`: loads configuration,
//! builds a data manager for the configured source and prints the booking.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tripcache_core::{Booking, Config, DataManager, SourceLocation, SystemClock, SystemMemory};

// ============================================================================
// Constants
// ============================================================================

/// Overrides the configured data source
const SOURCE_ENV: &str = "TRIPCACHE_SOURCE";

/// Directory for daily log files; stderr only when unset
const LOG_DIR_ENV: &str = "TRIPCACHE_LOG_DIR";

const LOG_FILE_PREFIX: &str = "tripcache.log";

/// Source used when neither config, env nor flags name one
const DEFAULT_SOURCE: &str = "data/booking.json";

const USAGE: &str = "\
Usage: tripcache [OPTIONS]

Options:
  --source <PATH|URL>  Read the booking from a file or http(s) URL
  --refresh            Skip the caches and fetch from the source
  --stats              Print cache statistics and a health report
  --clear              Clear both cache tiers and exit
  -h, --help           Show this help";

#[derive(Debug, Default)]
struct Args {
    source: Option<String>,
    refresh: bool,
    stats: bool,
    clear: bool,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> Result<Option<Self>> {
        let mut args = Args::default();
        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--source" => {
                    let value = raw.next().ok_or_else(|| anyhow!("--source needs a value"))?;
                    args.source = Some(value);
                }
                "--refresh" => args.refresh = true,
                "--stats" => args.stats = true,
                "--clear" => args.clear = true,
                "-h" | "--help" => return Ok(None),
                other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
            }
        }
        Ok(Some(args))
    }
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). The returned guard must
/// live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let Some(args) = Args::parse(std::env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(());
    };

    let _log_guard = init_tracing();
    info!("tripcache starting");

    let config = Config::load()?;
    let source = args
        .source
        .clone()
        .or_else(|| std::env::var(SOURCE_ENV).ok())
        .or_else(|| config.source.clone())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    let clock = Arc::new(SystemClock);
    let data_source = SourceLocation::parse(&source)
        .into_source(config.manager.request_timeout(), clock.clone())
        .with_context(|| format!("Failed to set up data source {}", source))?;

    let manager = DataManager::builder(data_source)
        .config(config.manager.clone())
        .clock(clock)
        .memory_info(Arc::new(SystemMemory))
        .disk_path(config.disk_cache_path()?)
        .build()
        .context("Failed to create data manager")?;

    let result = run(&manager, &args).await;
    manager.destroy();
    info!("tripcache shutting down");
    result
}

async fn run(manager: &DataManager, args: &Args) -> Result<()> {
    if args.clear {
        manager.clear_cache();
        println!("Cache cleared");
        return Ok(());
    }

    let booking = if args.refresh {
        manager.refresh().await
    } else {
        manager.get().await
    }
    .context("Failed to load booking")?;

    print_booking(&booking);

    if args.stats {
        print_stats(manager);
    }
    Ok(())
}

fn print_booking(booking: &Booking) {
    let now = Utc::now();
    let remaining = booking.time_until_expiry(now);

    println!("Booking   {}", booking.reference);
    println!(
        "Expires   {} ({}h {}m left)",
        booking.expiry_time.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        remaining.num_hours(),
        remaining.num_minutes() % 60
    );
    println!("Duration  {}", booking.duration_display());
    println!(
        "Check-in  {}",
        if booking.can_issue_ticket { "available" } else { "not yet" }
    );
    println!();
    for segment in &booking.segments {
        println!("  {:>3}  {}", segment.id, segment.route_display());
    }
}

fn print_stats(manager: &DataManager) {
    let usage = manager.resource_usage();
    let stats = &usage.cache;

    println!();
    println!("Cache");
    println!("  items      {}/{}", stats.total_items, stats.max_items);
    println!(
        "  memory     {} / {} bytes ({:.1}%)",
        stats.memory_bytes,
        stats.max_memory_bytes,
        stats.memory_utilization() * 100.0
    );
    println!(
        "  hits       {} (misses {}, evictions {}, hit rate {:.0}%)",
        stats.hits,
        stats.misses,
        stats.evictions,
        stats.hit_rate * 100.0
    );
    println!("  disk valid {}", usage.disk_cache_valid);

    let health = manager.health_check();
    println!();
    if health.healthy {
        println!("Health     ok");
    } else {
        println!("Health");
        for issue in &health.issues {
            println!("  - {}", issue);
        }
    }
}
