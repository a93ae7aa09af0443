//! netcheck
//!
//! Terminal front end for the netcheck diagnostics core:
//! - Connectivity status and public address
//! - Latency probe against httpbin.org or Cloudflare
//! - Parallel download/upload speed test
//! - Persistent connection log
//!
//! Usage:
//!   netcheck status
//!   netcheck ping --target cloudflare --samples 10
//!   netcheck speed --download-only
//!   netcheck history
//!   netcheck prefs --animation off

mod render;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use netcheck_core::network_analyzer::{FinalEstimate, LatencyTarget, ThroughputConfig};
use netcheck_core::presenter::{Severity, connectivity_banner, latency_banner, speed_banner};
use netcheck_core::settings::load_settings_from;
use netcheck_core::{FileStore, NetworkChecker, Preferences, load_settings};
use std::path::PathBuf;

const APP_DIR: &str = "netcheck";
const LOG_FILE: &str = "netcheck.log";

/// Samples in the peak window when stability detection is off
const PEAK_WINDOW: usize = 5;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "netcheck", version)]
#[command(about = "Check connectivity, latency and bandwidth from the terminal")]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the connection log and preferences
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check connectivity and show the public address
    Status,

    /// Measure latency (runs a connectivity check first)
    Ping {
        /// Endpoint to probe (defaults to the saved preference)
        #[arg(short, long)]
        target: Option<TargetArg>,

        /// Also run a series of this many probes for jitter and loss
        #[arg(short, long)]
        samples: Option<u32>,
    },

    /// Run a download and upload speed test
    Speed {
        /// Skip the upload phase
        #[arg(long)]
        download_only: bool,

        /// Parallel connections per direction
        #[arg(short, long)]
        connections: Option<usize>,

        /// Total download bytes
        #[arg(long)]
        bytes: Option<u64>,

        /// Hard timeout per direction in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Run until the byte target or timeout, never stop early
        #[arg(long)]
        no_stability: bool,

        /// Report the best sustained window instead of the overall average
        #[arg(long)]
        peak: bool,
    },

    /// Show the connection log
    History {
        /// Delete every entry
        #[arg(long)]
        clear: bool,
    },

    /// Show or change preferences
    Prefs {
        /// Typewriter effect on status lines
        #[arg(long)]
        animation: Option<Toggle>,

        /// Default latency endpoint
        #[arg(long)]
        target: Option<TargetArg>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
    Httpbin,
    Cloudflare,
}

impl From<TargetArg> for LatencyTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Httpbin => LatencyTarget::Httpbin,
            TargetArg::Cloudflare => LatencyTarget::Cloudflare,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// ============================================================================
// MAIN
// ============================================================================

fn init_logging(verbose: bool) {
    let log_level = std::env::var("RUST_LOG")
        .map(|_| log::LevelFilter::Debug)
        .unwrap_or(log::LevelFilter::Info);

    if !verbose {
        let log_dir = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."));
        let _ = std::fs::create_dir_all(&log_dir);

        if let Ok(log_file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE))
        {
            env_logger::Builder::from_default_env()
                .filter_level(log_level)
                .format_timestamp_millis()
                .target(env_logger::Target::Pipe(Box::new(log_file)))
                .init();
            return;
        }
    }

    // Fallback to stderr
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("netcheck v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = match &args.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    let store = match &args.store {
        Some(dir) => FileStore::new(dir),
        None => FileStore::open_default()?,
    };
    let mut checker = NetworkChecker::from_settings(&settings, store)
        .context("Failed to set up network checker")?;
    let prefs = checker.preferences();

    match args.command {
        Command::Status => status(&mut checker, &prefs).await?,
        Command::Ping { target, samples } => {
            let target = target.map(Into::into).unwrap_or(prefs.latency_target);
            ping(&mut checker, &prefs, target, samples).await?
        }
        Command::Speed {
            download_only,
            connections,
            bytes,
            timeout,
            no_stability,
            peak,
        } => {
            let overrides = SpeedOverrides {
                connections,
                bytes,
                timeout,
                no_stability,
                peak,
            };
            overrides.apply(&mut checker);
            speed(&mut checker, &prefs, !download_only).await?
        }
        Command::History { clear } => {
            if clear {
                checker.history_mut().clear()?;
                println!("Connection log cleared");
            } else {
                render::print_history(&checker.history().load_all());
            }
        }
        Command::Prefs { animation, target } => {
            let mut updated = prefs.clone();
            if let Some(toggle) = animation {
                updated.animation_enabled = matches!(toggle, Toggle::On);
            }
            if let Some(target) = target {
                updated.latency_target = target.into();
            }
            if updated != prefs {
                checker.save_preferences(&updated)?;
            }
            println!(
                "animation: {}",
                if updated.animation_enabled { "on" } else { "off" }
            );
            println!("target:    {}", updated.latency_target.label());
        }
    }

    Ok(())
}

async fn status(checker: &mut NetworkChecker<FileStore>, prefs: &Preferences) -> Result<()> {
    render::print_header();
    let online = connect(checker, prefs).await;
    if !online {
        bail!("network is offline");
    }
    Ok(())
}

/// Connectivity check shared by every measuring command
async fn connect(checker: &mut NetworkChecker<FileStore>, prefs: &Preferences) -> bool {
    println!("\nChecking connectivity...");
    let report = checker.check_connectivity().await;
    let severity = Severity::from_connectivity(report.is_online());

    render::type_line(
        &format!(
            "{} {}",
            connectivity_banner(&report),
            render::severity_tag(severity)
        ),
        prefs.animation_enabled,
    )
    .await;
    println!("  Address: {}", report.address);
    report.is_online()
}

async fn ping(
    checker: &mut NetworkChecker<FileStore>,
    prefs: &Preferences,
    target: LatencyTarget,
    samples: Option<u32>,
) -> Result<()> {
    render::print_header();
    if !connect(checker, prefs).await {
        bail!("network is offline");
    }

    render::print_section(&format!("Latency Test ({})", target.label()));
    let latency = checker.measure_latency(target).await?;
    render::type_line(
        &format!(
            "{} {}",
            latency_banner(latency),
            render::severity_tag(Severity::from_latency(latency))
        ),
        prefs.animation_enabled,
    )
    .await;

    if let Some(count) = samples.filter(|&n| n > 1) {
        println!("\n  Running {} probes...", count);
        match checker.measure_latency_series(target, count).await? {
            Some(stats) => render::print_latency_stats(&stats),
            None => println!("  Failed - no successful samples"),
        }
    }
    Ok(())
}

async fn speed(
    checker: &mut NetworkChecker<FileStore>,
    prefs: &Preferences,
    include_upload: bool,
) -> Result<()> {
    render::print_header();
    if !connect(checker, prefs).await {
        bail!("network is offline");
    }

    render::print_section("Speed Test");
    let result = checker
        .run_speed_test(prefs.latency_target, include_upload, render::print_progress)
        .await;
    println!();

    let results = result.context("Speed test failed")?;
    render::type_line(&speed_banner(&results), prefs.animation_enabled).await;
    render::print_results(&results);
    Ok(())
}

/// Command line overrides for the throughput settings
struct SpeedOverrides {
    connections: Option<usize>,
    bytes: Option<u64>,
    timeout: Option<u64>,
    no_stability: bool,
    peak: bool,
}

impl SpeedOverrides {
    fn apply(&self, checker: &mut NetworkChecker<FileStore>) {
        let estimator = checker.estimator_mut();
        let adjust = |config: &mut ThroughputConfig| {
            if let Some(connections) = self.connections {
                config.connections = connections;
            }
            if let Some(timeout) = self.timeout {
                config.hard_timeout_ms = timeout.saturating_mul(1000);
            }
            if self.no_stability {
                config.stability = None;
            }
            if self.peak {
                let window = config.stability.as_ref().map_or(PEAK_WINDOW, |s| s.window);
                config.final_estimate = FinalEstimate::PeakSustained { window };
            }
        };
        adjust(estimator.download_config_mut());
        adjust(estimator.upload_config_mut());

        if let Some(bytes) = self.bytes {
            estimator.download_config_mut().total_bytes = bytes;
        }
    }
}
