/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use minorframe::config::SchedulerConfig;
use minorframe::control::{self, CommandScript};
use minorframe::events::TracingEventSink;
use minorframe::runtime::{Runtime, RuntimeOptions};
use minorframe::table::image::TableImage;
use minorframe::table::TableStore;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Minor-frame slot scheduler.
///
/// Example:
///   minorframe --config conf/scheduler.yaml --tables conf/sch_tables.yaml \
///              --script conf/commands.yaml --run-for-secs 30
#[derive(Debug, Parser)]
#[command(
    name = "minorframe",
    about = "Table-driven minor-frame slot scheduler",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML scheduler constants.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to the YAML schedule/message table image.
    #[arg(short = 't', long = "tables")]
    tables: Option<PathBuf>,

    /// Resolution the minor-frame timer can honour, in microseconds.
    #[arg(long = "timer-accuracy-us", default_value_t = 1_000)]
    timer_accuracy_us: u32,

    /// Delay of the first simulated major-frame tone, in microseconds.
    #[arg(long = "tone-offset-us", default_value_t = 0)]
    tone_offset_us: u64,

    /// Run without a major-frame tone (minor frames synchronise to MET).
    #[arg(long = "no-tone", default_value_t = false)]
    no_tone: bool,

    /// Path to a YAML script of timed control requests.
    #[arg(short = 's', long = "script")]
    script: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for ctrl-c.
    #[arg(long = "run-for-secs")]
    run_for_secs: Option<u64>,

    /// Seconds between housekeeping reports.
    #[arg(
        long = "hk-interval-secs",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    hk_interval_secs: u64,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("minorframe starting up...");

    let cli = Cli::parse();

    info!(
        config       = ?cli.config,
        tables       = ?cli.tables,
        script       = ?cli.script,
        accuracy_us  = cli.timer_accuracy_us,
        tone         = !cli.no_tone,
        run_for_secs = ?cli.run_for_secs,
        "Configuration"
    );

    // ── Load scheduler constants ──────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match SchedulerConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load scheduler configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using default scheduler constants");
            SchedulerConfig::default()
        }
    };
    let config = Arc::new(config);

    // ── Install tables ────────────────────────────────────────────────────────
    let mut tables = TableStore::new(Arc::clone(&config));
    match &cli.tables {
        Some(path) => {
            let installed = TableImage::load_from_file(path)
                .and_then(|image| image.install(&mut tables, &mut TracingEventSink::new()));
            if let Err(e) = installed {
                error!("Failed to install table image: {:#}", e);
                process::exit(1);
            }
        }
        None => {
            warn!("No table image provided, every schedule entry is unused");
        }
    }

    // ── Load command script ───────────────────────────────────────────────────
    let script = match &cli.script {
        Some(path) => match CommandScript::load_from_file(path) {
            Ok(script) => Some(script),
            Err(e) => {
                error!("Failed to load command script: {:#}", e);
                process::exit(1);
            }
        },
        None => None,
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let options = RuntimeOptions {
        timer_accuracy_us: cli.timer_accuracy_us,
        tone_offset: (!cli.no_tone).then(|| Duration::from_micros(cli.tone_offset_us)),
        run_for: cli.run_for_secs.map(Duration::from_secs),
        hk_interval: Duration::from_secs(cli.hk_interval_secs),
    };

    let (runtime, handle) = Runtime::new(config, tables, options);
    if let Some(script) = script {
        info!(steps = script.steps.len(), "Playing command script");
        tokio::spawn(control::play_script(handle, script));
    }

    match runtime.run().await {
        Ok(hk) => match serde_yaml::to_string(&hk) {
            Ok(yaml) => println!("{yaml}"),
            Err(e) => warn!("Failed to render final housekeeping: {}", e),
        },
        Err(e) => {
            error!("Scheduler stopped: {:#}", e);
            process::exit(1);
        }
    }
}
