//! hydroguard - Flood Alert Daemon
//!
//! Reads water level readings from standard input (one per line), feeds
//! them through the alert-level state machine and notifies every
//! configured channel.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hydro_alerts::{AlertConfig, AlertLevel, Dispatch};
use hydroguard::{build_manager, run_readings, spawn_line_reader, spawn_probe};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "hydroguard")]
#[command(about = "Flood alert daemon")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read readings from stdin and dispatch alerts
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/hydroguard/config.json", env = "HYDROGUARD_CONFIG")]
        config: PathBuf,

        /// Seconds to wait for each channel probe at startup
        #[arg(long, default_value_t = 10)]
        probe_timeout: u64,
    },

    /// Send a test alert through every enabled channel
    TestAlert {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/hydroguard/config.json", env = "HYDROGUARD_CONFIG")]
        config: PathBuf,

        /// Level to announce (NORMAL, WARNING, DANGER, CRITICAL or 0-3)
        #[arg(short, long, default_value = "WARNING")]
        level: AlertLevel,

        /// Reading to announce (defaults to the level's threshold)
        #[arg(short, long)]
        reading: Option<f64>,
    },

    /// Check which channels are reachable
    Probe {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/hydroguard/config.json", env = "HYDROGUARD_CONFIG")]
        config: PathBuf,

        /// Seconds to wait for each channel
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "hydroguard.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Commands::Run {
            config,
            probe_timeout,
        } => {
            run_daemon(config, probe_timeout).await?;
        }

        Commands::TestAlert {
            config,
            level,
            reading,
        } => {
            test_alert(config, level, reading).await?;
        }

        Commands::Probe { config, timeout } => {
            probe(config, timeout).await?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("hydroguard=info".parse()?)
        .add_directive("hydro_alerts=info".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

async fn run_daemon(config_path: PathBuf, probe_timeout: u64) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting hydroguard");

    let config = AlertConfig::from_file(&config_path)?;
    let manager = Arc::new(build_manager(&config)?);
    info!(
        channels = manager.registry().len(),
        enabled = manager.registry().enabled_count(),
        "loaded config"
    );

    // Startup must not wait on slow channels.
    let _probe = spawn_probe(Arc::clone(&manager), Duration::from_secs(probe_timeout));

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(e) => {
                warn!(error = %e, "failed to listen for interrupt");
                std::future::pending::<()>().await;
            }
        }
    };

    let lines = spawn_line_reader(BufReader::new(std::io::stdin()))?;
    let summary = run_readings(&manager, lines, shutdown).await?;
    info!(
        readings = summary.readings,
        absent = summary.absent,
        events = summary.events,
        bursts = summary.bursts,
        dropped = summary.dropped,
        "sampling stopped"
    );

    if manager.coordinator().is_bursting() {
        info!("waiting for active alert burst");
    }
    manager.wait_idle().await;

    let status = serde_json::to_string(&manager.status())?;
    info!(status = %status, "final status");
    Ok(())
}

async fn test_alert(config_path: PathBuf, level: AlertLevel, reading: Option<f64>) -> anyhow::Result<()> {
    let config = AlertConfig::from_file(&config_path)?;
    let manager = build_manager(&config)?;
    let reading = reading
        .or_else(|| config.thresholds.threshold(level))
        .unwrap_or(0.0);

    let dispatch = manager.force_test_alert(level, reading);
    if let Some(event) = dispatch.event() {
        println!("{}", event.message);
    }

    match &dispatch {
        Dispatch::Burst { .. } => {}
        Dispatch::Dropped { reason, .. } => println!("Not sent: {reason}"),
        _ => println!("Recorded only (NORMAL alerts are not sent to channels)"),
    }

    if let Some(report) = dispatch.wait().await {
        println!();
        for attempt in &report.attempts {
            for delivery in &attempt.deliveries {
                println!(
                    "  attempt {} {:<12} {} ({} ms)",
                    attempt.attempt,
                    delivery.channel,
                    delivery.outcome,
                    delivery.elapsed.as_millis()
                );
            }
        }
        println!();
        println!("Delivered: {}  Failed: {}", report.delivered(), report.failed());
    }

    Ok(())
}

async fn probe(config_path: PathBuf, timeout: u64) -> anyhow::Result<()> {
    let config = AlertConfig::from_file(&config_path)?;
    let manager = build_manager(&config)?;
    let results = manager.probe_channels(Duration::from_secs(timeout)).await;

    if results.is_empty() {
        println!("No channels configured");
        return Ok(());
    }

    println!("Channels:");
    for (name, available) in &results {
        let enabled = manager
            .registry()
            .get(name)
            .is_some_and(|c| c.settings().enabled);
        let state = if *available { "READY" } else { "NOT AVAILABLE" };
        let note = if enabled { "" } else { " (disabled)" };
        println!("  {name:<12} {state}{note}");
    }

    Ok(())
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    AlertConfig::sample().save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the channel settings, then run:");
    println!("  <reading source> | hydroguard run --config {}", output.display());

    Ok(())
}
