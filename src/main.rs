// SPDX-License-Identifier: GPL-3.0-only
//! `displayctl`: command-line front end of the display configuration engine

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use display_topology_control::monitor::{DisplayInfo, DisplayManager, DisplayMode, Orientation};
use display_topology_control::native::{self, DisplayConfigApi, simulated::SimulatedDisplayApi};
use display_topology_control::{EnableOutcome, EngineConfig};

#[macro_use]
extern crate tracing;

#[derive(Parser)]
#[command(name = "displayctl", version, about = "Inspect and change the multi-monitor layout")]
struct Cli {
    /// Run against an in-memory two-display rig instead of the real session
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List every display, enabled or not
    List {
        #[arg(long)]
        json: bool,
    },
    /// List the modes a display supports, grouped by resolution
    Modes { id: String },
    /// Change resolution, refresh rate and orientation
    Apply {
        id: String,
        /// WIDTHxHEIGHT@HZ, e.g. 2560x1440@144
        mode: DisplayMode,
        #[arg(long, default_value = "landscape")]
        orientation: Orientation,
    },
    Enable { id: String },
    Disable { id: String },
    /// Make a display the primary one
    Primary { id: String },
    /// Try a mode for a while, then revert to the current one
    Test {
        id: String,
        mode: DisplayMode,
        #[arg(long, default_value = "landscape")]
        orientation: Orientation,
        /// Defaults to the configured test duration
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Show the cached pre-disable state of every display
    Cache,
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=info",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

fn print_display(display: &DisplayInfo) {
    let mode = display
        .current_mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "off".to_string());
    let mut flags = Vec::new();
    if display.is_primary {
        flags.push("primary");
    }
    if !display.is_enabled {
        flags.push("disabled");
    }
    println!(
        "{:<12} {:<24} {:<16} {:>6},{:<6} {:<18} {}",
        display.id,
        display.name,
        mode,
        display.position.x,
        display.position.y,
        display.orientation,
        flags.join(" ")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logs();
    let cli = Cli::parse();

    let config = EngineConfig::load();
    let api: Arc<dyn DisplayConfigApi> = if cli.simulate {
        Arc::new(SimulatedDisplayApi::two_display_rig())
    } else {
        native::platform_api().context("failed to open the native display interface")?
    };
    let manager = DisplayManager::new(api, config);

    match cli.command {
        Cmd::List { json } => {
            let displays = manager.enumerate().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&displays)?);
            } else if displays.is_empty() {
                println!("No displays found");
            } else {
                displays.iter().for_each(print_display);
            }
        }
        Cmd::Modes { id } => {
            let modes = manager.list_modes(&id).await?;
            for group in display_topology_control::monitor::modes::resolution_groups(&modes) {
                let rates: Vec<String> = group.refresh_rates.iter().map(|r| format!("{r}Hz")).collect();
                println!("{}x{}: {}", group.width, group.height, rates.join(", "));
            }
        }
        Cmd::Apply {
            id,
            mode,
            orientation,
        } => {
            let outcome = manager.apply_mode(&id, mode, orientation).await?;
            println!("{id}: {mode} ({orientation}) {outcome:?}");
        }
        Cmd::Enable { id } => {
            let outcome = manager.set_enabled(&id, true).await?;
            report(&id, &outcome);
        }
        Cmd::Disable { id } => {
            let outcome = manager.set_enabled(&id, false).await?;
            report(&id, &outcome);
        }
        Cmd::Primary { id } => {
            manager.set_primary(&id).await?;
            println!("{id} is now the primary display");
        }
        Cmd::Test {
            id,
            mode,
            orientation,
            seconds,
        } => {
            let seconds = seconds.unwrap_or(manager.config().test_mode_seconds);
            if seconds == 0 {
                bail!("test duration must be at least one second");
            }
            println!("Testing {mode} on {id} for {seconds}s...");
            let handle = manager.test_mode(
                &id,
                mode,
                orientation,
                Duration::from_secs(seconds),
                |result| {
                    if let Err(e) = result {
                        error!("Test mode failed: {}", e);
                    }
                },
            );
            let outcome = handle.wait().await?;
            println!("{id}: reverted ({outcome:?})");
        }
        Cmd::Cache => {
            let entries = manager.cached_states();
            if entries.is_empty() {
                println!("No cached display state");
            }
            for entry in entries {
                println!(
                    "{:<12} {:<16} {:>6},{:<6} {:<18} {}{}",
                    entry.id,
                    entry.resolution.to_string(),
                    entry.position.x,
                    entry.position.y,
                    entry.orientation,
                    entry.saved_at,
                    if entry.is_primary { " primary" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn report(id: &str, outcome: &EnableOutcome) {
    match outcome {
        EnableOutcome::Enabled { strategy } => println!("{id}: enabled via {strategy}"),
        EnableOutcome::AlreadyEnabled => println!("{id}: already enabled"),
        EnableOutcome::Disabled { strategy } => println!("{id}: disabled via {strategy}"),
        EnableOutcome::AlreadyDisabled => println!("{id}: already disabled"),
        EnableOutcome::DisableDeclined { attempts } => {
            println!("{id}: the platform refused to disable it");
            for attempt in attempts {
                println!("  {}: {}", attempt.strategy, attempt.error);
            }
        }
    }
}
