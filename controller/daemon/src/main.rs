//! Infopanel Daemon
//!
//! Binary entry point for the display controller:
//! - Loads the TOML configuration
//! - Builds the e-paper transition engine over its display finalizer
//! - Builds the LCD engine with the clock and progress apps and wires it
//!   to the e-paper lifecycle
//! - Dispatches transitions typed on stdin (standing in for the hardware
//!   buttons) with the same busy and feasibility checks the button
//!   handler applies
//! - Shuts down on Ctrl-C
//!
//! Without real drivers the daemon runs against simulated panels, so the
//! whole controller can be exercised on a development host.

mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use infopanel_core::{
    config, wiring, ClockApp, ControllerConfig, DisplayFinalizer, DisplayOptions, DisplayPanel,
    MachineConfig, PanelAppSwitcher, ProgressApp, TransitionArgs, TransitionEngine,
    TransitionTable,
};

use sim::{ConsoleLcd, SimulatedEpaper};

#[derive(Debug, Parser)]
#[command(name = "infopaneld", about = "Infopanel display controller daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(long, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long, env = config::DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Simulated e-paper refresh time in seconds
    #[arg(long, default_value_t = 2.0)]
    refresh_secs: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(config::default_config_path)
        .context("no config file given and no default location available")?;
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("loading {config_path:?}"))?;
    cfg.apply_env_overrides();
    if let Some(dir) = args.data_dir {
        cfg.general.data_dir = dir;
    }
    info!(config = ?config_path, data_dir = ?cfg.general.data_dir, "starting");

    let epaper_table = TransitionTable::from_specs(&cfg.epaper.transitions)?;
    ensure_sim_artifacts(&cfg, &epaper_table).await?;

    let refresh = Duration::from_secs_f64(args.refresh_secs);
    let panel = Arc::new(SimulatedEpaper::new(refresh));
    let finalizer = Arc::new(DisplayFinalizer::new(panel.clone(), display_options(&cfg)));
    let epaper = TransitionEngine::new("epaper", epaper_table, finalizer.clone());

    let _wiring = match &cfg.textlcd {
        Some(lcd_cfg) => Some(start_lcd(&epaper, lcd_cfg).await?),
        None => None,
    };

    epaper.init().await.context("initial e-paper transition")?;

    tokio::select! {
        result = dispatch_stdin(&epaper, &finalizer) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    // Leave the panel blank and asleep rather than frozen on the last page.
    if let Err(e) = panel.clear().await {
        warn!(err = %e, "shutdown clear failed");
    }
    if let Err(e) = panel.sleep().await {
        warn!(err = %e, "shutdown sleep failed");
    }
    Ok(())
}

fn display_options(cfg: &ControllerConfig) -> DisplayOptions {
    DisplayOptions {
        retries: cfg.epaper.retries.num,
        retry_delay: cfg.epaper.retries.delay(),
        cooldown: cfg.epaper.cooldown(),
        ..DisplayOptions::new(cfg.general.data_dir.clone())
    }
}

/// Build the LCD engine with the stock apps and hook it to the e-paper
/// lifecycle
async fn start_lcd(
    epaper: &TransitionEngine,
    lcd_cfg: &MachineConfig,
) -> Result<tokio::task::JoinHandle<()>> {
    let panel = Arc::new(ConsoleLcd::new());
    let progress = Arc::new(ProgressApp::new(panel.clone()));
    let switcher = PanelAppSwitcher::new()
        .with_app(wiring::SHOW_DATETIME, Arc::new(ClockApp::new(panel)))
        .with_app(wiring::SHOW_PROGRESS, progress.clone());

    let table = TransitionTable::from_specs(&lcd_cfg.transitions)?;
    let lcd = TransitionEngine::new("textlcd", table, Arc::new(switcher));
    lcd.init().await.context("initial lcd transition")?;
    Ok(wiring::follow_epaper(epaper, lcd, progress))
}

/// The renderer normally produces the artifacts; in simulation, seed
/// placeholder PNGs so every configured state is writable
async fn ensure_sim_artifacts(cfg: &ControllerConfig, table: &TransitionTable) -> Result<()> {
    const PNG_STUB: [u8; 12] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 0];

    let dir = &cfg.general.data_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating data dir {dir:?}"))?;
    for state in table.states() {
        for path in [
            infopanel_core::display::artifacts::black_path(dir, &state),
            infopanel_core::display::artifacts::red_path(dir, &state),
        ] {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            tokio::fs::write(&path, PNG_STUB)
                .await
                .with_context(|| format!("seeding artifact {path:?}"))?;
        }
    }
    Ok(())
}

/// Read transition names from stdin and activate them, with the same
/// guards a hardware button handler uses: drop input while the display is
/// busy, and check feasibility before activating.
///
/// A line is `<name>` or `<name> <duration-secs>`; `state` and
/// `transitions` inspect the engine, `quit` exits.
async fn dispatch_stdin(epaper: &TransitionEngine, finalizer: &DisplayFinalizer) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("ready; type a transition name (or 'transitions', 'state', 'quit')");

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        match name {
            "quit" | "exit" => break,
            "state" => {
                info!(state = ?epaper.state(), "current state");
                continue;
            }
            "transitions" => {
                let names: Vec<_> = epaper
                    .available_transitions()
                    .into_iter()
                    .filter_map(|t| t.name)
                    .collect();
                info!(?names, "available transitions");
                continue;
            }
            _ => {}
        }

        if finalizer.busy() {
            warn!(transition = name, "display busy, input dropped");
            continue;
        }
        let feasible = epaper
            .available_transitions()
            .iter()
            .any(|t| t.name.as_deref() == Some(name));
        if !feasible {
            warn!(transition = name, state = ?epaper.state(), "not available here");
            continue;
        }

        let mut overrides = TransitionArgs::new();
        if let Some(secs) = parts.next() {
            match secs.parse::<f64>() {
                Ok(secs) => overrides = overrides.with("duration", secs),
                Err(_) => {
                    warn!(argument = secs, "duration is not a number, ignoring line");
                    continue;
                }
            }
        }

        if let Err(e) = epaper.activate(Some(name), overrides).await {
            warn!(transition = name, err = %e, "activation failed");
        }
    }
    Ok(())
}
