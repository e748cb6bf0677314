// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printwatch — network printer discovery
//
// Entry point. Initialises logging, runs one discovery cycle against the
// local network, and prints the merged destination list as JSON on stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use printwatch_core::config::DiscoveryConfig;
use printwatch_core::error::Result;
use printwatch_core::types::{BrowserEventKind, PrinterDestination};
use printwatch_discovery::{DiscoveryEngine, IppClient, MdnsDirectory};

#[derive(Parser, Debug)]
#[command(name = "printwatch")]
#[command(author, version, about = "Discover network printers and merge them with a local destination list", long_about = None)]
struct Cli {
    /// Discovery configuration (JSON).  Defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Locally configured destinations (JSON array) to merge with.
    #[arg(short, long)]
    local: Option<PathBuf>,

    /// Seconds to wait for discovery to settle.
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Also list IPP System objects themselves.
    #[arg(long)]
    include_systems: bool,

    /// Include per-browser status in the output.
    #[arg(long)]
    status: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "discovery failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DiscoveryConfig::load(path)?,
        None => DiscoveryConfig::default(),
    };
    if cli.include_systems {
        config.include_system_objects = true;
    }
    let local = match &cli.local {
        Some(path) => load_local(path)?,
        None => Vec::new(),
    };

    info!(types = config.service_types.len(), local = local.len(), "Printwatch starting");

    let directory = Arc::new(MdnsDirectory::new(config.all_for_now())?);
    let client = Arc::new(IppClient::from_config(&config));
    let mut engine = DiscoveryEngine::new(config, directory.clone(), client);

    let mut events = engine.events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.kind {
                    BrowserEventKind::Added => {
                        info!(name = %event.name, service_type = %event.announced_type, "announced")
                    }
                    BrowserEventKind::Removed => {
                        info!(name = %event.name, service_type = %event.announced_type, "withdrawn")
                    }
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let merged = engine
        .discover(&local, Duration::from_secs(cli.timeout))
        .await;
    let status = engine.status();

    engine.stop().await;
    event_log.abort();
    if let Err(e) = directory.shutdown() {
        warn!(error = %e, "mDNS daemon did not shut down cleanly");
    }

    let json = if cli.status {
        serde_json::to_string_pretty(&serde_json::json!({
            "destinations": merged,
            "browsers": status,
        }))?
    } else {
        serde_json::to_string_pretty(&merged)?
    };
    println!("{json}");
    Ok(())
}

/// Read a JSON array of destinations.
fn load_local(path: &Path) -> Result<Vec<PrinterDestination>> {
    let data = std::fs::read_to_string(path)?;
    let local: Vec<PrinterDestination> = serde_json::from_str(&data)?;
    info!(path = %path.display(), count = local.len(), "loaded local destinations");
    Ok(local)
}
