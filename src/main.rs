//! serial-updater - fetch the latest firmware release and flash it over serial
//!
//! The terminal front end drives the same operator actions a GUI would:
//! connect, refresh, flash. It prints the session log and progress as
//! events arrive.

mod cli;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cli::{log_filter, Cli, Commands};
use serial_updater_lib::status::SessionEvent;
use serial_updater_lib::{commands, serial, Collaborators, UpdaterConfig, UpdaterSession};
use tokio::sync::broadcast;
use tokio::time::timeout;

const PRINTER_DRAIN: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    if let Commands::Ports = cli.command {
        return list_ports();
    }

    let config = build_config(&cli)?;
    config.validate()?;

    let session = UpdaterSession::new(config.clone(), Collaborators::production(&config));
    let printer = tokio::spawn(print_events(session.reporter().subscribe()));

    let result = match cli.command {
        Commands::Check => commands::refresh_firmware(&session).await.map(|summary| {
            println!(
                "{} {} ({} bytes, sha256 {})",
                summary.release_tag.unwrap_or_default(),
                summary.asset_name,
                summary.size_bytes,
                summary.sha256
            );
        }),
        Commands::Flash { .. } => run_flash(&session).await,
        Commands::Monitor => run_monitor(&session).await,
        Commands::Ports => Ok(()),
    };

    session.shutdown().await;
    // Dropping the session closes the event stream; the printer exits once
    // it has shown everything still queued
    drop(session);
    if timeout(PRINTER_DRAIN, printer).await.is_err() {
        log::debug!("Event printer did not finish within {:?}", PRINTER_DRAIN);
    }

    result.map_err(anyhow::Error::msg)
}

fn build_config(cli: &Cli) -> anyhow::Result<UpdaterConfig> {
    let mut config = match &cli.config {
        Some(path) => UpdaterConfig::load(path)?,
        None => UpdaterConfig::default(),
    };

    if let Some(owner) = &cli.owner {
        config.repo_owner = owner.clone();
    }
    if let Some(repo) = &cli.repo {
        config.repo_name = repo.clone();
    }
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if cli.relay {
        config.use_relay = true;
    }
    if let Commands::Flash { offset: Some(offset) } = cli.command {
        config.flash_offset = offset;
    }
    Ok(config)
}

fn list_ports() -> anyhow::Result<()> {
    let ports = serial::discover_ports().context("Failed to list serial ports")?;
    if ports.is_empty() {
        println!("No USB serial ports found");
    }
    for port in ports {
        println!(
            "{}  {:04X}:{:04X}  {}{}",
            port.port_name,
            port.vid,
            port.pid,
            port.product.as_deref().unwrap_or("unknown device"),
            if port.known_bridge { "  (USB-UART bridge)" } else { "" }
        );
    }
    Ok(())
}

async fn run_flash(session: &UpdaterSession) -> Result<(), String> {
    session.initialize().await;
    commands::connect_device(session).await?;
    let report = commands::flash_device(session).await?;
    println!(
        "Flashed {} bytes in {:.1}s",
        report.bytes_written,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn run_monitor(session: &UpdaterSession) -> Result<(), String> {
    let port = commands::connect_device(session).await?;
    println!("Monitoring {} - press Ctrl-C to stop", port.port_name);
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
    commands::disconnect_device(session).await
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    let mut last_percent = None;
    loop {
        match events.recv().await {
            Ok(SessionEvent::Log(line)) => println!("{}", line),
            Ok(SessionEvent::FlashProgress(progress)) => {
                if last_percent != Some(progress.percent) {
                    last_percent = Some(progress.percent);
                    println!("Flashing... {}%", progress.percent);
                }
            }
            Ok(SessionEvent::Guidance(guidance)) => {
                println!("{}:", guidance.title());
                for step in guidance.steps() {
                    println!("  - {}", step);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Event printer skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
