//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// env_logger filter for the `-v` count
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

#[derive(Parser)]
#[command(name = "serial-updater")]
#[command(author, version, about = "Download and flash the latest firmware over serial", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Release feed owner (GitHub user or organisation)
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Release feed repository
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// Serial port to use instead of prompting
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate for monitoring and flashing
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Download the binary through the relay
    #[arg(long, global = true)]
    pub relay: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List USB serial ports
    Ports,

    /// Show the latest release and download its firmware binary
    Check,

    /// Download the latest firmware and flash it
    Flash {
        /// Flash offset (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        offset: Option<u32>,
    },

    /// Connect and watch the port until Ctrl-C
    Monitor,
}
