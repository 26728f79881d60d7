//! Clap derive structures for the `mistex` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "mistex",
    version,
    about = "Prometheus exporter for Juniper Mist organizations",
    long_about = "Exports device, radio and client statistics of every site in a Mist\n\
        organization. Live stats arrive over the Mist websocket stream API;\n\
        organization counters and point-in-time stats are fetched on each scrape."
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short = 'c', env = "MISTEX_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Enable debug logging (same as -v)
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, env = "MISTEX_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Validate the configuration, print it with secrets masked, and exit
    #[arg(long)]
    pub check_config: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Default log directive when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match (self.debug, self.verbose) {
            (false, 0) => "info",
            (true, 0 | 1) | (false, 1) => "debug",
            _ => "trace",
        }
    }
}
