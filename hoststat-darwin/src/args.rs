//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;
use hoststat_common::Format;

use crate::config::HoststatConfig;

/// Command-line arguments of the `hoststat` binary.
#[derive(Parser, Debug, Clone)]
#[command(about = "Print one host telemetry snapshot")]
pub struct HoststatArgs {
    /// Path to configuration file (JSON5). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override output format (json, cbor).
    #[arg(short, long)]
    pub format: Option<Format>,

    /// Pretty-print JSON output.
    #[arg(long)]
    pub pretty: bool,
}

impl HoststatArgs {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut HoststatConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if self.pretty {
            config.output.pretty = true;
        }
    }
}
