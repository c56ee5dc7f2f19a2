//! Command-line definitions for the `chatrelay` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Relay chat conversations to a backend over WebSocket or HTTP.
#[derive(Parser)]
#[command(name = "chatrelay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "chatrelay.toml", env = "CHATRELAY_CONFIG")]
    pub config: PathBuf,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the chat-facing bridge process.
    Bridge {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 3978)]
        port: u16,
    },

    /// Run the backend-facing broker process.
    Broker {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

impl Cli {
    /// Default tracing directive for the requested verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "info,chatrelay_core=debug,chatrelay_infra=debug,chatrelay=debug",
            _ => "trace",
        }
    }
}
