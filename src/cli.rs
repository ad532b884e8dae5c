//! Command-line interface for botvisor.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::{DEFAULT_CONFIG_FILE, DEFAULT_LOG_TAIL};

/// Log level accepted by `--log-level`: a `tracing` level name or 0-5.
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        // `LevelFilter` reads an empty string as ERROR.
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }
        trimmed
            .parse::<LevelFilter>()
            .map(LogLevelArg)
            .map_err(|err| format!("invalid log level '{trimmed}': {err}"))
    }
}

/// Command-line interface for botvisor.
#[derive(Parser)]
#[command(name = "botvisor", version, author)]
#[command(about = "Supervises a locally hosted chat bot process", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only
    /// (off, error, warn, info, debug, trace, or 0-5).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Control socket to bind (serve) or connect to (every other command).
    #[arg(long, value_name = "PATH", global = true)]
    pub socket: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for botvisor.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the resident server that owns the bot process.
    Serve {
        /// Path to the configuration file (defaults to `botvisor.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },

    /// Start the bot.
    Start,

    /// Stop the bot, escalating to SIGKILL after the stop timeout.
    Stop,

    /// Stop the bot, wait for the restart delay, and start it again.
    Restart,

    /// Show whether the bot is online, starting or offline.
    Status {
        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent captured output lines.
    Logs {
        /// Number of lines to show.
        #[arg(short, long, default_value_t = DEFAULT_LOG_TAIL)]
        lines: usize,
    },

    /// Stop the bot and terminate the resident server.
    Shutdown,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
