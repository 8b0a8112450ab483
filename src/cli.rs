//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// HiveHub - swarm coordination hub
#[derive(Parser)]
#[command(
    name = "hivehub",
    about = "Real-time coordination hub for a swarm of collective members",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Daemon logs are written to: ~/.local/share/hivehub/logs/hivehub.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Listener overrides shared by every command that runs a hub
#[derive(Args, Clone, Debug, Default)]
pub struct ListenArgs {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ListenArgs {
    /// Arguments to forward to a spawned `run-daemon`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push("--host".to_string());
            args.push(host.clone());
        }
        if let Some(port) = self.port {
            args.push("--port".to_string());
            args.push(port.to_string());
        }
        args
    }
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the hub in the foreground
    Serve {
        #[command(flatten)]
        listen: ListenArgs,
    },

    /// Start the hub in the background
    Start {
        #[command(flatten)]
        listen: ListenArgs,

        /// Kill a previously started hub that holds the port
        #[arg(short, long)]
        force: bool,
    },

    /// Stop the background hub
    Stop,

    /// Show background hub status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Internal: Run as daemon process (used by `start`)
    #[command(hide = true)]
    RunDaemon {
        #[command(flatten)]
        listen: ListenArgs,
    },
}

/// Output format for the status command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Where the background hub writes its log
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hivehub")
        .join("logs")
        .join("hivehub.log")
}
