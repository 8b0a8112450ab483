//! HiveHub - swarm coordination hub
//!
//! CLI entry point for running and supervising the hub.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{error, info, warn};

use hivehub::cli::{Cli, Command, ListenArgs, OutputFormat, get_log_path};
use hivehub::config::Config;
use hivehub::daemon::DaemonManager;
use hivehub::hub::Hub;
use hivehub::server;

/// Where tracing output goes
enum LogTarget {
    Stderr,
    File,
}

fn setup_logging(verbose: bool, target: LogTarget) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogTarget::File => {
            let log_path = get_log_path();
            if let Some(log_dir) = log_path.parent() {
                fs::create_dir_all(log_dir).context("Failed to create log directory")?;
            }
            let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

            tracing_subscriber::fmt()
                .with_writer(log_file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

/// Apply `--host`/`--port` on top of the loaded config
fn apply_listen_args(mut config: Config, listen: &ListenArgs) -> Config {
    if let Some(host) = &listen.host {
        config.server.host = host.clone();
    }
    if let Some(port) = listen.port {
        config.server.port = port;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = match cli.command {
        Some(Command::RunDaemon { .. }) => LogTarget::File,
        _ => LogTarget::Stderr,
    };
    setup_logging(cli.verbose, target).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::Serve { listen }) => run_hub(apply_listen_args(config, &listen)).await,
        Some(Command::Start { listen, force }) => {
            let forward = cli_forward_args(cli.config.as_ref(), cli.verbose, &listen);
            cmd_start(&forward, apply_listen_args(config, &listen), force)
        }
        Some(Command::Stop) => cmd_stop(),
        Some(Command::Status { format }) => cmd_status(format),
        Some(Command::RunDaemon { listen }) => cmd_run_daemon(apply_listen_args(config, &listen)).await,
        None => run_hub(config).await,
    }
}

/// Global flags and listen overrides to hand to `run-daemon`
fn cli_forward_args(config: Option<&PathBuf>, verbose: bool, listen: &ListenArgs) -> Vec<String> {
    let mut args = listen.to_args();
    if let Some(path) = config {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
        args.push("--config".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
    if verbose {
        args.push("--verbose".to_string());
    }
    args
}

/// Start the hub in the background
fn cmd_start(forward: &[String], config: Config, force: bool) -> Result<()> {
    config.validate()?;
    let daemon = DaemonManager::new();
    let addr = config.server.bind_addr();

    let pid = daemon.start(&addr, forward, force)?;
    println!("HiveHub started on {} (PID: {})", addr, pid);
    println!("Logs: {}", get_log_path().display());
    Ok(())
}

/// Stop the background hub
fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    let Some(pid) = daemon.running_pid() else {
        println!("HiveHub is not running");
        return Ok(());
    };

    daemon.stop()?;
    println!("HiveHub stopped (was PID: {})", pid);
    Ok(())
}

/// Show background hub status
fn cmd_status(format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            println!("HiveHub Status");
            println!("--------------");
            match status.pid {
                Some(pid) => {
                    println!("Status: {}", "running".green());
                    println!("PID: {}", pid);
                }
                None => println!("Status: {}", "stopped".red()),
            }
            println!("PID file: {}", status.pid_file.display());
        }
    }

    Ok(())
}

/// Run as the background hub process (internal command)
async fn cmd_run_daemon(config: Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;

    let result = run_hub(config).await;

    if let Err(e) = daemon.unregister_self() {
        warn!(error = %e, "Failed to remove PID file");
    }
    result
}

/// Run the hub until SIGINT/SIGTERM or a server failure
async fn run_hub(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    info!(
        addr = %config.server.bind_addr(),
        engine = %config.policy.program,
        timeout_ms = config.policy.timeout_ms,
        "HiveHub starting"
    );

    let hub = Hub::from_config(&config);
    let addr = config.server.bind_addr();
    let server_hub = hub.clone();
    let mut server = tokio::spawn(async move { server::serve(server_hub, &addr).await });

    let outcome = tokio::select! {
        result = &mut server => Some(result),
        signal = wait_for_shutdown_signal() => {
            if let Err(e) = signal {
                error!(error = %e, "Signal handling failed");
            }
            None
        }
    };

    info!("HiveHub shutting down...");
    hub.shutdown();

    let result = match outcome {
        Some(result) => result,
        None => server.await,
    };
    hub.close().await;

    result.context("Server task panicked")?
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}
