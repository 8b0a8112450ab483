//! Daemon process management
//!
//! Handles PID file management, port checks, and background process control
//! for the hub.

use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL on stop
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_POLL_ATTEMPTS: u32 = 50;

/// Pause after force-killing a stale hub before the port is checked again
const FORCE_KILL_SETTLE: Duration = Duration::from_millis(500);

/// Default PID file location
fn default_pid_path() -> PathBuf {
    let path = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("hivehub")
        .join("hivehub.pid");
    debug!(?path, "default_pid_path: returning path");
    path
}

/// Whether something can bind `addr` right now
pub fn port_is_free(addr: &str) -> bool {
    let free = TcpListener::bind(addr).is_ok();
    debug!(addr, free, "port_is_free: checked");
    free
}

/// Background hub process manager
#[derive(Debug)]
pub struct DaemonManager {
    /// Path to the PID file
    pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    /// Create a new daemon manager with the default PID file location
    pub fn new() -> Self {
        Self {
            pid_file: default_pid_path(),
        }
    }

    /// Create a daemon manager with a custom PID file path
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        Self { pid_file }
    }

    /// Check if a hub started by this manager is running
    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Get the running hub's PID
    pub fn running_pid(&self) -> Option<u32> {
        let result = self.read_pid().filter(|&pid| is_process_running(pid));
        debug!(?result, "DaemonManager::running_pid: returning");
        result
    }

    /// Read the PID from the PID file
    fn read_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.pid_file).ok()?;
        let pid = contents.trim().parse().ok();
        debug!(?pid, ?self.pid_file, "DaemonManager::read_pid: returning");
        pid
    }

    /// Write the PID to the PID file
    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }

        let mut file = fs::File::create(&self.pid_file).context("Failed to create PID file")?;
        write!(file, "{}", pid).context("Failed to write PID")?;

        debug!(pid, path = ?self.pid_file, "Wrote PID file");
        Ok(())
    }

    /// Remove the PID file
    fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).context("Failed to remove PID file")?;
            debug!(path = ?self.pid_file, "Removed PID file");
        }
        Ok(())
    }

    /// Make sure `addr` can be bound before launching a hub on it
    ///
    /// With `force`, a hub this manager started is killed outright and the
    /// port is checked once more. A port held by anything else is an error.
    pub fn ensure_port_free(&self, addr: &str, force: bool) -> Result<()> {
        debug!(addr, force, "DaemonManager::ensure_port_free: called");
        if port_is_free(addr) {
            return Ok(());
        }

        match self.running_pid() {
            Some(pid) if force => {
                warn!(pid, addr, "Port held by previous hub, killing it");
                self.kill_hard(pid)?;
                if port_is_free(addr) {
                    Ok(())
                } else {
                    Err(eyre::eyre!("Port {} is still in use after stopping PID {}", addr, pid))
                }
            }
            Some(pid) => Err(eyre::eyre!(
                "Port {} is in use by running hub (PID {}); use --force to replace it",
                addr,
                pid
            )),
            None => Err(eyre::eyre!("Port {} is already in use by another process", addr)),
        }
    }

    /// Start the hub in the background
    ///
    /// Spawns `run-daemon` with `extra_args` and returns immediately.
    pub fn start(&self, addr: &str, extra_args: &[String], force: bool) -> Result<u32> {
        debug!(addr, ?extra_args, force, "DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            if !force {
                return Err(eyre::eyre!("Hub already running with PID {}", pid));
            }
            warn!(pid, "Replacing running hub");
            self.kill_hard(pid)?;
        }

        self.ensure_port_free(addr, force)?;

        info!(addr, "Starting hub...");
        let exe = std::env::current_exe().context("Failed to get current executable")?;

        let child = Command::new(&exe)
            .arg("run-daemon")
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn hub process")?;

        let pid = child.id();
        self.write_pid(pid)?;

        info!(pid, "Hub started");
        Ok(pid)
    }

    /// Stop the hub: SIGTERM, then SIGKILL if it does not exit in time
    pub fn stop(&self) -> Result<()> {
        let pid = self
            .running_pid()
            .ok_or_else(|| eyre::eyre!("Hub is not running"))?;

        info!(pid, "Stopping hub...");
        send_signal(pid, Termination::Graceful)?;

        let mut attempts = 0;
        while is_process_running(pid) && attempts < STOP_POLL_ATTEMPTS {
            std::thread::sleep(STOP_POLL_INTERVAL);
            attempts += 1;
        }
        debug!(attempts, "DaemonManager::stop: waited for process");

        if is_process_running(pid) {
            warn!(pid, "Hub did not stop gracefully, sending SIGKILL");
            let _ = send_signal(pid, Termination::Forced);
        }

        self.remove_pid_file()?;
        info!(pid, "Hub stopped");
        Ok(())
    }

    /// SIGKILL, give the OS a moment to release the socket, drop the PID file
    fn kill_hard(&self, pid: u32) -> Result<()> {
        send_signal(pid, Termination::Forced)?;
        std::thread::sleep(FORCE_KILL_SETTLE);
        self.remove_pid_file()
    }

    /// Register the current process as the hub
    ///
    /// Called by the `run-daemon` process at startup.
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        self.write_pid(pid)?;
        info!(pid, "Hub registered");
        Ok(())
    }

    /// Remove the PID file if it still names this process
    pub fn unregister_self(&self) -> Result<()> {
        if self.read_pid() == Some(std::process::id()) {
            self.remove_pid_file()?;
        }
        Ok(())
    }

    /// Get the PID file path
    pub fn pid_file(&self) -> &PathBuf {
        &self.pid_file
    }

    /// Get the hub status
    pub fn status(&self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.pid_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forced,
}

#[cfg(unix)]
fn send_signal(pid: u32, termination: Termination) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let signal = match termination {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    debug!(pid, ?signal, "send_signal: called");
    kill(Pid::from_raw(pid as i32), signal).context(format!("Failed to send {:?} to {}", signal, pid))
}

#[cfg(not(unix))]
fn send_signal(pid: u32, termination: Termination) -> Result<()> {
    Err(eyre::eyre!("Cannot signal PID {} ({:?}) on this platform", pid, termination))
}

/// Check if a process with the given PID is running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Sending signal 0 checks if the process exists without affecting it
        let result = kill(Pid::from_raw(pid as i32), None).is_ok();
        debug!(pid, result, "is_process_running: unix check");
        result
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Hub status information
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    /// Whether the hub is running
    pub running: bool,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// PID file path
    pub pid_file: PathBuf,
}
