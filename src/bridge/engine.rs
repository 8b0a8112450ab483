//! Policy engine invocation
//!
//! A [`PolicyEngine`] turns one JSON input document into one finished process
//! run. [`ProcessPolicyEngine`] spawns a fresh child per call.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::PolicyConfig;

use super::error::PolicyError;

/// Raw result of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl PolicyOutput {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// Builder: attach diagnostic output
    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Something that can decide a task from a serialized request
///
/// Dropping the returned future must stop any work it started.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Feed `input` to the engine and wait for it to finish
    async fn invoke(&self, input: Vec<u8>) -> Result<PolicyOutput, PolicyError>;
}

/// Runs the policy engine as a one-shot child process
#[derive(Debug, Clone)]
pub struct ProcessPolicyEngine {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessPolicyEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Builder: run the engine from `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        let engine = Self::new(config.program.clone(), config.args.clone());
        match &config.working_dir {
            Some(dir) => engine.with_working_dir(dir),
            None => engine,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl PolicyEngine for ProcessPolicyEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn invoke(&self, input: Vec<u8>) -> Result<PolicyOutput, PolicyError> {
        debug!(program = %self.program, input_len = input.len(), "ProcessPolicyEngine::invoke: spawning");
        let mut child = self.command().spawn().map_err(PolicyError::Spawn)?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&input).await {
                    // Engine exited without reading; its exit status tells the story
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok::<(), std::io::Error>(())
        };

        // Feed stdin while draining stdout/stderr so neither side can block the other
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        debug!(status = ?output.status, stdout_len = output.stdout.len(), stderr_len = output.stderr.len(), "ProcessPolicyEngine::invoke: finished");
        Ok(PolicyOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
