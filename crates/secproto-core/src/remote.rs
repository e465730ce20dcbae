//! Remote collaborators
//!
//! The orchestrator never talks to a host directly. It goes through these
//! traits:
//! - [`ChannelConnector`] / [`CommandChannel`]: shell access to one host
//! - [`ProtocolProbe`]: handshake scan of a TCP port
//! - [`ServiceManager`]: higher-privilege service control (remote access toggle)
//! - [`Inventory`]: management endpoint login and host lookup
//!
//! The process-control helpers at the bottom build the generic restart and
//! the stop/wait/start cycle on top of [`CommandChannel`].

use crate::error::{ChannelError, ReconfigError};
use crate::host::{Credentials, HostRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Captured output of a synchronous command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output with an error message
    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// A command succeeded when it wrote nothing to stderr
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.stderr.trim().is_empty()
    }
}

/// Run state of a process or host service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Stopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Shell channel to one host
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run a command and wait for its output
    async fn run_sync(&self, command: &str) -> Result<CommandOutput, ChannelError>;

    /// Start a command without waiting for it
    async fn run_async(&self, command: &str) -> Result<(), ChannelError>;

    /// Wait until `process` reaches `state`; false on timeout
    async fn wait_for_process(
        &self,
        process: &str,
        state: ProcessState,
        timeout: Duration,
    ) -> Result<bool, ChannelError>;

    /// Copy a file on the host; false if the copy did not happen
    async fn copy_file(&self, source: &str, destination: &str) -> Result<bool, ChannelError>;

    /// Whether a file exists on the host
    async fn file_exists(&self, path: &str) -> Result<bool, ChannelError>;

    /// Release the channel
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens command channels
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn CommandChannel>, ChannelError>;
}

/// Reports which protocol versions a TLS endpoint accepts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolProbe: Send + Sync {
    /// Labels such as `SSLv3` or `TLSv1.0`
    async fn scan_port(&self, address: &str, port: u16) -> Result<Vec<String>, ChannelError>;
}

/// Host service control through the management plane
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn service_state(&self, host: &HostRef, key: &str) -> Result<ProcessState, ChannelError>;
    async fn start_service(&self, host: &HostRef, key: &str) -> Result<(), ChannelError>;
    async fn stop_service(&self, host: &HostRef, key: &str) -> Result<(), ChannelError>;
}

/// Logged-in inventory session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySession {
    pub endpoint: String,
    pub token: String,
}

/// Management endpoint that knows which hosts exist
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn login(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<InventorySession, ChannelError>;

    async fn list_connected_hosts(
        &self,
        session: &InventorySession,
    ) -> Result<Vec<HostRef>, ChannelError>;

    async fn resolve_host(
        &self,
        session: &InventorySession,
        name: &str,
    ) -> Result<Option<HostRef>, ChannelError>;
}

/// Collaborators shared by every host run
#[derive(Clone)]
pub struct Backends {
    pub connector: Arc<dyn ChannelConnector>,
    pub probe: Arc<dyn ProtocolProbe>,
    pub service_manager: Arc<dyn ServiceManager>,
}

impl Backends {
    #[must_use]
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        probe: Arc<dyn ProtocolProbe>,
        service_manager: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            connector,
            probe,
            service_manager,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Run a command; stderr output turns into `CommandFailed`
///
/// # Errors
/// `Connectivity` if the channel fails, `CommandFailed` if stderr is not empty
pub async fn run_checked(
    channel: &dyn CommandChannel,
    command: &str,
) -> Result<CommandOutput, ReconfigError> {
    tracing::debug!(command, "running remote command");
    let output = channel.run_sync(command).await?;
    if output.succeeded() {
        Ok(output)
    } else {
        Err(ReconfigError::CommandFailed {
            command: command.to_string(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Generic restart through the init script, then wait for Running
///
/// # Errors
/// `CommandFailed` or `ProcessControl` when the process does not come back
pub async fn restart_process(
    channel: &dyn CommandChannel,
    script: &str,
    timeout: Duration,
) -> Result<(), ReconfigError> {
    tracing::info!(process = script, "restarting");
    run_checked(channel, &format!("{script} restart")).await?;
    expect_state(channel, script, ProcessState::Running, timeout).await
}

/// Stop, wait for Stopped, start, wait for Running.
///
/// Used for processes without a usable restart primitive.
///
/// # Errors
/// `ProcessControl` when either wait times out
pub async fn cycle_process(
    channel: &dyn CommandChannel,
    script: &str,
    timeout: Duration,
) -> Result<(), ReconfigError> {
    tracing::info!(process = script, "stopping and starting");
    channel.run_async(&format!("{script} stop")).await?;
    expect_state(channel, script, ProcessState::Stopped, timeout).await?;
    channel.run_async(&format!("{script} start")).await?;
    expect_state(channel, script, ProcessState::Running, timeout).await
}

/// Query the init script status
///
/// # Errors
/// `Connectivity` if the channel fails
pub async fn process_running(
    channel: &dyn CommandChannel,
    script: &str,
) -> Result<bool, ReconfigError> {
    let output = channel.run_sync(&format!("{script} status")).await?;
    let stdout = output.stdout.to_ascii_lowercase();
    Ok(output.succeeded() && stdout.contains("is running") && !stdout.contains("not running"))
}

/// Start a process and wait for Running
///
/// # Errors
/// `CommandFailed` or `ProcessControl`
pub async fn start_process(
    channel: &dyn CommandChannel,
    script: &str,
    timeout: Duration,
) -> Result<(), ReconfigError> {
    run_checked(channel, &format!("{script} start")).await?;
    expect_state(channel, script, ProcessState::Running, timeout).await
}

async fn expect_state(
    channel: &dyn CommandChannel,
    script: &str,
    state: ProcessState,
    timeout: Duration,
) -> Result<(), ReconfigError> {
    if channel.wait_for_process(script, state, timeout).await? {
        Ok(())
    } else {
        Err(ReconfigError::ProcessControl {
            process: script.to_string(),
            state: state.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_marks_failure() {
        assert!(CommandOutput::ok("done").succeeded());
        assert!(CommandOutput::ok("").succeeded());
        assert!(!CommandOutput::failed("no such file").succeeded());
        assert!(CommandOutput::failed("  \n").succeeded());
    }

    #[test]
    fn process_state_display() {
        assert_eq!(ProcessState::Running.to_string(), "running");
        assert_eq!(ProcessState::Stopped.to_string(), "stopped");
    }
}
