//! Remote executor interface and its process-backed implementations.
//!
//! The runner only sees [`RemoteExecutor`]: resolve a host group to host
//! names, then run one shell command on one host. Transport failures are
//! reported as [`TransportError`] and are kept apart from commands that ran
//! and exited non-zero.

mod inventory;
mod local;
mod ssh;

pub use inventory::InventoryExecutor;
pub use local::LocalExecutor;
pub use ssh::{SshExecutor, SshOptions, SshTarget};

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{ConfigError, TransportError};

/// Default transport-level timeout for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// What a command produced on the remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A fully rendered command ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub command: String,
    /// Run through `sudo -n`.
    pub sudo: bool,
    /// Transport timeout, distinct from the retry policy timeout.
    pub timeout: Duration,
}

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sudo: false,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The line handed to the remote shell.
    pub fn shell_line(&self) -> String {
        if self.sudo {
            format!("sudo -n sh -c {}", shell_quote(&self.command))
        } else {
            self.command.clone()
        }
    }
}

/// Runs read-only commands against inventory hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Resolve a host group to host names, in inventory order.
    async fn resolve(&self, group: &str) -> Result<Vec<String>, ConfigError>;

    /// Run one command on one host.
    async fn run_command(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError>;

    /// Whether concurrent commands against the same host group are isolated
    /// from each other. When `false` the runner serialises each group.
    fn isolated_sessions(&self) -> bool {
        false
    }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Spawn a local process and collect its output under a timeout.
pub(crate) async fn run_process(
    host: &str,
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, TransportError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TransportError::Spawn {
            host: host.to_string(),
            reason: format!("{program}: {e}"),
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| TransportError::Timeout {
            host: host.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::Spawn {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        exit_status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_and_special() {
        assert_eq!(shell_quote("br-int"), "br-int");
        assert_eq!(shell_quote("cidr=10.0.0.0/24"), "cidr=10.0.0.0/24");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_sudo_wraps_in_shell() {
        let cmd = RemoteCommand::new("ovs-vsctl br-exists br-int").with_sudo(true);
        assert_eq!(cmd.shell_line(), "sudo -n sh -c 'ovs-vsctl br-exists br-int'");

        let plain = RemoteCommand::new("hostname -s");
        assert_eq!(plain.shell_line(), "hostname -s");
    }

    #[tokio::test]
    async fn test_run_process_captures_output() {
        let out = run_process(
            "localhost",
            "sh",
            &["-c".to_string(), "echo hello; echo oops >&2; exit 3".to_string()],
            Duration::from_secs(10),
        )
        .await
        .expect("spawn failed");
        assert_eq!(out.exit_status, 3);
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_run_process_timeout_is_transport_error() {
        let err = run_process(
            "localhost",
            "sleep",
            &["5".to_string()],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_process_missing_program() {
        let err = run_process(
            "localhost",
            "definitely-not-a-real-binary-xyz",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
