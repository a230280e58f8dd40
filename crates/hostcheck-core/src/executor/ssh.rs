//! Executor backed by the system OpenSSH client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{run_process, CommandOutput, RemoteCommand};
use crate::error::TransportError;

/// Exit status OpenSSH reserves for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Client-wide ssh settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// Path or name of the ssh binary.
    pub program: String,
    pub connect_timeout: Duration,
    /// Value for `StrictHostKeyChecking`.
    pub host_key_checking: String,
    /// Extra arguments inserted before the destination.
    pub extra_args: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
            host_key_checking: "accept-new".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
}

/// Runs each command in a fresh non-interactive `ssh` process.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Arguments for one invocation.
    pub fn args(&self, target: &SshTarget, command: &RemoteCommand) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.options.host_key_checking),
        ];
        if let Some(port) = target.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(user) = &target.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.extend(self.options.extra_args.iter().cloned());
        args.push(target.address.clone());
        args.push("--".to_string());
        args.push(command.shell_line());
        args
    }

    pub async fn run(
        &self,
        host: &str,
        target: &SshTarget,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        let args = self.args(target, command);
        debug!(host = %host, address = %target.address, "ssh exec");
        let output = run_process(host, &self.options.program, &args, command.timeout).await?;
        classify(host, output)
    }
}

/// Split ssh's own failures from the remote command's exit status.
fn classify(host: &str, output: CommandOutput) -> Result<CommandOutput, TransportError> {
    if output.exit_status != SSH_TRANSPORT_EXIT {
        return Ok(output);
    }
    let reason = output.stderr.trim().to_string();
    if reason.contains("Permission denied") || reason.contains("Host key verification failed") {
        Err(TransportError::Authentication {
            host: host.to_string(),
            reason,
        })
    } else if reason.is_empty() {
        // The remote command itself may exit 255 without ssh complaining.
        Ok(output)
    } else {
        Err(TransportError::Unreachable {
            host: host.to_string(),
            reason,
        })
    }
}
