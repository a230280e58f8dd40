//! Executor that runs commands on the controller itself.

use async_trait::async_trait;

use super::{run_process, CommandOutput, RemoteCommand, RemoteExecutor};
use crate::error::{ConfigError, TransportError};

/// Runs commands through `sh -c` on the local machine.
///
/// As a standalone [`RemoteExecutor`] every host group resolves to the
/// single host `localhost`.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: String,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        let args = vec!["-c".to_string(), command.shell_line()];
        run_process(host, &self.shell, &args, command.timeout).await
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn resolve(&self, _group: &str) -> Result<Vec<String>, ConfigError> {
        Ok(vec!["localhost".to_string()])
    }

    async fn run_command(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        self.run(host, command).await
    }

    fn isolated_sessions(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_echo() {
        let exec = LocalExecutor::new();
        let out = exec
            .run_command("localhost", &RemoteCommand::new("echo hello"))
            .await
            .expect("run failed");
        assert_eq!(out.exit_status, 0);
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_local_failing_command_is_not_transport_error() {
        let exec = LocalExecutor::new();
        let out = exec
            .run_command("localhost", &RemoteCommand::new("false"))
            .await
            .expect("run failed");
        assert_ne!(out.exit_status, 0);
    }

    #[tokio::test]
    async fn test_every_group_resolves_to_localhost() {
        let exec = LocalExecutor::new();
        assert_eq!(exec.resolve("ovn_nodes").await.unwrap(), vec!["localhost"]);
    }
}
