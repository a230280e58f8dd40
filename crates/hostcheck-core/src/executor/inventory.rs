//! Executor that dispatches each host by its inventory connection type.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CommandOutput, LocalExecutor, RemoteCommand, RemoteExecutor, SshExecutor};
use crate::error::{ConfigError, TransportError};
use crate::inventory::{Connection, Inventory};

/// Resolves groups from an [`Inventory`] and runs commands over ssh or
/// locally, per host.
pub struct InventoryExecutor {
    inventory: Arc<Inventory>,
    ssh: SshExecutor,
    local: LocalExecutor,
}

impl InventoryExecutor {
    pub fn new(inventory: Arc<Inventory>, ssh: SshExecutor) -> Self {
        Self {
            inventory,
            ssh,
            local: LocalExecutor::new(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for InventoryExecutor {
    async fn resolve(&self, group: &str) -> Result<Vec<String>, ConfigError> {
        self.inventory.resolve(group)
    }

    async fn run_command(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        let resolved = self
            .inventory
            .host(host)
            .ok_or_else(|| TransportError::UnknownHost {
                host: host.to_string(),
            })?;
        match resolved.connection {
            Connection::Ssh => self.ssh.run(host, &resolved.target, command).await,
            Connection::Local => self.local.run(host, command).await,
        }
    }

    /// Every command is its own process, so sessions never interleave.
    fn isolated_sessions(&self) -> bool {
        true
    }
}
