//! In-memory remote executor for tests.
//!
//! [`ScriptedExecutor`] answers commands from a list of rules matched by
//! command substring (and optionally host), and records every call so tests
//! can assert on what was sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, TransportError};
use crate::executor::{CommandOutput, RemoteCommand, RemoteExecutor};

/// Exit status returned for commands that match no rule.
pub const UNSCRIPTED_EXIT: i32 = 127;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct Response {
    result: Result<CommandOutput, TransportError>,
    delay: Option<Duration>,
}

impl Response {
    pub fn output(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            result: Ok(CommandOutput {
                exit_status,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }),
            delay: None,
        }
    }

    pub fn exit(exit_status: i32) -> Self {
        Self::output(exit_status, "", "")
    }

    /// Exit 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::output(0, stdout, "")
    }

    pub fn transport(error: TransportError) -> Self {
        Self {
            result: Err(error),
            delay: None,
        }
    }

    /// Reply only after `delay` has elapsed.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug)]
struct Rule {
    host: Option<String>,
    pattern: String,
    /// Replies in order; the last one repeats.
    responses: VecDeque<Response>,
}

/// A call received by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub host: String,
    pub command: String,
    pub sudo: bool,
}

/// Scripted [`RemoteExecutor`] with call recording.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    groups: HashMap<String, Vec<String>>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    isolated: bool,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group<I, S>(mut self, group: impl Into<String>, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(group.into(), hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Report isolated sessions so the runner overlaps checks in a group.
    pub fn with_isolation(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Reply to any command containing `pattern`.
    pub fn on(self, pattern: impl Into<String>, response: Response) -> Self {
        self.push(None, pattern.into(), vec![response])
    }

    /// Reply on `host` only, to commands containing `pattern`.
    pub fn on_host(self, host: impl Into<String>, pattern: impl Into<String>, response: Response) -> Self {
        self.push(Some(host.into()), pattern.into(), vec![response])
    }

    /// Reply with each of `responses` in turn, then keep repeating the last.
    pub fn on_sequence(self, pattern: impl Into<String>, responses: Vec<Response>) -> Self {
        self.push(None, pattern.into(), responses)
    }

    fn push(self, host: Option<String>, pattern: String, responses: Vec<Response>) -> Self {
        locked(&self.rules).push(Rule {
            host,
            pattern,
            responses: responses.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        locked(&self.calls).clone()
    }

    /// Number of calls whose command contains `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.command.contains(pattern))
            .count()
    }

    fn next_response(&self, host: &str, command: &str) -> Option<Response> {
        let mut rules = locked(&self.rules);
        let rule = rules.iter_mut().find(|r| {
            r.host.as_deref().map_or(true, |h| h == host) && command.contains(&r.pattern)
        })?;
        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn resolve(&self, group: &str) -> Result<Vec<String>, ConfigError> {
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| ConfigError::UnresolvedGroup {
                group: group.to_string(),
                reason: "not defined in the scripted executor".to_string(),
            })
    }

    async fn run_command(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        locked(&self.calls).push(RecordedCall {
            host: host.to_string(),
            command: command.command.clone(),
            sudo: command.sudo,
        });

        let response = self.next_response(host, &command.command).unwrap_or_else(|| {
            Response::output(
                UNSCRIPTED_EXIT,
                "",
                format!("no scripted response for `{}`", command.command),
            )
        });
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        response.result
    }

    fn isolated_sessions(&self) -> bool {
        self.isolated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_then_repeat_last() {
        let exec = ScriptedExecutor::new().on_sequence(
            "ovn-sbctl",
            vec![Response::exit(1), Response::exit(0)],
        );
        let cmd = RemoteCommand::new("ovn-sbctl show");
        let codes: Vec<i32> = futures::future::join_all(
            (0..3).map(|_| exec.run_command("central1", &cmd)),
        )
        .await
        .into_iter()
        .map(|r| r.unwrap().exit_status)
        .collect();
        assert_eq!(codes, vec![1, 0, 0]);
        assert_eq!(exec.call_count("ovn-sbctl"), 3);
    }

    #[tokio::test]
    async fn test_host_rule_and_unscripted() {
        let exec = ScriptedExecutor::new()
            .on_host("node2", "hostname", Response::ok("node2\n"))
            .on("hostname", Response::ok("other\n"));
        let cmd = RemoteCommand::new("hostname -s");
        assert_eq!(exec.run_command("node2", &cmd).await.unwrap().stdout, "node2\n");
        assert_eq!(exec.run_command("node1", &cmd).await.unwrap().stdout, "other\n");

        let out = exec
            .run_command("node1", &RemoteCommand::new("uptime"))
            .await
            .unwrap();
        assert_eq!(out.exit_status, UNSCRIPTED_EXIT);
    }

    #[tokio::test]
    async fn test_unknown_group_is_unresolved() {
        let exec = ScriptedExecutor::new().with_group("nodes", ["node1"]);
        assert_eq!(exec.resolve("nodes").await.unwrap(), vec!["node1"]);
        assert!(matches!(
            exec.resolve("central").await,
            Err(ConfigError::UnresolvedGroup { .. })
        ));
    }
}
