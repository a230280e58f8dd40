//! Check execution: preconditions, retries, deadlines and cancellation.
//!
//! Every concrete check runs once per host of its group. Checks of one group
//! run in registration order; with an executor that isolates sessions, up to
//! `max_in_flight` of them may overlap, still reported in order. Groups run
//! concurrently. A failing check never stops its siblings.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, instrument, Instrument};

use crate::check::Check;
use crate::error::{ConfigError, ConfigResult};
use crate::executor::{RemoteCommand, RemoteExecutor, DEFAULT_COMMAND_TIMEOUT};
use crate::expect::Verdict;
use crate::obs;
use crate::registry::Registry;
use crate::report::{CheckReport, ExecutionResult, Outcome, RunReport};
use crate::retry::RetryPolicy;
use crate::template::RuntimeVars;

/// Error reason recorded for checks stopped by cancellation.
pub const CANCELLED: &str = "cancelled";

/// Default number of overlapping checks within one isolated group.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Runs a [`Registry`] against a [`RemoteExecutor`].
#[derive(Clone)]
pub struct Runner {
    executor: Arc<dyn RemoteExecutor>,
    retry: RetryPolicy,
    command_timeout: Duration,
    run_timeout: Option<Duration>,
    cancel: Option<watch::Receiver<bool>>,
    max_in_flight: usize,
}

impl Runner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, retry: RetryPolicy) -> Self {
        Self {
            executor,
            retry,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            run_timeout: None,
            cancel: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Transport timeout for each command sent.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Wall-clock limit for the whole run. Checks still pending when it
    /// expires are reported as `Error("cancelled")`.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Cancel the run when `true` is sent on this channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Execute every check of `registry` and assemble the report.
    ///
    /// Host groups are resolved before any command is sent; a group that
    /// cannot be resolved aborts the run with a [`ConfigError`].
    pub async fn run(&self, registry: &Registry) -> ConfigResult<RunReport> {
        let report = RunReport::new(registry.digest());
        let span = obs::run_span(&report.run_id);
        self.execute(registry, report).instrument(span).await
    }

    async fn execute(&self, registry: &Registry, mut report: RunReport) -> ConfigResult<RunReport> {
        let started = Instant::now();

        let groups = registry.groups();
        let mut hosts: HashMap<&str, Vec<String>> = HashMap::new();
        for group in &groups {
            let resolved = self.executor.resolve(group).await?;
            if resolved.is_empty() {
                return Err(ConfigError::EmptyGroup {
                    group: group.to_string(),
                });
            }
            debug!(group = %group, hosts = resolved.len(), "resolved host group");
            hosts.insert(*group, resolved);
        }

        obs::emit_run_started(&report.run_id, &report.registry_digest, registry.len(), groups.len());

        let already = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let (cancel_tx, cancel_rx) = watch::channel(already);
        let watcher = tokio::spawn(watch_cancellation(
            cancel_tx,
            self.run_timeout,
            self.cancel.clone(),
        ));

        let width = if self.executor.isolated_sessions() {
            self.max_in_flight
        } else {
            1
        };

        let group_runs = groups.iter().map(|group| {
            let group_hosts = hosts.get(group).cloned().unwrap_or_default();
            let units: Vec<(usize, usize, Arc<Check>)> = registry
                .checks()
                .iter()
                .enumerate()
                .filter(|(_, check)| check.group == *group)
                .flat_map(|(ci, check)| {
                    (0..group_hosts.len()).map(move |hi| (ci, hi, Arc::clone(check)))
                })
                .collect();
            let cancel = cancel_rx.clone();
            let group_hosts = Arc::new(group_hosts);

            stream::iter(units)
                .map(move |(ci, hi, check)| {
                    let cancel = cancel.clone();
                    let hosts = Arc::clone(&group_hosts);
                    async move {
                        let entry = self.run_on_host(&check, &hosts[hi], cancel).await;
                        (ci, hi, entry)
                    }
                })
                .buffered(width)
                .collect::<Vec<_>>()
        });

        let mut entries: Vec<(usize, usize, CheckReport)> =
            join_all(group_runs).await.into_iter().flatten().collect();
        watcher.abort();

        entries.sort_by_key(|(ci, hi, _)| (*ci, *hi));
        for (_, _, entry) in entries {
            report.record(entry);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        let cancelled = report
            .entries
            .iter()
            .filter(|e| matches!(&e.outcome, Outcome::Error { reason } if reason == CANCELLED))
            .count();
        if cancelled > 0 {
            obs::emit_run_cancelled(&report.run_id, cancelled);
        }
        let summary = report.summary();
        obs::emit_run_finished(
            &report.run_id,
            report.duration_ms,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.errored,
        );
        Ok(report)
    }

    /// Run one concrete check on one host to a final outcome.
    #[instrument(skip(self, check, cancel), fields(check_id = %check.id))]
    async fn run_on_host(
        &self,
        check: &Check,
        host: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> CheckReport {
        let started = Instant::now();
        let policy = match &check.retry {
            Some(over) => over.apply(&self.retry),
            None => self.retry.clone(),
        };
        let policy = &policy;
        let vars = RuntimeVars::new(host, check.group.as_str());
        let mut trace = Trace::default();

        let finish = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Finish::Cancelled,
            res = tokio::time::timeout(policy.timeout(), self.attempt(check, host, &vars, policy, &mut trace)) => {
                match res {
                    Ok(outcome) => Finish::Done(outcome),
                    Err(_) => Finish::TimedOut,
                }
            }
        };

        let outcome = match finish {
            Finish::Done(outcome) => outcome,
            Finish::Cancelled => Outcome::Error {
                reason: CANCELLED.to_string(),
            },
            Finish::TimedOut => match trace.last_verdict.take() {
                Some(verdict) => Outcome::Fail { verdict },
                None => Outcome::Error {
                    reason: format!("timed out after {} ms", policy.timeout_ms),
                },
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let entry = CheckReport::new(
            check.id.clone(),
            check.name.clone(),
            check.group.clone(),
            host.to_string(),
            check.params.clone(),
            outcome,
            trace.precondition,
            trace.history,
            duration_ms,
        );
        obs::emit_check_finished(
            check.id.as_str(),
            host,
            entry.outcome.label(),
            entry.attempts,
            duration_ms,
        );
        entry
    }

    /// Precondition, then the main command until it passes or the policy
    /// gives up. Progress is written to `trace` so it survives a deadline.
    async fn attempt(
        &self,
        check: &Check,
        host: &str,
        vars: &RuntimeVars,
        policy: &RetryPolicy,
        trace: &mut Trace,
    ) -> Outcome {
        if let Some(pre) = &check.precondition {
            let command = match pre.command.render(vars) {
                Ok(c) => self.command(c, check.sudo),
                Err(e) => return Outcome::Error { reason: e.to_string() },
            };
            let sent = Instant::now();
            match self.executor.run_command(host, &command).await {
                Ok(output) => {
                    trace.precondition = Some(ExecutionResult::completed(
                        0,
                        command.shell_line(),
                        &output,
                        sent.elapsed().as_millis() as u64,
                    ));
                    let verdict = pre.expect.evaluate(&output, vars, &check.params);
                    if !verdict.passed {
                        let reason = match &pre.reason {
                            Some(reason) => reason
                                .render(vars)
                                .unwrap_or_else(|_| reason.text()),
                            None => format!(
                                "precondition `{}` not met: expected {}, got {}",
                                command.command, verdict.expected, verdict.actual
                            ),
                        };
                        return Outcome::Skip { reason };
                    }
                }
                Err(e) => {
                    trace.precondition = Some(ExecutionResult::transport_failure(
                        0,
                        command.shell_line(),
                        &e,
                        sent.elapsed().as_millis() as u64,
                    ));
                    return Outcome::Error {
                        reason: format!("precondition: {e}"),
                    };
                }
            }
        }

        let command = match check.command.render(vars) {
            Ok(c) => self.command(c, check.sudo),
            Err(e) => return Outcome::Error { reason: e.to_string() },
        };

        let mut attempt: u32 = 1;
        loop {
            let sent = Instant::now();
            let result = self.executor.run_command(host, &command).await;
            let elapsed_ms = sent.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let verdict = check.expect.evaluate(&output, vars, &check.params);
                    trace.history.push(ExecutionResult::completed(
                        attempt,
                        command.shell_line(),
                        &output,
                        elapsed_ms,
                    ));
                    obs::emit_check_attempt(check.id.as_str(), host, attempt, verdict.passed);
                    if verdict.passed {
                        return Outcome::Pass;
                    }
                    if !policy.permits_retry(attempt) {
                        return Outcome::Fail { verdict };
                    }
                    trace.last_verdict = Some(verdict);
                }
                Err(e) => {
                    trace.history.push(ExecutionResult::transport_failure(
                        attempt,
                        command.shell_line(),
                        &e,
                        elapsed_ms,
                    ));
                    obs::emit_check_attempt(check.id.as_str(), host, attempt, false);
                    if !policy.retry_transport || !policy.permits_retry(attempt) {
                        return Outcome::Error {
                            reason: e.to_string(),
                        };
                    }
                }
            }

            tokio::time::sleep(policy.backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn command(&self, line: String, sudo: bool) -> RemoteCommand {
        RemoteCommand::new(line)
            .with_sudo(sudo)
            .with_timeout(self.command_timeout)
    }
}

#[derive(Default)]
struct Trace {
    precondition: Option<ExecutionResult>,
    history: Vec<ExecutionResult>,
    /// Most recent rejected verdict of a command that actually ran.
    last_verdict: Option<Verdict>,
}

enum Finish {
    Done(Outcome),
    TimedOut,
    Cancelled,
}

/// Resolves once `true` is sent; never if the sender goes away first.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        pending::<()>().await;
    }
}

/// Raise the run-wide cancel flag on deadline or external request.
async fn watch_cancellation(
    tx: watch::Sender<bool>,
    run_timeout: Option<Duration>,
    external: Option<watch::Receiver<bool>>,
) {
    let deadline = async {
        match run_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => pending::<()>().await,
        }
    };
    let requested = async {
        match external {
            Some(mut rx) => cancelled(&mut rx).await,
            None => pending::<()>().await,
        }
    };
    tokio::select! {
        _ = deadline => debug!("run timeout reached"),
        _ = requested => debug!("cancellation requested"),
    }
    let _ = tx.send(true);
}
