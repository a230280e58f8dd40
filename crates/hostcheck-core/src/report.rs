//! Outcomes, execution history and the run report.
//!
//! The report is assembled after all checks finish and is read-only from
//! then on. Entries are kept in registration order (then host order), never
//! in completion order.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::check::CheckId;
use crate::error::TransportError;
use crate::executor::CommandOutput;
use crate::expect::Verdict;
use crate::params::Params;

/// Longest stdout excerpt kept on a report entry (bytes, cut at a char boundary).
pub const EXCERPT_LIMIT: usize = 512;
/// Cap on the failure exit code.
pub const MAX_FAILURE_EXIT: i32 = 100;
/// Exit code for configuration errors found before any check ran.
pub const CONFIG_ERROR_EXIT: i32 = 101;

/// Final classification of one check on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    /// The command ran but its output did not meet the expectation.
    Fail { verdict: Verdict },
    /// The precondition was not met; the main command never ran.
    Skip { reason: String },
    /// The command could not be run (transport failure or cancellation).
    Error { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail { .. } => "FAIL",
            Outcome::Skip { .. } => "SKIP",
            Outcome::Error { .. } => "ERROR",
        }
    }

    /// FAIL and ERROR count against the exit code.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail { .. } | Outcome::Error { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One attempt of one command on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// 1-based; the precondition is recorded as attempt 0.
    pub attempt: u32,
    /// The exact command line sent, sudo wrapping included.
    pub command: String,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub transport_error: Option<String>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn completed(attempt: u32, command: String, output: &CommandOutput, elapsed_ms: u64) -> Self {
        Self {
            attempt,
            command,
            exit_status: Some(output.exit_status),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            transport_error: None,
            elapsed_ms,
        }
    }

    pub fn transport_failure(
        attempt: u32,
        command: String,
        error: &TransportError,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            attempt,
            command,
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
            transport_error: Some(error.to_string()),
            elapsed_ms,
        }
    }

    pub fn ran(&self) -> bool {
        self.transport_error.is_none()
    }
}

/// Report entry for one concrete check on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub check_id: CheckId,
    pub name: String,
    pub host_group: String,
    pub host: String,
    pub params: Params,
    pub outcome: Outcome,
    /// Main-command attempts; 0 when skipped or cancelled before running.
    pub attempts: u32,
    pub last_command: Option<String>,
    pub last_stdout_excerpt: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precondition: Option<ExecutionResult>,
    /// Main-command attempts in attempt order.
    pub history: Vec<ExecutionResult>,
}

impl CheckReport {
    /// Build an entry. `last_*` fields describe the last command sent: the
    /// final main attempt, or the precondition when the main command never ran.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        check_id: CheckId,
        name: String,
        host_group: String,
        host: String,
        params: Params,
        outcome: Outcome,
        precondition: Option<ExecutionResult>,
        history: Vec<ExecutionResult>,
        duration_ms: u64,
    ) -> Self {
        let last = history.last().or(precondition.as_ref());
        Self {
            attempts: history.len() as u32,
            last_command: last.map(|r| r.command.clone()),
            last_stdout_excerpt: last.filter(|r| r.ran()).map(|r| excerpt(&r.stdout)),
            check_id,
            name,
            host_group,
            host,
            params,
            outcome,
            duration_ms,
            precondition,
            history,
        }
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim_end();
    if text.len() <= EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut end = EXCERPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Outcome counts. `total` always equals the sum of the other four.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Aggregated result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// SHA-256 of the ordered check ids that were run.
    pub registry_digest: String,
    pub duration_ms: u64,
    pub entries: Vec<CheckReport>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    summary: Summary,
    exit_code: i32,
}

impl RunReport {
    /// An empty report with a fresh run id.
    pub fn new(registry_digest: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            registry_digest: registry_digest.into(),
            duration_ms: 0,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: CheckReport) {
        self.entries.push(entry);
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            summary.total += 1;
            match entry.outcome {
                Outcome::Pass => summary.passed += 1,
                Outcome::Fail { .. } => summary.failed += 1,
                Outcome::Skip { .. } => summary.skipped += 1,
                Outcome::Error { .. } => summary.errored += 1,
            }
        }
        summary
    }

    /// Every entry (one per host) recorded for `check_id`.
    pub fn detail(&self, check_id: &CheckId) -> Vec<&CheckReport> {
        self.entries
            .iter()
            .filter(|e| &e.check_id == check_id)
            .collect()
    }

    /// The entry for `check_id` on `host`.
    pub fn entry(&self, check_id: &CheckId, host: &str) -> Option<&CheckReport> {
        self.entries
            .iter()
            .find(|e| &e.check_id == check_id && e.host == host)
    }

    /// 0 when every outcome is PASS or SKIP, else the FAIL+ERROR count
    /// capped at [`MAX_FAILURE_EXIT`].
    pub fn exit_code(&self) -> i32 {
        let failures = self.entries.iter().filter(|e| e.outcome.is_failure()).count();
        failures.min(MAX_FAILURE_EXIT as usize) as i32
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonReport {
            report: self,
            summary: self.summary(),
            exit_code: self.exit_code(),
        })
    }

    /// Human-readable summary. Every entry is listed; FAIL and ERROR
    /// entries also show the command and an expected-vs-actual diff.
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} started {} (registry {})",
            self.run_id,
            self.started_at.to_rfc3339(),
            short_digest(&self.registry_digest)
        );
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "{:<5} {} @ {} ({} attempt{}, {} ms)",
                entry.outcome.label(),
                entry.check_id,
                entry.host,
                entry.attempts,
                if entry.attempts == 1 { "" } else { "s" },
                entry.duration_ms
            );
            match &entry.outcome {
                Outcome::Pass => {}
                Outcome::Skip { reason } => {
                    let _ = writeln!(out, "      skipped: {reason}");
                }
                Outcome::Fail { verdict } => {
                    if let Some(command) = &entry.last_command {
                        let _ = writeln!(out, "      command: {command}");
                    }
                    out.push_str(&render_diff(&verdict.expected, &verdict.actual));
                }
                Outcome::Error { reason } => {
                    if let Some(command) = &entry.last_command {
                        let _ = writeln!(out, "      command: {command}");
                    }
                    let _ = writeln!(out, "      error: {reason}");
                }
            }
        }
        let s = self.summary();
        let _ = writeln!(
            out,
            "{} checks: {} passed, {} failed, {} skipped, {} errored ({} ms)",
            s.total, s.passed, s.failed, s.skipped, s.errored, self.duration_ms
        );
        out
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Line diff of expected against actual, indented under an entry.
pub fn render_diff(expected: &str, actual: &str) -> String {
    let mut out = String::from("      --- expected\n      +++ actual\n");
    let diff = TextDiff::from_lines(expected, actual);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        let _ = write!(out, "      {sign}{change}");
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, host: &str, outcome: Outcome) -> CheckReport {
        let history = match outcome {
            Outcome::Skip { .. } => Vec::new(),
            _ => vec![ExecutionResult::completed(
                1,
                "ovn-nbctl list logical_switch_port port1".to_string(),
                &CommandOutput {
                    exit_status: 0,
                    stdout: "aa:bb:cc:dd:ee:ff\n".to_string(),
                    stderr: String::new(),
                },
                4,
            )],
        };
        CheckReport::new(
            CheckId::new("central", id, &Params::new()),
            id.to_string(),
            "central".to_string(),
            host.to_string(),
            Params::new(),
            outcome,
            None,
            history,
            5,
        )
    }

    fn sample() -> RunReport {
        let mut report = RunReport::new("0123456789abcdef0123");
        report.record(entry("a", "central1", Outcome::Pass));
        report.record(entry(
            "b",
            "central1",
            Outcome::Fail {
                verdict: Verdict::new(false, "aa:bb:cc:dd:ee:11", "aa:bb:cc:dd:ee:ff"),
            },
        ));
        report.record(entry(
            "c",
            "central1",
            Outcome::Skip {
                reason: "port port1 is not bound on host central1".to_string(),
            },
        ));
        report.record(entry(
            "d",
            "central1",
            Outcome::Error {
                reason: "host central1 unreachable: connection refused".to_string(),
            },
        ));
        report
    }

    #[test]
    fn test_summary_is_consistent() {
        let report = sample();
        let s = report.summary();
        assert_eq!(
            s,
            Summary {
                total: 4,
                passed: 1,
                failed: 1,
                skipped: 1,
                errored: 1
            }
        );
        assert_eq!(s.total, s.passed + s.failed + s.skipped + s.errored);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_zero_for_pass_and_skip_and_capped() {
        let mut report = RunReport::new("d");
        report.record(entry("a", "h", Outcome::Pass));
        report.record(entry("b", "h", Outcome::Skip { reason: "x".into() }));
        assert_eq!(report.exit_code(), 0);

        let mut big = RunReport::new("d");
        for i in 0..150 {
            big.record(entry(
                &format!("c{i}"),
                "h",
                Outcome::Error {
                    reason: "cancelled".into(),
                },
            ));
        }
        assert_eq!(big.exit_code(), MAX_FAILURE_EXIT);
    }

    #[test]
    fn test_derived_fields() {
        let report = sample();
        let pass = &report.entries[0];
        assert_eq!(pass.attempts, 1);
        assert_eq!(pass.last_stdout_excerpt.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        let skip = &report.entries[2];
        assert_eq!(skip.attempts, 0);
        assert_eq!(skip.last_command, None);
        assert_eq!(
            report.detail(&CheckId::new("central", "b", &Params::new())).len(),
            1
        );
    }

    #[test]
    fn test_precondition_transport_failure_shows_its_command() {
        let precondition = ExecutionResult::transport_failure(
            0,
            "ovs-vsctl list port port1".to_string(),
            &TransportError::Unreachable {
                host: "node1".to_string(),
                reason: "no route to host".to_string(),
            },
            3,
        );
        let entry = CheckReport::new(
            CheckId::new("nodes", "port-ping", &Params::new()),
            "port-ping".to_string(),
            "nodes".to_string(),
            "node1".to_string(),
            Params::new(),
            Outcome::Error {
                reason: "precondition: host node1 unreachable".to_string(),
            },
            Some(precondition),
            Vec::new(),
            3,
        );
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.last_command.as_deref(), Some("ovs-vsctl list port port1"));
        assert_eq!(entry.last_stdout_excerpt, None);

        let mut report = RunReport::new("d");
        report.record(entry);
        assert!(report
            .render_human()
            .contains("      command: ovs-vsctl list port port1\n      error: precondition"));
    }

    #[test]
    fn test_human_render_lists_everything() {
        let text = sample().render_human();
        assert!(text.contains("PASS  central::a @ central1"));
        assert!(text.contains("SKIP  central::c"));
        assert!(text.contains("command: ovn-nbctl list logical_switch_port port1"));
        assert!(text.contains("-aa:bb:cc:dd:ee:11"));
        assert!(text.contains("+aa:bb:cc:dd:ee:ff"));
        assert!(text.contains("error: host central1 unreachable"));
        assert!(text.contains("4 checks: 1 passed, 1 failed, 1 skipped, 1 errored"));
    }

    #[test]
    fn test_json_report_shape() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["total"], 4);
        assert_eq!(json["exit_code"], 2);
        let fail = &json["entries"][1];
        assert_eq!(fail["check_id"], "central::b");
        assert_eq!(fail["host_group"], "central");
        assert_eq!(fail["outcome"]["status"], "FAIL");
        assert_eq!(fail["outcome"]["verdict"]["expected"], "aa:bb:cc:dd:ee:11");
        assert_eq!(fail["attempts"], 1);
        assert!(fail.get("precondition").is_none());
    }

    #[test]
    fn test_params_serialize_as_ordered_map() {
        let params = Params::from_pairs([
            ("port".to_string(), "port1".to_string()),
            ("mac".to_string(), "aa:bb".to_string()),
        ]);
        assert_eq!(
            serde_json::to_string(&params).unwrap(),
            r#"{"port":"port1","mac":"aa:bb"}"#
        );
    }

    #[test]
    fn test_excerpt_is_truncated_on_char_boundary() {
        let long = "é".repeat(EXCERPT_LIMIT);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= EXCERPT_LIMIT + 3);
    }
}
