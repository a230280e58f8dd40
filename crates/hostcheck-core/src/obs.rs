//! Structured lifecycle events for a verification run.
//!
//! Every event is logged at `info!` (attempt details at `debug!`) with an
//! `event` field, so the JSON log stream can be filtered by event name.

use tracing::{debug, info, warn, Span};

/// Run-scoped span. Attach it to the run future with
/// [`Instrument`](tracing::Instrument) so the future stays `Send`:
///
/// ```ignore
/// execute(registry).instrument(obs::run_span(&report.run_id)).await
/// ```
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("hostcheck.run", run_id = %run_id)
}

/// Run started with `checks` concrete checks over `groups` host groups.
pub fn emit_run_started(run_id: &str, registry_digest: &str, checks: usize, groups: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        registry_digest = %registry_digest,
        checks = checks,
        groups = groups,
    );
}

/// One attempt of one check on one host.
pub fn emit_check_attempt(check_id: &str, host: &str, attempt: u32, passed: bool) {
    debug!(
        event = "check.attempt",
        check_id = %check_id,
        host = %host,
        attempt = attempt,
        passed = passed,
    );
}

/// Final outcome of one check on one host.
pub fn emit_check_finished(check_id: &str, host: &str, outcome: &str, attempts: u32, duration_ms: u64) {
    info!(
        event = "check.finished",
        check_id = %check_id,
        host = %host,
        outcome = %outcome,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    passed: usize,
    failed: usize,
    skipped: usize,
    errored: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
        failed = failed,
        skipped = skipped,
        errored = errored,
    );
}

/// The run was cancelled (deadline or interrupt) before every check finished.
pub fn emit_run_cancelled(run_id: &str, pending: usize) {
    warn!(event = "run.cancelled", run_id = %run_id, pending = pending);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _guard = span.enter();
        emit_check_attempt("nodes::bridge-exists", "node1", 1, true);
    }
}
