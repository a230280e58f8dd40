//! hostcheck - declarative remote host-state verification
//!
//! ## Commands
//!
//! - `run`: execute a suite against an inventory and report every outcome
//! - `list`: print the expanded check ids of a suite without running them
//!
//! Exit status of `run` is 0 when every outcome is PASS or SKIP, otherwise the
//! number of FAIL and ERROR outcomes (capped at 100). Configuration errors
//! exit 101 before any remote command is sent.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use hostcheck_core::{
    Check, ConfigError, Inventory, InventoryExecutor, RetryPolicy, Runner, SshExecutor, SshOptions,
    Suite, SuiteError, CONFIG_ERROR_EXIT,
};

/// Exit status for failures unrelated to configuration (e.g. writing the report).
const RUNTIME_ERROR_EXIT: u8 = 102;

#[derive(Parser)]
#[command(name = "hostcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run read-only checks against remote host groups", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "HOSTCHECK_VERBOSE")]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "HOSTCHECK_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite against an inventory
    Run(RunArgs),

    /// List the concrete checks a suite expands to
    List {
        /// Suite file (TOML)
        #[arg(short, long, env = "HOSTCHECK_SUITE")]
        suite: PathBuf,

        /// Only checks matching these names, groups or id prefixes
        #[arg(long, env = "HOSTCHECK_ONLY", value_delimiter = ',')]
        only: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Suite file (TOML)
    #[arg(short, long, env = "HOSTCHECK_SUITE")]
    suite: PathBuf,

    /// Inventory file (`.toml`, otherwise Ansible INI)
    #[arg(short, long, env = "HOSTCHECK_INVENTORY")]
    inventory: PathBuf,

    /// Only checks matching these names, groups or id prefixes
    #[arg(long, env = "HOSTCHECK_ONLY", value_delimiter = ',')]
    only: Vec<String>,

    /// Attempts per check, overriding the suite default
    #[arg(long, env = "HOSTCHECK_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "HOSTCHECK_BACKOFF_MS")]
    backoff_ms: Option<u64>,

    /// Time budget for all attempts of one check on one host
    #[arg(long, env = "HOSTCHECK_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Time budget for the whole run; unfinished checks become ERROR
    #[arg(long, env = "HOSTCHECK_RUN_TIMEOUT_SECS")]
    run_timeout_secs: Option<u64>,

    /// Transport timeout for a single remote command
    #[arg(long, env = "HOSTCHECK_COMMAND_TIMEOUT_SECS", default_value = "30")]
    command_timeout_secs: u64,

    /// Maximum overlapping checks within one host group
    #[arg(long, env = "HOSTCHECK_MAX_IN_FLIGHT", default_value = "8")]
    max_in_flight: usize,

    /// ssh client binary
    #[arg(long, env = "HOSTCHECK_SSH", default_value = "ssh")]
    ssh_program: String,

    /// Report format
    #[arg(long, value_enum, env = "HOSTCHECK_FORMAT", default_value = "human")]
    format: Format,

    /// Write the report here instead of stdout
    #[arg(short, long, env = "HOSTCHECK_OUTPUT")]
    output: Option<PathBuf>,
}

impl RunArgs {
    /// The suite's run-wide policy with command-line overrides applied.
    fn retry_policy(&self, base: &RetryPolicy) -> RetryPolicy {
        let mut policy = base.clone();
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n.max(1);
        }
        if let Some(ms) = self.backoff_ms {
            policy.backoff_base_ms = ms;
        }
        if let Some(secs) = self.timeout_secs {
            policy.timeout_ms = secs.saturating_mul(1000);
        }
        policy
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    hostcheck_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::List { suite, only } => cmd_list(&suite, &only),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(fatal_exit_code(&err))
        }
    }
}

fn fatal_exit_code(err: &anyhow::Error) -> u8 {
    let config = err
        .chain()
        .any(|cause| cause.is::<ConfigError>() || cause.is::<SuiteError>());
    if config {
        CONFIG_ERROR_EXIT as u8
    } else {
        RUNTIME_ERROR_EXIT
    }
}

async fn cmd_run(args: RunArgs) -> Result<u8> {
    let suite = Suite::load(&args.suite)
        .with_context(|| format!("Failed to load suite {}", args.suite.display()))?;
    let registry = suite.registry.filter(&args.only);
    if registry.is_empty() {
        warn!(only = ?args.only, "no checks selected");
    }

    let inventory = Inventory::load(&args.inventory)
        .with_context(|| format!("Failed to load inventory {}", args.inventory.display()))?;
    let ssh = SshExecutor::new(SshOptions {
        program: args.ssh_program.clone(),
        ..Default::default()
    });
    let executor = Arc::new(InventoryExecutor::new(Arc::new(inventory), ssh));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling remaining checks");
            let _ = cancel_tx.send(true);
        }
    });

    let mut runner = Runner::new(executor, args.retry_policy(&suite.retry))
        .with_command_timeout(Duration::from_secs(args.command_timeout_secs))
        .with_max_in_flight(args.max_in_flight)
        .with_cancellation(cancel_rx);
    if let Some(secs) = args.run_timeout_secs {
        runner = runner.with_run_timeout(Duration::from_secs(secs));
    }

    let report = runner
        .run(&registry)
        .await
        .context("Failed to resolve host groups")?;

    let rendered = match args.format {
        Format::Human => report.render_human(),
        Format::Json => report.to_json().context("Failed to serialise report")?,
    };
    write_report(&rendered, args.output.as_deref())?;

    let summary = report.summary();
    info!(
        run_id = %report.run_id,
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        errored = summary.errored,
        "run complete"
    );
    Ok(report.exit_code() as u8)
}

fn cmd_list(suite: &Path, only: &[String]) -> Result<u8> {
    let suite = Suite::load(suite)
        .with_context(|| format!("Failed to load suite {}", suite.display()))?;
    let registry = suite.registry.filter(only);
    for check in registry.checks() {
        println!("{}", list_line(check));
    }
    println!("{} checks, registry {}", registry.len(), registry.digest());
    Ok(0)
}

fn list_line(check: &Check) -> String {
    format!(
        "{}\t{}{}",
        check.id,
        if check.sudo { "[sudo] " } else { "" },
        check.command.text()
    )
}

fn write_report(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            print!("{rendered}");
            if !rendered.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse_and_override_retry() {
        let cli = Cli::try_parse_from([
            "hostcheck",
            "run",
            "--suite",
            "suites/ovn.toml",
            "--inventory",
            "hosts.ini",
            "--only",
            "ovn_central,hostname",
            "--max-attempts",
            "4",
            "--timeout-secs",
            "20",
            "--format",
            "json",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.only, vec!["ovn_central", "hostname"]);
        assert_eq!(args.format, Format::Json);

        let policy = args.retry_policy(&RetryPolicy::default());
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.timeout_ms, 20_000);
        assert_eq!(policy.backoff_base_ms, RetryPolicy::default().backoff_base_ms);
    }

    #[test]
    fn test_fatal_exit_codes() {
        let config: anyhow::Error = ConfigError::EmptyName.into();
        assert_eq!(
            fatal_exit_code(&config.context("Failed to load suite")),
            CONFIG_ERROR_EXIT as u8
        );
        let io = anyhow::anyhow!("disk full");
        assert_eq!(fatal_exit_code(&io), RUNTIME_ERROR_EXIT);
    }

    #[test]
    fn test_list_bundled_suite() {
        let suite = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../suites/ovn.toml");
        assert_eq!(cmd_list(&suite, &["ovn_nodes".to_string()]).unwrap(), 0);
    }

    #[test]
    fn test_list_line_shows_literal_braces() {
        let mut registry = hostcheck_core::Registry::new();
        registry
            .register(
                hostcheck_core::CheckDef::new("first-field", "nodes", "awk '{{print $1}}' /etc/hosts")
                    .sudo(true),
            )
            .unwrap();
        assert_eq!(
            list_line(&registry.checks()[0]),
            "nodes::first-field\t[sudo] awk '{print $1}' /etc/hosts"
        );
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report("{}", Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
