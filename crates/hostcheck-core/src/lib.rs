//! hostcheck core library
//!
//! Declarative, read-only verification of remote host state. Checks are
//! registered (and expanded over parameter sets) into a [`Registry`], run by
//! a [`Runner`] through a [`RemoteExecutor`], and collected into a
//! [`RunReport`].

pub mod check;
pub mod error;
pub mod executor;
pub mod expect;
pub mod fakes;
pub mod inventory;
pub mod obs;
pub mod params;
pub mod policy;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runner;
pub mod suite;
pub mod telemetry;
pub mod template;

pub use check::{Check, CheckDef, CheckId, Precondition};
pub use error::{ConfigError, ConfigResult, SuiteError, TemplateError, TransportError};
pub use executor::{
    CommandOutput, InventoryExecutor, LocalExecutor, RemoteCommand, RemoteExecutor, SshExecutor,
    SshOptions, SshTarget,
};
pub use expect::{Expect, Matcher, Verdict};
pub use inventory::{Connection, Inventory};
pub use params::{ParamSet, Params};
pub use policy::{CommandPolicy, PolicyRule};
pub use registry::Registry;
pub use report::{
    CheckReport, ExecutionResult, Outcome, RunReport, Summary, CONFIG_ERROR_EXIT,
    MAX_FAILURE_EXIT,
};
pub use retry::{RetryOverride, RetryPolicy};
pub use runner::Runner;
pub use suite::Suite;
pub use telemetry::init_tracing;
pub use template::{RuntimeVars, Template};
