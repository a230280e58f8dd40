//! Check definitions and their concrete instances.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expect::Expect;
use crate::params::{ParamSet, Params};
use crate::retry::RetryOverride;
use crate::template::Template;

/// Identity of a concrete check: `group::name[param=value,...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(String);

impl CheckId {
    pub fn new(group: &str, name: &str, params: &Params) -> Self {
        if params.is_empty() {
            Self(format!("{group}::{name}"))
        } else {
            Self(format!("{group}::{name}[{}]", params.label()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command whose result decides whether the main command runs at all.
/// If its expectation is not met the check is skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Precondition {
    pub command: Template,
    #[serde(default)]
    pub expect: Expect,
    /// Skip reason; defaults to naming the precondition command.
    #[serde(default)]
    pub reason: Option<Template>,
}

impl Precondition {
    pub fn new(command: impl Into<Template>, expect: Expect) -> Self {
        Self {
            command: command.into(),
            expect,
            reason: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<Template>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// What a caller registers: a possibly parametrized check template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDef {
    pub name: String,
    pub group: String,
    pub command: Template,
    #[serde(default)]
    pub expect: Expect,
    #[serde(default)]
    pub precondition: Option<Precondition>,
    #[serde(default)]
    pub params: Vec<ParamSet>,
    /// Overrides the group and registry default.
    #[serde(default)]
    pub sudo: Option<bool>,
    /// Fields replacing those of the run-wide retry policy.
    #[serde(default)]
    pub retry: Option<RetryOverride>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CheckDef {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        command: impl Into<Template>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            command: command.into(),
            expect: Expect::Success,
            precondition: None,
            params: Vec::new(),
            sudo: None,
            retry: None,
            description: None,
        }
    }

    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    /// Add a parameter set; several sets expand as a cross product.
    pub fn params(mut self, set: ParamSet) -> Self {
        self.params.push(set);
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = Some(sudo);
        self
    }

    pub fn retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A concrete check with parameters bound. Immutable once registered.
#[derive(Debug, Clone)]
pub struct Check {
    pub id: CheckId,
    pub name: String,
    pub group: String,
    pub params: Params,
    pub command: Template,
    pub expect: Expect,
    pub precondition: Option<Precondition>,
    pub sudo: bool,
    pub retry: Option<RetryOverride>,
    pub description: Option<String>,
}
