//! Suite files: checks, defaults and policy declared in TOML.
//!
//! ```toml
//! [defaults]
//! sudo = false
//! retry = { max_attempts = 3, backoff_base_ms = 1000 }
//!
//! [groups.ovn_central]
//! sudo = true
//!
//! [[checks]]
//! name = "bridge-exists"
//! group = "ovn_nodes"
//! command = "ovs-vsctl br-exists br-int"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::check::CheckDef;
use crate::error::{ConfigResult, SuiteError};
use crate::policy::{CommandPolicy, PolicyRule};
use crate::registry::Registry;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuiteDefaults {
    pub sudo: bool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupSettings {
    pub sudo: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Start from the read-only rule set instead of an empty one.
    pub read_only: bool,
    /// Extra deny rules appended after the base set.
    pub deny: Vec<PolicyRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            deny: Vec::new(),
        }
    }
}

impl PolicyConfig {
    pub fn build(&self) -> ConfigResult<CommandPolicy> {
        let base = if self.read_only {
            CommandPolicy::read_only()
        } else {
            CommandPolicy::permissive()
        };
        self.deny
            .iter()
            .cloned()
            .try_fold(base, |policy, rule| policy.with_rule(rule))
    }
}

/// On-disk shape of a suite.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuiteFile {
    pub defaults: SuiteDefaults,
    pub policy: PolicyConfig,
    pub groups: BTreeMap<String, GroupSettings>,
    pub checks: Vec<CheckDef>,
}

impl SuiteFile {
    /// Register every check. The first invalid check aborts the load.
    pub fn into_suite(self) -> ConfigResult<Suite> {
        let mut registry = Registry::new()
            .with_policy(self.policy.build()?)
            .with_default_sudo(self.defaults.sudo);
        for (group, settings) in &self.groups {
            if let Some(sudo) = settings.sudo {
                registry = registry.with_group_sudo(group.as_str(), sudo);
            }
        }
        for def in self.checks {
            let name = def.name.clone();
            let ids = registry.register(def)?;
            debug!(check = %name, instances = ids.len(), "registered check");
        }
        Ok(Suite {
            retry: self.defaults.retry,
            registry,
        })
    }
}

/// A loaded suite: the registry plus the run-wide retry policy.
#[derive(Debug, Clone)]
pub struct Suite {
    pub retry: RetryPolicy,
    pub registry: Registry,
}

impl Suite {
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &display)
    }

    /// Parse suite text; `origin` names the source in errors.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, SuiteError> {
        let file: SuiteFile = toml::from_str(text).map_err(|e| SuiteError::Parse {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        Ok(file.into_suite()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::io::Write;

    const SUITE: &str = r#"
        [defaults]
        retry = { max_attempts = 3, backoff_base_ms = 200 }

        [groups.ovn_central]
        sudo = true

        [[checks]]
        name = "port-exists"
        group = "ovn_central"
        command = "ovn-nbctl list logical_switch_port {port}"
        params = [{ name = "port", values = ["port1", "port2", "port3"] }]

        [[checks]]
        name = "bridge-exists"
        group = "ovn_nodes"
        command = "ovs-vsctl br-exists br-int"
        sudo = true

        [[checks]]
        name = "hostname"
        group = "ovn"
        command = "hostname -s"
        expect = { type = "stdout", equals = "{host}" }
    "#;

    #[test]
    fn test_suite_registers_all_checks() {
        let suite = Suite::from_toml_str(SUITE, "inline").unwrap();
        assert_eq!(suite.retry.max_attempts, 3);
        assert_eq!(suite.retry.backoff_base_ms, 200);
        assert_eq!(suite.registry.len(), 5);
        assert_eq!(
            suite.registry.groups(),
            vec!["ovn_central", "ovn_nodes", "ovn"]
        );
        let sudo: Vec<bool> = suite.registry.checks().iter().map(|c| c.sudo).collect();
        assert_eq!(sudo, vec![true, true, true, true, false]);
    }

    #[test]
    fn test_policy_section() {
        let text = r#"
            [policy]
            deny = [{ name = "no-curl", pattern = "\\bcurl\\b" }]

            [[checks]]
            name = "fetch"
            group = "all"
            command = "curl -s http://localhost:6641"
        "#;
        let err = Suite::from_toml_str(text, "inline").unwrap_err();
        assert!(matches!(
            err,
            SuiteError::Config(ConfigError::PolicyViolation { .. })
        ));

        let permissive = r#"
            [policy]
            read_only = false

            [[checks]]
            name = "restart"
            group = "all"
            command = "systemctl restart ovn-controller"
        "#;
        assert_eq!(
            Suite::from_toml_str(permissive, "inline")
                .unwrap()
                .registry
                .len(),
            1
        );
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let err = Suite::from_toml_str("[[checks]]\nname = 1", "bad.toml").unwrap_err();
        match err {
            SuiteError::Parse { path, .. } => assert_eq!(path, "bad.toml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SUITE.as_bytes()).unwrap();
        let suite = Suite::load(file.path()).unwrap();
        assert_eq!(suite.registry.len(), 5);

        let missing = Suite::load(Path::new("/nonexistent/suite.toml")).unwrap_err();
        assert!(matches!(missing, SuiteError::Read { .. }));
    }
}
