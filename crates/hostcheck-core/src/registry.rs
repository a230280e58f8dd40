//! Check registry: expands definitions into concrete checks.
//!
//! Registration is pure data construction. Every template is bound and
//! every command screened by the [`CommandPolicy`] here, so a malformed
//! check fails before any remote command is sent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::check::{Check, CheckDef, CheckId, Precondition};
use crate::error::{ConfigError, ConfigResult, TemplateError};
use crate::params::{expand, Params};
use crate::policy::CommandPolicy;
use crate::template::Template;

/// Ordered collection of concrete checks.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    checks: Vec<Arc<Check>>,
    ids: HashSet<CheckId>,
    policy: CommandPolicy,
    default_sudo: bool,
    group_sudo: HashMap<String, bool>,
}

impl Registry {
    /// An empty registry with the read-only command policy.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Privilege elevation for checks that do not say otherwise.
    pub fn with_default_sudo(mut self, sudo: bool) -> Self {
        self.default_sudo = sudo;
        self
    }

    /// Privilege elevation for one host group; beats the registry default.
    pub fn with_group_sudo(mut self, group: impl Into<String>, sudo: bool) -> Self {
        self.group_sudo.insert(group.into(), sudo);
        self
    }

    /// Expand `def` over its parameter sets and append the results.
    ///
    /// Either every instance is added or none is.
    pub fn register(&mut self, def: CheckDef) -> ConfigResult<Vec<CheckId>> {
        if def.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if def.command.is_empty() {
            return Err(ConfigError::EmptyCommand { check: def.name });
        }

        let sudo = def
            .sudo
            .or_else(|| self.group_sudo.get(&def.group).copied())
            .unwrap_or(self.default_sudo);

        let mut staged: Vec<Check> = Vec::new();
        let mut staged_ids: HashSet<CheckId> = HashSet::new();

        for params in expand(&def.name, &def.params)? {
            let id = CheckId::new(&def.group, &def.name, &params);
            if self.ids.contains(&id) || !staged_ids.insert(id.clone()) {
                return Err(ConfigError::DuplicateCheck { id: id.to_string() });
            }
            let check = self.instantiate(&def, id, params, sudo)?;
            staged.push(check);
        }

        let ids: Vec<CheckId> = staged.iter().map(|c| c.id.clone()).collect();
        self.ids.extend(staged_ids);
        self.checks.extend(staged.into_iter().map(Arc::new));
        Ok(ids)
    }

    fn instantiate(
        &self,
        def: &CheckDef,
        id: CheckId,
        params: Params,
        sudo: bool,
    ) -> ConfigResult<Check> {
        let template_err = |source: TemplateError| ConfigError::Template {
            check: id.to_string(),
            source,
        };

        let command = def.command.bind(&params).map_err(template_err)?;
        self.screen(&id, &command)?;

        let expect = def.expect.bind(&params).map_err(template_err)?;
        expect
            .check_regexes()
            .map_err(|(pattern, reason)| ConfigError::InvalidRegex {
                check: id.to_string(),
                pattern,
                reason,
            })?;

        let precondition = match &def.precondition {
            Some(pre) => {
                let command = pre.command.bind(&params).map_err(template_err)?;
                self.screen(&id, &command)?;
                let expect = pre.expect.bind(&params).map_err(template_err)?;
                let reason = pre
                    .reason
                    .as_ref()
                    .map(|r| r.bind(&params))
                    .transpose()
                    .map_err(template_err)?;
                Some(Precondition {
                    command,
                    expect,
                    reason,
                })
            }
            None => None,
        };

        Ok(Check {
            id,
            name: def.name.clone(),
            group: def.group.clone(),
            params,
            command,
            expect,
            precondition,
            sudo,
            retry: def.retry.clone(),
            description: def.description.clone(),
        })
    }

    fn screen(&self, id: &CheckId, command: &Template) -> ConfigResult<()> {
        let text = command.text();
        match self.policy.violation(&text) {
            Some(rule) => Err(ConfigError::PolicyViolation {
                check: id.to_string(),
                command: text,
                rule: rule.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Concrete checks in registration order.
    pub fn checks(&self) -> &[Arc<Check>] {
        &self.checks
    }

    pub fn get(&self, id: &CheckId) -> Option<&Arc<Check>> {
        self.checks.iter().find(|c| &c.id == id)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Host groups in order of first use.
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for check in &self.checks {
            if !groups.contains(&check.group.as_str()) {
                groups.push(&check.group);
            }
        }
        groups
    }

    /// Keep only checks selected by name, group, or id prefix. A prefix
    /// must end on a whole segment of the id (`group::name`, or a complete
    /// `param=value` pair). An empty selector list keeps everything.
    pub fn filter(&self, selectors: &[String]) -> Registry {
        if selectors.is_empty() {
            return self.clone();
        }
        let keep = |c: &Check| {
            selectors
                .iter()
                .any(|s| c.name == *s || c.group == *s || selects_id(c.id.as_str(), s))
        };
        let checks: Vec<Arc<Check>> = self
            .checks
            .iter()
            .filter(|c| keep(c))
            .cloned()
            .collect();
        Registry {
            ids: checks.iter().map(|c| c.id.clone()).collect(),
            checks,
            policy: self.policy.clone(),
            default_sudo: self.default_sudo,
            group_sudo: self.group_sudo.clone(),
        }
    }

    /// SHA-256 over the ordered check ids. Equal digests mean the same
    /// checks in the same order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for check in &self.checks {
            hasher.update(check.id.as_str().as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

fn selects_id(id: &str, selector: &str) -> bool {
    let Some(rest) = id.strip_prefix(selector) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let trailing_escapes = selector.chars().rev().take_while(|c| *c == '\\').count();
    trailing_escapes % 2 == 0 && rest.starts_with(['[', ',', ']'])
}
