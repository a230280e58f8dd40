//! Read-only command policy.
//!
//! Checks only observe remote state. Every command is screened against an
//! ordered list of deny rules at registration; the first match rejects the
//! check before anything runs.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A single deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub pattern: String,
    /// Matches whose first capture group equals one of these are ignored.
    #[serde(default)]
    pub allow: Vec<String>,
}

impl PolicyRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            allow: Vec::new(),
        }
    }

    pub fn allowing(mut self, target: impl Into<String>) -> Self {
        self.allow.push(target.into());
        self
    }
}

const READ_ONLY_RULES: &[(&str, &str)] = &[
    (
        "package-manager",
        r"\b(apt|apt-get|yum|dnf|zypper|pip3?)\s+(install|remove|erase|upgrade|update|purge)\b",
    ),
    (
        "file-removal",
        r"(^|[\s;&|(])(rm|rmdir|shred|truncate|dd|mkfs(\.\w+)?)\s",
    ),
    (
        "service-state",
        r"\bsystemctl\s+(start|stop|restart|reload|enable|disable|mask|kill)\b",
    ),
    (
        "process-control",
        r"\b(reboot|shutdown|poweroff|halt|kill|pkill|killall)\b",
    ),
    (
        "ovs-mutation",
        r"\bovs-vsctl\b.*\s(add-br|del-br|add-port|del-port|add-bond|set|clear|add|remove|destroy|create|emer-reset)\b",
    ),
    (
        "ovn-mutation",
        r"\bovn-(nbctl|sbctl)\b.*\s(ls-add|ls-del|lsp-add|lsp-del|lsp-set-[\w-]+|lr-add|lr-del|lrp-add|lrp-del|dhcp-options-create|dhcp-options-del|dhcp-options-set-options|set-connection|del-connection|set|clear|add|remove|destroy|create)\b",
    ),
    (
        "ip-mutation",
        r"\bip\s+(-\S+\s+)*(link|addr|address|route|netns|neigh)\s+(add|del|delete|set|change|replace|flush)\b",
    ),
    ("sed-in-place", r"\bsed\b.*\s-i"),
    ("tee", r"\|\s*(sudo\s+)?tee\b"),
];

/// Ordered deny rules.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Vec<(PolicyRule, Regex)>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::read_only()
    }
}

impl CommandPolicy {
    /// No rules: every command is accepted.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard rule set for read-only verification.
    pub fn read_only() -> Self {
        let mut rules: Vec<(PolicyRule, Regex)> = READ_ONLY_RULES
            .iter()
            .filter_map(|(name, pattern)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (PolicyRule::new(*name, *pattern), re))
            })
            .collect();

        let redirect = PolicyRule::new("file-redirect", r"(?:^|[^0-9&>-])>>?\s*([^\s&|;]+)")
            .allowing("/dev/null");
        if let Ok(re) = Regex::new(&redirect.pattern) {
            rules.push((redirect, re));
        }
        Self { rules }
    }

    /// Append a rule (builder pattern).
    pub fn with_rule(mut self, rule: PolicyRule) -> Result<Self, ConfigError> {
        let re = Regex::new(&rule.pattern).map_err(|e| ConfigError::InvalidPolicyRule {
            pattern: rule.pattern.clone(),
            reason: e.to_string(),
        })?;
        self.rules.push((rule, re));
        Ok(self)
    }

    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }

    /// Name of the first rule `command` violates.
    pub fn violation(&self, command: &str) -> Option<&str> {
        self.rules.iter().find_map(|(rule, re)| {
            let hit = re.captures_iter(command).any(|caps| match caps.get(1) {
                Some(target) if !rule.allow.is_empty() => {
                    !rule.allow.iter().any(|a| a == target.as_str())
                }
                _ => true,
            });
            hit.then_some(rule.name.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtin_rules_compile() {
        assert_eq!(
            CommandPolicy::read_only().rules().count(),
            READ_ONLY_RULES.len() + 1
        );
    }

    #[test]
    fn test_read_only_commands_pass() {
        let policy = CommandPolicy::read_only();
        for cmd in [
            "hostname -s",
            "ovs-vsctl br-exists br-int",
            "ovs-vsctl get open_vswitch . external_ids:ovn-remote",
            "ovs-vsctl show",
            "systemctl is-active ovn-controller",
            "ovn-sbctl get-connection",
            "ovn-nbctl --columns=name,address -f json list logical_switch_port port1",
            "ovn-nbctl -f json --columns _uuid find dhcp_options cidr=10.0.0.0/24",
            "ovn-sbctl -t 5 list port_binding port1",
            "ip netns exec vm1 cat /sys/class/net/port1/address",
            "ip netns exec vm1 ping -c1 10.0.0.12",
            "ovs-vsctl list port port1 >/dev/null 2>&1",
            "echo oops >&2",
        ] {
            assert_eq!(policy.violation(cmd), None, "{cmd}");
        }
    }

    #[test]
    fn test_mutating_commands_are_rejected() {
        let policy = CommandPolicy::read_only();
        for cmd in [
            "ovs-vsctl add-br br-ex",
            "ovs-vsctl del-port br-int port1",
            "ovn-nbctl lsp-add net0 port4",
            "ovn-nbctl lsp-set-addresses port1 dynamic",
            "systemctl restart ovn-northd",
            "rm -rf /etc/openvswitch/conf.db",
            "ip link set br-int down",
            "echo x > /etc/hosts",
            "yum install -y openvswitch",
            "cat a | sudo tee /etc/b",
        ] {
            assert!(policy.violation(cmd).is_some(), "{cmd}");
        }
        assert_eq!(
            policy.violation("systemctl stop ovs-vswitchd"),
            Some("service-state")
        );
        assert_eq!(policy.violation("echo x >> /tmp/log"), Some("file-redirect"));
    }

    #[test]
    fn test_permissive_and_custom_rules() {
        assert_eq!(CommandPolicy::permissive().violation("rm -rf /tmp/x"), None);

        let policy = CommandPolicy::permissive()
            .with_rule(PolicyRule::new("no-curl", r"\bcurl\b"))
            .unwrap();
        assert_eq!(policy.violation("curl -s http://x"), Some("no-curl"));

        let err = CommandPolicy::permissive()
            .with_rule(PolicyRule::new("broken", "(unclosed"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicyRule { .. }));
    }
}
