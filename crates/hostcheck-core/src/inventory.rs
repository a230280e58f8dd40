//! Host inventory: groups of hosts and how to reach them.
//!
//! Two file formats are accepted. TOML:
//!
//! ```toml
//! [defaults]
//! user = "centos"
//!
//! [hosts.ovn1]
//! address = "192.168.122.10"
//!
//! [groups.ovn_central]
//! hosts = ["ovn1"]
//!
//! [groups.ovn]
//! children = ["ovn_central", "ovn_nodes"]
//! ```
//!
//! and the Ansible INI layout (`[group]`, `[group:children]`,
//! `[group:vars]`, `ansible_host=` style host variables).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SuiteError};
use crate::executor::SshTarget;

/// The implicit group containing every host.
pub const ALL_GROUP: &str = "all";

/// How a host is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    #[default]
    Ssh,
    Local,
}

/// Connection variables; unset fields inherit from the enclosing scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostVars {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connection: Option<Connection>,
}

impl HostVars {
    /// Fill unset fields from `base`.
    fn inherit(&self, base: &HostVars) -> HostVars {
        HostVars {
            address: self.address.clone().or_else(|| base.address.clone()),
            port: self.port.or(base.port),
            user: self.user.clone().or_else(|| base.user.clone()),
            identity_file: self
                .identity_file
                .clone()
                .or_else(|| base.identity_file.clone()),
            connection: self.connection.or(base.connection),
        }
    }

    fn set_ansible(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "ansible_host" | "ansible_ssh_host" => self.address = Some(value.to_string()),
            "ansible_port" | "ansible_ssh_port" => {
                self.port = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid {key} `{value}`"))?,
                )
            }
            "ansible_user" | "ansible_ssh_user" => self.user = Some(value.to_string()),
            "ansible_ssh_private_key_file" => self.identity_file = Some(PathBuf::from(value)),
            "ansible_connection" => {
                self.connection = Some(match value {
                    "local" => Connection::Local,
                    "ssh" | "smart" | "paramiko" => Connection::Ssh,
                    other => return Err(format!("unsupported ansible_connection `{other}`")),
                })
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupDef {
    pub hosts: Vec<String>,
    pub children: Vec<String>,
    pub vars: HostVars,
}

/// A host with all variable scopes applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub name: String,
    pub connection: Connection,
    pub target: SshTarget,
}

/// Parsed inventory. Host and group order follow the source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    defaults: HostVars,
    hosts: Vec<(String, HostVars)>,
    groups: Vec<(String, GroupDef)>,
}

impl Inventory {
    /// Load by extension: `.toml` is TOML, anything else Ansible INI.
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
            path: display.clone(),
            source,
        })?;
        let parsed = if path.extension().is_some_and(|e| e == "toml") {
            Self::from_toml_str(&text)
        } else {
            Self::from_ini_str(&text)
        };
        parsed.map_err(|reason| SuiteError::Parse {
            path: display,
            reason,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let value: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
        let mut inventory = Inventory::default();
        for (key, item) in value {
            match key.as_str() {
                "defaults" => inventory.defaults = item.try_into().map_err(|e| e.to_string())?,
                "hosts" => inventory.hosts = ordered_table(item)?,
                "groups" => inventory.groups = ordered_table(item)?,
                other => return Err(format!("unknown inventory section `{other}`")),
            }
        }

        let members: Vec<String> = inventory
            .groups
            .iter()
            .flat_map(|(_, g)| g.hosts.iter().cloned())
            .collect();
        for host in members {
            inventory.ensure_host(&host);
        }
        Ok(inventory)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, String> {
        enum Section {
            Hosts(String),
            Children(String),
            Vars(String),
        }

        let mut inventory = Inventory::default();
        let mut section = Section::Hosts("ungrouped".to_string());

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let at = |msg: String| format!("line {}: {msg}", lineno + 1);

            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = match header.split_once(':') {
                    Some((name, "children")) => Section::Children(name.to_string()),
                    Some((name, "vars")) => Section::Vars(name.to_string()),
                    Some((_, kind)) => return Err(at(format!("unknown section kind `{kind}`"))),
                    None => Section::Hosts(header.to_string()),
                };
                if let Section::Hosts(name) | Section::Children(name) = &section {
                    inventory.group_mut(name);
                }
                continue;
            }

            match &section {
                Section::Hosts(group) => {
                    let mut tokens = line.split_whitespace();
                    let Some(host) = tokens.next() else { continue };
                    let mut vars = HostVars::default();
                    for token in tokens {
                        let (k, v) = token
                            .split_once('=')
                            .ok_or_else(|| at(format!("expected key=value, got `{token}`")))?;
                        vars.set_ansible(k, v).map_err(at)?;
                    }
                    let entry = inventory.ensure_host(host);
                    *entry = vars.inherit(entry);
                    let group = inventory.group_mut(group);
                    if !group.hosts.iter().any(|h| h == host) {
                        group.hosts.push(host.to_string());
                    }
                }
                Section::Children(group) => {
                    let child = line.to_string();
                    inventory.group_mut(group).children.push(child);
                }
                Section::Vars(group) => {
                    let (k, v) = line
                        .split_once('=')
                        .ok_or_else(|| at(format!("expected key=value, got `{line}`")))?;
                    let (k, v) = (k.trim(), v.trim());
                    if group == ALL_GROUP {
                        inventory.defaults.set_ansible(k, v).map_err(at)?;
                    } else {
                        inventory.group_mut(group).vars.set_ansible(k, v).map_err(at)?;
                    }
                }
            }
        }

        Ok(inventory)
    }

    /// Resolve a group (including nested children) to host names.
    pub fn resolve(&self, group: &str) -> Result<Vec<String>, ConfigError> {
        let hosts = if group == ALL_GROUP && self.group(ALL_GROUP).is_none() {
            self.hosts.iter().map(|(name, _)| name.clone()).collect()
        } else {
            let mut out = Vec::new();
            self.collect(group, &mut Vec::new(), &mut out)?;
            out
        };
        if hosts.is_empty() {
            return Err(ConfigError::EmptyGroup {
                group: group.to_string(),
            });
        }
        Ok(hosts)
    }

    fn collect(
        &self,
        group: &str,
        stack: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        if stack.iter().any(|g| g == group) {
            return Err(ConfigError::UnresolvedGroup {
                group: group.to_string(),
                reason: format!("group cycle through {}", stack.join(" -> ")),
            });
        }
        let def = self.group(group).ok_or_else(|| ConfigError::UnresolvedGroup {
            group: group.to_string(),
            reason: "not defined in inventory".to_string(),
        })?;

        stack.push(group.to_string());
        for host in &def.hosts {
            if !out.contains(host) {
                out.push(host.clone());
            }
        }
        for child in &def.children {
            self.collect(child, stack, out)?;
        }
        stack.pop();
        Ok(())
    }

    /// A host with variables applied, weakest first: defaults, vars of
    /// groups containing it through children, vars of groups listing it
    /// directly, then its own.
    pub fn host(&self, name: &str) -> Option<ResolvedHost> {
        let own = self.hosts.iter().find(|(n, _)| n == name).map(|(_, v)| v)?;
        let mut scope = self.defaults.clone();
        let direct = |g: &GroupDef| g.hosts.iter().any(|h| h == name);
        for (group, def) in &self.groups {
            if !direct(def) && self.contains(group, name, 0) {
                scope = def.vars.inherit(&scope);
            }
        }
        for (_, def) in &self.groups {
            if direct(def) {
                scope = def.vars.inherit(&scope);
            }
        }
        let vars = own.inherit(&scope);
        Some(ResolvedHost {
            name: name.to_string(),
            connection: vars.connection.unwrap_or_default(),
            target: SshTarget {
                address: vars.address.unwrap_or_else(|| name.to_string()),
                port: vars.port,
                user: vars.user,
                identity_file: vars.identity_file,
            },
        })
    }

    fn contains(&self, group: &str, host: &str, depth: usize) -> bool {
        if depth > self.groups.len() {
            return false;
        }
        self.group(group).is_some_and(|def| {
            def.hosts.iter().any(|h| h == host)
                || def
                    .children
                    .iter()
                    .any(|child| self.contains(child, host, depth + 1))
        })
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.iter().find(|(n, _)| n == name).map(|(_, g)| g)
    }

    fn group_mut(&mut self, name: &str) -> &mut GroupDef {
        let idx = match self.groups.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.groups.push((name.to_string(), GroupDef::default()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx].1
    }

    fn ensure_host(&mut self, name: &str) -> &mut HostVars {
        let idx = match self.hosts.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.hosts.push((name.to_string(), HostVars::default()));
                self.hosts.len() - 1
            }
        };
        &mut self.hosts[idx].1
    }
}

/// Deserialize a TOML table into `(key, value)` pairs in source order.
fn ordered_table<T: serde::de::DeserializeOwned>(
    item: toml::Value,
) -> Result<Vec<(String, T)>, String> {
    let toml::Value::Table(table) = item else {
        return Err("expected a table".to_string());
    };
    table
        .into_iter()
        .map(|(k, v)| {
            let parsed: T = v.try_into().map_err(|e| format!("{k}: {e}"))?;
            Ok::<_, String>((k, parsed))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const INI: &str = r#"
# lab inventory
[ovn_central]
ovn1 ansible_host=192.168.122.10

[ovn_nodes]
ovn1
ovn2 ansible_host=192.168.122.11 ansible_port=2222
ovn3 ansible_host=192.168.122.12

[ovn:children]
ovn_central
ovn_nodes

[ovn_nodes:vars]
ansible_user=cloud-user

[all:vars]
ansible_user=centos
ansible_ssh_private_key_file=/home/ci/.ssh/id_ed25519
"#;

    #[test]
    fn test_ini_groups_and_children() {
        let inv = Inventory::from_ini_str(INI).unwrap();
        assert_eq!(inv.resolve("ovn_central").unwrap(), vec!["ovn1"]);
        assert_eq!(inv.resolve("ovn_nodes").unwrap(), vec!["ovn1", "ovn2", "ovn3"]);
        assert_eq!(inv.resolve("ovn").unwrap(), vec!["ovn1", "ovn2", "ovn3"]);
        assert_eq!(inv.resolve(ALL_GROUP).unwrap(), vec!["ovn1", "ovn2", "ovn3"]);
    }

    #[test]
    fn test_ini_variable_scopes() {
        let inv = Inventory::from_ini_str(INI).unwrap();

        let ovn2 = inv.host("ovn2").unwrap();
        assert_eq!(ovn2.target.address, "192.168.122.11");
        assert_eq!(ovn2.target.port, Some(2222));
        assert_eq!(ovn2.target.user.as_deref(), Some("cloud-user"));
        assert_eq!(
            ovn2.target.identity_file,
            Some(PathBuf::from("/home/ci/.ssh/id_ed25519"))
        );
        assert_eq!(ovn2.connection, Connection::Ssh);
    }

    #[test]
    fn test_parent_group_vars_are_weaker_than_direct() {
        let inv = Inventory::from_ini_str(
            "[central]\nc1\n[nodes]\nn1\n[ovn:children]\ncentral\nnodes\n\
             [ovn:vars]\nansible_user=centos\nansible_port=2200\n\
             [nodes:vars]\nansible_user=cloud-user\n",
        )
        .unwrap();
        let c1 = inv.host("c1").unwrap();
        assert_eq!(c1.target.user.as_deref(), Some("centos"));
        let n1 = inv.host("n1").unwrap();
        assert_eq!(n1.target.user.as_deref(), Some("cloud-user"));
        assert_eq!(n1.target.port, Some(2200));
    }

    #[test]
    fn test_unknown_group_and_cycle() {
        let inv = Inventory::from_ini_str(INI).unwrap();
        assert!(matches!(
            inv.resolve("ovn_compute"),
            Err(ConfigError::UnresolvedGroup { .. })
        ));

        let cyclic = Inventory::from_ini_str("[a:children]\nb\n[b:children]\na\n").unwrap();
        let err = cyclic.resolve("a").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_empty_group_is_rejected() {
        let inv = Inventory::from_ini_str("[empty]\n[full]\nnode1\n").unwrap();
        assert!(matches!(
            inv.resolve("empty"),
            Err(ConfigError::EmptyGroup { .. })
        ));
    }

    #[test]
    fn test_ini_bad_port() {
        let err = Inventory::from_ini_str("[g]\nnode1 ansible_port=ssh\n").unwrap_err();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn test_toml_inventory() {
        let inv = Inventory::from_toml_str(
            r#"
            [defaults]
            user = "centos"

            [hosts.ovn1]
            address = "192.168.122.10"

            [hosts.local]
            connection = "local"

            [groups.ovn_central]
            hosts = ["ovn1"]

            [groups.ovn_nodes]
            hosts = ["ovn1", "ovn2"]

            [groups.ovn]
            children = ["ovn_central", "ovn_nodes"]
            "#,
        )
        .unwrap();

        assert_eq!(inv.resolve("ovn").unwrap(), vec!["ovn1", "ovn2"]);
        let ovn2 = inv.host("ovn2").unwrap();
        assert_eq!(ovn2.target.address, "ovn2");
        assert_eq!(ovn2.target.user.as_deref(), Some("centos"));
        assert_eq!(inv.host("local").unwrap().connection, Connection::Local);
        assert!(inv.host("ovn9").is_none());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("hosts");
        std::fs::write(&ini, "[ovn_nodes]\nnode1\n").unwrap();
        assert_eq!(
            Inventory::load(&ini).unwrap().resolve("ovn_nodes").unwrap(),
            vec!["node1"]
        );

        let bad = dir.path().join("inventory.toml");
        std::fs::write(&bad, "[groups\n").unwrap();
        assert!(matches!(
            Inventory::load(&bad),
            Err(SuiteError::Parse { .. })
        ));
    }
}
