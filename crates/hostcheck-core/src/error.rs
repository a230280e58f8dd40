//! Error taxonomy for hostcheck.
//!
//! Only [`ConfigError`] is fatal to a run. Transport failures surface as the
//! `Error` outcome of a single check and never abort siblings.

/// Errors produced while parsing or rendering a command template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{name}}} in template `{template}`")]
    UnknownPlaceholder { template: String, name: String },
}

/// Registration-time errors. Any of these aborts the run before a single
/// remote command is sent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("check {check}: {source}")]
    Template {
        check: String,
        #[source]
        source: TemplateError,
    },

    #[error("check {check}: parameter set row {row} has {got} values, expected {expected}")]
    ParamArity {
        check: String,
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("check {check}: parameter `{name}` is defined more than once")]
    DuplicateParam { check: String, name: String },

    #[error("duplicate check identity: {id}")]
    DuplicateCheck { id: String },

    #[error("check {check}: invalid regex `{pattern}`: {reason}")]
    InvalidRegex {
        check: String,
        pattern: String,
        reason: String,
    },

    #[error("check {check}: command `{command}` rejected by read-only policy rule `{rule}`")]
    PolicyViolation {
        check: String,
        command: String,
        rule: String,
    },

    #[error("check name must not be empty")]
    EmptyName,

    #[error("check {check}: command must not be empty")]
    EmptyCommand { check: String },

    #[error("host group `{group}` could not be resolved: {reason}")]
    UnresolvedGroup { group: String, reason: String },

    #[error("host group `{group}` resolved to no hosts")]
    EmptyGroup { group: String },

    #[error("invalid policy rule `{pattern}`: {reason}")]
    InvalidPolicyRule { pattern: String, reason: String },
}

/// Failures of the remote executor itself. These map to the `Error`
/// outcome, never to `Fail`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("authentication to {host} failed: {reason}")]
    Authentication { host: String, reason: String },

    #[error("command on {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },

    #[error("failed to spawn transport for {host}: {reason}")]
    Spawn { host: String, reason: String },

    #[error("unknown host {host}")]
    UnknownHost { host: String },
}

/// Errors loading suite or inventory files.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for registration and configuration.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_display_names_placeholder() {
        let err = TemplateError::UnknownPlaceholder {
            template: "ovs-vsctl list port {prot}".to_string(),
            name: "prot".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("{prot}"));
        assert!(msg.contains("ovs-vsctl"));
    }

    #[test]
    fn test_transport_timeout_display() {
        let err = TransportError::Timeout {
            host: "node1".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "command on node1 timed out after 5000ms");
    }
}
