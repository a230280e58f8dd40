//! Expected-result predicates.
//!
//! [`Expect`] is the declarative form loaded from suite files. Every string
//! it holds is a [`Template`], bound together with the check's command.
//! Evaluation produces a [`Verdict`] carrying both the expectation and the
//! observed value so failures can be rendered as a diff.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::executor::CommandOutput;
use crate::params::Params;
use crate::template::{RuntimeVars, Template};

/// Result of evaluating a predicate against one command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub expected: String,
    pub actual: String,
}

impl Verdict {
    pub fn new(passed: bool, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            passed,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// How a piece of text is compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Equal after trimming surrounding whitespace.
    Equals(Template),
    Contains(Template),
    NotContains(Template),
    StartsWith(Template),
    Regex(Template),
}

impl Matcher {
    fn template(&self) -> &Template {
        match self {
            Matcher::Equals(t)
            | Matcher::Contains(t)
            | Matcher::NotContains(t)
            | Matcher::StartsWith(t)
            | Matcher::Regex(t) => t,
        }
    }

    fn bind(&self, params: &Params) -> Result<Matcher, TemplateError> {
        let t = self.template().bind(params)?;
        Ok(match self {
            Matcher::Equals(_) => Matcher::Equals(t),
            Matcher::Contains(_) => Matcher::Contains(t),
            Matcher::NotContains(_) => Matcher::NotContains(t),
            Matcher::StartsWith(_) => Matcher::StartsWith(t),
            Matcher::Regex(_) => Matcher::Regex(t),
        })
    }

    fn apply(&self, subject: &str, text: &str, vars: &RuntimeVars) -> Verdict {
        let want = match self.template().render(vars) {
            Ok(want) => want,
            Err(e) => return Verdict::new(false, self.template().text(), e.to_string()),
        };
        match self {
            Matcher::Equals(_) => Verdict::new(text.trim() == want.trim(), want.trim(), text.trim()),
            Matcher::Contains(_) => Verdict::new(
                text.contains(&want),
                format!("{subject} contains `{want}`"),
                text,
            ),
            Matcher::NotContains(_) => Verdict::new(
                !text.contains(&want),
                format!("{subject} does not contain `{want}`"),
                text,
            ),
            Matcher::StartsWith(_) => Verdict::new(
                text.trim_start().starts_with(&want),
                format!("{subject} starts with `{want}`"),
                text,
            ),
            Matcher::Regex(_) => match Regex::new(&want) {
                Ok(re) => Verdict::new(re.is_match(text), format!("{subject} matches /{want}/"), text),
                Err(e) => Verdict::new(false, format!("{subject} matches /{want}/"), e.to_string()),
            },
        }
    }
}

type PredicateFn = dyn Fn(&CommandOutput, &Params) -> Verdict + Send + Sync;

/// A programmatic predicate. Receives the check's bound parameters.
#[derive(Clone)]
pub struct CustomPredicate {
    label: String,
    f: Arc<PredicateFn>,
}

impl CustomPredicate {
    pub fn new<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CommandOutput, &Params) -> Verdict + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Declarative expected predicate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expect {
    /// Exit status 0.
    #[default]
    Success,
    Exit {
        status: i32,
    },
    Stdout {
        #[serde(flatten)]
        matcher: Matcher,
    },
    Stderr {
        #[serde(flatten)]
        matcher: Matcher,
    },
    /// Parse stdout as JSON and match the value at an RFC 6901 pointer.
    Json {
        pointer: Template,
        #[serde(flatten)]
        matcher: Matcher,
    },
    All {
        of: Vec<Expect>,
    },
    Any {
        of: Vec<Expect>,
    },
    Not {
        inner: Box<Expect>,
    },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl Expect {
    pub fn exit(status: i32) -> Self {
        Expect::Exit { status }
    }

    pub fn stdout(matcher: Matcher) -> Self {
        Expect::Stdout { matcher }
    }

    pub fn stderr(matcher: Matcher) -> Self {
        Expect::Stderr { matcher }
    }

    pub fn json(pointer: impl Into<Template>, matcher: Matcher) -> Self {
        Expect::Json {
            pointer: pointer.into(),
            matcher,
        }
    }

    pub fn all(of: Vec<Expect>) -> Self {
        Expect::All { of }
    }

    pub fn custom<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CommandOutput, &Params) -> Verdict + Send + Sync + 'static,
    {
        Expect::Custom(CustomPredicate::new(label, f))
    }

    /// Substitute parameter values into every template.
    pub fn bind(&self, params: &Params) -> Result<Expect, TemplateError> {
        Ok(match self {
            Expect::Success => Expect::Success,
            Expect::Exit { status } => Expect::Exit { status: *status },
            Expect::Stdout { matcher } => Expect::Stdout {
                matcher: matcher.bind(params)?,
            },
            Expect::Stderr { matcher } => Expect::Stderr {
                matcher: matcher.bind(params)?,
            },
            Expect::Json { pointer, matcher } => Expect::Json {
                pointer: pointer.bind(params)?,
                matcher: matcher.bind(params)?,
            },
            Expect::All { of } => Expect::All {
                of: of.iter().map(|e| e.bind(params)).collect::<Result<_, _>>()?,
            },
            Expect::Any { of } => Expect::Any {
                of: of.iter().map(|e| e.bind(params)).collect::<Result<_, _>>()?,
            },
            Expect::Not { inner } => Expect::Not {
                inner: Box::new(inner.bind(params)?),
            },
            Expect::Custom(c) => Expect::Custom(c.clone()),
        })
    }

    /// Compile every fully resolved regex. Returns the first offending
    /// pattern with the compiler's message.
    pub fn check_regexes(&self) -> Result<(), (String, String)> {
        match self {
            Expect::Stdout { matcher } | Expect::Stderr { matcher } | Expect::Json { matcher, .. } => {
                if let Matcher::Regex(t) = matcher {
                    if let Some(pattern) = t.resolved() {
                        Regex::new(&pattern).map_err(|e| (pattern, e.to_string()))?;
                    }
                }
                Ok(())
            }
            Expect::All { of } | Expect::Any { of } => of.iter().try_for_each(Expect::check_regexes),
            Expect::Not { inner } => inner.check_regexes(),
            Expect::Success | Expect::Exit { .. } | Expect::Custom(_) => Ok(()),
        }
    }

    pub fn evaluate(&self, output: &CommandOutput, vars: &RuntimeVars, params: &Params) -> Verdict {
        match self {
            Expect::Success => Verdict::new(
                output.exit_status == 0,
                "exit status 0",
                format!("exit status {}", output.exit_status),
            ),
            Expect::Exit { status } => Verdict::new(
                output.exit_status == *status,
                format!("exit status {status}"),
                format!("exit status {}", output.exit_status),
            ),
            Expect::Stdout { matcher } => matcher.apply("stdout", &output.stdout, vars),
            Expect::Stderr { matcher } => matcher.apply("stderr", &output.stderr, vars),
            Expect::Json { pointer, matcher } => {
                let pointer = match pointer.render(vars) {
                    Ok(p) => p,
                    Err(e) => return Verdict::new(false, pointer.to_string(), e.to_string()),
                };
                let value: serde_json::Value = match serde_json::from_str(&output.stdout) {
                    Ok(v) => v,
                    Err(e) => {
                        return Verdict::new(
                            false,
                            format!("stdout is JSON with a value at {pointer}"),
                            format!("invalid JSON ({e}): {}", output.stdout),
                        )
                    }
                };
                match value.pointer(&pointer) {
                    Some(serde_json::Value::String(s)) => matcher.apply(&pointer, s, vars),
                    Some(other) => matcher.apply(&pointer, &other.to_string(), vars),
                    None => Verdict::new(
                        false,
                        format!("a value at {pointer}"),
                        format!("no value at {pointer} in {}", output.stdout.trim()),
                    ),
                }
            }
            Expect::All { of } => {
                let verdicts: Vec<Verdict> =
                    of.iter().map(|e| e.evaluate(output, vars, params)).collect();
                let expected = join_expected(&verdicts, " and ");
                match verdicts.iter().find(|v| !v.passed) {
                    Some(failed) => Verdict::new(false, expected, failed.actual.clone()),
                    None => Verdict::new(true, expected, last_actual(&verdicts)),
                }
            }
            Expect::Any { of } => {
                let verdicts: Vec<Verdict> =
                    of.iter().map(|e| e.evaluate(output, vars, params)).collect();
                let expected = join_expected(&verdicts, " or ");
                match verdicts.iter().find(|v| v.passed) {
                    Some(passed) => Verdict::new(true, expected, passed.actual.clone()),
                    None => Verdict::new(false, expected, last_actual(&verdicts)),
                }
            }
            Expect::Not { inner } => {
                let v = inner.evaluate(output, vars, params);
                Verdict::new(!v.passed, format!("not ({})", v.expected), v.actual)
            }
            Expect::Custom(c) => (c.f)(output, params),
        }
    }
}

fn join_expected(verdicts: &[Verdict], sep: &str) -> String {
    verdicts
        .iter()
        .map(|v| v.expected.as_str())
        .collect::<Vec<_>>()
        .join(sep)
}

fn last_actual(verdicts: &[Verdict]) -> String {
    verdicts.last().map(|v| v.actual.clone()).unwrap_or_default()
}
