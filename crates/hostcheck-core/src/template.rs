//! Command templates with `{name}` placeholders.
//!
//! A placeholder is `{` + identifier + `}`. `{{` and `}}` are literal
//! braces. Any other brace text (for example a regex quantifier `{1,3}`)
//! is kept literally.
//!
//! Templates are bound in two stages: parameter values at registration
//! ([`Template::bind`]), then the per-host runtime variables at execution
//! ([`Template::render`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::params::Params;

/// Placeholders that are always defined at execution time.
pub const RUNTIME_PLACEHOLDERS: [&str; 2] = ["host", "group"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Per-host values substituted into runtime placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVars {
    pub host: String,
    pub group: String,
}

impl RuntimeVars {
    pub fn new(host: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            group: group.into(),
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "host" => Some(&self.host),
            "group" => Some(&self.group),
            _ => None,
        }
    }
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template. Parsing never fails; unknown names are only
    /// rejected when the template is bound.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(c) = rest.chars().next() {
            match c {
                '{' if rest.starts_with("{{") => {
                    literal.push('{');
                    rest = &rest[2..];
                }
                '}' if rest.starts_with("}}") => {
                    literal.push('}');
                    rest = &rest[2..];
                }
                '{' => match rest[1..].find('}') {
                    Some(end) if is_identifier(&rest[1..=end]) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Placeholder(rest[1..=end].to_string()));
                        rest = &rest[end + 2..];
                    }
                    _ => {
                        literal.push('{');
                        rest = &rest[1..];
                    }
                },
                _ => {
                    literal.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    /// Names of all unbound placeholders, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template has no placeholders left.
    pub fn is_resolved(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Substitute parameter values. Runtime placeholders are kept for
    /// [`render`](Self::render); any other unknown name is an error.
    pub fn bind(&self, params: &Params) -> Result<Template, TemplateError> {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let next = match segment {
                Segment::Literal(text) => Segment::Literal(text.clone()),
                Segment::Placeholder(name) => match params.get(name) {
                    Some(value) => Segment::Literal(value.to_string()),
                    None if RUNTIME_PLACEHOLDERS.contains(&name.as_str()) => segment.clone(),
                    None => {
                        return Err(TemplateError::UnknownPlaceholder {
                            template: self.to_string(),
                            name: name.clone(),
                        })
                    }
                },
            };
            match (segments.last_mut(), next) {
                (Some(Segment::Literal(prev)), Segment::Literal(text)) => prev.push_str(&text),
                (_, next) => segments.push(next),
            }
        }
        Ok(Template { segments })
    }

    /// Produce the final string for one host.
    pub fn render(&self, vars: &RuntimeVars) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(TemplateError::UnknownPlaceholder {
                            template: self.to_string(),
                            name: name.clone(),
                        })
                    }
                },
            }
        }
        Ok(out)
    }

    /// The literal text of a resolved template.
    pub fn resolved(&self) -> Option<String> {
        self.is_resolved().then(|| {
            self.segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(text) => text.as_str(),
                    Segment::Placeholder(_) => "",
                })
                .collect()
        })
    }

    /// Human-readable text: literals unescaped, remaining placeholders
    /// shown as `{name}`. Unlike [`Display`](fmt::Display) this does not
    /// round-trip through [`parse`](Self::parse).
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(name) => format!("{{{name}}}"),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| match s {
            Segment::Literal(text) => text.trim().is_empty(),
            Segment::Placeholder(_) => false,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    f.write_str(&text.replace('{', "{{").replace('}', "}}"))?
                }
                Segment::Placeholder(name) => write!(f, "{{{name}}}")?,
            }
        }
        Ok(())
    }
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Template::parse(&source)
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Template::parse(source)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> Self {
        template.to_string()
    }
}
