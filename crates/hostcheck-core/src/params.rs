//! Parameter sets and their cross-product expansion.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

/// An ordered tuple of named values bound into one concrete check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `name=value` pairs joined with `,`; used as the id suffix of a
    /// concrete check. Separator characters inside names and values are
    /// backslash-escaped, so distinct tuples never share a label.
    pub fn label(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", escape_label(k), escape_label(v)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn escape_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | ',' | '=' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A set of named columns and the value rows to expand over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ParamSetRepr")]
pub struct ParamSet {
    names: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ParamSet {
    /// A set with the given column names and no rows yet.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// A single column taking each of `values` in turn.
    pub fn values<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: vec![name.into()],
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    /// Append a row (builder pattern).
    pub fn row<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamSetRepr {
    Table {
        names: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Column {
        name: String,
        values: Vec<String>,
    },
}

impl TryFrom<ParamSetRepr> for ParamSet {
    type Error = String;

    fn try_from(repr: ParamSetRepr) -> Result<Self, Self::Error> {
        let set = match repr {
            ParamSetRepr::Table { names, rows } => ParamSet { names, rows },
            ParamSetRepr::Column { name, values } => ParamSet::values(name, values),
        };
        if set.names.is_empty() {
            return Err("parameter set must name at least one column".to_string());
        }
        Ok(set)
    }
}

/// Expand parameter sets into their cross product.
///
/// The first set varies slowest. With no sets the result is a single empty
/// tuple, so an unparametrized check yields exactly one instance.
pub fn expand(check: &str, sets: &[ParamSet]) -> ConfigResult<Vec<Params>> {
    let mut seen: Vec<&str> = Vec::new();
    for set in sets {
        for name in &set.names {
            if seen.contains(&name.as_str()) {
                return Err(ConfigError::DuplicateParam {
                    check: check.to_string(),
                    name: name.clone(),
                });
            }
            seen.push(name);
        }
        for (i, row) in set.rows.iter().enumerate() {
            if row.len() != set.names.len() {
                return Err(ConfigError::ParamArity {
                    check: check.to_string(),
                    row: i,
                    expected: set.names.len(),
                    got: row.len(),
                });
            }
        }
    }

    let mut product: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for set in sets {
        let mut next = Vec::with_capacity(product.len() * set.rows.len());
        for prefix in &product {
            for row in &set.rows {
                let mut tuple = prefix.clone();
                tuple.extend(set.names.iter().cloned().zip(row.iter().cloned()));
                next.push(tuple);
            }
        }
        product = next;
    }

    Ok(product.into_iter().map(Params).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_sets_yields_one_empty_tuple() {
        let expanded = expand("c", &[]).unwrap();
        assert_eq!(expanded, vec![Params::new()]);
    }

    #[test]
    fn test_cross_product_size_and_order() {
        let ports = ParamSet::new(["port", "netns"])
            .row(["port1", "vm1"])
            .row(["port2", "vm2"])
            .row(["port3", "vm3"]);
        let addrs = ParamSet::values("addr", ["10.0.0.11", "10.0.0.12", "10.0.0.13"]);

        let expanded = expand("port-ping", &[ports, addrs]).unwrap();
        assert_eq!(expanded.len(), 9);
        assert_eq!(expanded[0].label(), "port=port1,netns=vm1,addr=10.0.0.11");
        assert_eq!(expanded[1].label(), "port=port1,netns=vm1,addr=10.0.0.12");
        assert_eq!(expanded[3].label(), "port=port2,netns=vm2,addr=10.0.0.11");
        assert_eq!(expanded[8].get("addr"), Some("10.0.0.13"));
    }

    #[test]
    fn test_labels_of_distinct_tuples_differ() {
        let a = ParamSet::values("a", ["x-y", "x"]);
        let b = ParamSet::values("b", ["z", "y-z"]);
        let labels: Vec<String> = expand("c", &[a, b])
            .unwrap()
            .iter()
            .map(Params::label)
            .collect();
        assert_eq!(labels[1], "a=x-y,b=y-z");
        assert_ne!(labels[0], labels[3]);

        let tricky = Params::from_pairs([("a".to_string(), "1,b=2".to_string())]);
        assert_eq!(tricky.label(), "a=1\\,b\\=2");
    }

    #[test]
    fn test_row_arity_mismatch_is_rejected() {
        let set = ParamSet::new(["port", "mac"]).row(["port1"]);
        let err = expand("port-mac", &[set]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ParamArity {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_name_across_sets_is_rejected() {
        let a = ParamSet::values("port", ["port1"]);
        let b = ParamSet::values("port", ["port2"]);
        assert!(matches!(
            expand("c", &[a, b]),
            Err(ConfigError::DuplicateParam { .. })
        ));
    }

    #[test]
    fn test_empty_set_yields_nothing() {
        let set = ParamSet::new(["port"]);
        assert!(expand("c", &[set]).unwrap().is_empty());
    }

    #[test]
    fn test_deserialize_both_shapes() {
        let table: ParamSet =
            serde_json::from_str(r#"{"names":["port","mac"],"rows":[["port1","aa"]]}"#).unwrap();
        assert_eq!(table.len(), 1);

        let column: ParamSet =
            serde_json::from_str(r#"{"name":"service","values":["a","b","c"]}"#).unwrap();
        assert_eq!(column.names(), &["service".to_string()]);
        assert_eq!(column.len(), 3);
    }
}
