//! Variable binding environments.
//!
//! A binding environment maps variable names (conventionally prefixed `?`)
//! to values. Environments are ordered maps so projections used as grouping
//! keys hash and compare deterministically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A mapping from variable name to value. The empty environment is the root.
///
/// # Examples
///
/// ```
/// use ruleforge::{Bindings, Value};
///
/// let env = Bindings::new().with("?name", "Alice").with("?age", 30);
/// assert_eq!(env.get("?age"), Some(&Value::Int(30)));
/// assert_eq!(env.project(&["?name".to_string()]).len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    /// The empty environment.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Bind a variable, consuming and returning the environment.
    #[must_use]
    pub fn with(mut self, var: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(var.into(), value.into());
        self
    }

    /// Bind a variable in place.
    pub fn bind(&mut self, var: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(var.into(), value.into());
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, var: &str) -> Option<&Value> {
        self.0.get(var)
    }

    /// Whether the variable is bound.
    #[must_use]
    pub fn contains(&self, var: &str) -> bool {
        self.0.contains_key(var)
    }

    /// Whether every named variable is bound.
    #[must_use]
    pub fn contains_all(&self, vars: &[String]) -> bool {
        vars.iter().all(|v| self.0.contains_key(v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The projection of this environment onto the given variables.
    ///
    /// Variables absent from the environment are absent from the projection.
    #[must_use]
    pub fn project(&self, vars: &[String]) -> Self {
        let mut out = BTreeMap::new();
        for var in vars {
            if let Some(value) = self.0.get(var) {
                out.insert(var.clone(), value.clone());
            }
        }
        Self(out)
    }

    /// Union with `other`; on conflict, `other`'s binding wins.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut out = self.0.clone();
        for (var, value) in &other.0 {
            out.insert(var.clone(), value.clone());
        }
        Self(out)
    }

    /// Iterate bindings in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (var, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{var}={value}")?;
            first = false;
        }
        write!(f, "}}")
    }
}
