//! Facts and fact types.
//!
//! A fact is an opaque user-supplied record: a type tag plus a set of named
//! fields. The type tag indexes the alpha roots of the network; the fields
//! are what conditions inspect. Facts are value-comparable: retraction
//! removes the fact equal to the one inserted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The inspectable type tag of a fact, used to index alpha roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactType(String);

impl FactType {
    /// Create a fact type from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FactType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FactType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// An opaque user-supplied fact: a type tag plus named fields.
///
/// Fields are kept in an ordered map so facts hash and compare
/// deterministically regardless of construction order.
///
/// # Examples
///
/// ```
/// use ruleforge::{Fact, Value};
///
/// let person = Fact::new("Person")
///     .with("name", "Alice")
///     .with("age", 30);
/// assert_eq!(person.field("age"), Some(&Value::Int(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    fact_type: FactType,
    fields: BTreeMap<String, Value>,
}

impl Fact {
    /// Create an empty fact of the given type.
    #[must_use]
    pub fn new(fact_type: impl Into<FactType>) -> Self {
        Self {
            fact_type: fact_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, consuming and returning the fact.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The fact's type tag.
    #[must_use]
    pub const fn fact_type(&self) -> &FactType {
        &self.fact_type
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterate fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl std::fmt::Display for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.fact_type)?;
        let mut first = true;
        for (name, value) in &self.fields {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        write!(f, "}}")
    }
}
