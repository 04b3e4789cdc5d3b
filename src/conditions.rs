//! Ready-made alpha condition closures.
//!
//! The rule compiler is an external collaborator: it hands the core alpha
//! activation functions with the contract `(fact, env) -> bindings or no
//! match`. This module provides the building blocks such a compiler (and the
//! test suite) composes: constant tests, comparisons, variable binding, and
//! regex matches over string fields.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::error::{BuildError, ForgeError, ForgeResult};
use crate::fact::Fact;
use crate::value::Value;

/// Opaque per-node configuration supplied at compile time.
pub type AlphaEnv = Bindings;

/// An alpha activation function: evaluates one fact against a condition and
/// yields the condition's bindings on success.
pub type AlphaFn = Arc<dyn Fn(&Fact, &AlphaEnv) -> Option<Bindings> + Send + Sync>;

/// Comparison operators for [`field_cmp`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl Cmp {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
            Self::Ne => ord != Ordering::Equal,
        }
    }
}

/// Matches every fact of the node's type, binding nothing.
#[must_use]
pub fn always() -> AlphaFn {
    Arc::new(|_, _| Some(Bindings::new()))
}

/// Binds a field's value to a variable. No match if the field is absent.
#[must_use]
pub fn bind_field(field: impl Into<String>, var: impl Into<String>) -> AlphaFn {
    let field = field.into();
    let var = var.into();
    Arc::new(move |fact, _| {
        let value = fact.field(&field)?;
        Some(Bindings::new().with(var.clone(), value.clone()))
    })
}

/// Matches when a field equals a constant. Binds nothing.
#[must_use]
pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> AlphaFn {
    let field = field.into();
    let value = value.into();
    Arc::new(move |fact, _| {
        if fact.field(&field)? == &value {
            Some(Bindings::new())
        } else {
            None
        }
    })
}

/// Matches when a field equals a value taken from the node's compile-time
/// environment. Binds nothing. No match if the environment key is absent.
#[must_use]
pub fn field_eq_env(field: impl Into<String>, env_key: impl Into<String>) -> AlphaFn {
    let field = field.into();
    let env_key = env_key.into();
    Arc::new(move |fact, env| {
        if fact.field(&field)? == env.get(&env_key)? {
            Some(Bindings::new())
        } else {
            None
        }
    })
}

/// Matches when a field compares against a constant under `cmp`.
/// Incomparable values are no match.
#[must_use]
pub fn field_cmp(field: impl Into<String>, cmp: Cmp, value: impl Into<Value>) -> AlphaFn {
    let field = field.into();
    let value = value.into();
    Arc::new(move |fact, _| {
        let ord = fact.field(&field)?.compare(&value)?;
        if cmp.accepts(ord) {
            Some(Bindings::new())
        } else {
            None
        }
    })
}

/// Matches when a string field matches the regex. Binds nothing.
///
/// The pattern is compiled once, here, so an invalid pattern fails at
/// rulebase build time rather than during propagation. Each condition owns
/// its compiled regex; conditions sharing a pattern share it through the
/// cloned `AlphaFn`, not through any global state.
pub fn field_matches(field: impl Into<String>, pattern: &str) -> ForgeResult<AlphaFn> {
    let field = field.into();
    let re = regex::Regex::new(pattern).map_err(|e| {
        ForgeError::Build(BuildError::InvalidCondition {
            reason: format!("invalid regex '{pattern}': {e}"),
        })
    })?;
    Ok(Arc::new(move |fact, _| {
        let text = fact.field(&field)?.as_string()?;
        if re.is_match(text) {
            Some(Bindings::new())
        } else {
            None
        }
    }))
}

/// Conjunction: matches when every part matches, merging their bindings in
/// order (later parts win on conflicting variables).
#[must_use]
pub fn all(parts: Vec<AlphaFn>) -> AlphaFn {
    Arc::new(move |fact, env| {
        let mut bindings = Bindings::new();
        for part in &parts {
            bindings = bindings.merge(&part(fact, env)?);
        }
        Some(bindings)
    })
}
