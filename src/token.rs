//! Tokens, elements, and activations: the currency of the beta network.
//!
//! Elements enter from the alpha side; tokens flow down the left side and
//! record the provenance of a partial match. Both are plain values: equality
//! and hashing are structural, which is what lets retraction find exactly
//! what propagation produced and lets the insertion log key by token.

use serde::{Deserialize, Serialize};

use crate::bindings::Bindings;
use crate::fact::Fact;
use crate::network::{ConditionId, NodeId};
use crate::value::Value;

/// A single-fact match produced by an alpha node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    /// The matched fact.
    pub fact: Fact,
    /// Bindings produced by the alpha condition for this fact.
    pub bindings: Bindings,
}

impl Element {
    /// Create an element from a fact and its condition bindings.
    #[must_use]
    pub const fn new(fact: Fact, bindings: Bindings) -> Self {
        Self { fact, bindings }
    }
}

/// What a token's match slot holds: a real fact, or a value derived by an
/// accumulator.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Matched {
    Fact(Fact),
    Derived(Value),
}

/// A partial match: an ordered provenance of (matched, condition) pairs plus
/// the cumulative variable environment.
///
/// The empty token seeds the beta roots at session construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Token {
    /// Provenance of this partial match, in condition order.
    pub matches: Vec<(Matched, ConditionId)>,
    /// Cumulative variable environment.
    pub bindings: Bindings,
}

impl Token {
    /// The empty token `((), {})`.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            matches: Vec::new(),
            bindings: Bindings::new(),
        }
    }

    /// A new token extending this one by a matched item and extra bindings.
    ///
    /// The extra bindings are merged under the token's own (the token wins
    /// on conflict, matching join semantics).
    #[must_use]
    pub fn extend(&self, matched: Matched, condition: ConditionId, extra: &Bindings) -> Self {
        let mut matches = self.matches.clone();
        matches.push((matched, condition));
        Self {
            matches,
            bindings: extra.merge(&self.bindings),
        }
    }
}

/// A pending execution of a production's RHS for a specific token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activation {
    /// The production node to fire.
    pub node: NodeId,
    /// The token whose bindings the RHS receives.
    pub token: Token,
    /// Agenda priority, copied from the production.
    pub salience: i32,
}
