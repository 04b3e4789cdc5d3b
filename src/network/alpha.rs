//! Per-fact-type condition evaluators.
//!
//! An alpha node evaluates single facts against one condition and produces
//! bound elements for the beta network. Alpha nodes are purely functional
//! over memory; the element sets live on the beta side.

use crate::conditions::{AlphaEnv, AlphaFn};
use crate::fact::{Fact, FactType};
use crate::network::NodeId;
use crate::token::Element;

/// A per-condition evaluator over single facts.
pub struct AlphaNode {
    fact_type: FactType,
    env: AlphaEnv,
    activation: AlphaFn,
    children: Vec<NodeId>,
}

impl AlphaNode {
    pub(crate) fn new(fact_type: FactType, env: AlphaEnv, activation: AlphaFn) -> Self {
        Self {
            fact_type,
            env,
            activation,
            children: Vec::new(),
        }
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    /// The fact type this node is registered under.
    #[must_use]
    pub const fn fact_type(&self) -> &FactType {
        &self.fact_type
    }

    /// The beta nodes receiving this node's elements.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Evaluate one fact; `Some` carries the condition's bindings.
    #[must_use]
    pub fn evaluate(&self, fact: &Fact) -> Option<Element> {
        let bindings = (self.activation)(fact, &self.env)?;
        Some(Element::new(fact.clone(), bindings))
    }

    /// Evaluate every supplied fact, in order, keeping the matches.
    #[must_use]
    pub fn matches(&self, facts: &[Fact]) -> Vec<Element> {
        facts.iter().filter_map(|f| self.evaluate(f)).collect()
    }
}

impl std::fmt::Debug for AlphaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaNode")
            .field("fact_type", &self.fact_type)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
